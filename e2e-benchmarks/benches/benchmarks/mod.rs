pub mod mergebench;
pub mod planbench;
pub mod schedbench;
