#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod exec_status;
pub mod executive;
pub mod message_store;
pub mod resource_unit;
pub mod result_receiver;
pub mod table_merger;
pub mod transport;

pub use exec_status::{ExecStatus, State};
pub use executive::{Executive, ExecutiveConfig, Spec};
pub use message_store::{MessageStore, QueryMessage};
pub use resource_unit::ResourceUnit;
pub use result_receiver::{ErrorClass, ReceiverError, ReceiverObserver, ResultReceiver};
pub use table_merger::TableMerger;
pub use transport::Transport;
