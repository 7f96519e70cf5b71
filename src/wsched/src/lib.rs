#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod blend_scheduler;
pub mod chunk_disk;
pub mod chunk_state;
pub mod foreman;
pub mod group_scheduler;
pub mod grouped_queue;
pub mod scan_scheduler;
pub mod scheduler;
pub mod task;

pub use blend_scheduler::BlendScheduler;
pub use chunk_disk::ChunkDisk;
pub use chunk_state::ChunkState;
pub use foreman::{Foreman, ForemanConfig, TaskRunner};
pub use group_scheduler::GroupScheduler;
pub use scan_scheduler::ScanScheduler;
pub use scheduler::{RunnerWatcher, Scheduler, TaskQueue};
pub use task::{Task, TaskSink};

/// Tasks a scheduler lets run at once unless configured otherwise.
pub const DEFAULT_MAX_RUNNING: usize = 4;
