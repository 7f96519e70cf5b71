use crate::task::Task;
use std::sync::Arc;

/// Tasks a scheduler has decided to start, in start order.
pub type TaskQueue = Vec<Arc<Task>>;

/// Observes runners picking up and finishing tasks.
pub trait RunnerWatcher: Send + Sync {
    fn handle_start(&self, task: &Arc<Task>);
    fn handle_finish(&self, task: &Arc<Task>);
}

/// Decides which queued tasks a worker runs next.
///
/// Every act returns the tasks to start now, possibly none. `running` is the
/// number of tasks currently running on the worker.
pub trait Scheduler: Send + Sync {
    /// Queues a task without starting anything.
    fn queue_task(&self, incoming: Arc<Task>);

    /// Queues a newly accepted task.
    fn new_task_act(&self, incoming: Arc<Task>, running: usize) -> TaskQueue;

    /// Reacts to a task finishing.
    fn task_finish_act(&self, finished: &Arc<Task>, running: usize) -> TaskQueue;

    /// Hands out ready work when nothing happened.
    fn nop_act(&self, running: usize) -> TaskQueue;

    /// Watcher to notify about task starts and finishes.
    fn watcher(&self) -> Arc<dyn RunnerWatcher>;

    /// Number of queued tasks not yet started.
    fn queued(&self) -> usize;
}
