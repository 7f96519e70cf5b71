use crate::grouped_queue::GroupedQueue;
use crate::scheduler::{RunnerWatcher, Scheduler, TaskQueue};
use crate::task::Task;
use crate::DEFAULT_MAX_RUNNING;
use common::ChunkId;
use std::sync::{Arc, Mutex};

fn task_chunk(t: &Arc<Task>) -> ChunkId {
    t.chunk_id()
}

/// Scheduler for small interactive tasks.
///
/// Roughly FIFO, except that tasks for a chunk already queued run right after
/// it to reuse its I/O.
pub struct GroupScheduler {
    max_running: usize,
    queue: Mutex<GroupedQueue<Arc<Task>, ChunkId>>,
}

struct GroupWatcher;

impl RunnerWatcher for GroupWatcher {
    fn handle_start(&self, task: &Arc<Task>) {
        trace!("Group start {}", task.id());
    }

    fn handle_finish(&self, task: &Arc<Task>) {
        trace!("Group finish {}", task.id());
    }
}

impl GroupScheduler {
    pub fn new(max_running: usize) -> Self {
        GroupScheduler {
            max_running,
            queue: Mutex::new(GroupedQueue::new(task_chunk)),
        }
    }

    pub fn max_running(&self) -> usize {
        self.max_running
    }

    fn enqueue(queue: &mut GroupedQueue<Arc<Task>, ChunkId>, incoming: Arc<Task>) {
        debug!("Adding new task: {}", incoming);
        queue.insert(incoming);
    }

    fn next_if_avail(&self, queue: &mut GroupedQueue<Arc<Task>, ChunkId>, running: usize) -> TaskQueue {
        let available = self.max_running.saturating_sub(running);
        let mut ready = TaskQueue::new();
        while ready.len() < available {
            match queue.pop_front() {
                Some(t) => ready.push(t),
                None => break,
            }
        }
        if !ready.is_empty() {
            debug!("Returning {} to launch", ready.len());
        }
        ready
    }
}

impl Default for GroupScheduler {
    fn default() -> Self {
        GroupScheduler::new(DEFAULT_MAX_RUNNING)
    }
}

impl Scheduler for GroupScheduler {
    fn queue_task(&self, incoming: Arc<Task>) {
        let mut queue = self.queue.lock().unwrap();
        GroupScheduler::enqueue(&mut queue, incoming);
    }

    fn new_task_act(&self, incoming: Arc<Task>, running: usize) -> TaskQueue {
        let mut queue = self.queue.lock().unwrap();
        GroupScheduler::enqueue(&mut queue, incoming);
        self.next_if_avail(&mut queue, running)
    }

    fn task_finish_act(&self, finished: &Arc<Task>, running: usize) -> TaskQueue {
        let mut queue = self.queue.lock().unwrap();
        debug!("Completed: {}", finished);
        self.next_if_avail(&mut queue, running)
    }

    fn nop_act(&self, running: usize) -> TaskQueue {
        let mut queue = self.queue.lock().unwrap();
        self.next_if_avail(&mut queue, running)
    }

    fn watcher(&self) -> Arc<dyn RunnerWatcher> {
        Arc::new(GroupWatcher)
    }

    fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testutil::make_task;
    use common::SessionId;

    #[test]
    fn test_max_running() {
        let gs = GroupScheduler::default();
        let s = SessionId::new();
        assert_eq!(1, gs.new_task_act(make_task(s, 1, false), 0).len());
        assert!(gs.new_task_act(make_task(s, 2, false), 4).is_empty());
        assert_eq!(1, gs.queued());
        for c in 3..8 {
            gs.queue_task(make_task(s, c, false));
        }
        let ready = gs.nop_act(1);
        assert_eq!(3, ready.len());
        assert_eq!(2, ready[0].chunk_id());
        assert_eq!(3, gs.queued());
    }

    #[test]
    fn test_same_chunk_back_to_back() {
        let gs = GroupScheduler::new(1);
        let s = SessionId::new();
        gs.queue_task(make_task(s, 1, false));
        gs.queue_task(make_task(s, 2, false));
        gs.queue_task(make_task(s, 1, false));
        let t = gs.nop_act(0).pop().unwrap();
        assert_eq!(1, t.chunk_id());
        let next = gs.task_finish_act(&t, 0);
        assert_eq!(1, next[0].chunk_id());
        assert_eq!(2, gs.task_finish_act(&next[0], 0)[0].chunk_id());
    }
}
