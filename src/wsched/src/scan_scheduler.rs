use crate::chunk_disk::ChunkDisk;
use crate::scheduler::{RunnerWatcher, Scheduler, TaskQueue};
use crate::task::Task;
use crate::DEFAULT_MAX_RUNNING;
use std::sync::{Arc, Mutex};

/// Scheduler for tasks scanning partitioned tables.
///
/// Scans one chunk at a time in ascending chunk order, letting every queued
/// query on that chunk share its I/O.
pub struct ScanScheduler {
    max_running: usize,
    disk: Arc<ChunkDisk>,
    mutex: Mutex<()>,
}

/// Keeps the disk's in-flight set current.
struct ChunkDiskWatcher {
    disk: Arc<ChunkDisk>,
}

impl RunnerWatcher for ChunkDiskWatcher {
    fn handle_start(&self, task: &Arc<Task>) {
        self.disk.register_inflight(task);
    }

    fn handle_finish(&self, task: &Arc<Task>) {
        self.disk.remove_inflight(task);
    }
}

impl ScanScheduler {
    pub fn new(max_running: usize) -> Self {
        ScanScheduler {
            max_running,
            disk: Arc::new(ChunkDisk::new()),
            mutex: Mutex::new(()),
        }
    }

    pub fn max_running(&self) -> usize {
        self.max_running
    }

    pub fn disk(&self) -> &Arc<ChunkDisk> {
        &self.disk
    }

    fn next_if_avail(&self, running: usize) -> TaskQueue {
        let available = self.max_running.saturating_sub(running);
        let mut ready = TaskQueue::new();
        if available == 0 {
            return ready;
        }
        let allow_new_chunk = !self.disk.busy() && !self.disk.empty();
        while ready.len() < available {
            match self.disk.get_next(allow_new_chunk) {
                Some(t) => {
                    debug!("Making ready: {}", t);
                    ready.push(t);
                }
                None => break,
            }
        }
        if !ready.is_empty() {
            debug!("Returning {} to launch", ready.len());
        }
        ready
    }
}

impl Default for ScanScheduler {
    fn default() -> Self {
        ScanScheduler::new(DEFAULT_MAX_RUNNING)
    }
}

impl Scheduler for ScanScheduler {
    fn queue_task(&self, incoming: Arc<Task>) {
        let _guard = self.mutex.lock().unwrap();
        debug!("Adding new task: {}", incoming);
        self.disk.enqueue(incoming);
    }

    fn new_task_act(&self, incoming: Arc<Task>, running: usize) -> TaskQueue {
        let _guard = self.mutex.lock().unwrap();
        debug!("Adding new task: {}", incoming);
        self.disk.enqueue(incoming);
        self.next_if_avail(running)
    }

    fn task_finish_act(&self, finished: &Arc<Task>, running: usize) -> TaskQueue {
        let _guard = self.mutex.lock().unwrap();
        debug!("Completed: {}", finished);
        self.next_if_avail(running)
    }

    fn nop_act(&self, running: usize) -> TaskQueue {
        let _guard = self.mutex.lock().unwrap();
        self.next_if_avail(running)
    }

    fn watcher(&self) -> Arc<dyn RunnerWatcher> {
        Arc::new(ChunkDiskWatcher {
            disk: self.disk.clone(),
        })
    }

    fn queued(&self) -> usize {
        self.disk.len()
    }
}
