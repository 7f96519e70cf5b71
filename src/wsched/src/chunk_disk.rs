use crate::chunk_state::ChunkState;
use crate::task::Task;
use common::ids::TaskId;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashSet};
use std::sync::{Arc, Mutex};

/// Heap entry ordering tasks by ascending chunk id, then arrival.
struct ByChunk(Arc<Task>);

impl PartialEq for ByChunk {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ByChunk {}

impl PartialOrd for ByChunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByChunk {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, so the comparison is reversed.
        other
            .0
            .chunk_id()
            .cmp(&self.0.chunk_id())
            .then_with(|| other.0.id().cmp(&self.0.id()))
    }
}

#[derive(Default)]
struct Queues {
    active: BinaryHeap<ByChunk>,
    pending: BinaryHeap<ByChunk>,
    state: ChunkState,
}

/// Queue of scan tasks for the chunks of one disk.
///
/// Tasks run in ascending chunk order. A task for a chunk below the one being
/// scanned waits in `pending` until the current pass over `active` is done,
/// so it never restarts the scan.
pub struct ChunkDisk {
    queues: Mutex<Queues>,
    inflight: Mutex<BTreeSet<TaskId>>,
}

impl ChunkDisk {
    pub fn new() -> Self {
        ChunkDisk {
            queues: Mutex::new(Queues::default()),
            inflight: Mutex::new(BTreeSet::new()),
        }
    }

    /// Ids of the tasks currently running from this disk.
    pub fn get_inflight(&self) -> BTreeSet<TaskId> {
        self.inflight.lock().unwrap().clone()
    }

    pub fn enqueue(&self, task: Arc<Task>) {
        let mut q = self.queues.lock().unwrap();
        let chunk_id = task.chunk_id();
        let to_pending = !q.state.empty() && chunk_id < q.state.last_scan();
        if to_pending {
            q.pending.push(ByChunk(task));
        } else {
            q.active.push(ByChunk(task));
        }
        debug!(
            "ChunkDisk enqueue {} {}",
            chunk_id,
            if to_pending { "PENDING" } else { "ACTIVE" }
        );
        match q.active.peek() {
            Some(top) => debug!("Top of ACTIVE is now: {}", top.0.chunk_id()),
            None => debug!("Top of ACTIVE is now: (empty)"),
        }
    }

    /// Returns the next task to run, if one may run now.
    ///
    /// The lowest queued chunk is handed out when nothing is being scanned,
    /// when it is already being scanned, or when `allow_advance` is set.
    /// Never blocks.
    ///
    /// # Arguments
    ///
    /// * `allow_advance` - Whether a scan of a new chunk may start.
    pub fn get_next(&self, allow_advance: bool) -> Option<Arc<Task>> {
        let mut q = self.queues.lock().unwrap();
        if q.active.is_empty() && !q.pending.is_empty() {
            let q = &mut *q;
            std::mem::swap(&mut q.active, &mut q.pending);
            debug!("ChunkDisk active-pending swap");
        }
        let chunk_id = q.active.peek()?.0.chunk_id();
        debug!("ChunkDisk getNext: current={} candidate={}", q.state, chunk_id);
        let idle = !q.state.has_scan();
        let in_scan = q.state.is_scan(chunk_id);
        if allow_advance || idle || in_scan {
            debug!(
                "ChunkDisk allowing task for {} (advance={} idle={} inScan={})",
                chunk_id, allow_advance, idle, in_scan
            );
            q.state.add_scan(chunk_id);
            q.active.pop().map(|e| e.0)
        } else {
            debug!("ChunkDisk denying task");
            None
        }
    }

    /// Whether a chunk scan is in progress.
    pub fn busy(&self) -> bool {
        let busy = self.queues.lock().unwrap().state.has_scan();
        debug!("ChunkDisk busyness: {}", if busy { "yes" } else { "no" });
        busy
    }

    pub fn empty(&self) -> bool {
        let q = self.queues.lock().unwrap();
        q.active.is_empty() && q.pending.is_empty()
    }

    /// Queued task count.
    pub fn len(&self) -> usize {
        let q = self.queues.lock().unwrap();
        q.active.len() + q.pending.len()
    }

    pub fn register_inflight(&self, task: &Task) {
        debug!("ChunkDisk registering for {}", task);
        self.inflight.lock().unwrap().insert(task.id());
    }

    /// Forgets a finished task and marks its chunk as scanned.
    pub fn remove_inflight(&self, task: &Task) {
        let mut inflight = self.inflight.lock().unwrap();
        debug!("ChunkDisk remove for {}", task);
        inflight.remove(&task.id());
        self.queues
            .lock()
            .unwrap()
            .state
            .mark_complete(task.chunk_id());
    }

    /// Checks that no task is queued twice or queued while running.
    pub fn check_integrity(&self) -> bool {
        let inflight = self.inflight.lock().unwrap();
        let q = self.queues.lock().unwrap();
        let mut seen = HashSet::new();
        q.active
            .iter()
            .chain(q.pending.iter())
            .all(|e| seen.insert(e.0.id()) && !inflight.contains(&e.0.id()))
    }
}

impl Default for ChunkDisk {
    fn default() -> Self {
        ChunkDisk::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testutil::make_task;
    use common::testutil::init;
    use common::{ChunkId, SessionId};
    use rand::{thread_rng, Rng};

    #[test]
    fn test_ascending_order() {
        init();
        let disk = ChunkDisk::new();
        let s = SessionId::new();
        for c in &[30, 10, 20] {
            disk.enqueue(make_task(s, *c, true));
        }
        assert!(!disk.busy());
        let first = disk.get_next(false).unwrap();
        assert_eq!(10, first.chunk_id());
        assert!(disk.busy());
        // 20 is a new chunk while 10 is being scanned
        assert!(disk.get_next(false).is_none());
        assert_eq!(20, disk.get_next(true).unwrap().chunk_id());
        assert_eq!(30, disk.get_next(true).unwrap().chunk_id());
        assert!(disk.get_next(true).is_none());
        assert!(disk.empty());
    }

    #[test]
    fn test_same_chunk_shares_scan() {
        let disk = ChunkDisk::new();
        let s = SessionId::new();
        let a = make_task(s, 5, true);
        let b = make_task(s, 5, true);
        disk.enqueue(a.clone());
        disk.enqueue(b.clone());
        let t1 = disk.get_next(false).unwrap();
        let t2 = disk.get_next(false).unwrap();
        assert_eq!(a.id(), t1.id());
        assert_eq!(b.id(), t2.id());
    }

    #[test]
    fn test_lower_chunk_waits_in_pending() {
        let disk = ChunkDisk::new();
        let s = SessionId::new();
        disk.enqueue(make_task(s, 50, true));
        disk.enqueue(make_task(s, 60, true));
        let t = disk.get_next(false).unwrap();
        disk.register_inflight(&t);
        assert_eq!(1, disk.get_inflight().len());
        // below the current scan: must not cut ahead of 60
        disk.enqueue(make_task(s, 10, true));
        disk.remove_inflight(&t);
        assert!(disk.get_inflight().is_empty());
        assert!(!disk.busy());
        assert_eq!(60, disk.get_next(false).unwrap().chunk_id());
        // active drained, pending becomes active
        assert_eq!(10, disk.get_next(true).unwrap().chunk_id());
        assert!(disk.check_integrity());
    }

    #[test]
    fn test_integrity() {
        let disk = ChunkDisk::new();
        let t = make_task(SessionId::new(), 1, true);
        disk.enqueue(t.clone());
        assert!(disk.check_integrity());
        disk.register_inflight(&t);
        assert!(!disk.check_integrity());
        disk.enqueue(make_task(SessionId::new(), 2, true));
        assert_eq!(2, disk.len());
    }

    /// With advancing disallowed, a returned task is never above a chunk still
    /// waiting in the active window.
    #[test]
    fn test_random_ordering() {
        let mut rng = thread_rng();
        let s = SessionId::new();
        for _ in 0..20 {
            let disk = ChunkDisk::new();
            let mut queued: Vec<ChunkId> = Vec::new();
            for _ in 0..200 {
                if rng.gen_bool(0.6) {
                    let c = rng.gen_range(0..20);
                    disk.enqueue(make_task(s, c, true));
                    queued.push(c);
                } else {
                    let advance = rng.gen_bool(0.2);
                    let active_min = {
                        let q = disk.queues.lock().unwrap();
                        let heap = if q.active.is_empty() { &q.pending } else { &q.active };
                        heap.iter().map(|e| e.0.chunk_id()).min()
                    };
                    if let Some(t) = disk.get_next(advance) {
                        assert_eq!(Some(t.chunk_id()), active_min);
                        let pos = queued.iter().position(|c| *c == t.chunk_id()).unwrap();
                        queued.remove(pos);
                        if rng.gen_bool(0.5) {
                            disk.remove_inflight(&t);
                        }
                    }
                }
            }
            assert_eq!(queued.len(), disk.len());
        }
    }
}
