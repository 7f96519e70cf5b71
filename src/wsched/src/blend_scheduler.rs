use crate::group_scheduler::GroupScheduler;
use crate::scan_scheduler::ScanScheduler;
use crate::scheduler::{RunnerWatcher, Scheduler, TaskQueue};
use crate::task::Task;
use crate::DEFAULT_MAX_RUNNING;
use common::ids::TaskId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Sub-scheduler owning a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Group,
    Scan,
}

type OwnerMap = Arc<Mutex<HashMap<TaskId, Owner>>>;

/// Routes scan tasks to a `ScanScheduler` and the rest to a `GroupScheduler`.
///
/// When the sub-scheduler of a finished task has nothing to start, the other
/// one is asked, so interactive work keeps flowing during long scans.
pub struct BlendScheduler {
    group: Arc<GroupScheduler>,
    scan: Arc<ScanScheduler>,
    map: OwnerMap,
}

struct BlendWatcher {
    map: OwnerMap,
    group: Arc<dyn RunnerWatcher>,
    scan: Arc<dyn RunnerWatcher>,
}

impl BlendWatcher {
    fn route(&self, task: &Arc<Task>) -> &Arc<dyn RunnerWatcher> {
        match self.map.lock().unwrap().get(&task.id()) {
            Some(Owner::Group) => &self.group,
            Some(Owner::Scan) => &self.scan,
            None => panic!("Watcher event for untracked task {}", task),
        }
    }
}

impl RunnerWatcher for BlendWatcher {
    fn handle_start(&self, task: &Arc<Task>) {
        self.route(task).handle_start(task);
    }

    fn handle_finish(&self, task: &Arc<Task>) {
        self.route(task).handle_finish(task);
    }
}

impl BlendScheduler {
    pub fn new(group: Arc<GroupScheduler>, scan: Arc<ScanScheduler>) -> Self {
        BlendScheduler {
            group,
            scan,
            map: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Blend of a group and a scan scheduler both limited to `max_running`.
    pub fn with_max_running(max_running: usize) -> Self {
        BlendScheduler::new(
            Arc::new(GroupScheduler::new(max_running)),
            Arc::new(ScanScheduler::new(max_running)),
        )
    }

    fn sub(&self, owner: Owner) -> &dyn Scheduler {
        match owner {
            Owner::Group => self.group.as_ref(),
            Owner::Scan => self.scan.as_ref(),
        }
    }

    fn other(owner: Owner) -> Owner {
        match owner {
            Owner::Group => Owner::Scan,
            Owner::Scan => Owner::Group,
        }
    }

    /// Interactive work first, then scans with what is left.
    fn next_if_avail(&self, running: usize) -> TaskQueue {
        let mut ready = self.group.nop_act(running);
        let scans = self.scan.nop_act(running + ready.len());
        ready.extend(scans);
        ready
    }

    /// Number of tasks queued or running that the blend tracks.
    pub fn tracked(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    /// Checks that no scan task is queued twice or queued while running.
    pub fn check_integrity(&self) -> bool {
        self.scan.disk().check_integrity()
    }
}

impl Default for BlendScheduler {
    fn default() -> Self {
        BlendScheduler::with_max_running(DEFAULT_MAX_RUNNING)
    }
}

impl Scheduler for BlendScheduler {
    fn queue_task(&self, incoming: Arc<Task>) {
        let owner = if incoming.is_scan() {
            Owner::Scan
        } else {
            Owner::Group
        };
        self.map.lock().unwrap().insert(incoming.id(), owner);
        self.sub(owner).queue_task(incoming);
    }

    fn new_task_act(&self, incoming: Arc<Task>, running: usize) -> TaskQueue {
        self.queue_task(incoming);
        self.next_if_avail(running)
    }

    /// Panics when `finished` was never queued here.
    fn task_finish_act(&self, finished: &Arc<Task>, running: usize) -> TaskQueue {
        let owner = match self.map.lock().unwrap().remove(&finished.id()) {
            Some(o) => o,
            None => panic!("Finished untracked task {}", finished),
        };
        debug!("Completed: {}", finished);
        let ready = self.sub(owner).task_finish_act(finished, running);
        if ready.is_empty() {
            debug!("Blend trying other sched.");
            return self.sub(BlendScheduler::other(owner)).nop_act(running);
        }
        ready
    }

    fn nop_act(&self, running: usize) -> TaskQueue {
        self.next_if_avail(running)
    }

    fn watcher(&self) -> Arc<dyn RunnerWatcher> {
        Arc::new(BlendWatcher {
            map: self.map.clone(),
            group: self.group.watcher(),
            scan: self.scan.watcher(),
        })
    }

    fn queued(&self) -> usize {
        self.group.queued() + self.scan.queued()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testutil::make_task;
    use common::testutil::init;
    use common::SessionId;

    #[test]
    fn test_routing() {
        init();
        let bs = BlendScheduler::default();
        let s = SessionId::new();
        let scan = make_task(s, 7, true);
        let inter = make_task(s, 3, false);
        bs.queue_task(scan.clone());
        bs.queue_task(inter.clone());
        assert_eq!(1, bs.scan.queued());
        assert_eq!(1, bs.group.queued());
        let ready = bs.nop_act(0);
        assert_eq!(2, ready.len());
        // interactive work first
        assert_eq!(inter.id(), ready[0].id());
        assert_eq!(scan.id(), ready[1].id());
        assert_eq!(2, bs.tracked());
    }

    #[test]
    fn test_fallback_to_other() {
        let bs = BlendScheduler::with_max_running(1);
        let w = bs.watcher();
        let s = SessionId::new();
        let scan = make_task(s, 7, true);
        let started = bs.new_task_act(scan.clone(), 0);
        assert_eq!(1, started.len());
        w.handle_start(&started[0]);
        // pool is full, the interactive task waits
        assert!(bs.new_task_act(make_task(s, 9, false), 1).is_empty());
        w.handle_finish(&scan);
        let next = bs.task_finish_act(&scan, 0);
        assert_eq!(1, next.len());
        assert!(!next[0].is_scan());
        assert!(bs.scan.disk().get_inflight().is_empty());
        assert!(bs.check_integrity());
    }

    #[test]
    #[should_panic(expected = "Finished untracked task")]
    fn test_finish_untracked() {
        let bs = BlendScheduler::default();
        bs.task_finish_act(&make_task(SessionId::new(), 1, false), 0);
    }
}
