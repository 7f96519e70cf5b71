use crate::scheduler::{RunnerWatcher, Scheduler, TaskQueue};
use crate::task::{Task, TaskSink};
use crate::DEFAULT_MAX_RUNNING;
use common::ids::TaskId;
use common::task_msg::TaskMsg;
use common::QservError;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForemanConfig {
    /// Most runner threads alive at once. Ready tasks beyond it wait in a
    /// backlog for the next free runner.
    pub pool_size: usize,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        ForemanConfig {
            pool_size: DEFAULT_MAX_RUNNING,
        }
    }
}

/// Executes tasks on behalf of the runner pool.
pub trait TaskRunner: Send + Sync {
    /// Runs every query of `task`, writing result rows to `sink`.
    ///
    /// Long runs should poll `task.is_squashed()` and stop early.
    fn run(&self, task: &Task, sink: &mut dyn Write) -> Result<(), QservError>;
}

struct Inner {
    scheduler: Arc<dyn Scheduler>,
    watcher: Arc<dyn RunnerWatcher>,
    runner: Arc<dyn TaskRunner>,
    /// Serializes scheduling decisions so `running` stays accurate.
    schedule: Mutex<()>,
    pool_size: usize,
    running: Mutex<Vec<Arc<Task>>>,
    /// Tasks the scheduler released while every runner was busy.
    backlog: Mutex<VecDeque<Arc<Task>>>,
    /// Accepted tasks that have not finished.
    live: Mutex<HashMap<TaskId, Arc<Task>>>,
    runners: Mutex<usize>,
    runners_done: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
    accepting: AtomicBool,
}

/// Runs accepted tasks on a pool of runner threads, as the scheduler directs.
///
/// A runner thread is started for each task the scheduler makes ready. After
/// its task, a runner asks the scheduler for more work and exits when there
/// is none.
pub struct Foreman {
    config: ForemanConfig,
    inner: Arc<Inner>,
}

/// Sink that drops everything written to it.
struct Discard;

impl Write for Discard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Foreman {
    /// Creates a stopped foreman.
    ///
    /// # Arguments
    ///
    /// * `config` - Pool settings.
    /// * `scheduler` - Decides what runs next.
    /// * `runner` - Executes tasks.
    pub fn new(
        config: ForemanConfig,
        scheduler: Arc<dyn Scheduler>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        let watcher = scheduler.watcher();
        let pool_size = config.pool_size.max(1);
        Foreman {
            config,
            inner: Arc::new(Inner {
                scheduler,
                watcher,
                runner,
                schedule: Mutex::new(()),
                pool_size,
                running: Mutex::new(Vec::new()),
                backlog: Mutex::new(VecDeque::new()),
                live: Mutex::new(HashMap::new()),
                runners: Mutex::new(0),
                runners_done: Condvar::new(),
                handles: Mutex::new(Vec::new()),
                accepting: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ForemanConfig {
        &self.config
    }

    /// Starts accepting tasks.
    pub fn start(&self) {
        info!("Foreman started with pool size {}", self.config.pool_size);
        self.inner.accepting.store(true, Ordering::SeqCst);
    }

    /// Stops accepting tasks and waits for the runners to drain the queue.
    pub fn shutdown(&self) {
        if self.inner.accepting.swap(false, Ordering::SeqCst) {
            info!("Foreman shutting down");
        }
        self.wait_idle();
        let handles: Vec<JoinHandle<()>> = self.inner.handles.lock().unwrap().drain(..).collect();
        for h in handles {
            if h.join().is_err() {
                error!("Runner thread panicked");
            }
        }
    }

    /// Accepts a task for scheduling.
    ///
    /// # Arguments
    ///
    /// * `msg` - Decoded task message.
    /// * `sink` - Destination of the task's result rows.
    pub fn accept(&self, msg: TaskMsg, sink: Box<dyn TaskSink>) -> Result<Arc<Task>, QservError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(QservError::Dispatch(String::from(
                "Foreman is not accepting tasks",
            )));
        }
        let task = Arc::new(Task::with_sink(msg, sink));
        self.inner
            .live
            .lock()
            .unwrap()
            .insert(task.id(), task.clone());
        let inner = &self.inner;
        let _guard = inner.schedule.lock().unwrap();
        let ready = inner
            .scheduler
            .new_task_act(task.clone(), inner.committed());
        inner.backlog.lock().unwrap().extend(ready);
        Inner::start_runners(inner);
        Ok(task)
    }

    /// Squashes every unfinished task of one user query.
    ///
    /// Queued tasks are skipped when their turn comes. Returns how many tasks
    /// were marked.
    pub fn squash_by_hash(&self, hash: u64) -> usize {
        let live = self.inner.live.lock().unwrap();
        let mut count = 0;
        for task in live.values().filter(|t| t.hash() == hash) {
            task.squash();
            count += 1;
        }
        info!("Squashed {} tasks of query {}", count, hash);
        count
    }

    /// Number of tasks currently running.
    pub fn running(&self) -> usize {
        self.inner.running_count()
    }

    /// Number of accepted tasks not yet finished.
    pub fn pending(&self) -> usize {
        self.inner.live.lock().unwrap().len()
    }

    /// Waits until no runner is left.
    pub fn wait_idle(&self) {
        let mut runners = self.inner.runners.lock().unwrap();
        while *runners > 0 {
            let (guard, _) = self
                .inner
                .runners_done
                .wait_timeout(runners, Duration::from_secs(1))
                .unwrap();
            runners = guard;
        }
    }
}

impl Inner {
    fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    /// Tasks released by the scheduler and not finished, running or not.
    fn committed(&self) -> usize {
        self.running_count() + self.backlog.lock().unwrap().len()
    }

    fn report_start(&self, task: &Arc<Task>) {
        self.running.lock().unwrap().push(task.clone());
        debug!("Started task {}", task);
        self.watcher.handle_start(task);
    }

    fn report_complete(&self, task: &Arc<Task>) {
        {
            let mut running = self.running.lock().unwrap();
            match running.iter().position(|t| t.id() == task.id()) {
                Some(pos) => {
                    running.remove(pos);
                }
                None => panic!("Completed task {} was not running", task),
            }
        }
        self.live.lock().unwrap().remove(&task.id());
        debug!("Finished task {}", task);
        self.watcher.handle_finish(task);
    }

    /// Gives backlog tasks their own runners while the pool has room.
    /// Called with the schedule lock held.
    fn start_runners(this: &Arc<Inner>) {
        while this.running_count() < this.pool_size {
            let task = match this.backlog.lock().unwrap().pop_front() {
                Some(t) => t,
                None => break,
            };
            this.report_start(&task);
            *this.runners.lock().unwrap() += 1;
            let inner = this.clone();
            let handle = thread::spawn(move || Inner::run_loop(inner, task));
            this.handles.lock().unwrap().push(handle);
        }
    }

    fn execute(&self, task: &Task) {
        let mut sink = task.take_sink();
        if task.is_squashed() {
            debug!("Skipping squashed task {}", task);
            if let Some(s) = sink {
                s.finish(Err(QservError::Cancelled));
            }
            return;
        }
        info!("Runner running {}", task);
        let result = match sink.as_mut() {
            Some(s) => self.runner.run(task, s),
            None => self.runner.run(task, &mut Discard),
        };
        if let Err(e) = &result {
            warn!("Task {} failed: {}", task, e);
        }
        if let Some(s) = sink {
            s.finish(result);
        }
    }

    fn run_loop(this: Arc<Inner>, first: Arc<Task>) {
        debug!("Runner started on {}", first);
        let mut task = first;
        loop {
            this.execute(&task);
            let _guard = this.schedule.lock().unwrap();
            this.report_complete(&task);
            let ready: TaskQueue = this
                .scheduler
                .task_finish_act(&task, this.committed());
            let next = {
                let mut backlog = this.backlog.lock().unwrap();
                backlog.extend(ready);
                backlog.pop_front()
            };
            match next {
                Some(next) => {
                    this.report_start(&next);
                    Inner::start_runners(&this);
                    task = next;
                }
                None => break,
            }
        }
        debug!("Runner exiting");
        let mut runners = this.runners.lock().unwrap();
        *runners -= 1;
        if *runners == 0 {
            this.runners_done.notify_all();
        }
    }
}
