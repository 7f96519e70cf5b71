use crate::exec_status::{ExecStatus, State};
use crate::message_store::*;
use crate::resource_unit::ResourceUnit;
use crate::result_receiver::{ErrorClass, ReceiverError, ReceiverObserver, ResultReceiver};
use crate::table_merger::TableMerger;
use crate::transport::Transport;
use common::{QservError, RefNum};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

/// Number of join wake-ups without progress before the wait is logged loudly.
const JOIN_COMPLAINTS: usize = 5;

/// Executive settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutiveConfig {
    /// Address of the worker service.
    pub service_url: String,
    /// Merged result bytes after which remaining work is squashed.
    pub result_limit: Option<usize>,
    /// Longest single wait of `join` before it rechecks and logs.
    pub join_wait: Duration,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        ExecutiveConfig {
            service_url: String::from("localhost:1094"),
            result_limit: None,
            join_wait: Duration::from_secs(5),
        }
    }
}

/// Outcome of registering a unit.
enum Tracking {
    Added,
    Duplicate,
    Refused,
}

/// One chunk query to dispatch.
pub struct Spec {
    pub resource: ResourceUnit,
    /// Encoded task message.
    pub request: Vec<u8>,
    pub receiver: Arc<ResultReceiver>,
}

/// Forwards receiver events to an executive without keeping it alive.
struct CompletionHook(Weak<Executive>);

impl ReceiverObserver for CompletionHook {
    fn merged(&self, ref_num: RefNum, bytes: usize) {
        if let Some(exec) = self.0.upgrade() {
            exec.merged(ref_num, bytes);
        }
    }

    fn completed(&self, ref_num: RefNum, success: bool) {
        if let Some(exec) = self.0.upgrade() {
            exec.mark_completed(ref_num, success);
        }
    }
}

/// Dispatches the chunk queries of one user query and tracks them to completion.
///
/// Receivers stay tracked from `add` until their completion is observed or
/// they are squashed. `join` waits for the tracking map to drain. The first
/// hard failure squashes everything still in flight.
pub struct Executive {
    config: ExecutiveConfig,
    transport: Arc<dyn Transport>,
    messages: Arc<MessageStore>,
    merger: Arc<TableMerger>,
    receivers: Mutex<BTreeMap<RefNum, Arc<ResultReceiver>>>,
    receivers_empty: Condvar,
    statuses: Mutex<BTreeMap<RefNum, Arc<ExecStatus>>>,
    /// Merge accounting, kept apart from the tracking lock.
    merged_bytes: Mutex<usize>,
    request_count: AtomicUsize,
    faulty: AtomicBool,
    squashed: AtomicBool,
    aborted: AtomicBool,
}

impl Executive {
    /// Creates an executive.
    ///
    /// # Arguments
    ///
    /// * `config` - Executive settings.
    /// * `transport` - Carries requests to workers.
    /// * `messages` - Store for per-chunk diagnostics.
    /// * `merger` - Merger shared by all receivers of the query.
    pub fn new(
        config: ExecutiveConfig,
        transport: Arc<dyn Transport>,
        messages: Arc<MessageStore>,
        merger: Arc<TableMerger>,
    ) -> Arc<Self> {
        debug!("Executive for {}", config.service_url);
        Arc::new(Executive {
            config,
            transport,
            messages,
            merger,
            receivers: Mutex::new(BTreeMap::new()),
            receivers_empty: Condvar::new(),
            statuses: Mutex::new(BTreeMap::new()),
            merged_bytes: Mutex::new(0),
            request_count: AtomicUsize::new(0),
            faulty: AtomicBool::new(false),
            squashed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        })
    }

    /// Dispatches one chunk query.
    ///
    /// A `ref_num` that is already tracked is ignored. Once the executive is
    /// faulty or squashed, nothing more is dispatched and `Cancelled` is
    /// returned. A provisioning failure is returned after the unit has been
    /// recorded as failed and untracked.
    ///
    /// # Arguments
    ///
    /// * `ref_num` - Caller-assigned reference number, unique per executive.
    /// * `spec` - Resource, request and receiver.
    pub fn add(self: &Arc<Self>, ref_num: RefNum, spec: Spec) -> Result<(), QservError> {
        match self.track(ref_num, spec.receiver.clone()) {
            Tracking::Added => {}
            Tracking::Duplicate => {
                warn!("Ignoring duplicate add({})", ref_num);
                return Ok(());
            }
            Tracking::Refused => {
                warn!("Refusing add({}) of squashed query", ref_num);
                return Err(QservError::Cancelled);
            }
        }
        let status = Arc::new(ExecStatus::new(spec.resource.clone()));
        self.statuses
            .lock()
            .unwrap()
            .insert(ref_num, status.clone());
        self.request_count.fetch_add(1, Ordering::SeqCst);
        let msg = format!("Exec add pth={}", spec.resource.path());
        info!("{}", msg);
        self.messages
            .add_message(spec.resource.chunk, MSG_MGR_ADD, &msg);

        let hook = Arc::new(CompletionHook(Arc::downgrade(self)));
        spec.receiver.set_observer(ref_num, hook);
        status.report(State::Provision, 0, "");
        if spec.receiver.finished() {
            // squashed between tracking and provisioning
            warn!("Not provisioning cancelled add({})", ref_num);
            self.remove(ref_num);
            return Err(QservError::Cancelled);
        }
        status.report(State::Request, 0, "");
        if let Err(e) = self
            .transport
            .provision(&spec.resource, spec.request, spec.receiver.clone())
        {
            error!("Resource provision error {}: {}", spec.resource.path(), e);
            // completes the unit as failed, which untracks it
            spec.receiver
                .error_flush(MSG_XRD_OPEN_FAIL, &e.to_string());
            status.report(State::ProvisionError, MSG_XRD_OPEN_FAIL, &e.to_string());
            self.remove(ref_num);
            return Err(e);
        }
        debug!("Provision was ok for {}", ref_num);
        Ok(())
    }

    /// Starts tracking `ref_num` unless the query is already squashed.
    ///
    /// The flags are read under the receivers lock, which `squash` takes
    /// after raising its flag, so a unit is either refused here or seen by
    /// the squash.
    fn track(&self, ref_num: RefNum, receiver: Arc<ResultReceiver>) -> Tracking {
        let mut receivers = self.receivers.lock().unwrap();
        if self.is_faulty() || self.is_squashed() {
            return Tracking::Refused;
        }
        if receivers.contains_key(&ref_num) {
            return Tracking::Duplicate;
        }
        debug!("Executive tracking id={}", ref_num);
        receivers.insert(ref_num, receiver);
        Tracking::Added
    }

    /// Stops tracking `ref_num`. Returns whether it was tracked.
    ///
    /// Wakes `join` when nothing is left in flight.
    pub fn remove(&self, ref_num: RefNum) -> bool {
        let mut receivers = self.receivers.lock().unwrap();
        if receivers.remove(&ref_num).is_none() {
            return false;
        }
        debug!("Executive untracking id={}", ref_num);
        if receivers.is_empty() {
            self.receivers_empty.notify_all();
        }
        true
    }

    fn status(&self, ref_num: RefNum) -> Option<Arc<ExecStatus>> {
        self.statuses.lock().unwrap().get(&ref_num).cloned()
    }

    /// Handles the completion of `ref_num`.
    ///
    /// # Arguments
    ///
    /// * `ref_num` - Completed unit.
    /// * `success` - Whether its whole result was merged.
    pub fn mark_completed(&self, ref_num: RefNum, success: bool) {
        debug!("Executive::mark_completed({}, {})", ref_num, success);
        let status = self.status(ref_num);
        let chunk = status.as_ref().map(|s| s.resource().chunk).unwrap_or(-1);
        if success {
            if let Some(s) = status {
                s.report(State::ResponseDone, MSG_MERGED, "");
            }
            self.messages.add_message(chunk, MSG_MERGED, "Merged");
            self.remove(ref_num);
            return;
        }

        let receiver = self.receivers.lock().unwrap().get(&ref_num).cloned();
        let err = receiver.and_then(|r| r.error()).unwrap_or(ReceiverError {
            code: MSG_EXEC_SQUASHED,
            msg: String::from("Untracked before completion"),
            class: ErrorClass::Cancelled,
        });
        self.remove(ref_num);
        match err.class {
            ErrorClass::Cancelled => {
                if let Some(s) = status {
                    s.report(State::Cancel, MSG_EXEC_SQUASHED, &err.msg);
                }
                self.messages
                    .add_message(chunk, MSG_EXEC_SQUASHED, "Squashed");
            }
            ErrorClass::Recoverable => {
                warn!(
                    "Executive: recoverable error on refnum={} code={} {}",
                    ref_num, err.code, err.msg
                );
                if let Some(s) = status {
                    s.report(failed_state(err.code), err.code, &err.msg);
                }
                self.messages.add_message(chunk, err.code, &err.msg);
            }
            ErrorClass::ResultTooBig => {
                info!("Result limit reached at refnum={}: {}", ref_num, err.msg);
                if let Some(s) = status {
                    s.report(State::MergeError, err.code, &err.msg);
                }
                self.messages.add_message(chunk, err.code, &err.msg);
                self.squash();
            }
            ErrorClass::Fatal => {
                error!(
                    "Executive: error executing refnum={} code={} {}",
                    ref_num, err.code, err.msg
                );
                if let Some(s) = status {
                    s.report(failed_state(err.code), err.code, &err.msg);
                }
                self.messages.add_message(chunk, err.code, &err.msg);
                self.faulty.store(true, Ordering::SeqCst);
                error!(
                    "Executive: requesting squash (cause refnum={} code={})",
                    ref_num, err.code
                );
                self.squash();
            }
        }
    }

    fn merged(&self, ref_num: RefNum, bytes: usize) {
        if let Some(s) = self.status(ref_num) {
            s.report(State::MergeOk, 0, "");
        }
        let over = {
            let mut total = self.merged_bytes.lock().unwrap();
            *total += bytes;
            match self.config.result_limit {
                Some(limit) if *total > limit => Some(*total),
                _ => None,
            }
        };
        if let Some(total) = over {
            if !self.is_squashed() {
                info!(
                    "Merged {} bytes, over the limit. Squashing the rest.",
                    total
                );
                self.squash();
            }
        }
    }

    /// Cancels everything in flight and marks the query as failed.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.squash();
    }

    /// Cancels everything in flight and refuses further adds.
    ///
    /// Every tracked unit is untracked whether or not its transport
    /// acknowledges the cancellation.
    pub fn squash(&self) {
        if !self.squashed.swap(true, Ordering::SeqCst) {
            info!("Trying to cancel all queries...");
        }
        let pending: Vec<(RefNum, Arc<ResultReceiver>)> = {
            let receivers = self.receivers.lock().unwrap();
            receivers.iter().map(|(r, rr)| (*r, rr.clone())).collect()
        };
        debug!("Cancelling {} in flight", pending.len());
        for (ref_num, receiver) in pending {
            receiver.cancel();
            self.remove(ref_num);
        }
    }

    /// Cancels a single unit. The query can no longer succeed.
    pub fn request_squash(&self, ref_num: RefNum) {
        warn!("Squash requested for refnum={}", ref_num);
        let receiver = self.receivers.lock().unwrap().get(&ref_num).cloned();
        if let Some(r) = receiver {
            self.aborted.store(true, Ordering::SeqCst);
            r.cancel();
            self.remove(ref_num);
        }
    }

    /// Waits until nothing is in flight. Returns true on success.
    ///
    /// A successful query has its merge finalized, once.
    pub fn join(&self) -> bool {
        let mut complaints = 0;
        let mut receivers = self.receivers.lock().unwrap();
        while !receivers.is_empty() {
            let (guard, timeout) = self
                .receivers_empty
                .wait_timeout(receivers, self.config.join_wait)
                .unwrap();
            receivers = guard;
            if timeout.timed_out() && !receivers.is_empty() {
                complaints += 1;
                info!("Still {} in flight.", receivers.len());
                if complaints >= JOIN_COMPLAINTS {
                    complaints = 0;
                    let ids: Vec<String> = receivers.keys().map(|r| r.to_string()).collect();
                    warn!("Waiting on refnums {}", ids.join(","));
                }
            }
        }
        drop(receivers);

        let success = !self.is_faulty() && !self.aborted.load(Ordering::SeqCst);
        info!(
            "Query exec finish. {} dispatched. {}",
            self.request_count.load(Ordering::SeqCst),
            if success { "SUCCESS" } else { "ERROR" }
        );
        if success && self.merger.finalize() {
            self.messages
                .add_message(-1, MSG_FINALIZED, "Finalized merge");
        }
        success
    }

    /// One "Ref=N status" line per dispatched unit.
    pub fn progress_desc(&self) -> String {
        let statuses = self.statuses.lock().unwrap();
        statuses
            .iter()
            .map(|(r, s)| format!("Ref={} {}", r, s))
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn is_faulty(&self) -> bool {
        self.faulty.load(Ordering::SeqCst)
    }

    pub fn is_squashed(&self) -> bool {
        self.squashed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.receivers.lock().unwrap().len()
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn message_store(&self) -> &Arc<MessageStore> {
        &self.messages
    }

    pub fn merger(&self) -> &Arc<TableMerger> {
        &self.merger
    }
}

/// Merge failures carry negative codes.
fn failed_state(code: i32) -> State {
    if code < 0 {
        State::MergeError
    } else {
        State::ResultError
    }
}
