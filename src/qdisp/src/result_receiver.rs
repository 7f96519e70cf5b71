use crate::message_store::{MSG_XRD_OPEN_FAIL, MSG_XRD_READ, MSG_XRD_WRITE};
use crate::table_merger::TableMerger;
use common::{MergeError, QservError, RefNum};
use std::io::Read;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

/// How a failed chunk affects the rest of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Recorded, the query goes on.
    Recoverable,
    /// The query is squashed and fails.
    Fatal,
    /// The result hit the size limit; the query is squashed but succeeds.
    ResultTooBig,
    /// The chunk was cancelled by a squash or an abort.
    Cancelled,
}

impl ErrorClass {
    /// Classifies a transport error code.
    pub fn from_code(code: i32) -> Self {
        match code {
            MSG_XRD_OPEN_FAIL | MSG_XRD_WRITE | MSG_XRD_READ => ErrorClass::Fatal,
            c if c < 0 => ErrorClass::Fatal,
            _ => ErrorClass::Recoverable,
        }
    }
}

/// Why a receiver stopped before its last flush.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverError {
    pub code: i32,
    pub msg: String,
    pub class: ErrorClass,
}

impl ReceiverError {
    fn from_merge(e: &MergeError) -> Self {
        let code = match e {
            MergeError::ResultTooBig(_) => -1,
            MergeError::Schema(_) => -2,
            MergeError::Io(_) => -3,
            MergeError::BufferTooSmall(_) => -4,
        };
        ReceiverError {
            code,
            msg: e.to_string(),
            class: match e {
                MergeError::ResultTooBig(_) => ErrorClass::ResultTooBig,
                // a malformed chunk result is charged to that chunk only
                MergeError::Schema(_) => ErrorClass::Recoverable,
                MergeError::Io(_) | MergeError::BufferTooSmall(_) => ErrorClass::Fatal,
            },
        }
    }

    fn cancelled() -> Self {
        ReceiverError {
            code: 0,
            msg: String::from("Cancelled"),
            class: ErrorClass::Cancelled,
        }
    }
}

/// Notified by a receiver about merge progress and completion.
pub trait ReceiverObserver: Send + Sync {
    /// `bytes` more bytes of `ref_num` were merged.
    fn merged(&self, ref_num: RefNum, bytes: usize);

    /// `ref_num` is done. Called exactly once per receiver.
    fn completed(&self, ref_num: RefNum, success: bool);
}

#[derive(Debug)]
struct ReceiverState {
    buf: Vec<u8>,
    /// Bytes of an incomplete row kept at the front of `buf`.
    leftover: usize,
    flushed: bool,
    finished: bool,
    merged: usize,
    error: Option<ReceiverError>,
}

type Hook = (RefNum, Arc<dyn ReceiverObserver>);
type CancelFn = Box<dyn FnOnce() + Send>;

/// Receives the streamed result of one chunk query and merges it.
///
/// The transport fills `buffer()` and calls `flush(len, last)`, possibly many
/// times, or reports failure with `error_flush`. Rows may straddle fills: the
/// bytes of an incomplete row move to the front of the buffer and the next
/// fill appends after them.
pub struct ResultReceiver {
    merger: Arc<TableMerger>,
    table: String,
    state: Mutex<ReceiverState>,
    hook: Mutex<Option<Hook>>,
    cancel_fn: Mutex<Option<CancelFn>>,
}

/// Writable window of a receiver's buffer. Holds the receiver lock.
pub struct ReceiveBuffer<'a> {
    state: MutexGuard<'a, ReceiverState>,
}

impl Deref for ReceiveBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let st = &*self.state;
        &st.buf[st.leftover..]
    }
}

impl DerefMut for ReceiveBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let st = &mut *self.state;
        let start = st.leftover;
        &mut st.buf[start..]
    }
}

impl ResultReceiver {
    /// Creates a receiver.
    ///
    /// # Arguments
    ///
    /// * `merger` - Shared merger of the user query.
    /// * `table` - Result table to merge into.
    /// * `buffer_size` - Size of the receive buffer; must hold at least one row.
    pub fn new(merger: Arc<TableMerger>, table: &str, buffer_size: usize) -> Self {
        ResultReceiver {
            merger,
            table: table.to_string(),
            state: Mutex::new(ReceiverState {
                buf: vec![0; buffer_size],
                leftover: 0,
                flushed: false,
                finished: false,
                merged: 0,
                error: None,
            }),
            hook: Mutex::new(None),
            cancel_fn: Mutex::new(None),
        }
    }

    /// Registers the observer told about merges and completion of `ref_num`.
    pub fn set_observer(&self, ref_num: RefNum, observer: Arc<dyn ReceiverObserver>) {
        *self.hook.lock().unwrap() = Some((ref_num, observer));
    }

    /// Registers how to cancel the remote request. Runs at most once.
    /// Sets what `cancel` calls to stop the remote request.
    ///
    /// Runs `f` at once when the receiver was already cancelled.
    pub fn set_cancel_fn(&self, f: CancelFn) {
        let st = self.state.lock().unwrap();
        let cancelled = matches!(&st.error, Some(e) if e.class == ErrorClass::Cancelled);
        if !cancelled {
            *self.cancel_fn.lock().unwrap() = Some(f);
            return;
        }
        drop(st);
        debug!("Receiver for {} already cancelled", self.table);
        f();
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn buffer_size(&self) -> usize {
        self.state.lock().unwrap().buf.len()
    }

    /// Returns the window to fill next.
    ///
    /// The window starts after any incomplete row carried from the previous
    /// flush, so it can be shorter than `buffer_size()`.
    pub fn buffer(&self) -> ReceiveBuffer<'_> {
        let mut state = self.state.lock().unwrap();
        state.flushed = false;
        ReceiveBuffer { state }
    }

    /// Merges `len` freshly filled bytes of the window.
    ///
    /// Returns false once the receiver is finished, failed or cancelled,
    /// telling the transport to stop.
    ///
    /// # Arguments
    ///
    /// * `len` - Bytes written into the window.
    /// * `last` - Whether this is the end of the stream.
    pub fn flush(&self, len: usize, last: bool) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.finished {
            return false;
        }
        st.flushed = true;
        let total = (st.leftover + len).min(st.buf.len());
        match self.merge_prefix(&mut st, total, last) {
            Ok(merged) => {
                st.merged += merged;
                if last {
                    st.finished = true;
                }
                drop(st);
                if merged > 0 {
                    self.notify_merged(merged);
                }
                if last {
                    self.complete(true);
                }
                true
            }
            Err(e) => {
                warn!("Merge into {} failed: {}", self.table, e);
                st.error = Some(ReceiverError::from_merge(&e));
                st.finished = true;
                drop(st);
                self.complete(false);
                false
            }
        }
    }

    fn merge_prefix(
        &self,
        st: &mut ReceiverState,
        total: usize,
        last: bool,
    ) -> Result<usize, MergeError> {
        if total == 0 {
            return Ok(0);
        }
        let mut merged = self.merger.merge(&st.buf[..total], &self.table)?;
        if last && merged < total {
            // the stream may end without a final newline
            let mut tail = st.buf[merged..total].to_vec();
            tail.push(b'\n');
            merged += self.merger.merge(&tail, &self.table)?.min(total - merged);
        } else if merged == 0 && total == st.buf.len() {
            return Err(MergeError::BufferTooSmall(total));
        }
        st.buf.copy_within(merged..total, 0);
        st.leftover = total - merged;
        Ok(merged)
    }

    /// Reports a transport failure instead of data.
    ///
    /// # Arguments
    ///
    /// * `code` - Transport message code.
    /// * `msg` - Description.
    pub fn error_flush(&self, code: i32, msg: &str) {
        let mut st = self.state.lock().unwrap();
        if st.finished {
            return;
        }
        st.finished = true;
        st.error = Some(ReceiverError {
            code,
            msg: msg.to_string(),
            class: ErrorClass::from_code(code),
        });
        drop(st);
        self.complete(false);
    }

    /// Cancels the receiver and, best effort, the remote request.
    pub fn cancel(&self) {
        let mut st = self.state.lock().unwrap();
        if st.finished {
            return;
        }
        st.finished = true;
        st.error = Some(ReceiverError::cancelled());
        drop(st);
        let cancel_fn = self.cancel_fn.lock().unwrap().take();
        if let Some(f) = cancel_fn {
            f();
        }
        self.complete(false);
    }

    /// Reads `src` to its end, feeding each read through the buffer.
    ///
    /// Returns whether the receiver accepted the whole stream.
    pub fn read_from<R: Read>(&self, mut src: R) -> Result<bool, QservError> {
        loop {
            let n = src.read(&mut self.buffer())?;
            let last = n == 0;
            if !self.flush(n, last) {
                return Ok(false);
            }
            if last {
                return Ok(true);
            }
        }
    }

    fn notify_merged(&self, bytes: usize) {
        let hook = self.hook.lock().unwrap().clone();
        if let Some((ref_num, observer)) = hook {
            observer.merged(ref_num, bytes);
        }
    }

    fn complete(&self, success: bool) {
        let hook = self.hook.lock().unwrap().take();
        if let Some((ref_num, observer)) = hook {
            observer.completed(ref_num, success);
        }
    }

    pub fn finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }

    pub fn flushed(&self) -> bool {
        self.state.lock().unwrap().flushed
    }

    /// Bytes merged so far.
    pub fn merged_bytes(&self) -> usize {
        self.state.lock().unwrap().merged
    }

    pub fn error(&self) -> Option<ReceiverError> {
        self.state.lock().unwrap().error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testutil::*;
    use rand::{thread_rng, Rng};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        merged: AtomicUsize,
        ok: AtomicUsize,
        failed: AtomicUsize,
    }

    impl ReceiverObserver for Counter {
        fn merged(&self, _ref_num: RefNum, bytes: usize) {
            self.merged.fetch_add(bytes, Ordering::SeqCst);
        }

        fn completed(&self, _ref_num: RefNum, success: bool) {
            if success {
                self.ok.fetch_add(1, Ordering::SeqCst);
            } else {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Pushes `data` through the receiver in fills of at most `step` bytes.
    fn stream(r: &ResultReceiver, data: &[u8], mut step: impl FnMut() -> usize) -> bool {
        let mut pos = 0;
        loop {
            let n = {
                let mut window = r.buffer();
                let n = step().min(window.len()).min(data.len() - pos);
                window[..n].copy_from_slice(&data[pos..pos + n]);
                n
            };
            pos += n;
            let last = pos == data.len();
            if !r.flush(n, last) {
                return false;
            }
            if last {
                return true;
            }
        }
    }

    fn rows_as_bytes(rows: &[Vec<String>]) -> Vec<u8> {
        let mut out = Vec::new();
        for row in rows {
            out.extend_from_slice(row.join(",").as_bytes());
            out.push(b'\n');
        }
        out
    }

    #[test]
    fn test_row_straddles_fills() {
        init();
        let merger = Arc::new(TableMerger::new(None));
        let r = ResultReceiver::new(merger.clone(), "r", 16);
        let counter = Arc::new(Counter::default());
        r.set_observer(1, counter.clone());
        let data = b"1,alpha\n2,beta\n3,gamma\n";
        assert!(stream(&r, data, || 5));
        assert!(r.finished());
        assert_eq!(data.to_vec(), rows_as_bytes(&merger.rows("r")));
        assert_eq!(data.len(), counter.merged.load(Ordering::SeqCst));
        assert_eq!(1, counter.ok.load(Ordering::SeqCst));
        assert!(!r.flush(0, true));
        assert_eq!(1, counter.ok.load(Ordering::SeqCst));
    }

    #[test]
    fn test_random_boundaries() {
        init();
        let mut rng = thread_rng();
        for _ in 0..20 {
            let data = gen_csv_rows(rng.gen_range(1..60), 3);
            let merger = Arc::new(TableMerger::new(None));
            let r = ResultReceiver::new(merger.clone(), "r", 64);
            let mut step_rng = thread_rng();
            assert!(stream(&r, &data, || step_rng.gen_range(1..64)));
            assert_eq!(data, rows_as_bytes(&merger.rows("r")));
            assert_eq!(data.len(), r.merged_bytes());
        }
    }

    #[test]
    fn test_unterminated_last_row() {
        let merger = Arc::new(TableMerger::new(None));
        let r = ResultReceiver::new(merger.clone(), "r", 32);
        assert!(stream(&r, b"1,a\n2,b", || 3));
        assert_eq!(2, merger.row_count("r"));
    }

    #[test]
    fn test_buffer_too_small() {
        let merger = Arc::new(TableMerger::new(None));
        let r = ResultReceiver::new(merger, "r", 8);
        let counter = Arc::new(Counter::default());
        r.set_observer(3, counter.clone());
        assert!(!stream(&r, b"1,a-very-long-row\n", || 8));
        let err = r.error().unwrap();
        assert_eq!(ErrorClass::Fatal, err.class);
        assert_eq!(-4, err.code);
        assert_eq!(1, counter.failed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_error_flush_once() {
        let merger = Arc::new(TableMerger::new(None));
        let r = ResultReceiver::new(merger, "r", 32);
        let counter = Arc::new(Counter::default());
        r.set_observer(4, counter.clone());
        r.error_flush(MSG_XRD_READ, "connection reset");
        r.error_flush(MSG_XRD_READ, "again");
        r.cancel();
        assert!(!r.flush(0, true));
        assert_eq!(1, counter.failed.load(Ordering::SeqCst));
        assert_eq!(0, counter.ok.load(Ordering::SeqCst));
        let err = r.error().unwrap();
        assert_eq!("connection reset", err.msg);
        assert_eq!(ErrorClass::Fatal, err.class);
        assert_eq!(ErrorClass::Recoverable, ErrorClass::from_code(1250));
    }

    #[test]
    fn test_cancel() {
        let merger = Arc::new(TableMerger::new(None));
        let r = ResultReceiver::new(merger, "r", 32);
        let counter = Arc::new(Counter::default());
        let cancels = Arc::new(AtomicUsize::new(0));
        let c = cancels.clone();
        r.set_observer(5, counter.clone());
        r.set_cancel_fn(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        r.cancel();
        r.cancel();
        assert_eq!(1, cancels.load(Ordering::SeqCst));
        assert_eq!(1, counter.failed.load(Ordering::SeqCst));
        assert_eq!(ErrorClass::Cancelled, r.error().unwrap().class);
    }

    #[test]
    fn test_cancel_fn_after_cancel() {
        let merger = Arc::new(TableMerger::new(None));
        let r = ResultReceiver::new(merger, "r", 32);
        r.cancel();
        let cancels = Arc::new(AtomicUsize::new(0));
        let c = cancels.clone();
        r.set_cancel_fn(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(1, cancels.load(Ordering::SeqCst));
        r.cancel();
        assert_eq!(1, cancels.load(Ordering::SeqCst));

        // a failed receiver keeps the hook for nobody to call
        let r = ResultReceiver::new(Arc::new(TableMerger::new(None)), "r", 32);
        r.error_flush(MSG_XRD_READ, "gone");
        let c = cancels.clone();
        r.set_cancel_fn(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(1, cancels.load(Ordering::SeqCst));
    }

    #[test]
    fn test_schema_error_recoverable() {
        let merger = Arc::new(TableMerger::new(None));
        let r = ResultReceiver::new(merger.clone(), "r", 64);
        let counter = Arc::new(Counter::default());
        r.set_observer(2, counter.clone());
        assert!(merger.merge(b"a,b\n", "r").is_ok());
        {
            let mut window = r.buffer();
            window[..6].copy_from_slice(b"a,b,c\n");
        }
        assert!(!r.flush(6, true));
        let err = r.error().unwrap();
        assert_eq!(-2, err.code);
        assert_eq!(ErrorClass::Recoverable, err.class);
        assert_eq!(1, counter.failed.load(Ordering::SeqCst));
    }

    /// Hands out at most three bytes per read.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3).min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_read_from() {
        let merger = Arc::new(TableMerger::new(None));
        let r = ResultReceiver::new(merger.clone(), "r", 32);
        let data = gen_csv_rows(30, 2);
        assert!(r.read_from(Trickle(&data)).unwrap());
        assert_eq!(data, rows_as_bytes(&merger.rows("r")));
        assert!(r.finished());
    }
}
