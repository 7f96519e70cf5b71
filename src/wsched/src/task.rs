use common::ids::TaskId;
use common::task_msg::TaskMsg;
use common::{ChunkId, QservError};
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Destination of the result bytes of one task.
pub trait TaskSink: Write + Send {
    /// Ends the stream with the outcome of the task.
    fn finish(self: Box<Self>, result: Result<(), QservError>);
}

/// A chunk query accepted by a worker.
pub struct Task {
    id: TaskId,
    pub msg: TaskMsg,
    squashed: AtomicBool,
    sink: Mutex<Option<Box<dyn TaskSink>>>,
}

impl Task {
    /// Creates a task whose results are discarded.
    pub fn new(msg: TaskMsg) -> Self {
        Task {
            id: TaskId::new(),
            msg,
            squashed: AtomicBool::new(false),
            sink: Mutex::new(None),
        }
    }

    /// Creates a task streaming its results to `sink`.
    pub fn with_sink(msg: TaskMsg, sink: Box<dyn TaskSink>) -> Self {
        let task = Task::new(msg);
        *task.sink.lock().unwrap() = Some(sink);
        task
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn chunk_id(&self) -> ChunkId {
        self.msg.chunk_id
    }

    /// Whether the task scans partitioned tables.
    pub fn is_scan(&self) -> bool {
        !self.msg.scan_tables.is_empty()
    }

    /// Identifies the user query the task belongs to.
    pub fn hash(&self) -> u64 {
        self.msg.query_hash()
    }

    /// First query text, for logging.
    pub fn first_query(&self) -> &str {
        self.msg
            .fragments
            .first()
            .and_then(|f| f.queries.first())
            .map(|q| q.as_str())
            .unwrap_or("")
    }

    pub fn squash(&self) {
        self.squashed.store(true, Ordering::SeqCst);
    }

    pub fn is_squashed(&self) -> bool {
        self.squashed.load(Ordering::SeqCst)
    }

    /// Takes the sink. Only the runner executing the task calls this.
    pub fn take_sink(&self) -> Option<Box<dyn TaskSink>> {
        self.sink.lock().unwrap().take()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} chunk={} : {}", self.id, self.chunk_id(), self.first_query())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("chunk_id", &self.chunk_id())
            .field("scan", &self.is_scan())
            .field("squashed", &self.is_squashed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use common::task_msg::TaskFragment;
    use common::SessionId;
    use std::sync::Arc;

    /// A task for `chunk` of `session`, a scan task when `scan` is set.
    pub fn make_task(session: SessionId, chunk: ChunkId, scan: bool) -> Arc<Task> {
        let scan_tables = if scan {
            vec![String::from("Object")]
        } else {
            Vec::new()
        };
        Arc::new(Task::new(TaskMsg {
            session,
            db: String::from("LSST"),
            chunk_id: chunk,
            scan_tables,
            fragments: vec![TaskFragment {
                subchunks: Vec::new(),
                result_table: String::from("r"),
                queries: vec![format!("SELECT * FROM LSST.Object_{}", chunk)],
            }],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use common::SessionId;

    #[test]
    fn test_task() {
        let s = SessionId::new();
        let t = make_task(s, 42, true);
        assert!(t.is_scan());
        assert_eq!(42, t.chunk_id());
        assert_eq!(s.id(), t.hash());
        assert_eq!("SELECT * FROM LSST.Object_42", t.first_query());
        assert!(!make_task(s, 1, false).is_scan());
        assert!(!t.is_squashed());
        t.squash();
        assert!(t.is_squashed());
        assert!(t.take_sink().is_none());
        assert!(t.to_string().ends_with("chunk=42 : SELECT * FROM LSST.Object_42"));
    }
}
