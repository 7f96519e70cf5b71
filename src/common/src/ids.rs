use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);
static TASK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Chunk identifier. Negative values address the whole query.
pub type ChunkId = i32;
pub type SubChunkId = i32;
/// Reference number for one dispatched chunk query, unique per executive.
pub type RefNum = i32;

/// Identifies one user query for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId {
    id: u64,
}

impl SessionId {
    /// Creates a new session id.
    pub fn new() -> Self {
        Self {
            id: SESSION_COUNTER.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Returns the session id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Default for SessionId {
    fn default() -> Self {
        SessionId::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "QI={}", self.id)
    }
}

/// Identity of a task queued on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    id: u64,
}

impl TaskId {
    /// Creates a new task id.
    pub fn new() -> Self {
        Self {
            id: TASK_COUNTER.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Returns the task id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Default for TaskId {
    fn default() -> Self {
        TaskId::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "T{}", self.id)
    }
}
