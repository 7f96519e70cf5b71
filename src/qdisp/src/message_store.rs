use common::ChunkId;
use std::fmt;
use std::sync::Mutex;
use std::time::SystemTime;

pub const MSG_MGR_ADD: i32 = 1200;
/// The transport asked for the chunk to be retried elsewhere.
pub const MSG_XRD_RETRY: i32 = 1250;
pub const MSG_XRD_OPEN_FAIL: i32 = 1290;
pub const MSG_XRD_WRITE: i32 = 1300;
pub const MSG_XRD_READ: i32 = 1400;
pub const MSG_MERGED: i32 = 1500;
pub const MSG_ERASED: i32 = 1600;
pub const MSG_EXEC_SQUASHED: i32 = 1990;
pub const MSG_FINALIZED: i32 = 2000;

/// A diagnostic about one chunk of a user query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMessage {
    /// Chunk the message is about, or -1 for the whole query.
    pub chunk_id: ChunkId,
    pub code: i32,
    pub description: String,
    pub timestamp: SystemTime,
}

impl fmt::Display for QueryMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "chunk={} code={} {}", self.chunk_id, self.code, self.description)
    }
}

/// Collects per-chunk diagnostics for the lifetime of a user query.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Mutex<Vec<QueryMessage>>,
}

impl MessageStore {
    pub fn new() -> Self {
        MessageStore {
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Records a message.
    ///
    /// # Arguments
    ///
    /// * `chunk_id` - Chunk concerned, -1 for the whole query.
    /// * `code` - Message code.
    /// * `description` - Free text.
    pub fn add_message(&self, chunk_id: ChunkId, code: i32, description: &str) {
        debug!("Message chunk={} code={} {}", chunk_id, code, description);
        self.messages.lock().unwrap().push(QueryMessage {
            chunk_id,
            code,
            description: description.to_string(),
            timestamp: SystemTime::now(),
        });
    }

    pub fn get_message(&self, idx: usize) -> Option<QueryMessage> {
        self.messages.lock().unwrap().get(idx).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn message_count_with_code(&self, code: i32) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.code == code)
            .count()
    }

    /// Snapshot of all messages in insertion order.
    pub fn messages(&self) -> Vec<QueryMessage> {
        self.messages.lock().unwrap().clone()
    }
}
