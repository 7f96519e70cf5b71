use crate::ids::{ChunkId, SessionId, SubChunkId};
use crate::QservError;

/// One group of queries run against the same set of subchunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFragment {
    /// Subchunks the queries must run on. Empty for chunk-level queries.
    pub subchunks: Vec<SubChunkId>,
    /// Worker-side table receiving the fragment's results.
    pub result_table: String,
    /// Query texts with all chunk and subchunk tokens bound.
    pub queries: Vec<String>,
}

/// Request sent to a worker for one chunk of one user query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMsg {
    pub session: SessionId,
    pub db: String,
    pub chunk_id: ChunkId,
    /// Partitioned tables the task scans. Non-empty marks it as a scan task.
    pub scan_tables: Vec<String>,
    pub fragments: Vec<TaskFragment>,
}

impl TaskMsg {
    /// Serializes the message for the transport.
    pub fn encode(&self) -> Result<Vec<u8>, QservError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    /// Deserializes a message received from the transport.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Encoded message.
    pub fn decode(bytes: &[u8]) -> Result<Self, QservError> {
        Ok(serde_cbor::from_slice(bytes)?)
    }

    /// Number of query texts across all fragments.
    pub fn query_count(&self) -> usize {
        self.fragments.iter().map(|f| f.queries.len()).sum()
    }

    /// Hash identifying the user query, used to squash all of its tasks.
    pub fn query_hash(&self) -> u64 {
        self.session.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TaskMsg {
        TaskMsg {
            session: SessionId::new(),
            db: String::from("LSST"),
            chunk_id: 1234,
            scan_tables: vec![String::from("Object")],
            fragments: vec![
                TaskFragment {
                    subchunks: vec![1, 2],
                    result_table: String::from("r_1_1234"),
                    queries: vec![String::from("SELECT * FROM Subchunks_LSST_1234.Object_1234_1")],
                },
                TaskFragment {
                    subchunks: vec![],
                    result_table: String::from("r_1_1234"),
                    queries: vec![String::from("SELECT 1"), String::from("SELECT 2")],
                },
            ],
        }
    }

    #[test]
    fn test_encode_decode() {
        let msg = sample();
        let bytes = msg.encode().unwrap();
        let decoded = TaskMsg::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(3, decoded.query_count());
        assert_eq!(msg.session.id(), decoded.query_hash());
    }

    #[test]
    fn test_decode_garbage() {
        match TaskMsg::decode(&[0xff, 0x00, 0x13]) {
            Err(QservError::Dispatch(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
