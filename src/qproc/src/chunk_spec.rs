use common::task_msg::{TaskFragment, TaskMsg};
use common::{ChunkId, SessionId, SubChunkId};
use std::fmt;

/// A chunk and the subchunks of it a query must visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub chunk_id: ChunkId,
    /// Sorted, without duplicates. Empty when the query is not subchunked.
    pub subchunks: Vec<SubChunkId>,
}

impl ChunkSpec {
    /// Creates a new chunk spec.
    ///
    /// # Arguments
    ///
    /// * `chunk_id` - Chunk to visit.
    /// * `subchunks` - Subchunks to visit, in any order.
    pub fn new(chunk_id: ChunkId, mut subchunks: Vec<SubChunkId>) -> Self {
        subchunks.sort_unstable();
        subchunks.dedup();
        ChunkSpec {
            chunk_id,
            subchunks,
        }
    }

    /// A chunk visited as a whole.
    pub fn whole(chunk_id: ChunkId) -> Self {
        ChunkSpec::new(chunk_id, Vec::new())
    }

    /// Adds the subchunks of another spec for the same chunk.
    pub fn merge(&mut self, other: &ChunkSpec) {
        debug_assert_eq!(self.chunk_id, other.chunk_id);
        self.subchunks.extend_from_slice(&other.subchunks);
        self.subchunks.sort_unstable();
        self.subchunks.dedup();
    }
}

impl fmt::Display for ChunkSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.chunk_id)?;
        if !self.subchunks.is_empty() {
            let subs: Vec<String> = self.subchunks.iter().map(|s| s.to_string()).collect();
            write!(f, "[{}]", subs.join(","))?;
        }
        Ok(())
    }
}

/// Queries run together against one set of subchunks.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFragment {
    pub subchunks: Vec<SubChunkId>,
    pub queries: Vec<String>,
}

/// Everything a worker needs to evaluate one user query on one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkQuerySpec {
    pub db: String,
    pub chunk_id: ChunkId,
    /// Partitioned tables scanned in full. Empty for interactive queries.
    pub scan_tables: Vec<String>,
    pub fragments: Vec<ChunkFragment>,
}

impl ChunkQuerySpec {
    /// All query texts across fragments.
    pub fn queries(&self) -> impl Iterator<Item = &String> {
        self.fragments.iter().flat_map(|f| f.queries.iter())
    }

    /// Builds the worker request for this chunk.
    ///
    /// # Arguments
    ///
    /// * `session` - User query the chunk belongs to.
    /// * `result_table` - Table the worker writes results into.
    pub fn to_task_msg(&self, session: SessionId, result_table: &str) -> TaskMsg {
        TaskMsg {
            session,
            db: self.db.clone(),
            chunk_id: self.chunk_id,
            scan_tables: self.scan_tables.clone(),
            fragments: self
                .fragments
                .iter()
                .map(|f| TaskFragment {
                    subchunks: f.subchunks.clone(),
                    result_table: result_table.to_string(),
                    queries: f.queries.clone(),
                })
                .collect(),
        }
    }
}

impl fmt::Display for ChunkQuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{} ({} fragments, {} queries)",
            self.db,
            self.chunk_id,
            self.fragments.len(),
            self.queries().count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_spec() {
        let mut cs = ChunkSpec::new(100, vec![5, 1, 3, 1]);
        assert_eq!(vec![1, 3, 5], cs.subchunks);
        cs.merge(&ChunkSpec::new(100, vec![2, 5]));
        assert_eq!(vec![1, 2, 3, 5], cs.subchunks);
        assert_eq!("100[1,2,3,5]", cs.to_string());
        assert_eq!("7", ChunkSpec::whole(7).to_string());
    }

    #[test]
    fn test_to_task_msg() {
        let spec = ChunkQuerySpec {
            db: String::from("LSST"),
            chunk_id: 100,
            scan_tables: vec![String::from("Object")],
            fragments: vec![
                ChunkFragment {
                    subchunks: vec![1],
                    queries: vec![String::from("q1"), String::from("q2")],
                },
                ChunkFragment {
                    subchunks: vec![2],
                    queries: vec![String::from("q3")],
                },
            ],
        };
        let session = SessionId::new();
        let msg = spec.to_task_msg(session, "result_1");
        assert_eq!(3, msg.query_count());
        assert_eq!(session, msg.session);
        assert!(msg.fragments.iter().all(|f| f.result_table == "result_1"));
        assert_eq!(vec![2], msg.fragments[1].subchunks);
        assert_eq!("LSST:100 (2 fragments, 3 queries)", spec.to_string());
    }
}
