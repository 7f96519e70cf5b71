#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod chunk_rewriter;
pub mod chunk_spec;
pub mod query_mapping;
pub mod query_session;
pub mod table_namer;

pub use chunk_rewriter::{ChunkRewriter, RewrittenQuery, TablePlan};
pub use chunk_spec::{ChunkFragment, ChunkQuerySpec, ChunkSpec};
pub use query_mapping::{Parameter, QueryMapping};
pub use query_session::QuerySession;

/// Chunk id used to dispatch queries that touch no partitioned table.
pub const DUMMY_CHUNK: common::ChunkId = 1234567890;
