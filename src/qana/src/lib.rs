#[macro_use]
extern crate log;

use common::QservError;

pub mod column_ref;
pub mod column_vertex_map;
pub mod relation_graph;
pub mod table_ref;

pub use column_ref::ColumnRef;
pub use relation_graph::{JoinSpec, JoinType, RelationGraph};
pub use table_ref::TableRefInfo;

/// Builds the error raised for a query that cannot be evaluated with worker-local data.
pub(crate) fn not_evaluable(msg: &str) -> QservError {
    QservError::Analysis(msg.to_string())
}
