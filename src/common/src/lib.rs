extern crate csv;
#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

use sqlparser::ast;
use std::error::Error;
use std::fmt;
use std::io;

pub mod catalog;
pub mod database;
pub mod ids;
pub mod table;
pub mod task_msg;
pub mod testutil;

pub use catalog::{CatalogError, ChunkLevel, Facade};
pub use ids::{ChunkId, RefNum, SessionId, SubChunkId};

/// Default size of the buffer a result receiver exposes to the transport.
pub const RECEIVE_BUFFER_SIZE: usize = 2 * 1024 * 1024;
/// Most table references that may need overlap in one rewritten query.
pub const MAX_OVERLAP_TABLES: usize = 8;

/// Failures reported while merging partial results.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeError {
    /// The merged result exceeded the configured size.
    ResultTooBig(usize),
    /// A row did not match the shape of the result table.
    Schema(String),
    /// Reading or writing the result failed.
    Io(String),
    /// A full receive buffer did not contain one complete row.
    BufferTooSmall(usize),
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MergeError::ResultTooBig(size) => write!(f, "Result too big ({} bytes)", size),
            MergeError::Schema(s) => write!(f, "Schema mismatch: {}", s),
            MergeError::Io(s) => write!(f, "Merge I/O failure: {}", s),
            MergeError::BufferTooSmall(size) => write!(
                f,
                "No merge in input. Receive buffer too small? ({} bytes)",
                size
            ),
        }
    }
}

impl MergeError {
    /// Whether this error should shrink the query instead of failing it.
    pub fn result_too_big(&self) -> bool {
        matches!(self, MergeError::ResultTooBig(_))
    }
}

/// Custom error type.
#[derive(Debug, Clone, PartialEq)]
pub enum QservError {
    /// Query cannot be evaluated with worker-local data, or is otherwise unsupported.
    Analysis(String),
    /// Metadata lookup failures.
    Catalog(CatalogError),
    /// SQL text could not be parsed.
    Parse(String),
    /// Submission or transport failures.
    Dispatch(String),
    /// Partial result merge failures.
    Merge(MergeError),
    /// Work was cancelled.
    Cancelled,
    /// IO Errors.
    IOError(String),
    /// Bad configuration.
    ConfigError(String),
}

impl fmt::Display for QservError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                QservError::Analysis(s) => format!("Analysis Error: {}", s),
                QservError::Catalog(e) => format!("Catalog Error: {}", e),
                QservError::Parse(s) => format!("Parse Error: {}", s),
                QservError::Dispatch(s) => format!("Dispatch Error: {}", s),
                QservError::Merge(e) => format!("Merge Error: {}", e),
                QservError::Cancelled => String::from("Cancelled"),
                QservError::IOError(s) => s.to_string(),
                QservError::ConfigError(s) => format!("Config Error: {}", s),
            }
        )
    }
}

impl From<io::Error> for QservError {
    fn from(error: io::Error) -> Self {
        QservError::IOError(error.to_string())
    }
}

impl From<CatalogError> for QservError {
    fn from(error: CatalogError) -> Self {
        QservError::Catalog(error)
    }
}

impl From<MergeError> for QservError {
    fn from(error: MergeError) -> Self {
        QservError::Merge(error)
    }
}

impl From<serde_json::Error> for QservError {
    fn from(error: serde_json::Error) -> Self {
        QservError::ConfigError(error.to_string())
    }
}

impl From<serde_cbor::Error> for QservError {
    fn from(error: serde_cbor::Error) -> Self {
        QservError::Dispatch(error.to_string())
    }
}

impl From<csv::Error> for QservError {
    fn from(error: csv::Error) -> Self {
        QservError::Merge(MergeError::Schema(error.to_string()))
    }
}

impl From<sqlparser::parser::ParserError> for QservError {
    fn from(error: sqlparser::parser::ParserError) -> Self {
        QservError::Parse(error.to_string())
    }
}

impl Error for QservError {}

/// Splits a possibly qualified table name into its database and table parts.
///
/// # Arguments
///
/// * `name` - Object name from the parsed statement.
pub fn split_table_name(name: &ast::ObjectName) -> Result<(Option<String>, String), QservError> {
    let parts: Vec<&str> = name.0.iter().map(|i| i.value.as_str()).collect();
    match parts.as_slice() {
        [table] => Ok((None, table.to_string())),
        [db, table] => Ok((Some(db.to_string()), table.to_string())),
        _ => Err(QservError::Analysis(format!(
            "Table name {} has too many qualifiers",
            name
        ))),
    }
}
