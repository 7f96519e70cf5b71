use std::error::Error;
use std::fmt;

/// Failures raised by the metadata service.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogError {
    NoSuchDb(String),
    NoSuchTable(String, String),
    AuthError(String),
    ConnError(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CatalogError::NoSuchDb(db) => write!(f, "No such database: {}", db),
            CatalogError::NoSuchTable(db, table) => write!(f, "No such table: {}.{}", db, table),
            CatalogError::AuthError(s) => write!(f, "Authorization failure: {}", s),
            CatalogError::ConnError(s) => write!(f, "Connection failure: {}", s),
        }
    }
}

impl Error for CatalogError {}

/// How a table is partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChunkLevel {
    /// Replicated on every worker.
    Unpartitioned,
    /// Split into chunks.
    Chunked,
    /// Split into chunks and subchunks.
    SubChunked,
}

impl ChunkLevel {
    /// Numeric level as reported by the metadata service (0, 1 or 2).
    pub fn as_int(self) -> u8 {
        match self {
            ChunkLevel::Unpartitioned => 0,
            ChunkLevel::Chunked => 1,
            ChunkLevel::SubChunked => 2,
        }
    }

    pub fn is_partitioned(self) -> bool {
        self != ChunkLevel::Unpartitioned
    }
}

impl Default for ChunkLevel {
    fn default() -> Self {
        ChunkLevel::Unpartitioned
    }
}

/// Partitioning granularity of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Striping {
    pub stripes: i32,
    pub sub_stripes: i32,
}

/// Spatial and secondary index columns of a partitioned table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCols {
    pub lon: String,
    pub lat: String,
    pub sec_index: String,
}

/// Reference to a table in another (or the same) database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub db: String,
    pub table: String,
}

impl TableName {
    pub fn new(db: &str, table: &str) -> Self {
        TableName {
            db: db.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.table)
    }
}

/// Role a partitioned table plays in the partitioning scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partitioning {
    /// Not partitioned, or no role known.
    None,
    /// Defines the partitioning; `pk` is the primary key column.
    Director { pk: String, partitioning_id: i32 },
    /// Partitioned alongside `director`; `fk` refers to the director's key.
    Child { director: TableName, fk: String },
    /// Pairs rows of two directors.
    Match {
        directors: (TableName, TableName),
        fks: (String, String),
    },
}

impl Default for Partitioning {
    fn default() -> Self {
        Partitioning::None
    }
}

/// Read-only view of the metadata service.
///
/// Every call may fail with a `CatalogError`; callers propagate those as
/// query setup failures.
pub trait Facade: Send + Sync {
    /// Is `db` registered?
    fn contains_db(&self, db: &str) -> Result<bool, CatalogError>;

    /// Is `table` registered in `db`? Fails with `NoSuchDb` when `db` is unknown.
    fn contains_table(&self, db: &str, table: &str) -> Result<bool, CatalogError>;

    /// Partitioning level of a table.
    fn chunk_level(&self, db: &str, table: &str) -> Result<ChunkLevel, CatalogError>;

    fn db_striping(&self, db: &str) -> Result<Striping, CatalogError>;

    fn partition_cols(&self, db: &str, table: &str) -> Result<PartitionCols, CatalogError>;

    /// Angular overlap stored with each partition of `db`, in degrees.
    fn overlap(&self, db: &str) -> Result<f64, CatalogError>;

    /// Director/child/match role of a table.
    fn partitioning(&self, db: &str, table: &str) -> Result<Partitioning, CatalogError>;

    /// Is the table chunked at all?
    fn is_chunked(&self, db: &str, table: &str) -> Result<bool, CatalogError> {
        Ok(self.chunk_level(db, table)?.is_partitioned())
    }

    /// Is the table subchunked?
    fn is_subchunked(&self, db: &str, table: &str) -> Result<bool, CatalogError> {
        Ok(self.chunk_level(db, table)? == ChunkLevel::SubChunked)
    }
}
