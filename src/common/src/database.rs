use crate::catalog::{
    CatalogError, ChunkLevel, Facade, PartitionCols, Partitioning, Striping,
};
use crate::QservError;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Metadata of one table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Partitioning level.
    #[serde(default)]
    pub chunk_level: ChunkLevel,
    /// Column names.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Spatial columns, when partitioned.
    #[serde(default)]
    pub partition_cols: Option<PartitionCols>,
    /// Role in the partitioning scheme.
    #[serde(default)]
    pub partitioning: Partitioning,
}

impl TableDef {
    /// A replicated table.
    pub fn replicated(name: &str, columns: &[&str]) -> Self {
        TableDef {
            name: name.to_string(),
            chunk_level: ChunkLevel::Unpartitioned,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            partition_cols: None,
            partitioning: Partitioning::None,
        }
    }
}

/// Metadata of one database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseDef {
    /// Name of the database.
    pub name: String,
    pub striping: Striping,
    /// Partition overlap in degrees.
    pub overlap: f64,
    pub tables: Vec<TableDef>,
}

impl DatabaseDef {
    fn table(&self, table: &str) -> Result<&TableDef, CatalogError> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .ok_or_else(|| CatalogError::NoSuchTable(self.name.clone(), table.to_string()))
    }
}

/// Metadata service kept in memory, loadable from a JSON dump.
#[derive(Debug, Serialize, Deserialize)]
pub struct MemFacade {
    databases: Vec<DatabaseDef>,
    #[serde(skip)]
    offline: AtomicBool,
}

impl MemFacade {
    /// Creates a facade over the given databases.
    ///
    /// # Arguments
    ///
    /// * `databases` - Database definitions.
    pub fn new(databases: Vec<DatabaseDef>) -> Self {
        MemFacade {
            databases,
            offline: AtomicBool::new(false),
        }
    }

    /// Parses a JSON catalog.
    pub fn from_json(contents: &str) -> Result<Self, QservError> {
        let facade: MemFacade = serde_json::from_str(contents)?;
        Ok(facade)
    }

    /// Loads a JSON catalog from a file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the catalog.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, QservError> {
        info!("Loading catalog from {:?}", path.as_ref());
        let contents = fs::read_to_string(path)?;
        MemFacade::from_json(&contents)
    }

    pub fn to_json(&self) -> Result<String, QservError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Simulates losing the connection to the metadata store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_conn(&self) -> Result<(), CatalogError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CatalogError::ConnError(String::from(
                "metadata store unreachable",
            )));
        }
        Ok(())
    }

    fn db(&self, db: &str) -> Result<&DatabaseDef, CatalogError> {
        self.check_conn()?;
        self.databases
            .iter()
            .find(|d| d.name == db)
            .ok_or_else(|| CatalogError::NoSuchDb(db.to_string()))
    }
}

impl Facade for MemFacade {
    fn contains_db(&self, db: &str) -> Result<bool, CatalogError> {
        self.check_conn()?;
        Ok(self.databases.iter().any(|d| d.name == db))
    }

    fn contains_table(&self, db: &str, table: &str) -> Result<bool, CatalogError> {
        Ok(self.db(db)?.tables.iter().any(|t| t.name == table))
    }

    fn chunk_level(&self, db: &str, table: &str) -> Result<ChunkLevel, CatalogError> {
        Ok(self.db(db)?.table(table)?.chunk_level)
    }

    fn db_striping(&self, db: &str) -> Result<Striping, CatalogError> {
        Ok(self.db(db)?.striping)
    }

    fn partition_cols(&self, db: &str, table: &str) -> Result<PartitionCols, CatalogError> {
        let t = self.db(db)?.table(table)?;
        Ok(t.partition_cols.clone().unwrap_or(PartitionCols {
            lon: String::new(),
            lat: String::new(),
            sec_index: String::new(),
        }))
    }

    fn overlap(&self, db: &str) -> Result<f64, CatalogError> {
        Ok(self.db(db)?.overlap)
    }

    fn partitioning(&self, db: &str, table: &str) -> Result<Partitioning, CatalogError> {
        Ok(self.db(db)?.table(table)?.partitioning.clone())
    }
}
