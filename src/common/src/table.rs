use crate::catalog::{Facade, Partitioning, TableName};
use crate::QservError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A director table: defines the spatial partitioning.
#[derive(Debug, Clone, PartialEq)]
pub struct DirTableInfo {
    pub db: String,
    pub table: String,
    /// Primary key column.
    pub pk: String,
    /// Longitude column.
    pub lon: String,
    /// Latitude column.
    pub lat: String,
    pub partitioning_id: i32,
}

impl DirTableInfo {
    /// Two infos describe the same director table.
    pub fn same_table(&self, other: &DirTableInfo) -> bool {
        self.db == other.db && self.table == other.table
    }
}

/// A child table: rows live with the director row they reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildTableInfo {
    pub db: String,
    pub table: String,
    /// Column holding the director primary key.
    pub fk: String,
    pub director: Arc<DirTableInfo>,
}

/// A match table: pairs rows of two directors.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchTableInfo {
    pub db: String,
    pub table: String,
    pub fk: (String, String),
    pub director: (Arc<DirTableInfo>, Arc<DirTableInfo>),
}

/// Catalog metadata of one partitioned table.
#[derive(Debug, Clone, PartialEq)]
pub enum TableInfo {
    Director(DirTableInfo),
    Child(ChildTableInfo),
    Match(MatchTableInfo),
}

impl TableInfo {
    pub fn db(&self) -> &str {
        match self {
            TableInfo::Director(d) => &d.db,
            TableInfo::Child(c) => &c.db,
            TableInfo::Match(m) => &m.db,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            TableInfo::Director(d) => &d.table,
            TableInfo::Child(c) => &c.table,
            TableInfo::Match(m) => &m.table,
        }
    }

    pub fn is_director(&self) -> bool {
        matches!(self, TableInfo::Director(_))
    }

    pub fn is_match(&self) -> bool {
        matches!(self, TableInfo::Match(_))
    }

    /// Columns through which a table can join partition-locally.
    ///
    /// Each column is tagged with the side it belongs to: match tables
    /// contribute one vertex per foreign key, everything else only side 0.
    pub fn partitioning_columns(&self) -> Vec<(&str, usize)> {
        match self {
            TableInfo::Director(d) => vec![(&d.pk, 0), (&d.lon, 0), (&d.lat, 0)],
            TableInfo::Child(c) => vec![(&c.fk, 0)],
            TableInfo::Match(m) => vec![(&m.fk.0, 0), (&m.fk.1, 1)],
        }
    }
}

impl fmt::Display for TableInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self {
            TableInfo::Director(_) => "director",
            TableInfo::Child(_) => "child",
            TableInfo::Match(_) => "match",
        };
        write!(f, "{}.{} ({})", self.db(), self.table(), kind)
    }
}

/// Resolves and caches `TableInfo`s for the duration of one query analysis.
pub struct TableInfoPool<'a> {
    facade: &'a dyn Facade,
    cache: HashMap<(String, String), Option<Arc<TableInfo>>>,
}

impl<'a> TableInfoPool<'a> {
    /// Creates an empty pool backed by `facade`.
    pub fn new(facade: &'a dyn Facade) -> Self {
        TableInfoPool {
            facade,
            cache: HashMap::new(),
        }
    }

    pub fn facade(&self) -> &'a dyn Facade {
        self.facade
    }

    /// Looks up metadata for a table. Replicated tables have none.
    ///
    /// # Arguments
    ///
    /// * `db` - Database of the table.
    /// * `table` - Name of the table.
    pub fn get(&mut self, db: &str, table: &str) -> Result<Option<Arc<TableInfo>>, QservError> {
        let key = (db.to_string(), table.to_string());
        if let Some(info) = self.cache.get(&key) {
            return Ok(info.clone());
        }
        let info = self.resolve(db, table)?.map(Arc::new);
        self.cache.insert(key, info.clone());
        Ok(info)
    }

    fn resolve(&mut self, db: &str, table: &str) -> Result<Option<TableInfo>, QservError> {
        if !self.facade.contains_table(db, table)? {
            return Err(crate::CatalogError::NoSuchTable(db.to_string(), table.to_string()).into());
        }
        if !self.facade.chunk_level(db, table)?.is_partitioned() {
            return Ok(None);
        }
        match self.facade.partitioning(db, table)? {
            Partitioning::None => Err(QservError::Analysis(format!(
                "Partitioned table {}.{} has no partitioning metadata",
                db, table
            ))),
            Partitioning::Director {
                pk,
                partitioning_id,
            } => {
                let cols = self.facade.partition_cols(db, table)?;
                Ok(Some(TableInfo::Director(DirTableInfo {
                    db: db.to_string(),
                    table: table.to_string(),
                    pk,
                    lon: cols.lon,
                    lat: cols.lat,
                    partitioning_id,
                })))
            }
            Partitioning::Child { director, fk } => {
                let director = self.director(&director, db, table)?;
                Ok(Some(TableInfo::Child(ChildTableInfo {
                    db: db.to_string(),
                    table: table.to_string(),
                    fk,
                    director,
                })))
            }
            Partitioning::Match { directors, fks } => {
                let first = self.director(&directors.0, db, table)?;
                let second = self.director(&directors.1, db, table)?;
                Ok(Some(TableInfo::Match(MatchTableInfo {
                    db: db.to_string(),
                    table: table.to_string(),
                    fk: fks,
                    director: (first, second),
                })))
            }
        }
    }

    fn director(
        &mut self,
        name: &TableName,
        db: &str,
        table: &str,
    ) -> Result<Arc<DirTableInfo>, QservError> {
        match self.get(&name.db, &name.table)? {
            Some(info) => match &*info {
                TableInfo::Director(d) => Ok(Arc::new(d.clone())),
                _ => Err(QservError::Analysis(format!(
                    "{}.{} names {} as its director, which is not a director table",
                    db, table, name
                ))),
            },
            None => Err(QservError::Analysis(format!(
                "{}.{} names unpartitioned table {} as its director",
                db, table, name
            ))),
        }
    }
}
