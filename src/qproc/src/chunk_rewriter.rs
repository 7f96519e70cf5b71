use crate::query_mapping::{QueryMapping, CHUNK_TOKEN, SUBCHUNK_TOKEN};
use crate::table_namer;
use common::{ChunkLevel, QservError, MAX_OVERLAP_TABLES};
use qana::table_ref::factors_mut;
use qana::TableRefInfo;
use sqlparser::ast::{Ident, ObjectName, Query, Select, SetExpr, TableAlias, TableFactor};

/// How one table reference of the statement is partitioned, and the overlap
/// the relation graph found it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    pub tref: TableRefInfo,
    pub level: ChunkLevel,
    pub overlap: f64,
}

/// Query templates for one statement, plus how to bind them.
#[derive(Debug, Clone)]
pub struct RewrittenQuery {
    /// Parallel queries whose union is the statement's result for one chunk.
    pub templates: Vec<String>,
    pub mapping: QueryMapping,
    /// Distinct partitioned table names, in FROM order.
    pub chunked_tables: Vec<String>,
}

/// Which name a table reference receives in a given template.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Substitution {
    Verbatim,
    Chunk,
    SubChunk,
    Overlap,
}

/// Turns a statement over logical tables into chunk query templates.
///
/// Chunked tables are renamed `{table}_%CC%`. When two or more chunked tables
/// meet and one of them is subchunked, subchunked tables move to the
/// `Subchunks_{db}_%CC%` database under `{table}_%CC%_%SS%`. The first
/// subchunked reference in FROM order always reads the plain subchunk. Every
/// later subchunked reference needing overlap reads either the plain subchunk
/// or its full overlap, giving one template per combination.
pub struct ChunkRewriter {
    tables: Vec<TablePlan>,
    subchunked: bool,
    varying: Vec<usize>,
}

impl ChunkRewriter {
    /// Creates a rewriter for a statement's table references.
    ///
    /// # Arguments
    ///
    /// * `tables` - One plan per table reference, in FROM order.
    pub fn new(tables: Vec<TablePlan>) -> Result<Self, QservError> {
        let chunked = tables.iter().filter(|t| t.level.is_partitioned()).count();
        let subchunked =
            chunked > 1 && tables.iter().any(|t| t.level == ChunkLevel::SubChunked);
        let mut varying = Vec::new();
        if subchunked {
            let mut pinned = false;
            let mut overlapping = 0;
            for (i, t) in tables.iter().enumerate() {
                if t.level != ChunkLevel::SubChunked {
                    continue;
                }
                if t.overlap > 0.0 {
                    overlapping += 1;
                }
                if !pinned {
                    pinned = true;
                } else if t.overlap > 0.0 {
                    varying.push(i);
                }
            }
            // only references that need overlap count against the cap
            if overlapping > MAX_OVERLAP_TABLES {
                return Err(QservError::Analysis(format!(
                    "too many overlap tables ({} > {})",
                    overlapping, MAX_OVERLAP_TABLES
                )));
            }
        }
        Ok(ChunkRewriter {
            tables,
            subchunked,
            varying,
        })
    }

    pub fn needs_subchunks(&self) -> bool {
        self.subchunked
    }

    /// Number of templates `rewrite` will produce.
    pub fn permutation_count(&self) -> usize {
        1 << self.varying.len()
    }

    fn substitution(&self, idx: usize, permutation: usize) -> Substitution {
        match self.tables[idx].level {
            ChunkLevel::Unpartitioned => Substitution::Verbatim,
            ChunkLevel::Chunked => Substitution::Chunk,
            ChunkLevel::SubChunked if !self.subchunked => Substitution::Chunk,
            ChunkLevel::SubChunked => match self.varying.iter().position(|v| *v == idx) {
                Some(bit) if permutation & (1 << bit) != 0 => Substitution::Overlap,
                _ => Substitution::SubChunk,
            },
        }
    }

    /// Records the tokens and subchunk tables the templates use.
    pub fn mapping(&self) -> QueryMapping {
        let mut mapping = QueryMapping::new();
        if self.tables.iter().any(|t| t.level.is_partitioned()) {
            mapping.insert_chunk_entry(CHUNK_TOKEN);
        }
        if self.subchunked {
            mapping.insert_subchunk_entry(SUBCHUNK_TOKEN);
            for t in self
                .tables
                .iter()
                .filter(|t| t.level == ChunkLevel::SubChunked)
            {
                mapping.insert_sub_chunk_table(&t.tref.table);
            }
        }
        mapping
    }

    /// Produces one rewritten copy of `query` per overlap permutation.
    ///
    /// # Arguments
    ///
    /// * `query` - Parsed statement; left untouched.
    pub fn rewrite(&self, query: &Query) -> Result<RewrittenQuery, QservError> {
        let mut templates = Vec::with_capacity(self.permutation_count());
        for permutation in 0..self.permutation_count() {
            let mut copy = query.clone();
            let select = select_mut(&mut copy)?;
            let factors = factors_mut(select);
            if factors.len() != self.tables.len() {
                panic!(
                    "Chunk rewrite bug: {} table factors for {} table plans",
                    factors.len(),
                    self.tables.len()
                );
            }
            for (idx, factor) in factors.into_iter().enumerate() {
                self.patch(factor, idx, permutation);
            }
            templates.push(copy.to_string());
        }
        debug!("Rewrote query into {} templates", templates.len());
        let mut chunked_tables: Vec<String> = Vec::new();
        for t in self.tables.iter().filter(|t| t.level.is_partitioned()) {
            if !chunked_tables.contains(&t.tref.table) {
                chunked_tables.push(t.tref.table.clone());
            }
        }
        Ok(RewrittenQuery {
            templates,
            mapping: self.mapping(),
            chunked_tables,
        })
    }

    fn patch(&self, factor: &mut TableFactor, idx: usize, permutation: usize) {
        let plan = &self.tables[idx];
        let (db, table) = match self.substitution(idx, permutation) {
            Substitution::Verbatim => return,
            Substitution::Chunk => (plan.tref.db.clone(), table_namer::chunk_table(&plan.tref.table)),
            Substitution::SubChunk => (
                table_namer::subchunk_db(&plan.tref.db),
                table_namer::subchunk_table(&plan.tref.table),
            ),
            Substitution::Overlap => (
                table_namer::subchunk_db(&plan.tref.db),
                table_namer::overlap_table(&plan.tref.table),
            ),
        };
        if let TableFactor::Table { name, alias, .. } = factor {
            *name = ObjectName(vec![Ident::new(db), Ident::new(table)]);
            if alias.is_none() {
                // keeps table-qualified column references valid
                *alias = Some(TableAlias {
                    name: Ident::new(plan.tref.table.clone()),
                    columns: Vec::new(),
                });
            }
        }
    }
}

/// The SELECT body of a query.
pub fn select_mut(query: &mut Query) -> Result<&mut Select, QservError> {
    match query.body.as_mut() {
        SetExpr::Select(select) => Ok(select.as_mut()),
        other => Err(QservError::Analysis(format!(
            "Only SELECT statements are supported, not {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::Statement;
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    fn parse(sql: &str) -> Query {
        match Parser::parse_sql(&GenericDialect {}, sql).unwrap().remove(0) {
            Statement::Query(q) => *q,
            other => panic!("not a query: {}", other),
        }
    }

    fn plan(position: usize, table: &str, alias: Option<&str>, level: ChunkLevel, overlap: f64) -> TablePlan {
        TablePlan {
            tref: TableRefInfo {
                position,
                db: String::from("LSST"),
                table: table.to_string(),
                alias: alias.map(|a| a.to_string()),
            },
            level,
            overlap,
        }
    }

    #[test]
    fn test_single_chunked_table() {
        let rw = ChunkRewriter::new(vec![plan(0, "Object", None, ChunkLevel::SubChunked, 0.0)]).unwrap();
        assert!(!rw.needs_subchunks());
        let out = rw.rewrite(&parse("SELECT Object.ra FROM Object WHERE flux > 3")).unwrap();
        assert_eq!(
            vec!["SELECT Object.ra FROM LSST.Object_%CC% AS Object WHERE flux > 3"],
            out.templates
        );
        assert!(out.mapping.has_chunks());
        assert!(!out.mapping.has_sub_chunks());
        assert_eq!(vec!["Object"], out.chunked_tables);
    }

    #[test]
    fn test_replicated_untouched() {
        let rw = ChunkRewriter::new(vec![plan(0, "Filter", Some("f"), ChunkLevel::Unpartitioned, 0.0)]).unwrap();
        let out = rw.rewrite(&parse("SELECT * FROM Filter AS f")).unwrap();
        assert_eq!(vec!["SELECT * FROM Filter AS f"], out.templates);
        assert!(!out.mapping.has_chunks());
        assert!(out.chunked_tables.is_empty());
    }

    #[test]
    fn test_overlap_permutations() {
        let rw = ChunkRewriter::new(vec![
            plan(0, "Object", Some("a"), ChunkLevel::SubChunked, 0.0),
            plan(1, "Object", Some("b"), ChunkLevel::SubChunked, 0.01),
            plan(2, "Exposure", Some("e"), ChunkLevel::Chunked, 0.0),
        ])
        .unwrap();
        assert!(rw.needs_subchunks());
        assert_eq!(2, rw.permutation_count());
        let out = rw
            .rewrite(&parse("SELECT * FROM Object AS a, Object AS b, Exposure AS e"))
            .unwrap();
        assert_eq!(
            "SELECT * FROM Subchunks_LSST_%CC%.Object_%CC%_%SS% AS a, \
             Subchunks_LSST_%CC%.Object_%CC%_%SS% AS b, LSST.Exposure_%CC% AS e",
            out.templates[0]
        );
        assert_eq!(
            "SELECT * FROM Subchunks_LSST_%CC%.Object_%CC%_%SS% AS a, \
             Subchunks_LSST_%CC%.ObjectFullOverlap_%CC%_%SS% AS b, LSST.Exposure_%CC% AS e",
            out.templates[1]
        );
        assert_eq!(vec!["Object"], out.mapping.sub_chunk_tables().collect::<Vec<_>>());
        assert_eq!(vec!["Object", "Exposure"], out.chunked_tables);
    }

    #[test]
    fn test_overlap_cap() {
        let mut tables: Vec<TablePlan> = (0..MAX_OVERLAP_TABLES)
            .map(|i| plan(i, "Object", None, ChunkLevel::SubChunked, 0.01))
            .collect();
        let rw = ChunkRewriter::new(tables.clone()).unwrap();
        assert_eq!(1 << (MAX_OVERLAP_TABLES - 1), rw.permutation_count());
        tables.push(plan(MAX_OVERLAP_TABLES, "Object", None, ChunkLevel::SubChunked, 0.01));
        match ChunkRewriter::new(tables) {
            Err(QservError::Analysis(msg)) => assert!(msg.starts_with("too many overlap tables")),
            other => panic!("unexpected {:?}", other.map(|r| r.permutation_count())),
        }
    }

    #[test]
    fn test_overlap_cap_ignores_pinned_without_overlap() {
        // pinned reference needs no overlap, 8 others do
        let mut tables = vec![plan(0, "Object", Some("a"), ChunkLevel::SubChunked, 0.0)];
        for i in 1..=MAX_OVERLAP_TABLES {
            tables.push(plan(i, "Object", None, ChunkLevel::SubChunked, 0.01));
        }
        let rw = ChunkRewriter::new(tables.clone()).unwrap();
        assert_eq!(1 << MAX_OVERLAP_TABLES, rw.permutation_count());
        tables.push(plan(MAX_OVERLAP_TABLES + 1, "Object", None, ChunkLevel::SubChunked, 0.01));
        match ChunkRewriter::new(tables) {
            Err(QservError::Analysis(msg)) => assert_eq!("too many overlap tables (9 > 8)", msg),
            other => panic!("unexpected {:?}", other.map(|r| r.permutation_count())),
        }
    }

    #[test]
    fn test_rewrite_leaves_original() {
        let query = parse("SELECT * FROM Object AS o JOIN Source AS s ON o.objectId = s.objectId");
        let before = query.to_string();
        let rw = ChunkRewriter::new(vec![
            plan(0, "Object", Some("o"), ChunkLevel::SubChunked, 0.0),
            plan(1, "Source", Some("s"), ChunkLevel::SubChunked, 0.0),
        ])
        .unwrap();
        let out = rw.rewrite(&query).unwrap();
        assert_eq!(before, query.to_string());
        assert_eq!(1, out.templates.len());
    }
}
