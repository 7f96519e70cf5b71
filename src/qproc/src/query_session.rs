use crate::chunk_rewriter::{select_mut, ChunkRewriter, RewrittenQuery, TablePlan};
use crate::chunk_spec::{ChunkFragment, ChunkQuerySpec, ChunkSpec};
use crate::DUMMY_CHUNK;
use common::table::TableInfoPool;
use common::{Facade, QservError, SessionId};
use qana::{table_ref, ColumnRef, RelationGraph, TableRefInfo};
use sqlparser::ast::{BinaryOperator, Expr, Query, Select, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::sync::Arc;

/// State of one user query, from SQL text to per-chunk queries.
///
/// The caller sets the query, reads `dominant_db()` to look up chunk
/// coverage, pushes that coverage with `add_chunk`, and finally iterates
/// `chunk_queries()`.
pub struct QuerySession {
    facade: Arc<dyn Facade>,
    default_db: String,
    session: SessionId,
    original: String,
    dominant_db: String,
    rewritten: Option<RewrittenQuery>,
    subchunked: bool,
    interactive: bool,
    chunks: Vec<ChunkSpec>,
}

impl QuerySession {
    /// Creates an empty session.
    ///
    /// # Arguments
    ///
    /// * `facade` - Metadata service.
    /// * `default_db` - Database of unqualified table names.
    pub fn new(facade: Arc<dyn Facade>, default_db: &str) -> Self {
        QuerySession {
            facade,
            default_db: default_db.to_string(),
            session: SessionId::new(),
            original: String::new(),
            dominant_db: default_db.to_string(),
            rewritten: None,
            subchunked: false,
            interactive: false,
            chunks: Vec::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn default_db(&self) -> &str {
        &self.default_db
    }

    /// Parses, analyzes and rewrites a user query.
    ///
    /// Fails if the query does not parse, references unknown tables, or
    /// cannot be evaluated on worker-local data.
    ///
    /// # Arguments
    ///
    /// * `sql` - Query text.
    pub fn set_query(&mut self, sql: &str) -> Result<(), QservError> {
        self.original = sql.to_string();
        self.rewritten = None;
        self.chunks.clear();
        let mut query = parse_query(sql)?;
        let select: &Select = select_mut(&mut query)?;
        let refs = table_ref::collect(select, &self.default_db)?;

        let mut plans = Vec::with_capacity(refs.len());
        let mut levels = Vec::with_capacity(refs.len());
        for tref in refs.iter() {
            if !self.facade.contains_table(&tref.db, &tref.table)? {
                return Err(common::CatalogError::NoSuchTable(tref.db.clone(), tref.table.clone()).into());
            }
            levels.push(self.facade.chunk_level(&tref.db, &tref.table)?);
        }
        self.dominant_db = refs
            .iter()
            .zip(levels.iter())
            .find(|(_, level)| level.is_partitioned())
            .map(|(tref, _)| tref.db.clone())
            .unwrap_or_else(|| self.default_db.clone());

        let mut pool = TableInfoPool::new(self.facade.as_ref());
        let graph = RelationGraph::new(select, &mut pool, &self.default_db, &self.dominant_db)?;
        for (tref, level) in refs.iter().zip(levels.into_iter()) {
            plans.push(TablePlan {
                tref: tref.clone(),
                level,
                overlap: graph.required_overlap(tref.position),
            });
        }
        self.interactive = self.uses_secondary_index(select, &refs);

        let rewriter = ChunkRewriter::new(plans)?;
        self.subchunked = rewriter.needs_subchunks();
        let rewritten = rewriter.rewrite(&query)?;
        info!(
            "{} planned against {}: {} templates, subchunks={}, interactive={}",
            self.session,
            self.dominant_db,
            rewritten.templates.len(),
            self.subchunked,
            self.interactive
        );
        for t in rewritten.templates.iter() {
            debug!("{} template: {}", self.session, t);
        }
        self.rewritten = Some(rewritten);
        Ok(())
    }

    /// Does the WHERE clause pin a partitioned table's secondary index
    /// column to a literal or list of literals?
    fn uses_secondary_index(&self, select: &Select, refs: &[TableRefInfo]) -> bool {
        let mut index_cols = Vec::new();
        for tref in refs.iter() {
            if let Ok(cols) = self.facade.partition_cols(&tref.db, &tref.table) {
                if !cols.sec_index.is_empty() {
                    index_cols.push((tref, cols.sec_index));
                }
            }
        }
        match &select.selection {
            Some(expr) => restricts_index(expr, &index_cols),
            None => false,
        }
    }

    /// Database the query is dispatched against.
    pub fn dominant_db(&self) -> &str {
        &self.dominant_db
    }

    /// Does the query touch partitioned tables?
    pub fn has_chunks(&self) -> bool {
        self.rewritten
            .as_ref()
            .map(|r| r.mapping.has_chunks())
            .unwrap_or(false)
    }

    pub fn needs_subchunks(&self) -> bool {
        self.subchunked
    }

    /// Rewritten query templates, empty until a query is set.
    pub fn templates(&self) -> &[String] {
        match &self.rewritten {
            Some(r) => &r.templates,
            None => &[],
        }
    }

    /// Table receiving merged results.
    pub fn result_table(&self) -> String {
        format!("result_{}", self.session.id())
    }

    /// Adds chunk coverage. Specs for an already added chunk are merged.
    ///
    /// # Arguments
    ///
    /// * `cs` - Chunk and subchunks to visit.
    pub fn add_chunk(&mut self, cs: ChunkSpec) -> Result<(), QservError> {
        if self.rewritten.is_none() {
            return Err(QservError::Analysis(String::from(
                "Chunks added before a query was set",
            )));
        }
        if self.subchunked && cs.subchunks.is_empty() {
            return Err(QservError::Analysis(format!(
                "Chunk {} has no subchunks but the query needs them",
                cs.chunk_id
            )));
        }
        match self.chunks.iter_mut().find(|c| c.chunk_id == cs.chunk_id) {
            Some(existing) => existing.merge(&cs),
            None => self.chunks.push(cs),
        }
        Ok(())
    }

    pub fn chunks(&self) -> &[ChunkSpec] {
        &self.chunks
    }

    /// Per-chunk queries in the order chunks were added.
    ///
    /// A query touching only replicated tables yields a single spec on a
    /// dummy chunk.
    pub fn chunk_queries(&self) -> ChunkQueries<'_> {
        let specs = match &self.rewritten {
            None => Vec::new(),
            Some(_) if !self.has_chunks() => vec![ChunkSpec::whole(DUMMY_CHUNK)],
            Some(_) => self.chunks.clone(),
        };
        ChunkQueries {
            session: self,
            specs,
            pos: 0,
        }
    }

    fn build_spec(&self, rewritten: &RewrittenQuery, cs: &ChunkSpec) -> ChunkQuerySpec {
        let mapping = &rewritten.mapping;
        let fragments = if self.subchunked {
            cs.subchunks
                .iter()
                .map(|sc| ChunkFragment {
                    subchunks: vec![*sc],
                    queries: rewritten
                        .templates
                        .iter()
                        .map(|t| mapping.bind(cs.chunk_id, Some(*sc), t))
                        .collect(),
                })
                .collect()
        } else {
            vec![ChunkFragment {
                subchunks: Vec::new(),
                queries: rewritten
                    .templates
                    .iter()
                    .map(|t| mapping.bind(cs.chunk_id, None, t))
                    .collect(),
            }]
        };
        ChunkQuerySpec {
            db: self.dominant_db.clone(),
            chunk_id: cs.chunk_id,
            scan_tables: if self.interactive {
                Vec::new()
            } else {
                rewritten.chunked_tables.clone()
            },
            fragments,
        }
    }
}

/// Iterator over the chunk queries of a session.
pub struct ChunkQueries<'s> {
    session: &'s QuerySession,
    specs: Vec<ChunkSpec>,
    pos: usize,
}

impl<'s> Iterator for ChunkQueries<'s> {
    type Item = ChunkQuerySpec;

    fn next(&mut self) -> Option<ChunkQuerySpec> {
        let rewritten = self.session.rewritten.as_ref()?;
        let cs = self.specs.get(self.pos)?;
        self.pos += 1;
        Some(self.session.build_spec(rewritten, cs))
    }
}

fn parse_query(sql: &str) -> Result<Query, QservError> {
    let mut stmts = Parser::parse_sql(&GenericDialect {}, sql)?;
    if stmts.len() != 1 {
        return Err(QservError::Parse(format!(
            "Expected one statement, found {}",
            stmts.len()
        )));
    }
    match stmts.remove(0) {
        Statement::Query(q) => Ok(*q),
        other => Err(QservError::Analysis(format!(
            "Only SELECT statements are supported, not {}",
            other
        ))),
    }
}

fn is_literal(expr: &Expr) -> bool {
    match expr {
        Expr::Value(_) => true,
        Expr::Nested(inner) => is_literal(inner),
        _ => false,
    }
}

fn names_index(expr: &Expr, index_cols: &[(&TableRefInfo, String)]) -> bool {
    let cr = match ColumnRef::from_expr(expr) {
        Some(cr) => cr,
        None => return false,
    };
    index_cols.iter().any(|(tref, col)| {
        cr.column == *col && (cr.table.is_empty() || cr.table == tref.effective_name())
    })
}

fn restricts_index(expr: &Expr, index_cols: &[(&TableRefInfo, String)]) -> bool {
    match expr {
        Expr::Nested(inner) => restricts_index(inner, index_cols),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => restricts_index(left, index_cols) || restricts_index(right, index_cols),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => {
            (names_index(left, index_cols) && is_literal(right))
                || (names_index(right, index_cols) && is_literal(left))
        }
        Expr::InList {
            expr,
            list,
            negated: false,
        } => names_index(expr, index_cols) && list.iter().all(is_literal),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testutil::*;

    fn session() -> QuerySession {
        init();
        QuerySession::new(Arc::new(test_facade()), "LSST")
    }

    #[test]
    fn test_director_child_join() {
        let mut qs = session();
        qs.set_query("SELECT * FROM Object AS o JOIN Source AS s ON o.objectId = s.objectId")
            .unwrap();
        assert!(qs.has_chunks());
        assert!(qs.needs_subchunks());
        assert_eq!("LSST", qs.dominant_db());
        assert_eq!(1, qs.templates().len());
        let t = &qs.templates()[0];
        assert!(t.contains("Object_%CC%_%SS% AS o JOIN "));
        assert!(t.contains("Source_%CC%_%SS% AS s ON o.objectId = s.objectId"));
        assert!(!t.contains("FullOverlap"));

        qs.add_chunk(ChunkSpec::new(100, vec![2, 1])).unwrap();
        qs.add_chunk(ChunkSpec::new(200, vec![9])).unwrap();
        qs.add_chunk(ChunkSpec::new(100, vec![3])).unwrap();
        let specs: Vec<ChunkQuerySpec> = qs.chunk_queries().collect();
        assert_eq!(2, specs.len());
        assert_eq!(100, specs[0].chunk_id);
        assert_eq!(3, specs[0].fragments.len());
        assert_eq!(vec![1], specs[0].fragments[0].subchunks);
        assert!(specs[0].fragments[0].queries[0]
            .contains("Subchunks_LSST_100.Object_100_1 AS o JOIN Subchunks_LSST_100.Source_100_1 AS s"));
        assert_eq!(vec!["Object", "Source"], specs[1].scan_tables);
    }

    #[test]
    fn test_near_neighbor() {
        let mut qs = session();
        qs.set_query(
            "SELECT * FROM Object AS a, Object AS b \
             WHERE scisql_angSep(a.ra, a.dec, b.ra, b.dec) < 0.01 AND a.objectId != b.objectId",
        )
        .unwrap();
        assert_eq!(2, qs.templates().len());
        let plain = qs
            .templates()
            .iter()
            .filter(|t| !t.contains("FullOverlap"))
            .count();
        assert_eq!(1, plain);
        assert!(qs.templates()[1].contains("ObjectFullOverlap_%CC%_%SS% AS b"));
        assert!(qs.templates()[1].contains("Object_%CC%_%SS% AS a"));

        qs.add_chunk(ChunkSpec::new(7, vec![1, 2])).unwrap();
        let spec = qs.chunk_queries().next().unwrap();
        assert_eq!(2, spec.fragments.len());
        assert_eq!(4, spec.queries().count());
        assert!(spec.fragments[1].queries[1].contains("ObjectFullOverlap_7_2 AS b"));
    }

    /// Star of near neighbor predicates from `a` to every other alias.
    fn star_query(aliases: &[&str]) -> String {
        let from: Vec<String> = aliases.iter().map(|a| format!("Object AS {}", a)).collect();
        let preds: Vec<String> = aliases[1..]
            .iter()
            .map(|b| format!("scisql_angSep(a.ra, a.dec, {0}.ra, {0}.dec) < 0.01", b))
            .collect();
        format!("SELECT * FROM {} WHERE {}", from.join(", "), preds.join(" AND "))
    }

    #[test]
    fn test_overlap_table_cap() {
        let mut qs = session();
        // eight references need overlap, the pinned one does not
        qs.set_query(&star_query(&["a", "b", "c", "d", "e", "f", "g", "h", "i"]))
            .unwrap();
        assert_eq!(1 << 8, qs.templates().len());
        assert!(qs.templates()[0].contains("Object_%CC%_%SS% AS a"));

        match qs.set_query(&star_query(&["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"])) {
            Err(QservError::Analysis(msg)) => assert_eq!("too many overlap tables (9 > 8)", msg),
            other => panic!("unexpected {:?}", other.map(|_| qs.templates().len())),
        }
    }

    #[test]
    fn test_single_table() {
        let mut qs = session();
        qs.set_query("SELECT objectId, flux FROM Object WHERE flux > 10").unwrap();
        assert!(!qs.needs_subchunks());
        assert!(qs.add_chunk(ChunkSpec::whole(55)).is_ok());
        let spec = qs.chunk_queries().next().unwrap();
        assert_eq!(
            vec!["SELECT objectId, flux FROM LSST.Object_55 AS Object WHERE flux > 10"],
            spec.fragments[0].queries
        );
        assert!(spec.fragments[0].subchunks.is_empty());
    }

    #[test]
    fn test_subchunks_required() {
        let mut qs = session();
        qs.set_query("SELECT * FROM Object AS o JOIN Source AS s ON o.objectId = s.objectId")
            .unwrap();
        assert!(qs.add_chunk(ChunkSpec::whole(55)).is_err());
        let mut qs = session();
        assert!(qs.add_chunk(ChunkSpec::whole(55)).is_err());
        assert_eq!(0, qs.chunk_queries().count());
    }

    #[test]
    fn test_replicated_only() {
        let mut qs = session();
        qs.set_query("SELECT filterName FROM Filter").unwrap();
        assert!(!qs.has_chunks());
        let specs: Vec<ChunkQuerySpec> = qs.chunk_queries().collect();
        assert_eq!(1, specs.len());
        assert_eq!(DUMMY_CHUNK, specs[0].chunk_id);
        assert_eq!(vec!["SELECT filterName FROM Filter"], specs[0].fragments[0].queries);
        assert!(specs[0].scan_tables.is_empty());
    }

    #[test]
    fn test_interactive() {
        let mut qs = session();
        qs.set_query("SELECT * FROM Object WHERE objectId IN (1, 2, 3)").unwrap();
        qs.add_chunk(ChunkSpec::whole(1)).unwrap();
        assert!(qs.chunk_queries().next().unwrap().scan_tables.is_empty());
        qs.set_query("SELECT * FROM Object AS o WHERE o.objectId = 42 AND flux > 1").unwrap();
        qs.add_chunk(ChunkSpec::whole(1)).unwrap();
        assert!(qs.chunk_queries().next().unwrap().scan_tables.is_empty());
        qs.set_query("SELECT * FROM Object WHERE objectId > 42").unwrap();
        qs.add_chunk(ChunkSpec::whole(1)).unwrap();
        assert_eq!(vec!["Object"], qs.chunk_queries().next().unwrap().scan_tables);
    }

    #[test]
    fn test_rejections() {
        let mut qs = session();
        match qs.set_query("SELECT * FROM Object AS o, Source AS s") {
            Err(QservError::Analysis(msg)) => {
                assert_eq!("Query cannot be evaluated using worker-local data", msg)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!qs.has_chunks());
        match qs.set_query("SELEKT 1") {
            Err(QservError::Parse(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        match qs.set_query("DELETE FROM Object") {
            Err(QservError::Analysis(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        match qs.set_query("SELECT * FROM Missing") {
            Err(QservError::Catalog(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_result_table() {
        let qs = session();
        assert_eq!(format!("result_{}", qs.session_id().id()), qs.result_table());
    }
}
