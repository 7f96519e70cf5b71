//! Admissibility and overlap inference for partitioned joins.
//!
//! A query over partitioned tables can be answered by running it on every
//! chunk independently and concatenating the results only if every pair of
//! joined rows is guaranteed to live in the same partition, or in a partition
//! and its overlap. The relation graph has one vertex per partitioned table
//! reference (two for a match table, one per foreign key) and one edge per
//! join predicate able to prove such co-location. Equality edges join rows
//! sharing a partitioning key. Spatial edges join director rows closer than
//! an angular bound, which is satisfiable as long as the bound fits into the
//! partition overlap.
//!
//! Validation picks a vertex that reads only its own partition and walks the
//! graph, inferring the overlap every other vertex needs. The query is
//! evaluable when some start reaches every vertex with a finite overlap.

use crate::column_ref::ColumnRef;
use crate::column_vertex_map::ColumnVertexMap;
use crate::not_evaluable;
use crate::table_ref::TableRefInfo;
use common::table::{DirTableInfo, MatchTableInfo, TableInfo, TableInfoPool};
use common::QservError;
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, JoinConstraint, JoinOperator, Select,
    TableFactor, TableWithJoins, UnaryOperator, Value,
};
use std::mem;
use std::sync::Arc;

const ANG_SEP_FUNCTION: &str = "scisql_angSep";

/// Join types the analysis distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
    Union,
}

impl JoinType {
    pub fn is_outer(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Right | JoinType::Full)
    }

    /// Splits a parsed join operator into its type, NATURAL flag and join spec.
    pub fn from_operator(
        op: &JoinOperator,
    ) -> Result<(JoinType, bool, Option<JoinSpec>), QservError> {
        let (jt, constraint) = match op {
            JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
            JoinOperator::LeftOuter(c) => (JoinType::Left, Some(c)),
            JoinOperator::RightOuter(c) => (JoinType::Right, Some(c)),
            JoinOperator::FullOuter(c) => (JoinType::Full, Some(c)),
            JoinOperator::CrossJoin => (JoinType::Cross, None),
            _ => {
                return Err(not_evaluable(
                    "SEMI, ANTI and APPLY joins are not currently supported.",
                ))
            }
        };
        Ok(match constraint {
            Some(JoinConstraint::On(expr)) => (jt, false, Some(JoinSpec::On(expr.clone()))),
            Some(JoinConstraint::Using(cols)) => (
                jt,
                false,
                Some(JoinSpec::Using(
                    cols.iter()
                        .map(|c| ColumnRef::unqualified(&c.value))
                        .collect(),
                )),
            ),
            Some(JoinConstraint::Natural) => (jt, true, None),
            Some(JoinConstraint::None) | None => (jt, false, None),
        })
    }
}

/// The ON or USING clause of a join.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinSpec {
    On(Expr),
    Using(Vec<ColumnRef>),
}

/// An admissible join predicate, as seen from one of its endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    /// Index of the vertex at the other end.
    pub vertex: usize,
    /// Angular separation bound in degrees. NaN for equality edges.
    pub ang_sep: f64,
}

impl Edge {
    pub fn equality(vertex: usize) -> Self {
        Edge {
            vertex,
            ang_sep: f64::NAN,
        }
    }

    pub fn spatial(vertex: usize, ang_sep: f64) -> Self {
        Edge { vertex, ang_sep }
    }

    pub fn is_spatial(&self) -> bool {
        !self.ang_sep.is_nan()
    }
}

/// A partitioned table reference, or one side of a match table reference.
#[derive(Debug, Clone)]
pub struct Vertex {
    /// Position of the table reference this vertex belongs to.
    pub tref: usize,
    pub info: Arc<TableInfo>,
    /// Overlap needed to evaluate the query, infinite until reached.
    pub overlap: f64,
    /// Edges sorted by target vertex.
    pub edges: Vec<Edge>,
    next: Option<usize>,
}

impl Vertex {
    fn new(tref: usize, info: Arc<TableInfo>) -> Self {
        Vertex {
            tref,
            info,
            overlap: f64::INFINITY,
            edges: Vec::new(),
            next: None,
        }
    }

    /// Adds an edge, merging it with an existing edge to the same vertex.
    ///
    /// Two spatial edges keep the tighter bound. A spatial edge merged with
    /// an equality edge becomes an equality edge.
    pub fn insert(&mut self, e: Edge) {
        match self.edges.binary_search_by_key(&e.vertex, |x| x.vertex) {
            Err(idx) => self.edges.insert(idx, e),
            Ok(idx) => {
                let existing = &mut self.edges[idx];
                if existing.is_spatial() && e.is_spatial() {
                    existing.ang_sep = existing.ang_sep.min(e.ang_sep);
                } else {
                    existing.ang_sep = f64::NAN;
                }
            }
        }
    }

    fn rebase(&mut self, offset: usize) {
        for e in self.edges.iter_mut() {
            e.vertex += offset;
        }
        self.next = None;
    }
}

/// Is an equality between column `ca` of `a` and column `cb` of `b` enough to
/// place matching rows in the same partition?
fn admissible(a: &TableInfo, ca: &str, b: &TableInfo, cb: &str, outer: bool) -> bool {
    match (a, b) {
        (TableInfo::Director(d1), TableInfo::Director(d2)) => {
            d1.same_table(d2) && ca == d1.pk && cb == d2.pk
        }
        (TableInfo::Director(d), TableInfo::Child(c)) => {
            c.director.same_table(d) && ca == d.pk && cb == c.fk
        }
        (TableInfo::Director(d), TableInfo::Match(m)) => {
            !outer && ca == d.pk && match_side(m, d, cb)
        }
        (TableInfo::Child(c1), TableInfo::Child(c2)) => {
            c1.director.same_table(&c2.director) && ca == c1.fk && cb == c2.fk
        }
        (TableInfo::Child(c), TableInfo::Match(m)) => {
            !outer && ca == c.fk && match_side(m, &c.director, cb)
        }
        (TableInfo::Match(_), TableInfo::Match(_)) => false,
        (TableInfo::Child(_), TableInfo::Director(_))
        | (TableInfo::Match(_), TableInfo::Director(_))
        | (TableInfo::Match(_), TableInfo::Child(_)) => admissible(b, cb, a, ca, outer),
    }
}

/// Does `column` of the match table reference director `d`?
fn match_side(m: &MatchTableInfo, d: &DirTableInfo, column: &str) -> bool {
    (m.director.0.same_table(d) && m.fk.0 == column)
        || (m.director.1.same_table(d) && m.fk.1 == column)
}

fn verify_join(jt: JoinType, natural: bool, spec: Option<&JoinSpec>) -> Result<(), QservError> {
    match jt {
        JoinType::Union => Err(not_evaluable(
            "UNION JOIN queries are not currently supported.",
        )),
        JoinType::Full => Err(not_evaluable(
            "FULL OUTER JOIN queries are not currently supported.",
        )),
        JoinType::Cross => {
            if natural || spec.is_some() {
                panic!("Query analysis bug: a CROSS JOIN cannot be NATURAL or have an ON or USING clause.");
            }
            Ok(())
        }
        JoinType::Inner | JoinType::Left | JoinType::Right => {
            if natural && spec.is_some() {
                panic!("Query analysis bug: a JOIN cannot be NATURAL and have an ON or USING clause.");
            }
            Ok(())
        }
    }
}

fn strip_nested(expr: &Expr) -> &Expr {
    match expr {
        Expr::Nested(inner) => strip_nested(inner),
        other => other,
    }
}

/// Value of a numeric literal, NaN for anything else.
fn numeric_const(expr: &Expr) -> f64 {
    match strip_nested(expr) {
        Expr::Value(Value::Number(s, _)) => s.parse::<f64>().unwrap_or(f64::NAN),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => -numeric_const(expr),
        Expr::UnaryOp {
            op: UnaryOperator::Plus,
            expr,
        } => numeric_const(expr),
        _ => f64::NAN,
    }
}

/// Arguments of a four-argument angular separation call.
fn ang_sep_args(expr: &Expr) -> Option<Vec<&Expr>> {
    let func = match strip_nested(expr) {
        Expr::Function(f) => f,
        _ => return None,
    };
    match func.name.0.last() {
        Some(name) if name.value.eq_ignore_ascii_case(ANG_SEP_FUNCTION) => {}
        _ => return None,
    }
    if func.args.len() != 4 {
        return None;
    }
    func.args
        .iter()
        .map(|a| match a {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Some(e),
            _ => None,
        })
        .collect()
}

/// FIFO of vertices threaded through the vertices themselves.
struct VertexQueue {
    head: Option<usize>,
    tail: Option<usize>,
}

impl VertexQueue {
    fn new() -> Self {
        VertexQueue {
            head: None,
            tail: None,
        }
    }

    fn dequeue(&mut self, vertices: &mut [Vertex]) -> Option<usize> {
        let v = self.head?;
        self.head = vertices[v].next.take();
        if self.head.is_none() {
            self.tail = None;
        }
        Some(v)
    }

    fn enqueue(&mut self, v: usize, vertices: &mut [Vertex]) {
        if vertices[v].next.is_some() || self.tail == Some(v) {
            // already queued
            return;
        }
        match self.tail {
            None => self.head = Some(v),
            Some(t) => vertices[t].next = Some(v),
        }
        self.tail = Some(v);
    }
}

/// Join graph of the partitioned table references of a FROM clause subtree.
///
/// Either empty (only replicated tables) or holding a vertex for every
/// partitioned reference of the subtree. Vertices are owned by the graph and
/// edges refer to them by index.
#[derive(Debug, Clone)]
pub struct RelationGraph {
    vertices: Vec<Vertex>,
    map: ColumnVertexMap,
    refs: Vec<TableRefInfo>,
    /// Partition overlap of the dominant database, in degrees.
    overlap: f64,
}

impl RelationGraph {
    /// Builds and validates the relation graph of a SELECT statement.
    ///
    /// # Arguments
    ///
    /// * `select` - Statement to analyze.
    /// * `pool` - Table metadata source.
    /// * `default_db` - Database of unqualified table names.
    /// * `dominant_db` - Database whose partition overlap applies.
    pub fn new(
        select: &Select,
        pool: &mut TableInfoPool,
        default_db: &str,
        dominant_db: &str,
    ) -> Result<Self, QservError> {
        if select.projection.is_empty() {
            return Err(not_evaluable("Query has no select list"));
        }
        if select.from.is_empty() {
            return Err(not_evaluable(
                "Query must include at least one table reference",
            ));
        }
        let overlap = pool.facade().overlap(dominant_db)?;
        let mut position = 0;
        let mut g = RelationGraph::from_entry(&select.from[0], pool, default_db, overlap, &mut position)?;
        for twj in select.from[1..].iter() {
            let tmp = RelationGraph::from_entry(twj, pool, default_db, overlap, &mut position)?;
            g.join(JoinType::Cross, false, None, tmp)?;
        }
        if let Some(selection) = &select.selection {
            g.make_where_eq_edges(selection)?;
            g.make_sp_edges(selection)?;
        }
        if !g.validate() {
            return Err(not_evaluable(
                "Query cannot be evaluated using worker-local data",
            ));
        }
        debug!("Validated relation graph: {}", g.describe());
        Ok(g)
    }

    /// Graph of a single table reference. Replicated tables give an empty graph.
    ///
    /// # Arguments
    ///
    /// * `tref` - The table reference.
    /// * `info` - Its partitioning metadata, `None` when replicated.
    /// * `overlap` - Partition overlap in degrees.
    pub fn for_table(tref: TableRefInfo, info: Option<Arc<TableInfo>>, overlap: f64) -> Self {
        let mut g = RelationGraph {
            vertices: Vec::new(),
            map: ColumnVertexMap::new(),
            refs: Vec::new(),
            overlap,
        };
        if let Some(info) = info {
            let alias = tref.alias.as_deref();
            let (db, table) = (info.db(), info.table());
            match &*info {
                TableInfo::Match(m) => {
                    g.vertices.push(Vertex::new(tref.position, info.clone()));
                    g.vertices.push(Vertex::new(tref.position, info.clone()));
                    g.vertices[0].insert(Edge::spatial(1, overlap));
                    g.vertices[1].insert(Edge::spatial(0, overlap));
                    let mut first = ColumnVertexMap::from_refs(
                        0,
                        ColumnRef::all_for(&m.fk.0, db, table, alias),
                    );
                    let mut second = ColumnVertexMap::from_refs(
                        1,
                        ColumnRef::all_for(&m.fk.1, db, table, alias),
                    );
                    // only natural splices can fail
                    let _ = first.splice(&mut second, false);
                    g.map = first;
                }
                _ => {
                    let refs = info
                        .partitioning_columns()
                        .into_iter()
                        .flat_map(|(col, _)| ColumnRef::all_for(col, db, table, alias))
                        .collect();
                    g.vertices.push(Vertex::new(tref.position, info.clone()));
                    g.map = ColumnVertexMap::from_refs(0, refs);
                }
            }
        }
        g.refs.push(tref);
        g
    }

    fn from_entry(
        twj: &TableWithJoins,
        pool: &mut TableInfoPool,
        default_db: &str,
        overlap: f64,
        position: &mut usize,
    ) -> Result<Self, QservError> {
        let mut g = RelationGraph::from_factor(&twj.relation, pool, default_db, overlap, position)?;
        for join in twj.joins.iter() {
            let (jt, natural, spec) = JoinType::from_operator(&join.join_operator)?;
            let right = RelationGraph::from_factor(&join.relation, pool, default_db, overlap, position)?;
            g.join(jt, natural, spec.as_ref(), right)?;
        }
        Ok(g)
    }

    fn from_factor(
        factor: &TableFactor,
        pool: &mut TableInfoPool,
        default_db: &str,
        overlap: f64,
        position: &mut usize,
    ) -> Result<Self, QservError> {
        if let TableFactor::NestedJoin {
            table_with_joins,
            alias,
        } = factor
        {
            if alias.is_some() {
                return Err(not_evaluable("Aliased nested joins are not supported"));
            }
            return RelationGraph::from_entry(table_with_joins, pool, default_db, overlap, position);
        }
        let tref = TableRefInfo::from_factor(factor, *position, default_db)?;
        *position += 1;
        let info = pool.get(&tref.db, &tref.table)?;
        Ok(RelationGraph::for_table(tref, info, overlap))
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Table references covered by this graph, in syntactic order.
    pub fn refs(&self) -> &[TableRefInfo] {
        &self.refs
    }

    pub fn partition_overlap(&self) -> f64 {
        self.overlap
    }

    /// Overlap needed by the table reference at `position`.
    ///
    /// The maximum over the reference's vertices; 0 for replicated tables.
    pub fn required_overlap(&self, position: usize) -> f64 {
        self.vertices
            .iter()
            .filter(|v| v.tref == position)
            .map(|v| v.overlap)
            .fold(0.0, f64::max)
    }

    /// Total number of edge endpoints, twice the number of edges.
    pub fn edge_count(&self) -> usize {
        self.vertices.iter().map(|v| v.edges.len()).sum()
    }

    /// One line summary of vertices, overlaps and edges.
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .vertices
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let edges: Vec<String> = v
                    .edges
                    .iter()
                    .map(|e| {
                        if e.is_spatial() {
                            format!("{}~{}", e.vertex, e.ang_sep)
                        } else {
                            format!("{}", e.vertex)
                        }
                    })
                    .collect();
                format!(
                    "#{} {} overlap={} -> [{}]",
                    i,
                    self.refs
                        .iter()
                        .find(|r| r.position == v.tref)
                        .map(|r| r.effective_name())
                        .unwrap_or("?"),
                    v.overlap,
                    edges.join(",")
                )
            })
            .collect();
        parts.join("; ")
    }

    fn rebase(&mut self, offset: usize) {
        for v in self.vertices.iter_mut() {
            v.rebase(offset);
        }
        self.map.rebase(offset);
    }

    /// Joins `g` into this graph, consuming it.
    ///
    /// # Arguments
    ///
    /// * `jt` - Join type.
    /// * `natural` - Whether the join is NATURAL.
    /// * `spec` - ON or USING clause.
    /// * `g` - Graph of the right hand side.
    pub fn join(
        &mut self,
        jt: JoinType,
        natural: bool,
        spec: Option<&JoinSpec>,
        mut g: RelationGraph,
    ) -> Result<(), QservError> {
        verify_join(jt, natural, spec)?;
        let mut right_refs = mem::take(&mut g.refs);
        if self.is_empty() {
            if !g.is_empty() {
                if jt == JoinType::Left {
                    return Err(not_evaluable(
                        "Query contains a LEFT JOIN between replicated and partitioned tables.",
                    ));
                }
                let refs = mem::take(&mut self.refs);
                mem::swap(self, &mut g);
                self.refs = refs;
            }
            self.refs.append(&mut right_refs);
            return Ok(());
        } else if g.is_empty() {
            if jt == JoinType::Right {
                return Err(not_evaluable(
                    "Query contains a RIGHT JOIN between partitioned and replicated tables.",
                ));
            }
            self.refs.append(&mut right_refs);
            return Ok(());
        }
        g.rebase(self.vertices.len());
        self.vertices.append(&mut g.vertices);
        let num_edges = if natural {
            self.make_natural_eq_edges(jt, &g.map)?
        } else {
            match spec {
                Some(JoinSpec::Using(cols)) => {
                    let mut n = 0;
                    for c in cols.iter() {
                        n += self.make_using_eq_edges(c, jt, &g.map)?;
                    }
                    n
                }
                Some(JoinSpec::On(on)) => self.make_on_eq_edges(on, jt, &g.map)?,
                None => 0,
            }
        };
        if jt.is_outer() && num_edges == 0 {
            return Err(not_evaluable(
                "Unable to evaluate query by joining only partition-local data.",
            ));
        }
        self.map.splice(&mut g.map, natural)?;
        self.refs.append(&mut right_refs);
        if !jt.is_outer() {
            if let Some(JoinSpec::On(on)) = spec {
                self.make_sp_edges(on)?;
            }
        }
        Ok(())
    }

    fn make_eq_edge(&mut self, ca: &str, cb: &str, outer: bool, a: usize, b: usize) -> usize {
        if a == b {
            return 0;
        }
        if !admissible(&self.vertices[a].info, ca, &self.vertices[b].info, cb, outer) {
            return 0;
        }
        debug!("Adding equality edge {}.{} = {}.{}", a, ca, b, cb);
        self.vertices[a].insert(Edge::equality(b));
        self.vertices[b].insert(Edge::equality(a));
        1
    }

    fn make_eq_edges(
        &mut self,
        ca: &str,
        cb: &str,
        outer: bool,
        v1: &[usize],
        v2: &[usize],
    ) -> usize {
        let mut n = 0;
        for &a in v1 {
            for &b in v2 {
                n += self.make_eq_edge(ca, cb, outer, a, b);
            }
        }
        n
    }

    /// Equality edges from the top level conjuncts of an ON clause joining
    /// this graph with the graph owning `other`.
    fn make_on_eq_edges(
        &mut self,
        on: &Expr,
        jt: JoinType,
        other: &ColumnVertexMap,
    ) -> Result<usize, QservError> {
        let (left, right) = match strip_nested(on) {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                return Ok(self.make_on_eq_edges(left, jt, other)?
                    + self.make_on_eq_edges(right, jt, other)?)
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => (left, right),
            _ => return Ok(0),
        };
        let (l, r) = match (ColumnRef::from_expr(left), ColumnRef::from_expr(right)) {
            (Some(l), Some(r)) => (l, r),
            _ => return Ok(0),
        };
        let al = self.map.find(&l)?.to_vec();
        let bl = other.find(&l)?.to_vec();
        let ar = self.map.find(&r)?.to_vec();
        let br = other.find(&r)?.to_vec();
        if (!al.is_empty() && !bl.is_empty()) || (!ar.is_empty() && !br.is_empty()) {
            let cr = if al.is_empty() { &r } else { &l };
            return Err(not_evaluable(&format!(
                "Column reference {} is ambiguous",
                cr
            )));
        }
        if (al.is_empty() && bl.is_empty()) || (ar.is_empty() && br.is_empty()) {
            // a column does not belong to a partitioned table
            return Ok(0);
        }
        if ((!al.is_empty() && !ar.is_empty()) || (!bl.is_empty() && !br.is_empty()))
            && jt.is_outer()
        {
            // both columns come from the same side, which an outer join
            // condition cannot use to restrict the join
            return Ok(0);
        }
        let v1 = if al.is_empty() { bl } else { al };
        let v2 = if ar.is_empty() { br } else { ar };
        Ok(self.make_eq_edges(&l.column, &r.column, jt.is_outer(), &v1, &v2))
    }

    fn make_natural_eq_edges(
        &mut self,
        jt: JoinType,
        other: &ColumnVertexMap,
    ) -> Result<usize, QservError> {
        let mut n = 0;
        for col in self.map.common_columns(other)? {
            let cr = ColumnRef::unqualified(&col);
            let v1 = self.map.find(&cr)?.to_vec();
            let v2 = other.find(&cr)?.to_vec();
            n += self.make_eq_edges(&col, &col, jt.is_outer(), &v1, &v2);
        }
        Ok(n)
    }

    fn make_using_eq_edges(
        &mut self,
        c: &ColumnRef,
        jt: JoinType,
        other: &ColumnVertexMap,
    ) -> Result<usize, QservError> {
        if c.is_qualified() {
            return Err(not_evaluable(
                "USING clause contains qualified column name",
            ));
        }
        let v1 = self.map.find(c)?.to_vec();
        let v2 = other.find(c)?.to_vec();
        Ok(self.make_eq_edges(&c.column, &c.column, jt.is_outer(), &v1, &v2))
    }

    /// Equality edges from the top level conjuncts of a WHERE clause.
    fn make_where_eq_edges(&mut self, expr: &Expr) -> Result<usize, QservError> {
        let (left, right) = match strip_nested(expr) {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => return Ok(self.make_where_eq_edges(left)? + self.make_where_eq_edges(right)?),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => (left, right),
            _ => return Ok(0),
        };
        let (l, r) = match (ColumnRef::from_expr(left), ColumnRef::from_expr(right)) {
            (Some(l), Some(r)) => (l, r),
            _ => return Ok(0),
        };
        let v1 = self.map.find(&l)?.to_vec();
        let v2 = self.map.find(&r)?.to_vec();
        Ok(self.make_eq_edges(&l.column, &r.column, false, &v1, &v2))
    }

    /// Spatial edges from top level angular separation conjuncts.
    fn make_sp_edges(&mut self, expr: &Expr) -> Result<usize, QservError> {
        let (left, op, right) = match strip_nested(expr) {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => return Ok(self.make_sp_edges(left)? + self.make_sp_edges(right)?),
            Expr::BinaryOp { left, op, right } => (left, op, right),
            _ => return Ok(0),
        };
        let (args, x) = match op {
            BinaryOperator::Lt | BinaryOperator::LtEq => (ang_sep_args(left), numeric_const(right)),
            BinaryOperator::Gt | BinaryOperator::GtEq => (ang_sep_args(right), numeric_const(left)),
            BinaryOperator::Eq => match ang_sep_args(left) {
                Some(args) => (Some(args), numeric_const(right)),
                None => (ang_sep_args(right), numeric_const(left)),
            },
            _ => return Ok(0),
        };
        let args = match args {
            Some(args) => args,
            None => return Ok(0),
        };
        if x.is_nan() || x < 0.0 || x > self.overlap {
            // the bound does not fit into the partition overlap
            return Ok(0);
        }
        let mut cols = Vec::with_capacity(4);
        let mut verts = Vec::with_capacity(4);
        for arg in args {
            let cr = match ColumnRef::from_expr(arg) {
                Some(cr) => cr,
                None => return Ok(0),
            };
            match self.map.find(&cr)?.first() {
                Some(&v) => verts.push(v),
                None => return Ok(0),
            }
            cols.push(cr);
        }
        if verts[0] != verts[1] || verts[2] != verts[3] || verts[0] == verts[2] {
            return Ok(0);
        }
        let ok = match (&*self.vertices[verts[0]].info, &*self.vertices[verts[2]].info) {
            (TableInfo::Director(d1), TableInfo::Director(d2)) => {
                cols[0].column == d1.lon
                    && cols[1].column == d1.lat
                    && cols[2].column == d2.lon
                    && cols[3].column == d2.lat
                    && d1.partitioning_id == d2.partitioning_id
            }
            _ => false,
        };
        if !ok {
            return Ok(0);
        }
        debug!("Adding spatial edge {} ~ {} within {}", verts[0], verts[2], x);
        self.vertices[verts[0]].insert(Edge::spatial(verts[2], x));
        self.vertices[verts[2]].insert(Edge::spatial(verts[0], x));
        Ok(1)
    }

    /// Infers required overlaps by a breadth first walk from `start`.
    fn traverse(&mut self, start: usize) {
        let partition_overlap = self.overlap;
        let mut queue = VertexQueue::new();
        self.vertices[start].overlap = 0.0;
        let mut current = Some(start);
        while let Some(v) = current {
            for i in 0..self.vertices[v].edges.len() {
                let e = self.vertices[v].edges[i];
                let u = e.vertex;
                let available = if self.vertices[u].info.is_director()
                    || (self.vertices[v].info.is_match() && self.vertices[u].info.is_match())
                {
                    partition_overlap
                } else {
                    0.0
                };
                let mut required = self.vertices[v].overlap;
                if e.is_spatial() {
                    required += e.ang_sep;
                }
                if required <= available && required < self.vertices[u].overlap {
                    self.vertices[u].overlap = required;
                    queue.enqueue(u, &mut self.vertices);
                }
            }
            current = queue.dequeue(&mut self.vertices);
        }
    }

    fn is_evaluable(&self) -> bool {
        self.vertices.iter().all(|v| v.overlap.is_finite())
    }

    fn reset(&mut self) {
        for v in self.vertices.iter_mut() {
            v.overlap = f64::INFINITY;
            v.next = None;
        }
    }

    /// Tries every non-match vertex as a zero overlap start, keeping the
    /// overlaps of the first start that reaches all vertices.
    fn validate(&mut self) -> bool {
        let mut starts = 0;
        for i in 0..self.vertices.len() {
            if self.vertices[i].info.is_match() {
                continue;
            }
            starts += 1;
            self.reset();
            self.traverse(i);
            if self.is_evaluable() {
                return true;
            }
        }
        if starts == 0 {
            // only match tables, which never join across partitions on their own
            for v in self.vertices.iter_mut() {
                v.overlap = 0.0;
            }
            return true;
        }
        false
    }
}
