use common::{split_table_name, QservError};
use sqlparser::ast::{Select, TableFactor, TableWithJoins};

/// A table reference of the FROM clause, identified by its syntactic position.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRefInfo {
    /// Position in FROM order, counting join operands left to right.
    pub position: usize,
    pub db: String,
    pub table: String,
    pub alias: Option<String>,
}

impl TableRefInfo {
    /// Reads a plain table factor. Derived tables and table functions are not supported.
    ///
    /// # Arguments
    ///
    /// * `factor` - Table factor from the statement.
    /// * `position` - Syntactic position of the factor.
    /// * `default_db` - Database for unqualified table names.
    pub fn from_factor(
        factor: &TableFactor,
        position: usize,
        default_db: &str,
    ) -> Result<Self, QservError> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                if args.is_some() {
                    return Err(QservError::Analysis(format!(
                        "Table valued function {} is not supported",
                        name
                    )));
                }
                let (db, table) = split_table_name(name)?;
                Ok(TableRefInfo {
                    position,
                    db: db.unwrap_or_else(|| default_db.to_string()),
                    table,
                    alias: alias.as_ref().map(|a| a.name.value.clone()),
                })
            }
            other => Err(QservError::Analysis(format!(
                "Unsupported table reference: {}",
                other
            ))),
        }
    }

    /// Name by which the rest of the query refers to this table.
    pub fn effective_name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => &self.table,
        }
    }
}

/// Plain table factors of a FROM entry in syntactic order, descending into
/// parenthesized joins.
pub fn factors(twj: &TableWithJoins) -> Vec<&TableFactor> {
    let mut out = Vec::with_capacity(1 + twj.joins.len());
    push_factor(&twj.relation, &mut out);
    for join in twj.joins.iter() {
        push_factor(&join.relation, &mut out);
    }
    out
}

fn push_factor<'a>(factor: &'a TableFactor, out: &mut Vec<&'a TableFactor>) {
    match factor {
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => out.extend(factors(table_with_joins)),
        other => out.push(other),
    }
}

/// Mutable plain table factors of a whole SELECT in syntactic order.
pub fn factors_mut(select: &mut Select) -> Vec<&mut TableFactor> {
    let mut out = Vec::new();
    for twj in select.from.iter_mut() {
        push_factors_mut(twj, &mut out);
    }
    out
}

fn push_factors_mut<'a>(twj: &'a mut TableWithJoins, out: &mut Vec<&'a mut TableFactor>) {
    let TableWithJoins { relation, joins } = twj;
    push_factor_mut(relation, out);
    for join in joins.iter_mut() {
        push_factor_mut(&mut join.relation, out);
    }
}

fn push_factor_mut<'a>(factor: &'a mut TableFactor, out: &mut Vec<&'a mut TableFactor>) {
    match factor {
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => push_factors_mut(table_with_joins, out),
        other => out.push(other),
    }
}

/// Reads every table reference of a SELECT in syntactic order.
///
/// # Arguments
///
/// * `select` - Statement to scan.
/// * `default_db` - Database for unqualified table names.
pub fn collect(select: &Select, default_db: &str) -> Result<Vec<TableRefInfo>, QservError> {
    let mut refs = Vec::new();
    for twj in select.from.iter() {
        for factor in factors(twj) {
            let position = refs.len();
            refs.push(TableRefInfo::from_factor(factor, position, default_db)?);
        }
    }
    Ok(refs)
}
