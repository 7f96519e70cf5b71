use sqlparser::ast::Expr;
use std::cmp::Ordering;
use std::fmt;

/// A possibly qualified column reference. Empty parts are absent.
///
/// References order by column, then table, then database, so that all
/// references to one column name are adjacent in a sorted list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub db: String,
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    /// Creates a new column reference.
    ///
    /// # Arguments
    ///
    /// * `db` - Database qualifier, or empty.
    /// * `table` - Table or alias qualifier, or empty.
    /// * `column` - Column name.
    pub fn new(db: &str, table: &str, column: &str) -> Self {
        ColumnRef {
            db: db.to_string(),
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    /// An unqualified reference.
    pub fn unqualified(column: &str) -> Self {
        ColumnRef::new("", "", column)
    }

    pub fn is_qualified(&self) -> bool {
        !self.db.is_empty() || !self.table.is_empty()
    }

    /// Extracts a column reference from an expression that is nothing but one.
    pub fn from_expr(expr: &Expr) -> Option<ColumnRef> {
        match expr {
            Expr::Identifier(ident) => Some(ColumnRef::unqualified(&ident.value)),
            Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [table, column] => Some(ColumnRef::new("", &table.value, &column.value)),
                [db, table, column] => {
                    Some(ColumnRef::new(&db.value, &table.value, &column.value))
                }
                _ => None,
            },
            Expr::Nested(inner) => ColumnRef::from_expr(inner),
            _ => None,
        }
    }

    /// All the ways a query may refer to `column` of a table reference.
    ///
    /// With an alias only `alias.column` is valid besides the bare column.
    /// Without one, `table.column` and `db.table.column` are.
    ///
    /// # Arguments
    ///
    /// * `column` - Column name.
    /// * `db` - Database of the table reference.
    /// * `table` - Table name.
    /// * `alias` - Alias introduced for the table reference, if any.
    pub fn all_for(column: &str, db: &str, table: &str, alias: Option<&str>) -> Vec<ColumnRef> {
        let mut refs = Vec::with_capacity(3);
        if column.is_empty() {
            return refs;
        }
        refs.push(ColumnRef::unqualified(column));
        match alias {
            Some(alias) if !alias.is_empty() => refs.push(ColumnRef::new("", alias, column)),
            _ => {
                if !table.is_empty() {
                    refs.push(ColumnRef::new("", table, column));
                    if !db.is_empty() {
                        refs.push(ColumnRef::new(db, table, column));
                    }
                }
            }
        }
        refs
    }
}

impl Ord for ColumnRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.column
            .cmp(&other.column)
            .then_with(|| self.table.cmp(&other.table))
            .then_with(|| self.db.cmp(&other.db))
    }
}

impl PartialOrd for ColumnRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.db.is_empty() {
            write!(f, "{}.", self.db)?;
        }
        if !self.table.is_empty() {
            write!(f, "{}.", self.table)?;
        }
        write!(f, "{}", self.column)
    }
}
