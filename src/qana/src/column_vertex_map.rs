use crate::column_ref::ColumnRef;
use crate::not_evaluable;
use common::QservError;
use std::cmp::Ordering;
use std::mem;

/// One column reference and the vertices its values can come from.
///
/// An empty vertex list marks the reference as ambiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub cr: ColumnRef,
    pub vertices: Vec<usize>,
}

/// Maps column references to the relation graph vertices able to supply them.
///
/// Most references name a single table reference. Ambiguous references map to
/// nothing and raise on lookup. Natural join columns map to every table
/// reference taking part in the natural join, since the joined column is the
/// coalesce of all of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnVertexMap {
    entries: Vec<Entry>, // sorted by cr
}

impl ColumnVertexMap {
    pub fn new() -> Self {
        ColumnVertexMap {
            entries: Vec::new(),
        }
    }

    /// Creates a map from references that all resolve to `vertex`.
    ///
    /// # Arguments
    ///
    /// * `vertex` - Index of the vertex supplying the columns.
    /// * `refs` - Column references for the vertex.
    pub fn from_refs(vertex: usize, refs: Vec<ColumnRef>) -> Self {
        let mut entries: Vec<Entry> = refs
            .into_iter()
            .map(|cr| Entry {
                cr,
                vertices: vec![vertex],
            })
            .collect();
        entries.sort_by(|a, b| a.cr.cmp(&b.cr));
        ColumnVertexMap { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the vertices for a column reference.
    ///
    /// Unknown columns map to an empty slice, ambiguous ones are an error.
    pub fn find(&self, cr: &ColumnRef) -> Result<&[usize], QservError> {
        match self.entries.binary_search_by(|e| e.cr.cmp(cr)) {
            Err(_) => Ok(&[]),
            Ok(idx) => {
                let entry = &self.entries[idx];
                if entry.vertices.is_empty() {
                    Err(not_evaluable(&format!(
                        "Column reference {} is ambiguous",
                        cr
                    )))
                } else {
                    Ok(&entry.vertices)
                }
            }
        }
    }

    /// Shifts every vertex index by `offset`.
    pub fn rebase(&mut self, offset: usize) {
        for entry in self.entries.iter_mut() {
            for v in entry.vertices.iter_mut() {
                *v += offset;
            }
        }
    }

    /// Moves the entries of `other` into this map, leaving `other` empty.
    ///
    /// A reference present in both maps becomes ambiguous, unless it is an
    /// unqualified natural join column; those concatenate their vertices.
    ///
    /// # Arguments
    ///
    /// * `other` - Map to drain.
    /// * `natural` - Whether the maps are being joined by a natural join.
    pub fn splice(&mut self, other: &mut ColumnVertexMap, natural: bool) -> Result<(), QservError> {
        let left = mem::take(&mut self.entries);
        let right = mem::take(&mut other.entries);
        let mut merged: Vec<Entry> = Vec::with_capacity(left.len() + right.len());
        let mut li = left.into_iter().peekable();
        let mut ri = right.into_iter().peekable();
        loop {
            let next = match (li.peek(), ri.peek()) {
                (Some(l), Some(r)) => match l.cr.cmp(&r.cr) {
                    Ordering::Greater => ri.next(),
                    _ => li.next(),
                },
                (Some(_), None) => li.next(),
                (None, Some(_)) => ri.next(),
                (None, None) => break,
            };
            let entry = match next {
                Some(e) => e,
                None => break,
            };
            match merged.last_mut() {
                Some(last) if last.cr == entry.cr => {
                    if last.cr.is_qualified() || !natural {
                        last.vertices.clear();
                    } else if last.vertices.is_empty() || entry.vertices.is_empty() {
                        return Err(not_evaluable(&format!(
                            "Natural join column {} is ambiguous",
                            last.cr.column
                        )));
                    } else {
                        last.vertices.extend(entry.vertices);
                    }
                }
                _ => merged.push(entry),
            }
        }
        self.entries = merged;
        Ok(())
    }

    /// Unqualified column names present in both this map and `other`.
    ///
    /// # Arguments
    ///
    /// * `other` - Map of the other side of a natural join.
    pub fn common_columns(&self, other: &ColumnVertexMap) -> Result<Vec<String>, QservError> {
        let mut cols = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.entries.len() && j < other.entries.len() {
            let (a, b) = (&self.entries[i], &other.entries[j]);
            match a.cr.cmp(&b.cr) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    if !a.cr.is_qualified() {
                        if a.vertices.is_empty() || b.vertices.is_empty() {
                            return Err(not_evaluable(&format!(
                                "Natural join column {} is ambiguous",
                                a.cr.column
                            )));
                        }
                        cols.push(a.cr.column.clone());
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        Ok(cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(vertex: usize, alias: Option<&str>) -> ColumnVertexMap {
        let mut refs = ColumnRef::all_for("objectId", "LSST", "Object", alias);
        refs.extend(ColumnRef::all_for("ra", "LSST", "Object", alias));
        ColumnVertexMap::from_refs(vertex, refs)
    }

    #[test]
    fn test_find() {
        let m = object(0, Some("o"));
        assert_eq!(4, m.len());
        assert_eq!(&[0], m.find(&ColumnRef::new("", "o", "ra")).unwrap());
        assert!(m.find(&ColumnRef::new("", "s", "ra")).unwrap().is_empty());
        assert!(m
            .find(&ColumnRef::new("LSST", "Object", "ra"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_splice_marks_ambiguous() {
        let mut a = object(0, Some("a"));
        let mut b = object(1, Some("b"));
        a.splice(&mut b, false).unwrap();
        assert!(b.is_empty());
        assert_eq!(&[0], a.find(&ColumnRef::new("", "a", "ra")).unwrap());
        assert_eq!(&[1], a.find(&ColumnRef::new("", "b", "ra")).unwrap());
        match a.find(&ColumnRef::unqualified("ra")) {
            Err(QservError::Analysis(msg)) => {
                assert_eq!("Column reference ra is ambiguous", msg)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_splice_natural() {
        let mut a = object(0, Some("a"));
        let mut b = object(1, Some("b"));
        assert_eq!(
            vec![String::from("objectId"), String::from("ra")],
            a.common_columns(&b).unwrap()
        );
        a.splice(&mut b, true).unwrap();
        assert_eq!(&[0, 1], a.find(&ColumnRef::unqualified("ra")).unwrap());

        // A natural join against an ambiguous column fails.
        let mut c = object(2, None);
        let mut d = object(3, Some("d"));
        c.splice(&mut d, false).unwrap();
        let e = object(4, Some("e"));
        assert!(c.common_columns(&e).is_err());
        let mut e = e;
        assert!(c.splice(&mut e, true).is_err());
    }

    #[test]
    fn test_rebase() {
        let mut m = object(0, None);
        m.rebase(3);
        assert_eq!(&[3], m.find(&ColumnRef::unqualified("ra")).unwrap());
    }
}
