use common::MergeError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Rows merged into one result table.
#[derive(Debug, Default)]
struct ResultTable {
    width: Option<usize>,
    rows: Vec<Vec<String>>,
}

/// Merges partial chunk results into result tables.
///
/// Input is newline-terminated CSV rows. Merges into different tables run
/// concurrently, merges into the same table are serialized by a per-table
/// lock so rows of concurrent merges never interleave.
#[derive(Debug)]
pub struct TableMerger {
    tables: Mutex<HashMap<String, Arc<Mutex<ResultTable>>>>,
    merged_bytes: AtomicUsize,
    /// Largest total result size accepted, in bytes.
    max_size: Option<usize>,
    finalized: AtomicBool,
}

impl TableMerger {
    /// Creates a merger.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Result size limit in bytes, `None` for unlimited.
    pub fn new(max_size: Option<usize>) -> Self {
        TableMerger {
            tables: Mutex::new(HashMap::new()),
            merged_bytes: AtomicUsize::new(0),
            max_size,
            finalized: AtomicBool::new(false),
        }
    }

    fn table(&self, name: &str) -> Arc<Mutex<ResultTable>> {
        let mut tables = self.tables.lock().unwrap();
        tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ResultTable::default())))
            .clone()
    }

    /// Merges the complete rows at the front of `buf` into `table`.
    ///
    /// Returns the number of bytes consumed, which ends right after the last
    /// newline of `buf`. Bytes after it belong to a row still being received.
    /// Either every complete row is merged or none is.
    ///
    /// # Arguments
    ///
    /// * `buf` - Received bytes.
    /// * `table` - Result table name.
    pub fn merge(&self, buf: &[u8], table: &str) -> Result<usize, MergeError> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(MergeError::Io(format!(
                "Merge into {} after finalize",
                table
            )));
        }
        let end = match buf.iter().rposition(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None => return Ok(0),
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(&buf[..end]);
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| MergeError::Schema(e.to_string()))?;
            rows.push(record.iter().map(|f| f.to_string()).collect::<Vec<String>>());
        }

        let target = self.table(table);
        let mut target = target.lock().unwrap();
        let mut width = target.width;
        for row in rows.iter() {
            match width {
                None => width = Some(row.len()),
                Some(w) if w != row.len() => {
                    return Err(MergeError::Schema(format!(
                        "Row has {} fields but {} has {}",
                        row.len(),
                        table,
                        w
                    )))
                }
                Some(_) => {}
            }
        }
        let total = self.merged_bytes.fetch_add(end, Ordering::SeqCst) + end;
        if let Some(max) = self.max_size {
            if total > max {
                self.merged_bytes.fetch_sub(end, Ordering::SeqCst);
                return Err(MergeError::ResultTooBig(total));
            }
        }
        target.width = width;
        target.rows.extend(rows);
        Ok(end)
    }

    /// Marks the result complete. Returns true on the first call only.
    pub fn finalize(&self) -> bool {
        let first = !self.finalized.swap(true, Ordering::SeqCst);
        if first {
            info!("Merge finalized after {} bytes", self.merged_bytes());
        }
        first
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Total bytes merged across all tables.
    pub fn merged_bytes(&self) -> usize {
        self.merged_bytes.load(Ordering::SeqCst)
    }

    /// Snapshot of the rows merged into `table`.
    pub fn rows(&self, table: &str) -> Vec<Vec<String>> {
        let tables = self.tables.lock().unwrap();
        match tables.get(table) {
            Some(t) => t.lock().unwrap().rows.clone(),
            None => Vec::new(),
        }
    }

    pub fn row_count(&self, table: &str) -> usize {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|t| t.lock().unwrap().rows.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testutil::*;
    use std::thread;

    #[test]
    fn test_merge_complete_rows() {
        init();
        let m = TableMerger::new(None);
        assert_eq!(0, m.merge(b"1,a", "r").unwrap());
        assert_eq!(8, m.merge(b"1,a\n2,b\n3,", "r").unwrap());
        assert_eq!(2, m.row_count("r"));
        assert_eq!(vec!["2", "b"], m.rows("r")[1]);
        assert_eq!(8, m.merged_bytes());
        assert!(m.rows("other").is_empty());
    }

    #[test]
    fn test_width_mismatch() {
        let m = TableMerger::new(None);
        m.merge(b"1,a\n", "r").unwrap();
        match m.merge(b"2,b\n3,c,x\n", "r") {
            Err(MergeError::Schema(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        // Nothing of the failed merge is kept.
        assert_eq!(1, m.row_count("r"));
        // Other tables have their own width.
        assert_eq!(6, m.merge(b"1,2,3\n", "s").unwrap());
    }

    #[test]
    fn test_result_too_big() {
        let m = TableMerger::new(Some(10));
        assert_eq!(8, m.merge(b"1,a\n2,b\n", "r").unwrap());
        match m.merge(b"3,c\n", "r") {
            Err(e) => assert!(e.result_too_big()),
            Ok(n) => panic!("merged {} bytes", n),
        }
        assert_eq!(8, m.merged_bytes());
    }

    #[test]
    fn test_finalize_once() {
        let m = TableMerger::new(None);
        assert!(m.finalize());
        assert!(!m.finalize());
        assert!(m.is_finalized());
        assert!(m.merge(b"1\n", "r").is_err());
    }

    #[test]
    fn test_concurrent_merges() {
        let m = Arc::new(TableMerger::new(None));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let m = m.clone();
                thread::spawn(move || {
                    let rows = gen_csv_rows(100, 3);
                    let table = if i % 2 == 0 { "even" } else { "odd" };
                    m.merge(&rows, table).unwrap()
                })
            })
            .collect();
        let bytes: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(bytes, m.merged_bytes());
        assert_eq!(200, m.row_count("even"));
        assert_eq!(200, m.row_count("odd"));
    }
}
