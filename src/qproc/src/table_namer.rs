//! Name templates of chunk, subchunk and overlap tables.

use crate::query_mapping::{CHUNK_TOKEN, SUBCHUNK_TOKEN};

const FULL_OVERLAP_SUFFIX: &str = "FullOverlap";

/// `Subchunks_{db}_%CC%`
pub fn subchunk_db(db: &str) -> String {
    format!("Subchunks_{}_{}", db, CHUNK_TOKEN)
}

/// `{table}_%CC%`
pub fn chunk_table(table: &str) -> String {
    format!("{}_{}", table, CHUNK_TOKEN)
}

/// `{table}_%CC%_%SS%`
pub fn subchunk_table(table: &str) -> String {
    format!("{}_{}_{}", table, CHUNK_TOKEN, SUBCHUNK_TOKEN)
}

/// `{table}FullOverlap_%CC%_%SS%`
pub fn overlap_table(table: &str) -> String {
    format!(
        "{}{}_{}_{}",
        table, FULL_OVERLAP_SUFFIX, CHUNK_TOKEN, SUBCHUNK_TOKEN
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_mapping::QueryMapping;

    #[test]
    fn test_templates() {
        assert_eq!("Subchunks_LSST_%CC%", subchunk_db("LSST"));
        assert_eq!("Object_%CC%", chunk_table("Object"));
        assert_eq!("Object_%CC%_%SS%", subchunk_table("Object"));
        assert_eq!("ObjectFullOverlap_%CC%_%SS%", overlap_table("Object"));
    }

    #[test]
    fn test_binding_commutes_with_naming() {
        let mut m = QueryMapping::new();
        m.insert_chunk_entry(CHUNK_TOKEN);
        m.insert_subchunk_entry(SUBCHUNK_TOKEN);
        for (chunk, sub) in &[(0, 0), (1234, 7), (98765, 143)] {
            let plain = m.bind(*chunk, Some(*sub), &subchunk_table("Object"));
            let overlap = m.bind(*chunk, Some(*sub), &overlap_table("Object"));
            assert_eq!(format!("Object_{}_{}", chunk, sub), plain);
            assert_eq!(format!("ObjectFullOverlap_{}_{}", chunk, sub), overlap);
            assert_eq!(
                plain.trim_start_matches("Object"),
                overlap.trim_start_matches("ObjectFullOverlap")
            );
        }
    }
}
