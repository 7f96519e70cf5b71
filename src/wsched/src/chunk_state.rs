use common::ChunkId;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

/// Which chunks are being scanned and which were scanned recently.
///
/// Recently completed chunks are assumed to still be cached; only the last
/// `cache_max` of them are remembered.
#[derive(Debug, Clone)]
pub struct ChunkState {
    cache_max: usize,
    cached: VecDeque<ChunkId>,
    scan: BTreeSet<ChunkId>,
    last: ChunkId,
}

impl ChunkState {
    pub fn new(cache_max: usize) -> Self {
        ChunkState {
            cache_max,
            cached: VecDeque::new(),
            scan: BTreeSet::new(),
            last: -1,
        }
    }

    pub fn set_max(&mut self, cache_max: usize) {
        self.cache_max = cache_max;
        self.evict();
    }

    pub fn add_scan(&mut self, chunk_id: ChunkId) {
        self.scan.insert(chunk_id);
        self.last = chunk_id;
        self.evict();
    }

    /// Moves `chunk_id` from the scan set into the cache.
    pub fn mark_complete(&mut self, chunk_id: ChunkId) {
        if !self.cached.contains(&chunk_id) {
            self.cached.push_back(chunk_id);
        }
        self.scan.remove(&chunk_id);
        self.evict();
    }

    pub fn is_cached(&self, chunk_id: ChunkId) -> bool {
        self.cached.contains(&chunk_id)
    }

    pub fn is_scan(&self, chunk_id: ChunkId) -> bool {
        self.scan.contains(&chunk_id)
    }

    pub fn empty(&self) -> bool {
        self.scan.is_empty() && self.cached.is_empty()
    }

    pub fn has_scan(&self) -> bool {
        !self.scan.is_empty()
    }

    /// Chunk of the most recent scan start, -1 before the first.
    pub fn last_scan(&self) -> ChunkId {
        self.last
    }

    fn evict(&mut self) {
        while self.cached.len() > self.cache_max {
            self.cached.pop_front();
        }
    }
}

impl Default for ChunkState {
    fn default() -> Self {
        ChunkState::new(2)
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scan: Vec<String> = self.scan.iter().map(|c| c.to_string()).collect();
        let cached: Vec<String> = self.cached.iter().map(|c| c.to_string()).collect();
        write!(
            f,
            "scan={} cached={} last={}",
            scan.join(","),
            cached.join(","),
            self.last
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_and_cache() {
        let mut cs = ChunkState::default();
        assert!(cs.empty());
        assert_eq!(-1, cs.last_scan());
        cs.add_scan(5);
        cs.add_scan(7);
        assert!(cs.has_scan());
        assert!(cs.is_scan(5));
        assert_eq!(7, cs.last_scan());
        cs.mark_complete(5);
        assert!(!cs.is_scan(5));
        assert!(cs.is_cached(5));
        cs.mark_complete(7);
        cs.mark_complete(9);
        // capacity 2 evicts the oldest
        assert!(!cs.is_cached(5));
        assert!(cs.is_cached(7));
        assert!(cs.is_cached(9));
        assert!(!cs.has_scan());
        assert!(!cs.empty());
        assert_eq!("scan= cached=7,9 last=7", cs.to_string());
        cs.set_max(1);
        assert!(!cs.is_cached(7));
    }

    #[test]
    fn test_complete_twice() {
        let mut cs = ChunkState::new(2);
        cs.add_scan(3);
        cs.mark_complete(3);
        cs.mark_complete(3);
        cs.mark_complete(4);
        assert!(cs.is_cached(3));
        assert!(cs.is_cached(4));
    }
}
