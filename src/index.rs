//! Lookup table from encoded CID to file range id, built once per run from
//! the unmatched file ranges and shared read-only across all workers.

use cid::Cid;
use rustc_hash::FxHashMap;

use crate::error::CarlinkError;
use crate::store::FileRange;

#[derive(Debug)]
pub struct CidIndex {
    map: FxHashMap<String, i64>,
}

impl CidIndex {
    /// Builds the index from the expected set. A CID that fails to parse
    /// means the expected set itself is corrupt, so the run cannot proceed.
    pub fn build(ranges: &[FileRange]) -> Result<Self, CarlinkError> {
        let mut map = FxHashMap::with_capacity_and_hasher(ranges.len(), Default::default());
        for range in ranges {
            let cid = Cid::try_from(range.cid.as_slice()).map_err(|e| {
                CarlinkError::Cid(format!("file range {}: {}", range.id, e))
            })?;
            map.insert(cid.to_string(), range.id);
        }
        Ok(Self { map })
    }

    pub fn lookup(&self, encoded: &str) -> Option<i64> {
        self.map.get(encoded).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
