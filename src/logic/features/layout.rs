//! Sensor Column Layout
//!
//! **CRITICAL: column order is positional state.**
//! Scaler statistics and model weights are indexed by position in this set,
//! so the order is fixed once training completes and every frame scored
//! against a bundle is reindexed to it.
//!
//! ## Rules:
//! 1. Names are deduplicated and sorted lexicographically at construction
//! 2. A set loaded from disk keeps its stored order
//! 3. Identity = CRC32 layout hash over the ordered names

use std::collections::HashMap;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

// ============================================================================
// LAYOUT VERSION
// ============================================================================

/// Hash scheme version, folded into every layout hash
pub const LAYOUT_VERSION: u8 = 1;

// ============================================================================
// SENSOR COLUMN SET
// ============================================================================

/// Ordered, deduplicated sensor names used by one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorColumnSet {
    names: Vec<String>,
}

impl SensorColumnSet {
    /// Build a frozen set: dedup + lexicographic sort
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// CRC32 over version + ordered names
    pub fn layout_hash(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&[LAYOUT_VERSION]);
        for name in &self.names {
            hasher.update(name.as_bytes());
            hasher.update(&[0]); // Separator
        }
        hasher.finalize()
    }

    /// Same names in the same order
    pub fn is_compatible(&self, other: &SensorColumnSet) -> bool {
        self.len() == other.len() && self.layout_hash() == other.layout_hash()
    }

    /// For each column of this set, its position in `available` (None = absent)
    pub fn reindex_plan(&self, available: &[String]) -> Vec<Option<usize>> {
        let lookup: HashMap<&str, usize> = available
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        self.names.iter().map(|n| lookup.get(n.as_str()).copied()).collect()
    }

    /// Columns of this set absent from `available`
    pub fn missing_from(&self, available: &[String]) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| !available.contains(n))
            .cloned()
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_and_deduplicated() {
        let set = SensorColumnSet::from_names(["temp", "a_pressure", "temp", "rpm"]);
        assert_eq!(set.names(), &["a_pressure", "rpm", "temp"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_layout_hash_consistency() {
        let a = SensorColumnSet::from_names(["x", "y"]);
        let b = SensorColumnSet::from_names(["y", "x"]);
        assert_eq!(a.layout_hash(), b.layout_hash());
        assert!(a.is_compatible(&b));
    }

    #[test]
    fn test_layout_hash_differs_on_names() {
        let a = SensorColumnSet::from_names(["x", "y"]);
        let b = SensorColumnSet::from_names(["x", "z"]);
        assert_ne!(a.layout_hash(), b.layout_hash());
        assert!(!a.is_compatible(&b));
    }

    #[test]
    fn test_separator_prevents_concatenation_collisions() {
        let a = SensorColumnSet::from_names(["ab", "c"]);
        let b = SensorColumnSet::from_names(["a", "bc"]);
        assert_ne!(a.layout_hash(), b.layout_hash());
    }

    #[test]
    fn test_reindex_plan() {
        let set = SensorColumnSet::from_names(["a", "b", "c"]);
        let available = vec!["c".to_string(), "a".to_string()];
        assert_eq!(set.reindex_plan(&available), vec![Some(1), None, Some(0)]);
        assert_eq!(set.missing_from(&available), vec!["b".to_string()]);
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let set = SensorColumnSet::from_names(["s2", "s1"]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["s1","s2"]"#);

        let back: SensorColumnSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
