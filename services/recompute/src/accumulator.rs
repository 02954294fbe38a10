//! Pure in-memory counting helpers shared by the daily computer and the
//! monthly aggregator. No I/O, no concurrency; `BTreeMap` keeps every
//! accumulated mapping in ascending key order for persistence.

use std::collections::BTreeMap;

/// Bump `map[key]` by one, inserting the key at zero if absent.
pub fn increment(map: &mut BTreeMap<String, u64>, key: impl Into<String>) {
    *map.entry(key.into()).or_insert(0) += 1;
}

/// Add every count in `src` into `dest`.
pub fn increment_all(dest: &mut BTreeMap<String, u64>, src: &BTreeMap<String, u64>) {
    for (key, count) in src {
        *dest.entry(key.clone()).or_insert(0) += count;
    }
}

/// Sum of all counts in the map.
pub fn total(map: &BTreeMap<String, u64>) -> u64 {
    map.values().sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_creates_and_bumps() {
        let mut map = BTreeMap::new();
        increment(&mut map, "2024-03-05T10");
        increment(&mut map, "2024-03-05T10");
        increment(&mut map, "2024-03-05T11");
        assert_eq!(map.get("2024-03-05T10"), Some(&2));
        assert_eq!(map.get("2024-03-05T11"), Some(&1));
    }

    #[test]
    fn test_increment_all_merges() {
        let mut dest = BTreeMap::new();
        increment(&mut dest, "a");
        let mut src = BTreeMap::new();
        increment(&mut src, "a");
        increment(&mut src, "b");
        increment(&mut src, "b");
        increment_all(&mut dest, &src);
        assert_eq!(dest.get("a"), Some(&2));
        assert_eq!(dest.get("b"), Some(&2));
    }

    #[test]
    fn test_total() {
        let mut map = BTreeMap::new();
        assert_eq!(total(&map), 0);
        increment(&mut map, "x");
        increment(&mut map, "y");
        increment(&mut map, "y");
        assert_eq!(total(&map), 3);
    }
}
