//! Chunk inventory distribution planning
//!
//! Pure functions only. The capacity maintainer feeds in the observed
//! inventory and acts on the returned missing counts.
//!
//! Target sizes are the powers of `base` within `[min, max]`. The byte total
//! is spread evenly across every size, then the largest size is dropped and
//! the remainder is spread again, and so on. Each order of magnitude ends up
//! contributing a similar number of bytes rather than a similar number of
//! chunks, and no size band is skipped while the remainder is at least `min`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::NodeError;

/// Chunk counts keyed by chunk size. Counts may be negative in a difference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Distribution {
    counts: BTreeMap<u64, i64>,
}

impl Distribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from one entry per chunk
    pub fn from_sizes<I: IntoIterator<Item = u64>>(sizes: I) -> Self {
        let mut counts = BTreeMap::new();
        for size in sizes {
            *counts.entry(size).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn from_counts<I: IntoIterator<Item = (u64, i64)>>(counts: I) -> Self {
        Self {
            counts: counts.into_iter().collect(),
        }
    }

    pub fn count(&self, size: u64) -> i64 {
        self.counts.get(&size).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<u64, i64> {
        &self.counts
    }

    /// Sum of `size * count` over all entries
    pub fn total_bytes(&self) -> i64 {
        self.counts
            .iter()
            .map(|(size, count)| *size as i64 * count)
            .sum()
    }

    /// `self - other`, keeping every size present in either side
    pub fn subtract(&self, other: &Distribution) -> Distribution {
        let mut counts = self.counts.clone();
        for (size, count) in &other.counts {
            *counts.entry(*size).or_insert(0) -= count;
        }
        Distribution { counts }
    }

    pub fn add(&self, other: &Distribution) -> Distribution {
        let mut counts = self.counts.clone();
        for (size, count) in &other.counts {
            *counts.entry(*size).or_insert(0) += count;
        }
        Distribution { counts }
    }

    /// Entries with a positive count. A surplus at one size never offsets a
    /// deficit at another.
    pub fn positive(&self) -> Distribution {
        Distribution {
            counts: self
                .counts
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(size, count)| (*size, *count))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.values().all(|count| *count <= 0)
    }

    /// Expand to one entry per chunk, largest first
    pub fn to_sizes_desc(&self) -> Vec<u64> {
        let mut sizes = Vec::new();
        for (size, count) in self.counts.iter().rev() {
            for _ in 0..(*count).max(0) {
                sizes.push(*size);
            }
        }
        sizes
    }
}

/// Desired inventory shape.
#[derive(Debug, Clone, Copy)]
pub struct Planner {
    pub min_size: u64,
    pub max_size: u64,
    pub total_bytes: u64,
    pub base: u64,
}

impl Planner {
    pub fn new(min_size: u64, max_size: u64, total_bytes: u64, base: u64) -> Self {
        Self {
            min_size,
            max_size,
            total_bytes,
            base,
        }
    }

    /// Powers of `base` within `[min_size, max_size]`, ascending
    pub fn possible_sizes(&self) -> Result<Vec<u64>, NodeError> {
        if self.base < 2 {
            return Err(NodeError::Config(format!(
                "chunk size base must be at least 2, got {}",
                self.base
            )));
        }

        let mut value: u64 = 1;
        while value < self.min_size {
            value = match value.checked_mul(self.base) {
                Some(v) => v,
                None => return Ok(Vec::new()),
            };
        }

        let mut sizes = Vec::new();
        while value <= self.max_size {
            sizes.push(value);
            value = match value.checked_mul(self.base) {
                Some(v) => v,
                None => break,
            };
        }
        Ok(sizes)
    }

    /// Desired chunk counts for an empty inventory
    pub fn target(&self) -> Result<Distribution, NodeError> {
        let sizes = self.possible_sizes()?;
        if sizes.is_empty() {
            return Err(NodeError::Config(format!(
                "no chunk sizes between {} and {} with base {}",
                self.min_size, self.max_size, self.base
            )));
        }
        Ok(spread(self.total_bytes, &sizes, self.min_size))
    }

    /// Chunks that must be generated for `existing` to reach the target
    pub fn plan(&self, existing: &Distribution) -> Result<Distribution, NodeError> {
        Ok(self.target()?.subtract(existing).positive())
    }
}

fn spread(total: u64, sizes: &[u64], min_size: u64) -> Distribution {
    let sum: u64 = sizes.iter().sum();
    let each = total / sum;

    let this_round = if each > 0 {
        Distribution::from_counts(sizes.iter().map(|size| (*size, each as i64)))
    } else {
        Distribution::new()
    };

    let remaining = total - sum * each;
    let smaller = &sizes[..sizes.len() - 1];
    if remaining >= min_size && !smaller.is_empty() {
        this_round.add(&spread(remaining, smaller, min_size))
    } else {
        this_round
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtract_and_add() {
        let full = Distribution::from_sizes([10, 10, 20, 20, 30, 30]);
        let some = Distribution::from_sizes([20, 30]);

        let missing = full.subtract(&some);
        assert_eq!(missing.to_sizes_desc(), vec![30, 20, 10, 10]);

        let negative = some.subtract(&full);
        assert_eq!(negative.count(10), -2);
        assert_eq!(negative.count(20), -1);
        assert_eq!(negative.count(30), -1);

        let sum = full.add(&some);
        assert_eq!(sum.count(20), 3);
        assert_eq!(full.total_bytes(), 120);
    }

    #[test]
    fn test_possible_sizes() {
        let p = Planner::new(1024, 10_000, 0, 2);
        assert_eq!(p.possible_sizes().unwrap(), vec![1024, 2048, 4096, 8192]);

        let p = Planner::new(1000, 100_000, 0, 10);
        assert_eq!(p.possible_sizes().unwrap(), vec![1000, 10_000, 100_000]);

        let p = Planner::new(1001, 100_000, 0, 10);
        assert_eq!(p.possible_sizes().unwrap(), vec![10_000, 100_000]);
    }

    #[test]
    fn test_plan_from_empty_inventory_covers_every_size() {
        let planner = Planner::new(10, 10_000, 25_000, 10);
        let missing = planner.plan(&Distribution::new()).unwrap();

        let sizes: Vec<u64> = missing.counts().keys().copied().collect();
        assert_eq!(sizes, vec![10, 100, 1000, 10_000]);

        let total = missing.total_bytes();
        assert!(total <= 25_000);
        assert!(total > 25_000 - 10);
    }

    #[test]
    fn test_plan_is_idempotent_once_satisfied() {
        let planner = Planner::new(10, 10_000, 25_000, 10);
        let missing = planner.plan(&Distribution::new()).unwrap();

        let after = planner.plan(&missing).unwrap();
        assert!(after.is_empty());
        assert!(after.counts().is_empty());
    }

    #[test]
    fn test_surplus_never_offsets_deficit() {
        let planner = Planner::new(10, 100, 220, 10);
        let target = planner.target().unwrap();

        let mut existing = Distribution::from_counts([(100, target.count(100) + 50)]);
        existing = existing.add(&Distribution::from_counts([(10, 0)]));

        let missing = planner.plan(&existing).unwrap();
        assert_eq!(missing.count(100), 0);
        assert_eq!(missing.count(10), target.count(10));
    }

    #[test]
    fn test_partial_inventory_yields_only_the_gap() {
        let planner = Planner::new(1024, 8192, 100_000, 2);
        let target = planner.target().unwrap();

        let mut existing_sizes = target.to_sizes_desc();
        let largest = existing_sizes.remove(0);
        let smallest = existing_sizes.pop().unwrap();

        let missing = planner.plan(&Distribution::from_sizes(existing_sizes)).unwrap();
        assert_eq!(missing.to_sizes_desc(), vec![largest, smallest]);
    }

    #[test]
    fn test_bad_base_is_rejected() {
        assert!(Planner::new(10, 100, 1000, 1).target().is_err());
        assert!(Planner::new(200, 100, 1000, 10).target().is_err());
    }
}
