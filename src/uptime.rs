//! Incremental uptime calculation
//!
//! A farmer is online while it holds at least one live contract. Online time
//! is the union of contract intervals, computed with a sweep over start/end
//! events so overlapping contracts are never double counted.
//!
//! Each token carries a settlement summary. A pass only looks at contracts
//! that are not yet folded into that summary, measures them from the
//! summary's `end` onwards, then marks the ones that have fully expired as
//! cached. Cost is bounded by the number of uncached contracts.
//!
//! Everything here works on plain millisecond timestamps. Loading contracts
//! and persisting the result is the job of `services::status_service`.

use std::collections::BTreeMap;

use serde::Serialize;

/// Interval data for one uncached contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractSpan {
    pub id: i64,
    pub start: i64,
    pub expiration: i64,
}

/// Settled uptime for one token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UptimeSummary {
    /// Earliest event ever observed. Set once.
    pub start: Option<i64>,
    /// Time up to which uptime has been accumulated
    pub end: Option<i64>,
    pub uptime_ms: i64,
}

impl UptimeSummary {
    /// Fraction of `[start, end]` spent online, 0 when undefined
    pub fn fraction(&self) -> f64 {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end > start => {
                (self.uptime_ms as f64 / (end - start) as f64).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }
}

/// Outcome of one settlement pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub summary: UptimeSummary,
    /// Contracts that expired before `now` and can be excluded from now on
    pub newly_cached: Vec<i64>,
    /// Online time added by this pass
    pub elapsed_ms: i64,
}

/// Total time covered by at least one of `intervals`.
///
/// Events at the same instant are netted before the 0/1 transition is
/// checked, so zero-length intervals and intervals that abut add nothing and
/// split nothing.
pub fn online_duration(intervals: &[(i64, i64)]) -> i64 {
    let mut deltas: BTreeMap<i64, i64> = BTreeMap::new();
    for &(start, end) in intervals {
        if end <= start {
            continue;
        }
        *deltas.entry(start).or_insert(0) += 1;
        *deltas.entry(end).or_insert(0) -= 1;
    }

    let mut live = 0i64;
    let mut opened_at = None;
    let mut total = 0i64;
    for (time, delta) in deltas {
        let was_live = live > 0;
        live += delta;
        match (was_live, live > 0) {
            (false, true) => opened_at = Some(time),
            (true, false) => {
                if let Some(opened) = opened_at.take() {
                    total += time - opened;
                }
            }
            _ => {}
        }
    }
    total
}

/// Fold `uncached` into `summary` as of `now`.
pub fn settle(summary: &UptimeSummary, uncached: &[ContractSpan], now: i64) -> Settlement {
    let mut intervals = Vec::with_capacity(uncached.len());
    let mut newly_cached = Vec::new();
    let mut earliest: Option<i64> = None;

    for contract in uncached {
        let start = match summary.end {
            Some(end) if end > contract.start => end,
            _ => contract.start,
        };

        let end = if contract.expiration <= now {
            newly_cached.push(contract.id);
            contract.expiration
        } else {
            now
        };

        // Contracts issued with a start in the future still count from now
        let start = start.min(end);
        earliest = Some(earliest.map_or(start, |e| e.min(start)));
        intervals.push((start, end));
    }

    let elapsed_ms = online_duration(&intervals);

    let start = summary.start.or(earliest);
    let next = UptimeSummary {
        start,
        end: Some(summary.end.map_or(now, |end| end.max(now))),
        uptime_ms: summary.uptime_ms + elapsed_ms,
    };

    Settlement {
        summary: next,
        newly_cached,
        elapsed_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(id: i64, start: i64, expiration: i64) -> ContractSpan {
        ContractSpan {
            id,
            start,
            expiration,
        }
    }

    #[test]
    fn test_overlapping_contracts_are_not_double_counted() {
        assert_eq!(online_duration(&[(0, 60), (30, 90)]), 90);

        let s = settle(&UptimeSummary::default(), &[span(1, 0, 60), span(2, 30, 90)], 100);
        assert_eq!(s.elapsed_ms, 90);
        assert_eq!(s.newly_cached, vec![1, 2]);
    }

    #[test]
    fn test_identical_contracts_count_once() {
        assert_eq!(online_duration(&[(10, 20), (10, 20)]), 10);
    }

    #[test]
    fn test_zero_length_and_abutting_intervals() {
        assert_eq!(online_duration(&[(5, 5)]), 0);
        assert_eq!(online_duration(&[(0, 10), (10, 10), (10, 20)]), 20);
        assert_eq!(online_duration(&[(0, 10), (20, 30)]), 20);
    }

    #[test]
    fn test_no_contracts_gives_zero_uptime() {
        let s = settle(&UptimeSummary::default(), &[], 1_000);
        assert_eq!(s.summary.start, None);
        assert_eq!(s.summary.uptime_ms, 0);
        assert_eq!(s.summary.fraction(), 0.0);
    }

    #[test]
    fn test_live_contract_accrues_until_now_and_stays_uncached() {
        let s = settle(&UptimeSummary::default(), &[span(1, 1_000, 10_000)], 4_000);
        assert_eq!(s.elapsed_ms, 3_000);
        assert!(s.newly_cached.is_empty());
        assert_eq!(s.summary.start, Some(1_000));
        assert_eq!(s.summary.end, Some(4_000));
        assert_eq!(s.summary.fraction(), 1.0);
    }

    #[test]
    fn test_incremental_passes_match_single_pass() {
        let contracts = [span(1, 0, 5_000), span(2, 3_000, 9_000), span(3, 12_000, 15_000)];

        let one_shot = settle(&UptimeSummary::default(), &contracts, 20_000);

        let first = settle(&UptimeSummary::default(), &contracts, 4_000);
        let remaining: Vec<ContractSpan> = contracts
            .iter()
            .filter(|c| !first.newly_cached.contains(&c.id))
            .copied()
            .collect();
        let second = settle(&first.summary, &remaining, 13_000);
        let remaining: Vec<ContractSpan> = remaining
            .iter()
            .filter(|c| !second.newly_cached.contains(&c.id))
            .copied()
            .collect();
        let third = settle(&second.summary, &remaining, 20_000);

        assert_eq!(one_shot.summary.uptime_ms, 12_000);
        assert_eq!(third.summary.uptime_ms, one_shot.summary.uptime_ms);
        assert_eq!(third.summary.start, Some(0));
        assert_eq!(third.summary.end, Some(20_000));
    }

    #[test]
    fn test_summary_is_monotonic_and_bounded() {
        let mut summary = UptimeSummary::default();
        let mut uncached = vec![span(1, 0, 2_000), span(2, 1_000, 8_000), span(3, 6_000, 30_000)];

        for now in [500, 1_500, 2_500, 7_000, 9_000, 25_000, 40_000] {
            let s = settle(&summary, &uncached, now);
            assert!(s.summary.uptime_ms >= summary.uptime_ms);
            assert!(s.summary.end >= summary.end);
            if summary.start.is_some() {
                assert_eq!(s.summary.start, summary.start);
            }
            let (start, end) = (s.summary.start.unwrap(), s.summary.end.unwrap());
            assert!(s.summary.uptime_ms <= end - start);
            let f = s.summary.fraction();
            assert!((0.0..=1.0).contains(&f));

            uncached.retain(|c| !s.newly_cached.contains(&c.id));
            summary = s.summary;
        }
        assert!(uncached.is_empty());
        assert_eq!(summary.uptime_ms, 30_000);
    }

    #[test]
    fn test_future_start_is_clamped() {
        let s = settle(&UptimeSummary::default(), &[span(1, 5_000, 8_000)], 2_000);
        assert_eq!(s.elapsed_ms, 0);
        assert_eq!(s.summary.start, Some(2_000));
    }
}
