//! Aggregate statistics derived from the timeline.
//!
//! [`compute`] is a pure function of the records it is given; the timeline
//! calls it from scratch after every mutation rather than patching a running
//! total.

use crate::serde_util::{duration_ms, opt_duration_ms};
use crate::types::{Record, RecordKind};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-origin statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginStats {
    pub origin: String,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub kind_counts: BTreeMap<RecordKind, usize>,
    /// Mean gap between consecutive events of this origin.
    #[serde(default, with = "opt_duration_ms", skip_serializing_if = "Option::is_none")]
    pub average_interval: Option<Duration>,
    #[serde(default, with = "opt_duration_ms", skip_serializing_if = "Option::is_none")]
    pub longest_interval: Option<Duration>,
    /// `last_seen - first_seen`.
    #[serde(with = "duration_ms")]
    pub total_elapsed: Duration,
}

/// Summary statistics over a set of records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub total_records: usize,
    /// Always holds an entry for every kind.
    pub kind_counts: BTreeMap<RecordKind, usize>,
    /// Keyed by origin, in order of first appearance.
    pub origin_stats: IndexMap<String, OriginStats>,
    #[serde(default, with = "opt_duration_ms", skip_serializing_if = "Option::is_none")]
    pub average_gap: Option<Duration>,
    #[serde(default, with = "opt_duration_ms", skip_serializing_if = "Option::is_none")]
    pub longest_gap: Option<Duration>,
}

impl Default for AnalyticsSnapshot {
    fn default() -> Self {
        Self {
            total_records: 0,
            kind_counts: zero_kind_counts(),
            origin_stats: IndexMap::new(),
            average_gap: None,
            longest_gap: None,
        }
    }
}

impl AnalyticsSnapshot {
    pub fn kind_count(&self, kind: RecordKind) -> usize {
        self.kind_counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn origin(&self, origin: &str) -> Option<&OriginStats> {
        self.origin_stats.get(origin)
    }

    /// Origins by descending event count. Ties keep first-appearance order.
    pub fn top_origins_by_count(&self, limit: usize) -> Vec<&OriginStats> {
        let mut ranked: Vec<&OriginStats> = self.origin_stats.values().collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(limit);
        ranked
    }

    /// Origins by descending longest interval. Origins with a single event
    /// have no interval and are left out.
    pub fn slowest_origins(&self, limit: usize) -> Vec<&OriginStats> {
        let mut ranked: Vec<&OriginStats> = self
            .origin_stats
            .values()
            .filter(|s| s.longest_interval.is_some())
            .collect();
        ranked.sort_by(|a, b| b.longest_interval.cmp(&a.longest_interval));
        ranked.truncate(limit);
        ranked
    }
}

fn zero_kind_counts() -> BTreeMap<RecordKind, usize> {
    RecordKind::ALL.into_iter().map(|k| (k, 0)).collect()
}

/// Running gap statistics.
#[derive(Default)]
struct Gaps {
    total: Duration,
    count: u32,
    longest: Option<Duration>,
}

impl Gaps {
    fn push(&mut self, gap: Duration) {
        self.total += gap;
        self.count += 1;
        self.longest = Some(self.longest.map_or(gap, |l| l.max(gap)));
    }

    fn average(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total / self.count)
    }
}

struct OriginAccumulator {
    count: usize,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    kind_counts: BTreeMap<RecordKind, usize>,
    gaps: Gaps,
}

/// Non-negative gap between two instants.
fn gap(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

/// Compute statistics over `records`, which need not be in time order.
pub fn compute<'a, I>(records: I) -> AnalyticsSnapshot
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut sorted: Vec<&Record> = records.into_iter().collect();
    sorted.sort_by_key(|r| (r.timestamp, r.id));

    let mut kind_counts = zero_kind_counts();
    let mut global = Gaps::default();
    let mut origins: IndexMap<String, OriginAccumulator> = IndexMap::new();

    for (i, record) in sorted.iter().enumerate() {
        *kind_counts.entry(record.kind).or_insert(0) += 1;

        if i > 0 {
            global.push(gap(sorted[i - 1].timestamp, record.timestamp));
        }

        match origins.get_mut(&record.origin) {
            Some(acc) => {
                acc.gaps.push(gap(acc.last_seen, record.timestamp));
                acc.last_seen = record.timestamp;
                acc.count += 1;
                *acc.kind_counts.entry(record.kind).or_insert(0) += 1;
            }
            None => {
                let mut kinds = zero_kind_counts();
                kinds.insert(record.kind, 1);
                origins.insert(
                    record.origin.clone(),
                    OriginAccumulator {
                        count: 1,
                        first_seen: record.timestamp,
                        last_seen: record.timestamp,
                        kind_counts: kinds,
                        gaps: Gaps::default(),
                    },
                );
            }
        }
    }

    let origin_stats = origins
        .into_iter()
        .map(|(origin, acc)| {
            let stats = OriginStats {
                origin: origin.clone(),
                count: acc.count,
                first_seen: acc.first_seen,
                last_seen: acc.last_seen,
                kind_counts: acc.kind_counts,
                average_interval: acc.gaps.average(),
                longest_interval: acc.gaps.longest,
                total_elapsed: gap(acc.first_seen, acc.last_seen),
            };
            (origin, stats)
        })
        .collect();

    AnalyticsSnapshot {
        total_records: sorted.len(),
        kind_counts,
        origin_stats,
        average_gap: global.average(),
        longest_gap: global.longest,
    }
}
