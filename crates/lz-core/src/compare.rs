//! Cross-cutting statistics comparing the primary and baseline methods.
//!
//! [`compare`] is a pure function of the aggregation, the filter counters
//! and an injected random source. The random source is only used to pick
//! example tracking codes; with a seeded source the report is reproducible.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregation, GeoAggregate, mean};
use crate::config::EngineConfig;
use crate::eligibility::{EndKey, FilterStats, RejectionReason};
use crate::event_key::{DEEP_DIVE_LEITZONE, StartSignal};
use crate::types::GeoKey;

/// How the input rows were obtained. Copied into reports, never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub execution_time: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// Full comparison result, sections in rendering order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub provenance: Provenance,
    pub filtering: FilteringSummary,
    pub proxy_usage: ProxyUsageSummary,
    pub high_weak_share: Vec<WeakShareBucket>,
    pub overall: MethodComparison,
    pub end_key_usage: Vec<EndKeyUsage>,
    pub original_end_keys: Vec<KeyUsage>,
    pub buckets: Vec<BucketComparison>,
    pub deep_dive: Option<BucketComparison>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteringSummary {
    pub total_shipments: usize,
    pub eligible: usize,
    pub filtered_out: usize,
    /// `None` when no shipments were seen.
    pub eligible_pct: Option<f64>,
    pub filtered_pct: Option<f64>,
    pub negative_durations: usize,
    pub reasons: Vec<ReasonCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonCount {
    pub reason: RejectionReason,
    pub description: &'static str,
    pub count: usize,
    pub pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyUsageSummary {
    pub proxyable: usize,
    pub applied: usize,
    pub unavailable: usize,
    pub not_applicable: usize,
    /// Share of proxyable shipments where the proxy was applied.
    pub applied_rate_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeakShareBucket {
    pub country_code: String,
    pub leitzone: String,
    pub weak_role: StartSignal,
    pub weak_count: usize,
    pub reference_role: StartSignal,
    pub reference_count: usize,
    pub total: usize,
    pub share_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub shipments: usize,
    pub average_hours: f64,
    pub average_days: f64,
}

impl SeriesSummary {
    fn of(durations: &[f64]) -> Self {
        let average_hours = mean(durations);
        Self {
            shipments: durations.len(),
            average_hours,
            average_days: average_hours / 24.0,
        }
    }
}

/// Shift of the primary average relative to the baseline average.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shift {
    pub hours: f64,
    pub days: f64,
    /// Zero when the baseline average is not positive.
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodComparison {
    pub primary: SeriesSummary,
    pub baseline: SeriesSummary,
    /// Shipments covered by the primary method beyond the baseline.
    pub additional_shipments: i64,
    /// `None` when the baseline series is empty.
    pub increase_pct: Option<f64>,
    /// `None` unless both series are non-empty.
    pub shift: Option<Shift>,
}

impl MethodComparison {
    #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    fn of(primary: &[f64], baseline: &[f64]) -> Self {
        let primary = SeriesSummary::of(primary);
        let baseline = SeriesSummary::of(baseline);
        let additional_shipments = primary.shipments as i64 - baseline.shipments as i64;
        let increase_pct = (baseline.shipments > 0)
            .then(|| additional_shipments as f64 / baseline.shipments as f64 * 100.0);
        let shift = (primary.shipments > 0 && baseline.shipments > 0).then(|| {
            let hours = primary.average_hours - baseline.average_hours;
            let pct = if baseline.average_hours > 0.0 {
                hours / baseline.average_hours * 100.0
            } else {
                0.0
            };
            Shift {
                hours,
                days: hours / 24.0,
                pct,
            }
        });
        Self {
            primary,
            baseline,
            additional_shipments,
            increase_pct,
            shift,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndKeyUsage {
    pub end_key: EndKey,
    pub label: String,
    pub count: usize,
    pub pct: f64,
    /// Example tracking codes, sampled without replacement.
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyUsage {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketComparison {
    pub country_code: String,
    pub leitzone: String,
    pub comparison: MethodComparison,
    pub start_counts: BTreeMap<StartSignal, usize>,
    pub end_key_usage: Vec<EndKeyUsage>,
}

/// Builds the comparison report.
pub fn compare<R: Rng + ?Sized>(
    aggregation: &Aggregation,
    stats: &FilterStats,
    config: &EngineConfig,
    provenance: Provenance,
    rng: &mut R,
) -> ComparisonReport {
    let end_key_usage = end_key_usage(
        &aggregation.end_key_counts,
        &aggregation.tracking_codes,
        config.sample_size,
        rng,
    );

    let buckets: Vec<BucketComparison> = aggregation
        .buckets
        .iter()
        .map(|(key, agg)| bucket_comparison(key, agg, config.sample_size, rng))
        .collect();

    let deep_dive = buckets
        .iter()
        .find(|b| b.leitzone == DEEP_DIVE_LEITZONE)
        .cloned();

    let all_primary: Vec<f64> = aggregation
        .buckets
        .values()
        .flat_map(|agg| agg.durations.iter().copied())
        .collect();
    let all_baseline: Vec<f64> = aggregation
        .buckets
        .values()
        .flat_map(|agg| agg.baseline_durations.iter().copied())
        .collect();

    ComparisonReport {
        provenance,
        filtering: filtering_summary(stats),
        proxy_usage: proxy_usage_summary(stats),
        high_weak_share: high_weak_share(aggregation, config),
        overall: MethodComparison::of(&all_primary, &all_baseline),
        end_key_usage,
        original_end_keys: original_end_keys(&aggregation.original_end_key_counts),
        buckets,
        deep_dive,
    }
}

/// Percentage of `part` in `total`; zero when `total` is zero.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn pct(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

fn filtering_summary(stats: &FilterStats) -> FilteringSummary {
    let total = stats.total_shipments;
    let nonzero = total > 0;
    let filtered_out = stats.filtered_out();
    FilteringSummary {
        total_shipments: total,
        eligible: stats.eligible,
        filtered_out,
        eligible_pct: nonzero.then(|| pct(stats.eligible, total)),
        filtered_pct: nonzero.then(|| pct(filtered_out, total)),
        negative_durations: stats.negative_durations,
        reasons: RejectionReason::ALL
            .iter()
            .map(|&reason| ReasonCount {
                reason,
                description: reason.description(),
                count: stats.rejected(reason),
                pct: nonzero.then(|| pct(stats.rejected(reason), total)),
            })
            .collect(),
    }
}

fn proxy_usage_summary(stats: &FilterStats) -> ProxyUsageSummary {
    let usage = stats.proxy_usage;
    ProxyUsageSummary {
        proxyable: usage.proxyable(),
        applied: usage.applied,
        unavailable: usage.unavailable,
        not_applicable: usage.not_eligible,
        applied_rate_pct: (usage.proxyable() > 0).then(|| pct(usage.applied, usage.proxyable())),
    }
}

fn high_weak_share(aggregation: &Aggregation, config: &EngineConfig) -> Vec<WeakShareBucket> {
    let mut rows: Vec<WeakShareBucket> = aggregation
        .buckets
        .iter()
        .filter_map(|(key, agg)| {
            let weak_count = agg.start_count(config.weak_share_role);
            let reference_count = agg.start_count(config.weak_share_reference_role);
            let total = weak_count + reference_count;
            let share_pct = pct(weak_count, total);
            (total > 0 && share_pct > config.weak_share_threshold_pct).then(|| WeakShareBucket {
                country_code: key.country_code.clone(),
                leitzone: key.leitzone.clone(),
                weak_role: config.weak_share_role,
                weak_count,
                reference_role: config.weak_share_reference_role,
                reference_count,
                total,
                share_pct,
            })
        })
        .collect();
    rows.sort_by(|a, b| b.share_pct.total_cmp(&a.share_pct));
    rows
}

fn end_key_usage<R: Rng + ?Sized>(
    counts: &BTreeMap<EndKey, usize>,
    tracking_codes: &BTreeMap<EndKey, Vec<String>>,
    sample_size: usize,
    rng: &mut R,
) -> Vec<EndKeyUsage> {
    let total: usize = counts.values().sum();
    let mut sorted: Vec<(&EndKey, usize)> = counts.iter().map(|(k, &c)| (k, c)).collect();
    sorted.sort_by_key(|&(_, count)| Reverse(count));

    sorted
        .into_iter()
        .map(|(end_key, count)| {
            let samples = tracking_codes
                .get(end_key)
                .map(|codes| sample_codes(codes, sample_size, rng))
                .unwrap_or_default();
            EndKeyUsage {
                end_key: end_key.clone(),
                label: end_key.to_string(),
                count,
                pct: pct(count, total),
                samples,
            }
        })
        .collect()
}

fn sample_codes<R: Rng + ?Sized>(codes: &[String], amount: usize, rng: &mut R) -> Vec<String> {
    let valid: Vec<&String> = codes.iter().filter(|c| !c.trim().is_empty()).collect();
    valid
        .choose_multiple(rng, amount)
        .map(|code| (*code).clone())
        .collect()
}

fn original_end_keys(counts: &BTreeMap<String, usize>) -> Vec<KeyUsage> {
    let mut keys: Vec<KeyUsage> = counts
        .iter()
        .map(|(key, &count)| KeyUsage {
            key: key.clone(),
            count,
        })
        .collect();
    keys.sort_by_key(|k| Reverse(k.count));
    keys
}

fn bucket_comparison<R: Rng + ?Sized>(
    key: &GeoKey,
    agg: &GeoAggregate,
    sample_size: usize,
    rng: &mut R,
) -> BucketComparison {
    BucketComparison {
        country_code: key.country_code.clone(),
        leitzone: key.leitzone.clone(),
        comparison: MethodComparison::of(&agg.durations, &agg.baseline_durations),
        start_counts: agg.start_counts.clone(),
        end_key_usage: end_key_usage(&agg.end_key_counts, &agg.tracking_codes, sample_size, rng),
    }
}
