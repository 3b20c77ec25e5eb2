//! Groups eligible shipments by country and leitzone.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::eligibility::{DurationRecord, EndKey};
use crate::event_key::StartSignal;
use crate::types::GeoKey;

/// Accumulated series and counters for one geographic bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoAggregate {
    /// Primary-method durations in hours, in record order.
    pub durations: Vec<f64>,
    /// Baseline-method durations; only shipments with an `E10` event.
    pub baseline_durations: Vec<f64>,
    pub start_counts: BTreeMap<StartSignal, usize>,
    pub end_key_counts: BTreeMap<EndKey, usize>,
    pub tracking_codes: BTreeMap<EndKey, Vec<String>>,
}

impl GeoAggregate {
    fn add(&mut self, record: &DurationRecord) {
        self.durations.push(record.duration_hours);
        if let Some(baseline) = record.duration_hours_baseline {
            self.baseline_durations.push(baseline);
        }
        *self.start_counts.entry(record.start_type_used).or_default() += 1;
        *self
            .end_key_counts
            .entry(record.end_key_used.clone())
            .or_default() += 1;
        if let Some(code) = &record.tracking_code {
            self.tracking_codes
                .entry(record.end_key_used.clone())
                .or_default()
                .push(code.clone());
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.durations.len()
    }

    #[must_use]
    pub fn baseline_count(&self) -> usize {
        self.baseline_durations.len()
    }

    #[must_use]
    pub fn average(&self) -> f64 {
        mean(&self.durations)
    }

    #[must_use]
    pub fn baseline_average(&self) -> f64 {
        mean(&self.baseline_durations)
    }

    #[must_use]
    pub fn start_count(&self, signal: StartSignal) -> usize {
        self.start_counts.get(&signal).copied().unwrap_or_default()
    }
}

/// One row of the tabular bucket export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketRow {
    pub country_code: String,
    pub leitzone: String,
    pub total_shipments: usize,
    pub avg_duration_hours: f64,
    pub e10_count: usize,
    pub e11_count: usize,
    pub g11_count: usize,
    pub f10_count: usize,
}

/// Everything the comparison needs, built from the eligible records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub buckets: BTreeMap<GeoKey, GeoAggregate>,
    /// End keys used across all buckets.
    pub end_key_counts: BTreeMap<EndKey, usize>,
    /// Tracking codes per end key across all buckets, in record order.
    pub tracking_codes: BTreeMap<EndKey, Vec<String>>,
    /// Completion keys before proxy substitution.
    pub original_end_key_counts: BTreeMap<String, usize>,
}

impl Aggregation {
    pub fn from_records(records: &[DurationRecord]) -> Self {
        let mut aggregation = Self::default();
        for record in records {
            aggregation.add(record);
        }
        tracing::debug!(
            buckets = aggregation.buckets.len(),
            records = records.len(),
            "aggregated durations"
        );
        aggregation
    }

    fn add(&mut self, record: &DurationRecord) {
        self.bucket_mut(&record.geo).add(record);
        *self
            .end_key_counts
            .entry(record.end_key_used.clone())
            .or_default() += 1;
        if let Some(code) = &record.tracking_code {
            self.tracking_codes
                .entry(record.end_key_used.clone())
                .or_default()
                .push(code.clone());
        }
        *self
            .original_end_key_counts
            .entry(record.original_end_key.clone())
            .or_default() += 1;
    }

    /// Returns the bucket for `key`, creating an empty one on first use.
    fn bucket_mut(&mut self, key: &GeoKey) -> &mut GeoAggregate {
        self.buckets.entry(key.clone()).or_default()
    }

    pub fn bucket(&self, key: &GeoKey) -> Option<&GeoAggregate> {
        self.buckets.get(key)
    }

    /// Bucket table ordered by average duration, fastest first.
    ///
    /// Averages are rounded to two decimals; equal averages keep country and
    /// leitzone order.
    pub fn table(&self) -> Vec<BucketRow> {
        let mut rows: Vec<BucketRow> = self
            .buckets
            .iter()
            .map(|(key, agg)| BucketRow {
                country_code: key.country_code.clone(),
                leitzone: key.leitzone.clone(),
                total_shipments: agg.count(),
                avg_duration_hours: round2(agg.average()),
                e10_count: agg.start_count(StartSignal::E10),
                e11_count: agg.start_count(StartSignal::E11),
                g11_count: agg.start_count(StartSignal::G11),
                f10_count: agg.start_count(StartSignal::F10),
            })
            .collect();
        rows.sort_by(|a, b| a.avg_duration_hours.total_cmp(&b.avg_duration_hours));
        rows
    }

    #[must_use]
    pub fn primary_count(&self) -> usize {
        self.buckets.values().map(GeoAggregate::count).sum()
    }

    #[must_use]
    pub fn baseline_count(&self) -> usize {
        self.buckets.values().map(GeoAggregate::baseline_count).sum()
    }

    /// Mean over every primary duration.
    #[must_use]
    pub fn primary_average(&self) -> f64 {
        let all: Vec<f64> = self
            .buckets
            .values()
            .flat_map(|agg| agg.durations.iter().copied())
            .collect();
        mean(&all)
    }

    /// Mean over every baseline duration.
    #[must_use]
    pub fn baseline_average(&self) -> f64 {
        let all: Vec<f64> = self
            .buckets
            .values()
            .flat_map(|agg| agg.baseline_durations.iter().copied())
            .collect();
        mean(&all)
    }
}

/// Arithmetic mean; zero for an empty series.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Rounds to two decimal places for reporting.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
