//! Eligibility checks and per-shipment duration calculation.

use std::fmt;

use serde::Serialize;

use crate::event::duration_hours;
use crate::event_key::StartSignal;
use crate::grouping::ShipmentEventBucket;
use crate::resolve::{
    EndResolution, ProxyOutcome, resolve_baseline_start, resolve_end, resolve_start,
};
use crate::types::{GeoKey, ShipmentId};

/// Why a shipment was excluded. Checks run in declaration order and the
/// first failure wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NoRegion,
    NoCompletionEvent,
    NoStartEvent,
    InvalidDuration,
}

impl RejectionReason {
    pub const ALL: [Self; 4] = [
        Self::NoRegion,
        Self::NoCompletionEvent,
        Self::NoStartEvent,
        Self::InvalidDuration,
    ];

    /// Human-readable description for reports.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::NoRegion => "Missing country code or invalid zip code",
            Self::NoCompletionEvent => "No H phase event (delivery completion)",
            Self::NoStartEvent => "No usable start event (E10/E11/G11/F10)",
            Self::InvalidDuration => "Invalid duration calculation",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoRegion => "no region",
            Self::NoCompletionEvent => "no completion event",
            Self::NoStartEvent => "no start event",
            Self::InvalidDuration => "invalid duration",
        };
        write!(f, "{s}")
    }
}

/// How the end-event proxy rule played out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxyUsage {
    pub applied: usize,
    pub unavailable: usize,
    pub not_eligible: usize,
}

impl ProxyUsage {
    fn record(&mut self, outcome: ProxyOutcome) {
        match outcome {
            ProxyOutcome::Applied => self.applied += 1,
            ProxyOutcome::Unavailable => self.unavailable += 1,
            ProxyOutcome::NotEligible => self.not_eligible += 1,
        }
    }

    /// Shipments whose primary completion key was proxyable.
    #[must_use]
    pub const fn proxyable(&self) -> usize {
        self.applied + self.unavailable
    }
}

/// Per-run filtering counters.
///
/// Every shipment lands in exactly one of `eligible` or the four rejection
/// counters. `negative_durations` is a sub-count of `eligible`.
///
/// `proxy_usage` covers every shipment that has a region and a completion
/// event, including those later rejected for their start event or duration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub total_shipments: usize,
    pub no_region: usize,
    pub no_completion_event: usize,
    pub no_start_event: usize,
    pub invalid_duration: usize,
    pub eligible: usize,
    pub negative_durations: usize,
    pub proxy_usage: ProxyUsage,
}

impl FilterStats {
    #[must_use]
    pub const fn rejected(&self, reason: RejectionReason) -> usize {
        match reason {
            RejectionReason::NoRegion => self.no_region,
            RejectionReason::NoCompletionEvent => self.no_completion_event,
            RejectionReason::NoStartEvent => self.no_start_event,
            RejectionReason::InvalidDuration => self.invalid_duration,
        }
    }

    #[must_use]
    pub const fn filtered_out(&self) -> usize {
        self.no_region + self.no_completion_event + self.no_start_event + self.invalid_duration
    }

    fn record_rejection(&mut self, reason: RejectionReason) {
        let counter = match reason {
            RejectionReason::NoRegion => &mut self.no_region,
            RejectionReason::NoCompletionEvent => &mut self.no_completion_event,
            RejectionReason::NoStartEvent => &mut self.no_start_event,
            RejectionReason::InvalidDuration => &mut self.invalid_duration,
        };
        *counter += 1;
    }
}

/// The end event a duration was measured to, labelled by provenance.
///
/// A proxy substitution is a different key from a direct use of the same
/// event key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EndKey {
    pub key: String,
    pub proxy: bool,
}

impl EndKey {
    pub fn direct(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            proxy: false,
        }
    }

    pub fn proxy(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            proxy: true,
        }
    }
}

impl fmt::Display for EndKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.proxy {
            write!(f, "{} (proxy)", self.key)
        } else {
            write!(f, "{}", self.key)
        }
    }
}

/// Outcome for one eligible shipment.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationRecord {
    pub shipment_id: ShipmentId,
    pub geo: GeoKey,
    pub duration_hours: f64,
    /// Measured from the earliest `E10`; `None` without one.
    pub duration_hours_baseline: Option<f64>,
    pub start_type_used: StartSignal,
    pub end_key_used: EndKey,
    /// Completion key before any proxy substitution.
    pub original_end_key: String,
    pub proxy_outcome: ProxyOutcome,
    pub tracking_code: Option<String>,
}

/// Runs the ordered eligibility checks and computes the durations.
pub fn evaluate(bucket: &ShipmentEventBucket) -> Result<DurationRecord, RejectionReason> {
    evaluate_with_proxy(bucket).1
}

/// Like [`evaluate`], also returning the proxy outcome once the completion
/// check has passed.
fn evaluate_with_proxy(
    bucket: &ShipmentEventBucket,
) -> (Option<ProxyOutcome>, Result<DurationRecord, RejectionReason>) {
    let Some(geo) = GeoKey::from_address(bucket.country_code.as_deref(), bucket.zip.as_deref())
    else {
        return (None, Err(RejectionReason::NoRegion));
    };
    let Some(end) = resolve_end(bucket) else {
        return (None, Err(RejectionReason::NoCompletionEvent));
    };
    (Some(end.outcome), measure(bucket, geo, end))
}

fn measure(
    bucket: &ShipmentEventBucket,
    geo: GeoKey,
    end: EndResolution,
) -> Result<DurationRecord, RejectionReason> {
    let start = resolve_start(bucket).ok_or(RejectionReason::NoStartEvent)?;
    let hours =
        duration_hours(&start.time, &end.resolved.time).ok_or(RejectionReason::InvalidDuration)?;

    let duration_hours_baseline = resolve_baseline_start(bucket)
        .and_then(|baseline| duration_hours(&baseline, &end.resolved.time));

    let end_key_used = if end.proxy_applied() {
        EndKey::proxy(end.resolved.key.clone())
    } else {
        EndKey::direct(end.resolved.key.clone())
    };

    Ok(DurationRecord {
        shipment_id: bucket.shipment_id.clone(),
        geo,
        duration_hours: hours,
        duration_hours_baseline,
        start_type_used: start.signal,
        end_key_used,
        original_end_key: end.primary.key,
        proxy_outcome: end.outcome,
        tracking_code: bucket.tracking_code.clone(),
    })
}

/// Evaluates every bucket, returning eligible records and the counters.
pub fn filter_shipments(buckets: &[ShipmentEventBucket]) -> (Vec<DurationRecord>, FilterStats) {
    let mut stats = FilterStats {
        total_shipments: buckets.len(),
        ..FilterStats::default()
    };
    let mut records = Vec::new();

    for bucket in buckets {
        let (proxy_outcome, result) = evaluate_with_proxy(bucket);
        if let Some(outcome) = proxy_outcome {
            stats.proxy_usage.record(outcome);
        }
        match result {
            Ok(record) => {
                if record.duration_hours < 0.0 {
                    tracing::warn!(
                        shipment_id = %record.shipment_id,
                        duration_hours = record.duration_hours,
                        start = %record.start_type_used,
                        end = %record.end_key_used,
                        "negative delivery duration kept for audit"
                    );
                    stats.negative_durations += 1;
                }
                stats.eligible += 1;
                records.push(record);
            }
            Err(reason) => {
                tracing::trace!(shipment_id = %bucket.shipment_id, %reason, "shipment rejected");
                stats.record_rejection(reason);
            }
        }
    }

    tracing::debug!(
        total = stats.total_shipments,
        eligible = stats.eligible,
        filtered = stats.filtered_out(),
        "filtered shipments"
    );
    (records, stats)
}
