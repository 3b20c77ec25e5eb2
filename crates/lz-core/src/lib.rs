//! Delivery-duration reconciliation for parcel event logs.
//!
//! This crate turns a flat list of parcel events into per-region delivery
//! statistics:
//! - Grouping: partitioning events by shipment and classifying them
//! - Resolution: picking the authoritative start and end event
//! - Eligibility: rejecting unusable shipments and computing durations
//! - Aggregation: bucketing durations by country and leitzone
//! - Comparison: contrasting the primary and baseline methods
//!
//! The engine does no I/O and holds no state between runs.

pub mod aggregate;
pub mod compare;
pub mod config;
pub mod eligibility;
pub mod event;
pub mod event_key;
pub mod grouping;
pub mod resolve;
pub mod types;

use rand::Rng;

pub use aggregate::{Aggregation, BucketRow, GeoAggregate};
pub use compare::{ComparisonReport, Provenance, compare};
pub use config::EngineConfig;
pub use eligibility::{
    DurationRecord, EndKey, FilterStats, ProxyUsage, RejectionReason, filter_shipments,
};
pub use event::{EventTime, RawEvent, TrackingCodeValue};
pub use event_key::{EventRole, StartSignal};
pub use grouping::{ShipmentEventBucket, group_events};
pub use resolve::{EndResolution, ProxyOutcome, SelectionResult, StartResolution};
pub use types::{GeoKey, ShipmentId, ValidationError, validate_path_segment};

/// Output of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub records: Vec<DurationRecord>,
    pub stats: FilterStats,
    pub aggregation: Aggregation,
}

impl Reconciliation {
    /// Bucket table ordered by average duration.
    pub fn table(&self) -> Vec<BucketRow> {
        self.aggregation.table()
    }

    /// Builds the comparison report for this run.
    pub fn compare<R: Rng + ?Sized>(
        &self,
        config: &EngineConfig,
        provenance: Provenance,
        rng: &mut R,
    ) -> ComparisonReport {
        compare(&self.aggregation, &self.stats, config, provenance, rng)
    }
}

/// Runs grouping, filtering and aggregation over one row set.
///
/// An empty row set is valid and produces an all-zero result.
pub fn reconcile<I>(events: I) -> Reconciliation
where
    I: IntoIterator<Item = RawEvent>,
{
    let buckets = group_events(events);
    let (records, stats) = filter_shipments(&buckets);
    let aggregation = Aggregation::from_records(&records);

    tracing::info!(
        shipments = stats.total_shipments,
        eligible = stats.eligible,
        buckets = aggregation.buckets.len(),
        "reconciled delivery durations"
    );

    Reconciliation {
        records,
        stats,
        aggregation,
    }
}
