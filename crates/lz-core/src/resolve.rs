//! Picks the authoritative start and end events of a shipment.
//!
//! # End event
//!
//! The earliest completion-phase event is the primary end event. When its
//! key is one of the lagging `H20`–`H23` keys, the earliest `G30`–`G33`
//! proxy event replaces it, provided the proxy is not later than the primary.
//!
//! # Start event
//!
//! The earliest event of each start signal is a candidate. The weak `F10`
//! signal wins only if it is the global earliest; otherwise it is dropped and
//! the earliest strong candidate wins. Equal timestamps break ties in signal
//! enumeration order (`E10`, `E11`, `G11`, `F10`), so a weak signal tied
//! with a strong one never wins.

use serde::Serialize;

use crate::event::EventTime;
use crate::event_key::{StartSignal, is_proxyable_completion_key};
use crate::grouping::{KeyedEvent, ShipmentEventBucket};

/// What happened when looking for a proxy completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyOutcome {
    /// The primary key was proxyable and a proxy replaced it.
    Applied,
    /// The primary key was proxyable but no proxy was early enough.
    Unavailable,
    /// The primary key is not proxyable.
    NotEligible,
}

/// Resolved end event of a shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndResolution {
    /// Earliest completion-phase event, before any substitution.
    pub primary: KeyedEvent,
    /// The event the duration is measured to.
    pub resolved: KeyedEvent,
    pub outcome: ProxyOutcome,
}

impl EndResolution {
    #[must_use]
    pub fn proxy_applied(&self) -> bool {
        self.outcome == ProxyOutcome::Applied
    }
}

/// Resolved start event of a shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartResolution {
    pub signal: StartSignal,
    pub time: EventTime,
}

/// Combined outcome of both resolvers for one shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    pub start: StartResolution,
    pub end: EndResolution,
}

/// Resolves the end event; `None` when no completion event exists.
pub fn resolve_end(bucket: &ShipmentEventBucket) -> Option<EndResolution> {
    let primary = earliest(bucket.completion_events())?.clone();

    if !is_proxyable_completion_key(&primary.key) {
        return Some(EndResolution {
            resolved: primary.clone(),
            primary,
            outcome: ProxyOutcome::NotEligible,
        });
    }

    match earliest(bucket.proxy_events()) {
        Some(proxy) if not_after(&proxy.time, &primary.time) => Some(EndResolution {
            resolved: proxy.clone(),
            primary,
            outcome: ProxyOutcome::Applied,
        }),
        _ => Some(EndResolution {
            resolved: primary.clone(),
            primary,
            outcome: ProxyOutcome::Unavailable,
        }),
    }
}

/// Resolves the start event; `None` when no usable start signal exists.
pub fn resolve_start(bucket: &ShipmentEventBucket) -> Option<StartResolution> {
    let mut candidates = bucket.earliest_start_events();
    // Stable: ties keep enumeration order.
    candidates.sort_by_key(|&(_, time)| time);

    let (first_signal, first_time) = *candidates.first()?;
    if first_signal.is_weak() {
        return Some(StartResolution {
            signal: first_signal,
            time: first_time.clone(),
        });
    }

    candidates
        .into_iter()
        .find(|(signal, _)| !signal.is_weak())
        .map(|(signal, time)| StartResolution {
            signal,
            time: time.clone(),
        })
}

/// Start event of the baseline method: the earliest `E10`, nothing else.
pub fn resolve_baseline_start(bucket: &ShipmentEventBucket) -> Option<EventTime> {
    bucket
        .start_events(StartSignal::BASELINE)
        .iter()
        .min()
        .cloned()
}

/// Runs both resolvers; `None` if either comes up empty.
pub fn select(bucket: &ShipmentEventBucket) -> Option<SelectionResult> {
    Some(SelectionResult {
        end: resolve_end(bucket)?,
        start: resolve_start(bucket)?,
    })
}

/// Compares instants when both parse, so equal instants written in
/// different formats count as simultaneous.
fn not_after(a: &EventTime, b: &EventTime) -> bool {
    match (a.instant(), b.instant()) {
        (Some(a), Some(b)) => a <= b,
        _ => a <= b,
    }
}

/// First of the earliest events; input order breaks ties.
fn earliest(events: &[KeyedEvent]) -> Option<&KeyedEvent> {
    events.iter().min_by(|a, b| a.time.cmp(&b.time))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::event::RawEvent;
    use crate::grouping::group_events;
    use crate::types::ShipmentId;

    fn bucket(events: &[(&str, Option<&str>, &str)]) -> ShipmentEventBucket {
        let rows = events
            .iter()
            .map(|(key, phase, time)| RawEvent {
                shipment_id: ShipmentId::new("s1").unwrap(),
                zip: Some("94032".to_string()),
                country_code: Some("DE".to_string()),
                tracking_code: None,
                event_key: Some((*key).to_string()),
                phase_key: phase.map(str::to_string),
                event_time: Some((*time).to_string()),
            })
            .collect::<Vec<_>>();
        group_events(rows).remove(0)
    }

    fn t(hour: u32) -> String {
        format!("2025-03-01T{hour:02}:00:00Z")
    }

    #[test]
    fn no_completion_event_resolves_nothing() {
        let b = bucket(&[("E10", None, &t(1))]);
        assert_eq!(resolve_end(&b), None);
        assert_eq!(select(&b), None);
    }

    #[test]
    fn earliest_completion_event_is_primary() {
        let b = bucket(&[("H10", Some("H"), &t(12)), ("H11", Some("H"), &t(10))]);
        let end = resolve_end(&b).unwrap();
        assert_eq!(end.primary.key, "H11");
        assert_eq!(end.resolved.key, "H11");
        assert_eq!(end.outcome, ProxyOutcome::NotEligible);
    }

    #[test]
    fn proxy_replaces_lagging_completion() {
        let b = bucket(&[
            ("H20", Some("H"), &t(10)),
            ("G31", None, &t(11)),
            ("G30", None, &t(9)),
        ]);
        let end = resolve_end(&b).unwrap();
        assert!(end.proxy_applied());
        assert_eq!(end.primary.key, "H20");
        assert_eq!(end.resolved.key, "G30");
        assert_eq!(end.resolved.time.raw(), t(9));
    }

    #[test]
    fn proxy_at_same_time_is_applied() {
        let b = bucket(&[("H23", Some("H"), &t(10)), ("G33", None, &t(10))]);
        assert_eq!(resolve_end(&b).unwrap().outcome, ProxyOutcome::Applied);
    }

    #[test]
    fn proxy_at_same_instant_in_other_format_is_applied() {
        let b = bucket(&[
            ("H20", Some("H"), "2025-03-01T10:00:00Z"),
            ("G30", None, "2025-03-01 10:00:00"),
        ]);
        assert_eq!(resolve_end(&b).unwrap().outcome, ProxyOutcome::Applied);
    }

    #[test]
    fn later_proxy_is_not_applied() {
        let b = bucket(&[("H21", Some("H"), &t(10)), ("G32", None, &t(11))]);
        let end = resolve_end(&b).unwrap();
        assert_eq!(end.outcome, ProxyOutcome::Unavailable);
        assert_eq!(end.resolved, end.primary);
    }

    #[test]
    fn proxyable_without_proxy_events_is_unavailable() {
        let b = bucket(&[("H22", Some("H"), &t(10))]);
        assert_eq!(resolve_end(&b).unwrap().outcome, ProxyOutcome::Unavailable);
    }

    #[test]
    fn non_proxyable_key_ignores_earlier_proxy() {
        let b = bucket(&[("H10", Some("H"), &t(10)), ("G30", None, &t(5))]);
        let end = resolve_end(&b).unwrap();
        assert_eq!(end.outcome, ProxyOutcome::NotEligible);
        assert_eq!(end.resolved.key, "H10");
    }

    #[test]
    fn weak_signal_used_when_alone() {
        let b = bucket(&[("F10", None, &t(3))]);
        let start = resolve_start(&b).unwrap();
        assert_eq!(start.signal, StartSignal::F10);
        assert_eq!(resolve_baseline_start(&b), None);
    }

    #[test]
    fn weak_signal_used_when_strictly_earliest() {
        let b = bucket(&[("F10", None, &t(2)), ("E10", None, &t(3))]);
        assert_eq!(resolve_start(&b).unwrap().signal, StartSignal::F10);
    }

    #[test]
    fn weak_signal_dropped_when_not_earliest() {
        let b = bucket(&[
            ("G11", None, &t(4)),
            ("F10", None, &t(3)),
            ("E11", None, &t(1)),
        ]);
        let start = resolve_start(&b).unwrap();
        assert_eq!(start.signal, StartSignal::E11);
        assert_eq!(start.time.raw(), t(1));
    }

    #[test]
    fn ties_resolve_in_enumeration_order() {
        let b = bucket(&[("F10", None, &t(3)), ("G11", None, &t(3)), ("E11", None, &t(3))]);
        assert_eq!(resolve_start(&b).unwrap().signal, StartSignal::E11);
    }

    #[test]
    fn no_start_signal_resolves_nothing() {
        let b = bucket(&[("H10", Some("H"), &t(10))]);
        assert_eq!(resolve_start(&b), None);
        assert_eq!(select(&b), None);
    }

    #[test]
    fn baseline_uses_earliest_e10_only() {
        let b = bucket(&[
            ("E10", None, &t(6)),
            ("E10", None, &t(4)),
            ("E11", None, &t(1)),
        ]);
        assert_eq!(resolve_baseline_start(&b).unwrap().raw(), t(4));
        assert_eq!(resolve_start(&b).unwrap().signal, StartSignal::E11);
    }
}
