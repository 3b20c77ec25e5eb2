//! Partitions raw events into per-shipment buckets of classified events.

use std::collections::{BTreeMap, HashMap};

use crate::event::{EventTime, RawEvent};
use crate::event_key::{EventRole, StartSignal, classify};
use crate::types::ShipmentId;

/// An event key together with its timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedEvent {
    pub key: String,
    pub time: EventTime,
}

impl KeyedEvent {
    pub fn new(key: impl Into<String>, time: EventTime) -> Self {
        Self {
            key: key.into(),
            time,
        }
    }
}

/// All classified events of one shipment.
///
/// Identifying fields come from the first row seen for the shipment. Role
/// lists are only appended to while grouping and are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentEventBucket {
    pub shipment_id: ShipmentId,
    pub zip: Option<String>,
    pub country_code: Option<String>,
    pub tracking_code: Option<String>,
    start_events: BTreeMap<StartSignal, Vec<EventTime>>,
    completion_events: Vec<KeyedEvent>,
    proxy_events: Vec<KeyedEvent>,
}

impl ShipmentEventBucket {
    fn from_first_row(event: &RawEvent) -> Self {
        Self {
            shipment_id: event.shipment_id.clone(),
            zip: event.zip.clone(),
            country_code: event.country_code.clone(),
            tracking_code: event.tracking_code.as_ref().and_then(|tc| tc.extract()),
            start_events: BTreeMap::new(),
            completion_events: Vec::new(),
            proxy_events: Vec::new(),
        }
    }

    fn push(&mut self, role: EventRole, time: EventTime) {
        match role {
            EventRole::Start(signal) => self.start_events.entry(signal).or_default().push(time),
            EventRole::ProxyCompletion(key) => self.proxy_events.push(KeyedEvent::new(key, time)),
            EventRole::Completion(key) => {
                self.completion_events.push(KeyedEvent::new(key, time));
            }
        }
    }

    /// Start events observed for one signal, in input order.
    pub fn start_events(&self, signal: StartSignal) -> &[EventTime] {
        self.start_events.get(&signal).map_or(&[], Vec::as_slice)
    }

    /// Earliest start event per observed signal, in signal enumeration order.
    pub fn earliest_start_events(&self) -> Vec<(StartSignal, &EventTime)> {
        self.start_events
            .iter()
            .filter_map(|(signal, times)| times.iter().min().map(|t| (*signal, t)))
            .collect()
    }

    pub fn completion_events(&self) -> &[KeyedEvent] {
        &self.completion_events
    }

    pub fn proxy_events(&self) -> &[KeyedEvent] {
        &self.proxy_events
    }
}

/// Groups raw events by shipment, in order of first appearance.
///
/// Events without a timestamp are dropped; events that match no role are
/// ignored. Neither raises an error.
pub fn group_events<I>(events: I) -> Vec<ShipmentEventBucket>
where
    I: IntoIterator<Item = RawEvent>,
{
    let mut index: HashMap<ShipmentId, usize> = HashMap::new();
    let mut buckets: Vec<ShipmentEventBucket> = Vec::new();
    let mut ignored = 0_usize;

    for event in events {
        let slot = match index.get(&event.shipment_id) {
            Some(&slot) => slot,
            None => {
                buckets.push(ShipmentEventBucket::from_first_row(&event));
                index.insert(event.shipment_id.clone(), buckets.len() - 1);
                buckets.len() - 1
            }
        };

        let Some(raw_time) = event.event_time.as_deref().filter(|t| !t.trim().is_empty()) else {
            continue;
        };
        match classify(event.event_key.as_deref(), event.phase_key.as_deref()) {
            Some(role) => buckets[slot].push(role, EventTime::parse(raw_time)),
            None => ignored += 1,
        }
    }

    tracing::debug!(shipments = buckets.len(), ignored, "grouped events");
    buckets
}
