//! Raw parcel events as delivered by the retrieval layer.
//!
//! [`RawEvent`] is the validation boundary of the engine: rows are
//! deserialized strictly, so an unknown column or a missing required field
//! fails here instead of propagating as a silent `None`.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ShipmentId;

/// One observed parcel event.
///
/// `zip`, `country_code` and `event_key` must be present in the input but
/// may be `null`. `tracking_code`, `phase_key` and `event_time` may be
/// omitted entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEvent {
    pub shipment_id: ShipmentId,
    #[serde(deserialize_with = "Option::deserialize")]
    pub zip: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_code: Option<TrackingCodeValue>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub event_key: Option<String>,
    #[serde(default)]
    pub phase_key: Option<String>,
    #[serde(default)]
    pub event_time: Option<String>,
}

/// Tracking code column as stored: a single value or an array of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackingCodeValue {
    List(Vec<Option<String>>),
    Text(String),
    Number(serde_json::Number),
}

impl TrackingCodeValue {
    /// Extracts the usable tracking code, if any.
    ///
    /// Lists yield their first non-blank element. Values are trimmed; blank
    /// values and the literal `none` (any case) count as absent.
    pub fn extract(&self) -> Option<String> {
        let candidate = match self {
            Self::List(codes) => codes
                .iter()
                .flatten()
                .map(|code| code.trim())
                .find(|code| !code.is_empty())
                .map(str::to_string),
            Self::Text(code) => Some(code.trim().to_string()),
            Self::Number(code) => Some(code.to_string()),
        };
        candidate.filter(|code| !code.is_empty() && !code.eq_ignore_ascii_case("none"))
    }
}

/// An event timestamp: the raw text plus its parsed instant, if parseable.
///
/// Ordering puts unparseable timestamps before every parsed one, so a
/// malformed time that lands in a role list is always that role's earliest
/// entry and surfaces as an invalid duration rather than being skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTime {
    raw: String,
    instant: Option<DateTime<Utc>>,
}

impl EventTime {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            instant: parse_event_time(raw),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn instant(&self) -> Option<DateTime<Utc>> {
        self.instant
    }
}

impl From<DateTime<Utc>> for EventTime {
    fn from(instant: DateTime<Utc>) -> Self {
        Self {
            raw: instant.to_rfc3339(),
            instant: Some(instant),
        }
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.instant, other.instant) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.raw.cmp(&other.raw)),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => self.raw.cmp(&other.raw),
        }
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Serialize for EventTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

/// Parses the timestamp formats the store and the cache produce.
///
/// Accepts RFC 3339, space-separated timestamps with an offset, and naive
/// timestamps, which are read as UTC.
pub fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Elapsed hours from `start` to `end`.
///
/// `None` when either timestamp failed to parse. Negative when `start` is
/// after `end`.
#[allow(clippy::cast_precision_loss)]
pub fn duration_hours(start: &EventTime, end: &EventTime) -> Option<f64> {
    let start = start.instant()?;
    let end = end.instant()?;
    Some((end - start).num_milliseconds() as f64 / 3_600_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0)
            .single()
            .expect("valid test timestamp")
    }

    #[test]
    fn parses_rfc3339_and_offsets() {
        assert_eq!(parse_event_time("2025-03-01T10:00:00Z"), Some(utc(10, 0)));
        assert_eq!(
            parse_event_time("2025-03-01T12:00:00+02:00"),
            Some(utc(10, 0))
        );
        assert_eq!(
            parse_event_time("2025-03-01 12:00:00+02:00"),
            Some(utc(10, 0))
        );
        assert_eq!(parse_event_time("2025-03-01 12:00:00+02"), Some(utc(10, 0)));
    }

    #[test]
    fn parses_naive_as_utc() {
        assert_eq!(parse_event_time("2025-03-01 10:30:00"), Some(utc(10, 30)));
        assert_eq!(parse_event_time("2025-03-01T10:30:00"), Some(utc(10, 30)));
        assert_eq!(
            parse_event_time("2025-03-01T10:30:00.250"),
            Some(utc(10, 30) + chrono::Duration::milliseconds(250))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_event_time("yesterday"), None);
        assert_eq!(parse_event_time(""), None);
    }

    #[test]
    fn unparseable_times_sort_first() {
        let bad = EventTime::parse("not-a-time");
        let good = EventTime::parse("2025-03-01T10:00:00Z");
        assert!(bad < good);

        let mut times = [
            EventTime::parse("2025-03-01T12:00:00Z"),
            EventTime::parse("2025-03-01T09:00:00Z"),
        ];
        times.sort();
        assert_eq!(times[0].instant(), Some(utc(9, 0)));
    }

    #[test]
    #[expect(clippy::float_cmp, reason = "whole-hour deltas are exact")]
    fn duration_is_exact_across_offsets() {
        let start = EventTime::parse("2025-03-01T10:00:00+01:00");
        let end = EventTime::parse("2025-03-01T14:00:00Z");
        assert_eq!(duration_hours(&start, &end).unwrap(), 5.0);
        assert_eq!(duration_hours(&end, &start).unwrap(), -5.0);
    }

    #[test]
    fn duration_unavailable_for_bad_time() {
        let start = EventTime::parse("garbage");
        let end = EventTime::parse("2025-03-01T14:00:00Z");
        assert_eq!(duration_hours(&start, &end), None);
    }

    #[test]
    fn tracking_code_extraction() {
        let list = TrackingCodeValue::List(vec![None, Some("  ".into()), Some(" JJD1 ".into())]);
        assert_eq!(list.extract().as_deref(), Some("JJD1"));

        assert_eq!(
            TrackingCodeValue::Text(" 00340 ".into()).extract().as_deref(),
            Some("00340")
        );
        assert_eq!(TrackingCodeValue::Text("None".into()).extract(), None);
        assert_eq!(TrackingCodeValue::Text("   ".into()).extract(), None);
        assert_eq!(TrackingCodeValue::List(vec![]).extract(), None);
    }

    #[test]
    fn raw_event_accepts_list_and_string_tracking_codes() {
        let json = r#"{"shipment_id":"s1","zip":"94032","country_code":"DE",
            "tracking_code":["", "JJD1"],"event_key":"E10","phase_key":"E",
            "event_time":"2025-03-01T10:00:00Z"}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.tracking_code.and_then(|tc| tc.extract()).as_deref(),
            Some("JJD1")
        );

        let json = r#"{"shipment_id":"s1","zip":null,"country_code":null,
            "tracking_code":"JJD2","event_key":null}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.zip, None);
        assert_eq!(event.event_time, None);
    }

    #[test]
    fn raw_event_rejects_unknown_and_missing_fields() {
        let unknown = r#"{"shipment_id":"s1","zip":"1","country_code":"DE",
            "event_key":"E10","colour":"red"}"#;
        assert!(serde_json::from_str::<RawEvent>(unknown).is_err());

        let missing_zip = r#"{"shipment_id":"s1","country_code":"DE","event_key":"E10"}"#;
        assert!(serde_json::from_str::<RawEvent>(missing_zip).is_err());

        let empty_id = r#"{"shipment_id":"","zip":"1","country_code":"DE","event_key":"E10"}"#;
        assert!(serde_json::from_str::<RawEvent>(empty_id).is_err());
    }
}
