//! Query definitions and the metadata recorded for each execution.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use lz_core::StartSignal;
use lz_core::event_key::{COMPLETION_PHASE, PROXY_COMPLETION_KEYS};
use serde::{Deserialize, Serialize};

/// How a row set was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub query_name: String,
    pub shop_id: String,
    /// RFC 3339 UTC.
    pub execution_time: String,
    pub duration_seconds: f64,
    pub row_count: usize,
}

impl QueryMetadata {
    pub(crate) fn finish(query_name: &str, shop_id: &str, started: Instant, row_count: usize) -> Self {
        Self {
            query_name: query_name.to_string(),
            shop_id: shop_id.to_string(),
            execution_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            duration_seconds: started.elapsed().as_secs_f64(),
            row_count,
        }
    }
}

/// Rows plus the metadata of the query that produced them.
///
/// This is also the on-disk cache format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult<T> {
    pub metadata: QueryMetadata,
    pub data: Vec<T>,
}

/// Identity of a query execution for caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryKey {
    pub name: String,
    pub shop_id: String,
    pub sql: String,
    pub params: BTreeMap<String, String>,
}

/// The reconciliation query for one shop and window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryQuery {
    pub shop_id: String,
    pub since: DateTime<Utc>,
    pub country_code: String,
}

impl DeliveryQuery {
    pub const NAME: &'static str = "leitzonen_report";

    pub fn new(shop_id: impl Into<String>, since: DateTime<Utc>, country_code: impl Into<String>) -> Self {
        Self {
            shop_id: shop_id.into(),
            since,
            country_code: country_code.into(),
        }
    }

    /// SQL text; the relevant event keys come from the engine's catalog.
    pub fn sql(&self) -> String {
        let keys = StartSignal::ALL
            .iter()
            .map(StartSignal::as_str)
            .chain(PROXY_COMPLETION_KEYS)
            .map(|key| format!("'{key}'"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "
            SELECT s.id, s.zip, s.country_code, s.tracking_codes,
                   e.event_key, e.phase_key, e.event_time
            FROM shipments s
            LEFT JOIN parcel_events e
                ON e.shipment_id = s.id
                AND e.event_time >= ?2
                AND (e.event_key IN ({keys}) OR e.phase_key = '{COMPLETION_PHASE}')
            WHERE s.shop_id = ?1
                AND s.creation_date >= ?2
                AND s.country_code = ?3
            ORDER BY s.id ASC, e.event_time ASC, e.id ASC
            "
        )
    }

    pub fn cache_key(&self) -> QueryKey {
        QueryKey {
            name: Self::NAME.to_string(),
            shop_id: self.shop_id.clone(),
            sql: self.sql(),
            params: BTreeMap::from([
                ("country_code".to_string(), self.country_code.clone()),
                ("shop_id".to_string(), self.shop_id.clone()),
                ("since".to_string(), self.since.to_rfc3339()),
            ]),
        }
    }
}

/// All parcel events of one leitzone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeitzoneQuery {
    pub shop_id: String,
    pub since: DateTime<Utc>,
    pub country_code: String,
    pub leitzone: String,
}

impl LeitzoneQuery {
    pub(crate) const SQL: &'static str = "
        SELECT e.id, e.shipment_id, e.event_key, e.phase_key, e.event_time,
               s.zip, s.country_code, substr(s.zip, 1, 2)
        FROM parcel_events e
        JOIN shipments s ON e.shipment_id = s.id
        WHERE s.shop_id = ?1
            AND s.creation_date >= ?2
            AND s.country_code = ?3
            AND substr(s.zip, 1, 2) = ?4
            AND e.event_time >= ?2
        ORDER BY e.event_time ASC, e.shipment_id ASC, e.id ASC
        ";

    pub fn new(
        shop_id: impl Into<String>,
        since: DateTime<Utc>,
        country_code: impl Into<String>,
        leitzone: impl Into<String>,
    ) -> Self {
        Self {
            shop_id: shop_id.into(),
            since,
            country_code: country_code.into(),
            leitzone: leitzone.into(),
        }
    }

    pub fn name(&self) -> String {
        format!("parcel_events_leitzone_{}", self.leitzone)
    }

    pub fn cache_key(&self) -> QueryKey {
        QueryKey {
            name: self.name(),
            shop_id: self.shop_id.clone(),
            sql: Self::SQL.to_string(),
            params: BTreeMap::from([
                ("country_code".to_string(), self.country_code.clone()),
                ("leitzone".to_string(), self.leitzone.clone()),
                ("shop_id".to_string(), self.shop_id.clone()),
                ("since".to_string(), self.since.to_rfc3339()),
            ]),
        }
    }
}
