//! Storage layer for parcel events.
//!
//! Provides the SQLite shipment and parcel-event store the reconciliation
//! queries run against, and a JSON file cache for their results.
//!
//! # Thread Safety
//!
//! [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not
//! `Sync`. Use one instance per thread.
//!
//! # Schema
//!
//! Timestamps are stored as TEXT in RFC 3339 UTC (`2025-03-01T10:30:00Z`),
//! so lexicographic order matches chronological order and the window
//! filters can compare strings. Values that do not parse on insert are
//! stored unchanged; the engine reports them as invalid durations.
//!
//! `shipments.tracking_codes` holds a JSON array of strings.

pub mod cache;
mod query;

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use lz_core::event::parse_event_time;
use lz_core::{RawEvent, ShipmentId, TrackingCodeValue, ValidationError};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::{CacheError, CacheStatus, QueryCache, cached_fetch};
pub use query::{DeliveryQuery, LeitzoneQuery, QueryKey, QueryMetadata, QueryResult};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Tracking codes could not be encoded or decoded.
    #[error("invalid tracking codes for shipment {shipment_id}: {source}")]
    TrackingCodes {
        shipment_id: String,
        #[source]
        source: serde_json::Error,
    },
    /// A stored row does not form a valid event.
    #[error("invalid row: {0}")]
    InvalidRow(#[from] ValidationError),
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A shipment as imported into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShipmentRecord {
    pub id: String,
    pub shop_id: String,
    pub creation_date: String,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub tracking_codes: Vec<String>,
}

/// A parcel event as imported into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParcelEventRecord {
    pub id: String,
    pub shipment_id: String,
    #[serde(default)]
    pub event_key: Option<String>,
    #[serde(default)]
    pub phase_key: Option<String>,
    pub event_time: String,
}

/// One row of the leitzone event dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeitzoneEventRow {
    pub id: String,
    pub shipment_id: String,
    pub event_key: Option<String>,
    pub phase_key: Option<String>,
    pub event_time: String,
    pub zip_code: Option<String>,
    pub country_code: Option<String>,
    pub leitzone: Option<String>,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS shipments (
                id TEXT PRIMARY KEY,
                shop_id TEXT NOT NULL,
                creation_date TEXT NOT NULL,
                zip TEXT,
                country_code TEXT,
                tracking_codes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_shipments_shop_created
                ON shipments(shop_id, creation_date);

            -- event_time: RFC 3339 UTC when parseable, raw text otherwise
            -- phase_key: 'H' marks delivery completion
            CREATE TABLE IF NOT EXISTS parcel_events (
                id TEXT PRIMARY KEY,
                shipment_id TEXT NOT NULL,
                event_key TEXT,
                phase_key TEXT,
                event_time TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_parcel_events_shipment ON parcel_events(shipment_id);
            CREATE INDEX IF NOT EXISTS idx_parcel_events_time ON parcel_events(event_time);
            ",
        )?;
        Ok(())
    }

    /// Inserts a batch of shipments, ignoring duplicates by ID.
    pub fn insert_shipments(&mut self, shipments: &[ShipmentRecord]) -> Result<usize, DbError> {
        if shipments.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO shipments
                (id, shop_id, creation_date, zip, country_code, tracking_codes)
                VALUES (?, ?, ?, ?, ?, ?)
                ",
            )?;
            for shipment in shipments {
                let tracking_codes = serde_json::to_string(&shipment.tracking_codes).map_err(
                    |source| DbError::TrackingCodes {
                        shipment_id: shipment.id.clone(),
                        source,
                    },
                )?;
                inserted += stmt.execute(params![
                    shipment.id,
                    shipment.shop_id,
                    normalize_creation_date(&shipment.creation_date),
                    shipment.zip,
                    shipment.country_code,
                    tracking_codes,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Inserts a batch of parcel events, ignoring duplicates by ID.
    pub fn insert_parcel_events(&mut self, events: &[ParcelEventRecord]) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO parcel_events
                (id, shipment_id, event_key, phase_key, event_time)
                VALUES (?, ?, ?, ?, ?)
                ",
            )?;
            for event in events {
                inserted += stmt.execute(params![
                    event.id,
                    event.shipment_id,
                    event.event_key,
                    event.phase_key,
                    normalize_timestamp(&event.event_time),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Runs the reconciliation query.
    ///
    /// Every shipment of the shop created inside the window and addressed to
    /// the query's country yields at least one row; shipments without
    /// relevant events yield a single row with null event fields. Rows are
    /// ordered by shipment, then event time.
    pub fn fetch_delivery_rows(
        &self,
        query: &DeliveryQuery,
    ) -> Result<QueryResult<RawEvent>, DbError> {
        let started = Instant::now();
        let since = format_timestamp(query.since);
        let mut stmt = self.conn.prepare(&query.sql())?;
        let rows = stmt.query_map(params![query.shop_id, since, query.country_code], |row| {
            Ok(StoredDeliveryRow {
                shipment_id: row.get(0)?,
                zip: row.get(1)?,
                country_code: row.get(2)?,
                tracking_codes: row.get(3)?,
                event_key: row.get(4)?,
                phase_key: row.get(5)?,
                event_time: row.get(6)?,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_raw_event()?);
        }

        let metadata =
            QueryMetadata::finish(DeliveryQuery::NAME, &query.shop_id, started, events.len());
        tracing::info!(
            query = DeliveryQuery::NAME,
            rows = metadata.row_count,
            duration_seconds = metadata.duration_seconds,
            "executed query"
        );
        Ok(QueryResult {
            metadata,
            data: events,
        })
    }

    /// Lists every parcel event of one leitzone, ordered by event time.
    pub fn fetch_leitzone_events(
        &self,
        query: &LeitzoneQuery,
    ) -> Result<QueryResult<LeitzoneEventRow>, DbError> {
        let started = Instant::now();
        let since = format_timestamp(query.since);
        let mut stmt = self.conn.prepare(LeitzoneQuery::SQL)?;
        let rows = stmt.query_map(
            params![query.shop_id, since, query.country_code, query.leitzone],
            |row| {
                Ok(LeitzoneEventRow {
                    id: row.get(0)?,
                    shipment_id: row.get(1)?,
                    event_key: row.get(2)?,
                    phase_key: row.get(3)?,
                    event_time: row.get(4)?,
                    zip_code: row.get(5)?,
                    country_code: row.get(6)?,
                    leitzone: row.get(7)?,
                })
            },
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }

        let name = query.name();
        let metadata = QueryMetadata::finish(&name, &query.shop_id, started, events.len());
        tracing::info!(
            query = %name,
            rows = metadata.row_count,
            duration_seconds = metadata.duration_seconds,
            "executed query"
        );
        Ok(QueryResult {
            metadata,
            data: events,
        })
    }
}

/// Delivery row as read from SQLite, before validation.
struct StoredDeliveryRow {
    shipment_id: String,
    zip: Option<String>,
    country_code: Option<String>,
    tracking_codes: Option<String>,
    event_key: Option<String>,
    phase_key: Option<String>,
    event_time: Option<String>,
}

impl StoredDeliveryRow {
    fn into_raw_event(self) -> Result<RawEvent, DbError> {
        let tracking_code = self
            .tracking_codes
            .as_deref()
            .map(serde_json::from_str::<Vec<Option<String>>>)
            .transpose()
            .map_err(|source| DbError::TrackingCodes {
                shipment_id: self.shipment_id.clone(),
                source,
            })?
            .map(TrackingCodeValue::List);

        Ok(RawEvent {
            shipment_id: ShipmentId::new(self.shipment_id)?,
            zip: self.zip,
            country_code: self.country_code,
            tracking_code,
            event_key: self.event_key,
            phase_key: self.phase_key,
            event_time: self.event_time,
        })
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Rewrites parseable timestamps to the stored format, keeping the rest.
fn normalize_timestamp(raw: &str) -> String {
    parse_event_time(raw).map_or_else(
        || raw.to_string(),
        |ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    )
}

/// Like [`normalize_timestamp`], also accepting a bare `YYYY-MM-DD` date as
/// midnight UTC.
fn normalize_creation_date(raw: &str) -> String {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => format_timestamp(date.and_time(NaiveTime::MIN).and_utc()),
        Err(_) => normalize_timestamp(raw),
    }
}
