//! Import command for loading shipments and parcel events into the store.

use std::io::{self, BufRead};

use anyhow::{Context, Result};
use clap::Args;
use serde::de::DeserializeOwned;

use lz_db::{ParcelEventRecord, ShipmentRecord};

use crate::Config;
use crate::commands::util::open_database;

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Read shipments instead of parcel events.
    #[arg(long)]
    pub shipments: bool,
}

pub fn run(args: &ImportArgs, config: &Config) -> Result<usize> {
    let stdin = io::stdin();
    let mut db = open_database(config)?;

    let inserted = if args.shipments {
        let shipments: Vec<ShipmentRecord> = parse_lines(stdin.lock())?;
        validate_shipments(&shipments)?;
        db.insert_shipments(&shipments)?
    } else {
        let events: Vec<ParcelEventRecord> = parse_lines(stdin.lock())?;
        validate_events(&events)?;
        db.insert_parcel_events(&events)?
    };
    Ok(inserted)
}

fn parse_lines<T: DeserializeOwned, R: BufRead>(reader: R) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON on line {}", idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn validate_shipments(shipments: &[ShipmentRecord]) -> Result<()> {
    for (idx, shipment) in shipments.iter().enumerate() {
        if shipment.id.trim().is_empty() {
            anyhow::bail!("shipment {} is missing an id", idx + 1);
        }
        if shipment.shop_id.trim().is_empty() {
            anyhow::bail!("shipment {} is missing a shop_id", shipment.id);
        }
    }
    Ok(())
}

fn validate_events(events: &[ParcelEventRecord]) -> Result<()> {
    for (idx, event) in events.iter().enumerate() {
        if event.id.trim().is_empty() {
            anyhow::bail!("event {} is missing an id", idx + 1);
        }
        if event.shipment_id.trim().is_empty() {
            anyhow::bail!("event {} is missing a shipment_id", event.id);
        }
    }
    Ok(())
}
