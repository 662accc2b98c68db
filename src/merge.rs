//! Left join of catalog rows with measurement entries on lot number.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::catalog::{CatalogEntry, Sex};
use crate::measure::MeasurementEntry;
use crate::text::parse_birth_date;

/// One horse as handed to persistence. Catalog fields are copied as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorseRecord {
    pub lot: u32,
    pub sex: Option<Sex>,
    pub color: Option<String>,
    pub birth_date: Option<String>,
    pub sire: Option<String>,
    pub dam: Option<String>,
    pub consignor: Option<String>,
    pub breeder: Option<String>,
    pub height: Option<u32>,
    pub girth: Option<u32>,
    pub cannon: Option<f64>,
    pub absent: bool,
}

impl HorseRecord {
    fn new(entry: &CatalogEntry, measurement: Option<&MeasurementEntry>) -> Self {
        let (height, girth, cannon, absent) = match measurement {
            Some(MeasurementEntry::Measured {
                height,
                girth,
                cannon,
                ..
            }) => (Some(*height), Some(*girth), Some(*cannon), false),
            Some(MeasurementEntry::Absent { .. }) => (None, None, None, true),
            None => (None, None, None, false),
        };

        HorseRecord {
            lot: entry.lot,
            sex: entry.sex,
            color: entry.color.clone(),
            birth_date: entry.birth_date.clone(),
            sire: entry.sire.clone(),
            dam: entry.dam.clone(),
            consignor: entry.consignor.clone(),
            breeder: entry.breeder.clone(),
            height,
            girth,
            cannon,
            absent,
        }
    }

    pub fn is_measured(&self) -> bool {
        self.height.is_some()
    }

    /// The free-text birth date read as a calendar date, when it is one.
    pub fn birth_date_parsed(&self) -> Option<NaiveDate> {
        self.birth_date.as_deref().and_then(parse_birth_date)
    }
}

/// Merge catalog rows with any number of measurement documents.
///
/// Documents are folded in order; a lot present in two documents takes the
/// later one. Output has one record per catalog entry, in catalog order.
/// Measurements for lots missing from the catalog are dropped.
pub fn merge<D>(catalog: &[CatalogEntry], documents: &[D]) -> Vec<HorseRecord>
where
    D: AsRef<[MeasurementEntry]>,
{
    let by_lot: HashMap<u32, &MeasurementEntry> = documents
        .iter()
        .flat_map(|doc| doc.as_ref())
        .map(|m| (m.lot(), m))
        .collect();

    catalog
        .iter()
        .map(|entry| HorseRecord::new(entry, by_lot.get(&entry.lot).copied()))
        .collect()
}
