// src/process/extract.rs
//
// Wide source rows -> one CountyIncomeRecord per county-year.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use super::utils::{is_county_fips, parse_amount, Amount, MissingKind};
use super::RawTable;
use crate::error::EaiError;
use crate::schema::CountyIncomeRecord;

/// Source line-codes for the three income components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineCodes {
    pub wage: u32,
    pub property: u32,
    pub transfer: u32,
}

impl Default for LineCodes {
    fn default() -> Self {
        LineCodes {
            wage: 50,
            property: 46,
            transfer: 47,
        }
    }
}

impl LineCodes {
    /// Each component needs its own line-code; a shared one would feed
    /// the same row into two slots.
    pub fn validate(&self) -> Result<(), EaiError> {
        let LineCodes {
            wage,
            property,
            transfer,
        } = *self;
        if wage == property || wage == transfer || property == transfer {
            return Err(EaiError::InvalidConfig(format!(
                "line codes must be distinct (wage {}, property {}, transfer {})",
                wage, property, transfer
            )));
        }
        Ok(())
    }

    pub fn as_vec(&self) -> Vec<u32> {
        vec![self.wage, self.property, self.transfer]
    }

    fn slot(&self, code: u32) -> Option<usize> {
        if code == self.wage {
            Some(0)
        } else if code == self.property {
            Some(1)
        } else if code == self.transfer {
            Some(2)
        } else {
            None
        }
    }
}

/// Why a county-year produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExclusionCause {
    /// At least one of the three line-codes has no row for this county.
    MissingComponent,
    /// A component cell is blank, a marker, negative, or not a number.
    Unavailable(MissingKind),
    /// The same (county, year, line-code) appears twice with different values.
    ConflictingDuplicate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractSummary {
    pub county_rows: usize,
    pub non_county_rows: usize,
    pub county_years: usize,
    pub extracted: usize,
    pub excluded: BTreeMap<ExclusionCause, usize>,
}

impl ExtractSummary {
    pub fn excluded_total(&self) -> usize {
        self.excluded.values().sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extracted {
    /// Ordered by (county_id, year).
    pub records: Vec<CountyIncomeRecord>,
    /// `GeoName` per county, as printed in the source.
    pub names: BTreeMap<String, String>,
    pub summary: ExtractSummary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Seen(Amount),
    Conflict,
}

fn merge(slot: &mut Option<Slot>, incoming: Amount) {
    *slot = match *slot {
        None => Some(Slot::Seen(incoming)),
        Some(Slot::Seen(existing)) if existing == incoming => Some(Slot::Seen(existing)),
        Some(_) => Some(Slot::Conflict),
    };
}

/// Pivot the requested line-codes into county-year records.
///
/// `years` restricts the output; empty means every year column in the table.
/// Missing or sentinel components exclude the county-year; no value is
/// ever imputed.
#[tracing::instrument(level = "info", skip_all, fields(rows = table.rows.len()))]
pub fn extract(table: &RawTable, codes: &LineCodes, years: &[i32]) -> Extracted {
    let year_filter: BTreeSet<i32> = years.iter().copied().collect();
    let mut slots: BTreeMap<(String, i32), [Option<Slot>; 3]> = BTreeMap::new();
    let mut out = Extracted::default();

    for row in &table.rows {
        let Some(component) = codes.slot(row.line_code) else {
            continue;
        };
        if !is_county_fips(&row.geo_fips) {
            out.summary.non_county_rows += 1;
            continue;
        }
        out.summary.county_rows += 1;
        if !row.geo_name.is_empty() {
            out.names
                .entry(row.geo_fips.clone())
                .or_insert_with(|| row.geo_name.clone());
        }

        for (col, &year) in table.years.iter().enumerate() {
            if !year_filter.is_empty() && !year_filter.contains(&year) {
                continue;
            }
            let amount = row
                .values
                .get(col)
                .map(|raw| parse_amount(raw))
                .unwrap_or(Amount::Missing(MissingKind::Empty));
            let entry = slots.entry((row.geo_fips.clone(), year)).or_default();
            merge(&mut entry[component], amount);
        }
    }

    out.summary.county_years = slots.len();
    for ((county_id, year), parts) in slots {
        let cause = if parts.iter().any(|s| matches!(s, Some(Slot::Conflict))) {
            Some(ExclusionCause::ConflictingDuplicate)
        } else if let Some(kind) = parts.iter().find_map(|s| match s {
            Some(Slot::Seen(Amount::Missing(kind))) => Some(*kind),
            _ => None,
        }) {
            Some(ExclusionCause::Unavailable(kind))
        } else if parts.iter().any(Option::is_none) {
            Some(ExclusionCause::MissingComponent)
        } else {
            None
        };

        if let Some(cause) = cause {
            if cause == ExclusionCause::ConflictingDuplicate {
                warn!(county = %county_id, year, "conflicting duplicate rows, county-year rejected");
            }
            *out.summary.excluded.entry(cause).or_default() += 1;
            continue;
        }

        let value = |i: usize| match parts[i] {
            Some(Slot::Seen(Amount::Value(v))) => v,
            _ => unreachable!("all three components checked above"),
        };
        out.records.push(CountyIncomeRecord {
            county_id,
            year,
            wage_income: value(0),
            property_income: value(1),
            transfer_income: value(2),
        });
    }
    out.summary.extracted = out.records.len();

    if out.summary.excluded_total() > 0 {
        warn!(
            excluded = out.summary.excluded_total(),
            causes = ?out.summary.excluded,
            "county-years excluded during extraction"
        );
    }
    info!(
        counties = out.names.len(),
        county_years = out.summary.county_years,
        extracted = out.summary.extracted,
        "extraction complete"
    );
    out
}
