// src/index/mod.rs
pub mod tier;

pub use tier::{StressTier, Thresholds};

use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::schema::{CountyIncomeRecord, EconomicAgencyRecord};

/// Why a county-year received no index.
#[derive(Debug, Clone, PartialEq)]
pub enum Unscored {
    /// `wage + property + transfer <= 0`; nothing to divide by.
    NonPositiveTotal { total: f64 },
    /// The ratio left [0, 1] or is not finite. Only reachable through
    /// upstream sign errors, so it is reported at error level.
    IntegrityFault { eai: f64 },
}

/// Counts reported at the end of a scoring pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreSummary {
    pub input: usize,
    pub scored: usize,
    pub unscored: usize,
    pub integrity_faults: usize,
    pub by_tier: BTreeMap<StressTier, usize>,
}

impl ScoreSummary {
    pub fn excluded(&self) -> usize {
        self.unscored + self.integrity_faults
    }
}

/// Score one county-year. The only place an EAI is derived.
pub fn score_record(
    rec: &CountyIncomeRecord,
    thresholds: &Thresholds,
) -> Result<EconomicAgencyRecord, Unscored> {
    let total = rec.total_income();
    // also catches NaN totals
    if !(total > 0.0) {
        return Err(Unscored::NonPositiveTotal { total });
    }
    let eai = rec.wage_income / total;
    if !eai.is_finite() || !(0.0..=1.0).contains(&eai) {
        return Err(Unscored::IntegrityFault { eai });
    }

    Ok(EconomicAgencyRecord {
        county_id: rec.county_id.clone(),
        year: rec.year,
        wage_income: rec.wage_income,
        property_income: rec.property_income,
        transfer_income: rec.transfer_income,
        total_income: total,
        eai,
        stress_tier: thresholds.classify(eai),
    })
}

/// Score every record, dropping the ones that cannot be scored.
/// Empty input gives empty output.
#[tracing::instrument(level = "info", skip_all, fields(records = records.len()))]
pub fn calculate(
    records: &[CountyIncomeRecord],
    thresholds: &Thresholds,
) -> (Vec<EconomicAgencyRecord>, ScoreSummary) {
    let mut summary = ScoreSummary {
        input: records.len(),
        ..Default::default()
    };
    let mut out = Vec::with_capacity(records.len());

    for rec in records {
        match score_record(rec, thresholds) {
            Ok(scored) => {
                *summary.by_tier.entry(scored.stress_tier).or_default() += 1;
                out.push(scored);
            }
            Err(Unscored::NonPositiveTotal { total }) => {
                debug!(county = %rec.county_id, year = rec.year, total, "unscored");
                summary.unscored += 1;
            }
            Err(Unscored::IntegrityFault { eai }) => {
                error!(
                    county = %rec.county_id,
                    year = rec.year,
                    wage = rec.wage_income,
                    property = rec.property_income,
                    transfer = rec.transfer_income,
                    eai,
                    "integrity fault: eai outside [0, 1], record dropped"
                );
                summary.integrity_faults += 1;
            }
        }
    }
    summary.scored = out.len();

    if summary.excluded() > 0 {
        warn!(
            unscored = summary.unscored,
            integrity_faults = summary.integrity_faults,
            "{} of {} county-years received no index",
            summary.excluded(),
            summary.input
        );
    }
    info!(scored = summary.scored, tiers = ?summary.by_tier, "scoring complete");

    (out, summary)
}
