// src/schema/types.rs

use serde::{Deserialize, Serialize};

use crate::index::StressTier;

/// One county-year with all three income components present.
/// Amounts are thousands of dollars and never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyIncomeRecord {
    pub county_id: String,
    pub year: i32,
    pub wage_income: f64,
    pub property_income: f64,
    pub transfer_income: f64,
}

impl CountyIncomeRecord {
    pub fn total_income(&self) -> f64 {
        self.wage_income + self.property_income + self.transfer_income
    }
}

/// A scored county-year; one row of the persisted store.
///
/// Field order is the store column order. Only the index calculator and the
/// store reader build these, and the reader re-checks `total_income` and
/// `eai` against the components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicAgencyRecord {
    pub county_id: String,
    pub year: i32,
    pub wage_income: f64,
    pub property_income: f64,
    pub transfer_income: f64,
    pub total_income: f64,
    pub eai: f64,
    pub stress_tier: StressTier,
}

impl EconomicAgencyRecord {
    pub fn property_share(&self) -> f64 {
        self.property_income / self.total_income
    }

    pub fn transfer_share(&self) -> f64 {
        self.transfer_income / self.total_income
    }

    /// Check the components are usable amounts and the derived columns
    /// agree with them.
    pub fn is_consistent(&self) -> bool {
        let parts = [self.wage_income, self.property_income, self.transfer_income];
        if !parts.iter().all(|v| v.is_finite() && *v >= 0.0) {
            return false;
        }
        let total = self.wage_income + self.property_income + self.transfer_income;
        total > 0.0
            && (self.total_income - total).abs() <= 1e-9 * total
            && (self.eai - self.wage_income / total).abs() <= 1e-9
            && (0.0..=1.0).contains(&self.eai)
    }
}
