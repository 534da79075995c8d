// src/index/tier.rs

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::EaiError;

pub const DEFAULT_HIGH_AGENCY_MIN: f64 = 0.6;
pub const DEFAULT_BALANCED_MIN: f64 = 0.35;

/// Stress bucket derived from the EAI. The string forms are part of the
/// store schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressTier {
    HighAgency,
    Balanced,
    HighDependency,
}

impl StressTier {
    pub const ALL: [StressTier; 3] = [
        StressTier::HighAgency,
        StressTier::Balanced,
        StressTier::HighDependency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StressTier::HighAgency => "high_agency",
            StressTier::Balanced => "balanced",
            StressTier::HighDependency => "high_dependency",
        }
    }
}

impl fmt::Display for StressTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StressTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high_agency" => Ok(StressTier::HighAgency),
            "balanced" => Ok(StressTier::Balanced),
            "high_dependency" => Ok(StressTier::HighDependency),
            other => Err(format!("unknown stress tier `{}`", other)),
        }
    }
}

/// Tier cut points. `eai >= high_agency_min` is high agency,
/// `eai >= balanced_min` is balanced, anything lower is high dependency.
///
/// Construct through [`Thresholds::new`] (or validate a deserialized value)
/// so that `0 <= balanced_min <= high_agency_min <= 1` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub high_agency_min: f64,
    pub balanced_min: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            high_agency_min: DEFAULT_HIGH_AGENCY_MIN,
            balanced_min: DEFAULT_BALANCED_MIN,
        }
    }
}

impl Thresholds {
    pub fn new(high_agency_min: f64, balanced_min: f64) -> Result<Self, EaiError> {
        let t = Thresholds {
            high_agency_min,
            balanced_min,
        };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<(), EaiError> {
        for (name, v) in [
            ("high_agency_min", self.high_agency_min),
            ("balanced_min", self.balanced_min),
        ] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(EaiError::InvalidThresholds(format!(
                    "{} = {} must lie in [0, 1]",
                    name, v
                )));
            }
        }
        if self.balanced_min > self.high_agency_min {
            return Err(EaiError::InvalidThresholds(format!(
                "balanced_min ({}) must not exceed high_agency_min ({})",
                self.balanced_min, self.high_agency_min
            )));
        }
        Ok(())
    }

    /// Single deterministic pass from EAI to tier.
    pub fn classify(&self, eai: f64) -> StressTier {
        if eai >= self.high_agency_min {
            StressTier::HighAgency
        } else if eai >= self.balanced_min {
            StressTier::Balanced
        } else {
            StressTier::HighDependency
        }
    }
}
