// src/store/query.rs

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::StoreSnapshot;
use crate::index::{StressTier, Thresholds};
use crate::schema::EconomicAgencyRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order `{}`", other)),
        }
    }
}

/// A read-only selection over the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreQuery {
    pub year: Option<i32>,
    /// `None` means every tier; an empty selection matches nothing.
    pub tiers: Option<Vec<StressTier>>,
    pub min_eai: Option<f64>,
    pub max_eai: Option<f64>,
    pub sort: Option<SortOrder>,
    pub limit: Option<usize>,
    /// Client-side cut points. When set, tiers are recomputed from the stored
    /// `eai` for filtering and display; stored rows are left as they are.
    pub thresholds: Option<Thresholds>,
}

/// A stored row plus the tier in effect for this query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryRow<'a> {
    pub record: &'a EconomicAgencyRecord,
    pub tier: StressTier,
}

impl StoreSnapshot {
    /// Run a query. No match is an empty result, never an error.
    pub fn query(&self, q: &StoreQuery) -> Vec<QueryRow<'_>> {
        let effective = q.thresholds.as_ref();
        let mut rows: Vec<QueryRow<'_>> = self
            .records
            .iter()
            .filter(|r| q.year.map_or(true, |y| r.year == y))
            .filter(|r| q.min_eai.map_or(true, |min| r.eai >= min))
            .filter(|r| q.max_eai.map_or(true, |max| r.eai <= max))
            .map(|r| QueryRow {
                record: r,
                tier: effective.map_or(r.stress_tier, |t| t.classify(r.eai)),
            })
            .filter(|row| q.tiers.as_ref().map_or(true, |t| t.contains(&row.tier)))
            .collect();

        if let Some(order) = q.sort {
            rows.sort_by(|a, b| {
                let by_eai = a.record.eai.total_cmp(&b.record.eai);
                let by_eai = match order {
                    SortOrder::Asc => by_eai,
                    SortOrder::Desc => by_eai.reverse(),
                };
                by_eai
                    .then_with(|| a.record.county_id.cmp(&b.record.county_id))
                    .then_with(|| a.record.year.cmp(&b.record.year))
            });
        }
        if let Some(limit) = q.limit {
            rows.truncate(limit);
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_snapshot;

    #[test]
    fn filters_by_year_and_range() {
        let snap = sample_snapshot();
        let rows = snap.query(&StoreQuery {
            year: Some(2023),
            min_eai: Some(0.3),
            ..Default::default()
        });
        let ids: Vec<_> = rows.iter().map(|r| r.record.county_id.as_str()).collect();
        assert_eq!(ids, vec!["01001", "02013"]);
    }

    #[test]
    fn sorts_and_limits() {
        let snap = sample_snapshot();
        let rows = snap.query(&StoreQuery {
            sort: Some(SortOrder::Asc),
            limit: Some(2),
            ..Default::default()
        });
        let eais: Vec<f64> = rows.iter().map(|r| r.record.eai).collect();
        assert_eq!(rows.len(), 2);
        assert!(eais[0] <= eais[1]);
        assert!((eais[0] - 0.2).abs() < 1e-12);

        let desc = snap.query(&StoreQuery {
            sort: Some(SortOrder::Desc),
            ..Default::default()
        });
        assert!(desc.windows(2).all(|w| w[0].record.eai >= w[1].record.eai));
    }

    #[test]
    fn stored_tiers_are_used_without_override() {
        let snap = sample_snapshot();
        let rows = snap.query(&StoreQuery {
            tiers: Some(vec![StressTier::HighDependency]),
            ..Default::default()
        });
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.county_id, "01003");
        assert!(rows.iter().all(|r| r.tier == r.record.stress_tier));
    }

    #[test]
    fn override_reclassifies_locally_without_touching_rows() {
        let snap = sample_snapshot();
        let before = snap.clone();
        let loose = Thresholds::new(0.1, 0.05).unwrap();
        let rows = snap.query(&StoreQuery {
            tiers: Some(vec![StressTier::HighAgency]),
            thresholds: Some(loose),
            ..Default::default()
        });
        assert_eq!(rows.len(), snap.records.len());
        let low = rows.iter().find(|r| r.record.county_id == "01003").unwrap();
        assert_eq!(low.tier, StressTier::HighAgency);
        assert_eq!(low.record.stress_tier, StressTier::HighDependency);
        assert_eq!(snap, before);
    }

    #[test]
    fn empty_tier_selection_matches_nothing() {
        let snap = sample_snapshot();
        let none = snap.query(&StoreQuery {
            tiers: Some(Vec::new()),
            ..Default::default()
        });
        assert!(none.is_empty());
        assert_eq!(snap.query(&StoreQuery::default()).len(), snap.records.len());
    }

    #[test]
    fn no_match_is_empty() {
        let snap = sample_snapshot();
        assert!(snap
            .query(&StoreQuery {
                year: Some(1901),
                ..Default::default()
            })
            .is_empty());
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}
