// src/serve/handlers.rs

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::BTreeMap, sync::Arc};
use tracing::error;

use super::AppState;
use crate::geography::approximate_location;
use crate::history::BuildRun;
use crate::index::{StressTier, Thresholds};
use crate::store::{write_csv, QueryRow, SortOrder, StoreQuery};

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// Counties listed in `/api/summary`.
pub const LOWEST_EAI_COUNT: usize = 10;

/// A JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError(pub StatusCode, pub String);

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(StatusCode::BAD_REQUEST, msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

/// Query string shared by the county, summary and export endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
    pub year: Option<i32>,
    /// Comma-separated tier names. Absent means every tier; present but
    /// empty means none.
    pub tier: Option<String>,
    pub min_eai: Option<f64>,
    pub max_eai: Option<f64>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub high_agency_min: Option<f64>,
    pub balanced_min: Option<f64>,
}

impl FilterParams {
    /// Turn request parameters into a store query. Threshold overrides
    /// default to the stored values one at a time.
    pub fn to_query(&self, stored: &Thresholds) -> Result<StoreQuery, ApiError> {
        // `tier=` (nothing ticked) selects no tier at all
        let tiers = match self.tier.as_deref() {
            None => None,
            Some(list) => Some(
                list.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(|t| t.parse::<StressTier>().map_err(ApiError::bad_request))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        let sort = self
            .sort
            .as_deref()
            .map(|s| s.parse::<SortOrder>().map_err(ApiError::bad_request))
            .transpose()?;

        let thresholds = if self.high_agency_min.is_none() && self.balanced_min.is_none() {
            None
        } else {
            let t = Thresholds::new(
                self.high_agency_min.unwrap_or(stored.high_agency_min),
                self.balanced_min.unwrap_or(stored.balanced_min),
            )
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
            Some(t)
        };

        if let (Some(min), Some(max)) = (self.min_eai, self.max_eai) {
            if min > max {
                return Err(ApiError::bad_request(format!(
                    "min_eai {} is above max_eai {}",
                    min, max
                )));
            }
        }

        Ok(StoreQuery {
            year: self.year,
            tiers,
            min_eai: self.min_eai,
            max_eai: self.max_eai,
            sort,
            limit: self.limit,
            thresholds,
        })
    }
}

/// One row of `/api/counties`: the stored columns plus display fields.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CountyRow {
    pub county_id: String,
    pub county_name: String,
    pub year: i32,
    pub wage_income: f64,
    pub property_income: f64,
    pub transfer_income: f64,
    pub total_income: f64,
    pub eai: f64,
    /// Tier as stored.
    pub stress_tier: StressTier,
    /// Tier under the request's thresholds; equals `stress_tier` without
    /// overrides.
    pub tier: StressTier,
    pub property_share: f64,
    pub transfer_share: f64,
    pub latitude: f64,
    pub longitude: f64,
}

impl CountyRow {
    pub fn new(row: &QueryRow<'_>, state: &AppState) -> Self {
        let r = row.record;
        let (county_name, latitude, longitude) = match state.places.get(&r.county_id) {
            Some(loc) => (loc.county_name.clone(), loc.latitude, loc.longitude),
            None => {
                let (lat, lng) = approximate_location(&r.county_id);
                (String::new(), lat, lng)
            }
        };
        CountyRow {
            county_id: r.county_id.clone(),
            county_name,
            year: r.year,
            wage_income: r.wage_income,
            property_income: r.property_income,
            transfer_income: r.transfer_income,
            total_income: r.total_income,
            eai: r.eai,
            stress_tier: r.stress_tier,
            tier: row.tier,
            property_share: r.property_share(),
            transfer_share: r.transfer_share(),
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub counties: usize,
    pub by_tier: BTreeMap<StressTier, usize>,
    pub mean_eai: Option<f64>,
    pub mean_eai_high_dependency: Option<f64>,
    pub lowest: Vec<CountyRow>,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (n, sum) = values.fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    (n > 0).then(|| sum / n as f64)
}

/// Tier counts, means and the lowest-EAI high-dependency counties over `rows`.
pub fn summarize(rows: &[QueryRow<'_>], state: &AppState) -> Summary {
    let mut by_tier: BTreeMap<StressTier, usize> =
        StressTier::ALL.iter().map(|t| (*t, 0)).collect();
    for r in rows {
        *by_tier.entry(r.tier).or_default() += 1;
    }

    let mut lowest: Vec<&QueryRow<'_>> = rows
        .iter()
        .filter(|r| r.tier == StressTier::HighDependency)
        .collect();
    lowest.sort_by(|a, b| {
        a.record
            .eai
            .total_cmp(&b.record.eai)
            .then_with(|| a.record.county_id.cmp(&b.record.county_id))
    });
    lowest.truncate(LOWEST_EAI_COUNT);

    Summary {
        counties: rows.len(),
        by_tier,
        mean_eai: mean(rows.iter().map(|r| r.record.eai)),
        mean_eai_high_dependency: mean(
            rows.iter()
                .filter(|r| r.tier == StressTier::HighDependency)
                .map(|r| r.record.eai),
        ),
        lowest: lowest.into_iter().map(|r| CountyRow::new(r, state)).collect(),
    }
}

/// `GET /`
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub years: Vec<i32>,
    pub latest_year: Option<i32>,
    pub rows: usize,
    pub thresholds: Thresholds,
    pub tiers: Vec<&'static str>,
    pub last_build: Option<BuildRun>,
}

/// `GET /api/meta`
pub async fn meta(State(st): State<Arc<AppState>>) -> Json<Meta> {
    Json(Meta {
        years: st.snapshot.years(),
        latest_year: st.snapshot.latest_year(),
        rows: st.snapshot.records.len(),
        thresholds: st.snapshot.thresholds,
        tiers: StressTier::ALL.iter().map(|t| t.as_str()).collect(),
        last_build: st.last_build.clone(),
    })
}

/// `GET /api/counties`
pub async fn counties(
    State(st): State<Arc<AppState>>,
    Query(params): Query<FilterParams>,
) -> Result<Json<Vec<CountyRow>>, ApiError> {
    let q = params.to_query(&st.snapshot.thresholds)?;
    let rows = st.snapshot.query(&q);
    Ok(Json(rows.iter().map(|r| CountyRow::new(r, &st)).collect()))
}

/// `GET /api/summary`
///
/// `sort` and `limit` apply before summarising, like on `/api/counties`.
pub async fn summary(
    State(st): State<Arc<AppState>>,
    Query(params): Query<FilterParams>,
) -> Result<Json<Summary>, ApiError> {
    let q = params.to_query(&st.snapshot.thresholds)?;
    let rows = st.snapshot.query(&q);
    Ok(Json(summarize(&rows, &st)))
}

/// `GET /api/export.csv`
///
/// Stored rows only; override thresholds affect which rows match, never the
/// values written.
pub async fn export_csv(
    State(st): State<Arc<AppState>>,
    Query(params): Query<FilterParams>,
) -> Result<Response, ApiError> {
    let q = params.to_query(&st.snapshot.thresholds)?;
    let rows: Vec<_> = st.snapshot.query(&q).into_iter().map(|r| r.record).collect();

    let mut body = Vec::new();
    write_csv(&mut body, &rows).map_err(|e| {
        error!("csv export failed: {:#}", e);
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, "export failed".into())
    })?;
    let filename = match q.year {
        Some(y) => format!("agency_index_{}.csv", y),
        None => "agency_index.csv".to_string(),
    };
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}
