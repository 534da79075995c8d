// src/pipeline.rs
//
// The `build` job: source → extract → score → store, sidecar and history.
// Nothing is written until every stage has succeeded.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::{collections::BTreeSet, path::PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{classify, EaiError};
use crate::geography::{self, CountyLocation};
use crate::history::{BuildRun, History};
use crate::index::{self, ScoreSummary};
use crate::process::{
    extract::{extract, ExtractSummary},
    load_source,
};
use crate::schema::EconomicAgencyRecord;
use crate::store::{self, merge_years};

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub store_path: PathBuf,
    pub counties_path: PathBuf,
    /// Rows in the store after the build, carried-over years included.
    pub rows_written: usize,
    /// Rows produced by this run.
    pub rows_built: usize,
    pub extract: ExtractSummary,
    pub score: ScoreSummary,
    pub run: BuildRun,
}

impl BuildReport {
    pub fn excluded(&self) -> usize {
        self.extract.excluded_total() + self.score.excluded()
    }
}

fn log_eai_stats(records: &[EconomicAgencyRecord]) {
    if records.is_empty() {
        return;
    }
    let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
    for r in records {
        min = min.min(r.eai);
        max = max.max(r.eai);
        sum += r.eai;
    }
    info!(
        count = records.len(),
        mean = sum / records.len() as f64,
        min,
        max,
        "eai statistics"
    );
}

/// Run the whole ETL for `cfg`.
///
/// With `cfg.years` empty the store is replaced outright. Otherwise only
/// those years are rebuilt and every other year already in the store is
/// kept (re-tiered with the current thresholds).
#[tracing::instrument(level = "info", skip(cfg), fields(source = %cfg.source_path().display()))]
pub fn run_build(cfg: &Config) -> Result<BuildReport> {
    let started: DateTime<Utc> = Utc::now();
    cfg.validate()?;
    let thresholds = cfg.thresholds;
    let source = cfg.source_path();
    let store_path = cfg.store_path();
    let counties_path = cfg.counties_path();

    let table = load_source(&source, &cfg.line_codes.as_vec())?;
    let extracted = extract(&table, &cfg.line_codes, &cfg.years);
    info!(
        county_years = extracted.summary.county_years,
        extracted = extracted.summary.extracted,
        excluded = extracted.summary.excluded_total(),
        "extraction finished"
    );
    for (cause, n) in &extracted.summary.excluded {
        info!(?cause, count = n, "excluded county-years");
    }

    let (scored, score) = index::calculate(&extracted.records, &thresholds);
    if scored.is_empty() {
        return Err(EaiError::NoRecords.into());
    }
    let rows_built = scored.len();
    log_eai_stats(&scored);

    let records = if cfg.years.is_empty() {
        scored
    } else {
        let rebuilt: BTreeSet<i32> = cfg.years.iter().copied().collect();
        match store::read_store(&store_path) {
            Ok(existing) => {
                info!(carried_over_from = existing.records.len(), "merging with existing store");
                merge_years(existing.records, scored, &rebuilt, &thresholds)
            }
            Err(e) if matches!(classify(&e), Some(EaiError::StoreMissing(_))) => scored,
            Err(e) => {
                return Err(e).context("cannot rebuild selected years over an unreadable store")
            }
        }
    };

    // names for every county in the store, not only this run's
    let mut names = extracted.names.clone();
    if counties_path.is_file() {
        match geography::read_locations(&counties_path) {
            Ok(previous) => {
                for loc in previous {
                    names.entry(loc.county_id).or_insert(loc.county_name);
                }
            }
            Err(e) => warn!("ignoring unreadable county sidecar: {:#}", e),
        }
    }
    let present: BTreeSet<&str> = records.iter().map(|r| r.county_id.as_str()).collect();
    names.retain(|id, _| present.contains(id.as_str()));
    for id in &present {
        names.entry(id.to_string()).or_default();
    }
    let gazetteer: Vec<CountyLocation> = {
        let gaz = cfg.gazetteer_path();
        if gaz.is_file() {
            geography::read_locations(&gaz)
                .with_context(|| format!("reading gazetteer {}", gaz.display()))?
        } else {
            warn!(path = %gaz.display(), "no gazetteer; map positions will be approximate (run `fetch --gazetteer`)");
            Vec::new()
        }
    };
    let sidecar = geography::build_sidecar(&names, &gazetteer);

    // stage both files, then publish the sidecar and the store last, so a
    // failure anywhere leaves the previous store in place
    let staged_sidecar = geography::stage_locations(&counties_path, &sidecar)?;
    let staged_store = store::stage_store(&store_path, &records, &thresholds)?;
    staged_sidecar
        .persist(&counties_path)
        .with_context(|| format!("replacing {}", counties_path.display()))?;
    staged_store
        .persist(&store_path)
        .with_context(|| format!("replacing store {}", store_path.display()))?;

    let report_extract = extracted.summary;
    let excluded = report_extract.excluded_total() + score.excluded();
    let run = BuildRun {
        started,
        finished: Utc::now(),
        source: source.display().to_string(),
        rows_written: records.len() as u64,
        excluded: excluded as u64,
        high_agency_min: thresholds.high_agency_min,
        balanced_min: thresholds.balanced_min,
    };
    // the store is already in place; a history failure is only logged
    match History::new(cfg.history_dir()).and_then(|h| h.record_build(&run)) {
        Ok(path) => info!(path = %path.display(), "build recorded"),
        Err(e) => warn!("could not record build history: {:#}", e),
    }

    info!(
        rows = records.len(),
        built = rows_built,
        excluded,
        store = %store_path.display(),
        "build finished"
    );
    Ok(BuildReport {
        store_path,
        counties_path,
        rows_written: records.len(),
        rows_built,
        extract: report_extract,
        score,
        run,
    })
}
