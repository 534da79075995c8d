// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::index::Thresholds;
use crate::process::extract::LineCodes;

pub const DEFAULT_SOURCE_URL: &str = "https://apps.bea.gov/regional/zip/CAINC4.zip";

pub static DEFAULT_GAZETTEER_URLS: &[&str] = &[
    "https://www2.census.gov/geo/docs/maps-data/data/gazetteer/2024_Gazetteer/2024_Gaz_counties_national.zip",
    "https://www2.census.gov/geo/docs/maps-data/data/gazetteer/Gaz_counties_national.zip",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        ServeConfig {
            host: "127.0.0.1".into(),
            port: 8501,
        }
    }
}

/// Everything a run needs. Loaded from an optional YAML file; the CLI then
/// overrides individual fields.
///
/// ```yaml
/// data_dir: data
/// years: [2022, 2023]
/// thresholds:
///   high_agency_min: 0.6
///   balanced_min: 0.35
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub source_url: String,
    pub gazetteer_urls: Vec<String>,
    /// Defaults to `<data_dir>/CAINC4.zip`.
    pub source_path: Option<PathBuf>,
    /// Processed gazetteer CSV; defaults to `<data_dir>/county_coordinates.csv`.
    pub gazetteer_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/triage.parquet`.
    pub store_path: Option<PathBuf>,
    pub line_codes: LineCodes,
    /// Years to (re)build; empty means every year in the source.
    pub years: Vec<i32>,
    pub thresholds: Thresholds,
    pub serve: ServeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            source_url: DEFAULT_SOURCE_URL.into(),
            gazetteer_urls: DEFAULT_GAZETTEER_URLS.iter().map(|s| s.to_string()).collect(),
            source_path: None,
            gazetteer_path: None,
            store_path: None,
            line_codes: LineCodes::default(),
            years: Vec::new(),
            thresholds: Thresholds::default(),
            serve: ServeConfig::default(),
        }
    }
}

impl Config {
    /// Read `path` if given, else start from defaults. Thresholds and line
    /// codes are validated either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                serde_yaml::from_str::<Config>(&text)
                    .with_context(|| format!("parsing config {}", p.display()))?
            }
            None => Config::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        self.line_codes.validate()?;
        Ok(())
    }

    pub fn source_path(&self) -> PathBuf {
        self.source_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("CAINC4.zip"))
    }

    pub fn gazetteer_path(&self) -> PathBuf {
        self.gazetteer_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("county_coordinates.csv"))
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("triage.parquet"))
    }

    /// Geography sidecar, next to the store: `triage.parquet` → `triage_counties.csv`.
    pub fn counties_path(&self) -> PathBuf {
        counties_path_for(&self.store_path())
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }
}

pub fn counties_path_for(store: &Path) -> PathBuf {
    let stem = store
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("triage");
    store.with_file_name(format!("{}_counties.csv", stem))
}
