// src/fetch/mod.rs
pub mod zips;

use anyhow::Result;
use reqwest::Client;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::EaiError;
use crate::geography;
use crate::process::read_zip_entry;

/// Download the CAINC4 archive to the configured source path.
pub async fn fetch_source(client: &Client, cfg: &Config) -> Result<PathBuf> {
    let target = cfg.source_path();
    let dir = target
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.data_dir.clone());

    info!(url = %cfg.source_url, "downloading BEA CAINC4");
    let downloaded = zips::download_zip(client, &cfg.source_url, &dir)
        .await
        .map_err(|e| EaiError::source_unavailable(&cfg.source_url, format!("{:#}", e)))?;

    if downloaded != target {
        tokio::fs::rename(&downloaded, &target).await?;
    }
    Ok(target)
}

/// Download the Census county gazetteer, trying each configured URL in turn,
/// and store it as a CSV of county locations.
pub async fn fetch_gazetteer(client: &Client, cfg: &Config) -> Result<PathBuf> {
    let out = cfg.gazetteer_path();
    let mut last_err = None;

    for url in &cfg.gazetteer_urls {
        info!(url = %url, "downloading county gazetteer");
        match zips::download_zip(client, url, &cfg.data_dir).await {
            Ok(zip_path) => {
                let picked = read_zip_entry(&zip_path, |names: &[String]| {
                    names.iter().find(|n| n.ends_with(".txt")).cloned()
                });
                // the archive is only a carrier for the text file
                let _ = tokio::fs::remove_file(&zip_path).await;

                let (name, bytes) = picked?;
                let locations = geography::parse_gazetteer(&String::from_utf8_lossy(&bytes))?;
                info!(entry = %name, counties = locations.len(), "parsed gazetteer");
                geography::write_locations(&out, &locations)?;
                return Ok(out);
            }
            Err(e) => {
                warn!(url = %url, "gazetteer download failed: {:#}", e);
                last_err = Some(e);
            }
        }
    }

    let reason = last_err
        .map(|e| format!("{:#}", e))
        .unwrap_or_else(|| "no gazetteer URLs configured".into());
    Err(EaiError::source_unavailable("county gazetteer", reason).into())
}
