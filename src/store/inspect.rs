// src/store/inspect.rs
//
// Store statistics for `agency-index inspect`.

use anyhow::{Context, Result};
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::{collections::BTreeMap, fmt, fs::File, path::Path};

use super::{read_store, StoreSnapshot};
use crate::index::{StressTier, Thresholds};
use crate::schema::EconomicAgencyRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Physical layout of the Parquet file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub created_by: Option<String>,
    pub row_groups: usize,
    pub bytes_on_disk: u64,
    /// (column, compression, compressed bytes) summed over row groups.
    pub columns: Vec<(String, String, i64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub rows: usize,
    pub counties: usize,
    pub years: Vec<i32>,
    pub thresholds: Thresholds,
    pub columns: Vec<ColumnStats>,
    pub by_tier: BTreeMap<StressTier, usize>,
    pub file: Option<FileInfo>,
}

const NUMERIC: [(&str, fn(&EconomicAgencyRecord) -> f64); 5] = [
    ("wage_income", |r| r.wage_income),
    ("property_income", |r| r.property_income),
    ("transfer_income", |r| r.transfer_income),
    ("total_income", |r| r.total_income),
    ("eai", |r| r.eai),
];

impl StoreStats {
    pub fn from_snapshot(snap: &StoreSnapshot) -> Self {
        let rows = snap.records.len();
        let counties = snap
            .records
            .iter()
            .map(|r| r.county_id.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .len();

        let columns = if rows == 0 {
            Vec::new()
        } else {
            NUMERIC
                .iter()
                .map(|(name, get)| {
                    let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
                    for r in &snap.records {
                        let v = get(r);
                        min = min.min(v);
                        max = max.max(v);
                        sum += v;
                    }
                    ColumnStats {
                        name: *name,
                        min,
                        max,
                        mean: sum / rows as f64,
                    }
                })
                .collect()
        };

        let mut by_tier: BTreeMap<StressTier, usize> =
            StressTier::ALL.iter().map(|t| (*t, 0)).collect();
        for r in &snap.records {
            *by_tier.entry(r.stress_tier).or_default() += 1;
        }

        StoreStats {
            rows,
            counties,
            years: snap.years(),
            thresholds: snap.thresholds,
            columns,
            by_tier,
            file: None,
        }
    }
}

/// Read Parquet footer metadata without decoding any pages.
pub fn file_info(path: &Path) -> Result<FileInfo> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = SerializedFileReader::new(file)
        .with_context(|| format!("reading Parquet footer of {}", path.display()))?;
    let meta = reader.metadata();

    let mut columns: Vec<(String, String, i64)> = meta
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), String::new(), 0))
        .collect();
    for rg in meta.row_groups() {
        for (idx, chunk) in rg.columns().iter().enumerate() {
            if let Some(col) = columns.get_mut(idx) {
                col.1 = format!("{:?}", chunk.compression());
                col.2 += chunk.compressed_size();
            }
        }
    }

    Ok(FileInfo {
        created_by: meta.file_metadata().created_by().map(str::to_string),
        row_groups: meta.num_row_groups(),
        bytes_on_disk: std::fs::metadata(path)?.len(),
        columns,
    })
}

/// Validate the store and summarise it.
pub fn inspect(path: &Path) -> Result<StoreStats> {
    let snap = read_store(path)?;
    let mut stats = StoreStats::from_snapshot(&snap);
    stats.file = Some(file_info(path)?);
    Ok(stats)
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Store ===")?;
        writeln!(f, "Rows:                 {}", self.rows)?;
        writeln!(f, "Counties:             {}", self.counties)?;
        let years = match (self.years.first(), self.years.last()) {
            (Some(a), Some(b)) => format!("{}..={} ({} years)", a, b, self.years.len()),
            _ => "<none>".into(),
        };
        writeln!(f, "Years:                {}", years)?;
        writeln!(
            f,
            "Thresholds:           high_agency >= {}, balanced >= {}",
            self.thresholds.high_agency_min, self.thresholds.balanced_min
        )?;
        writeln!(f)?;

        writeln!(f, "=== Tiers ===")?;
        for (tier, n) in &self.by_tier {
            writeln!(f, "- {:<16} {}", tier.as_str(), n)?;
        }
        writeln!(f)?;

        writeln!(f, "=== Columns ===")?;
        for c in &self.columns {
            writeln!(
                f,
                "- {:<16} | min {:>16.4} | max {:>16.4} | mean {:>16.4}",
                c.name, c.min, c.max, c.mean
            )?;
        }

        if let Some(file) = &self.file {
            writeln!(f)?;
            writeln!(f, "=== File ===")?;
            let created_by = file.created_by.as_deref().unwrap_or("<unknown>");
            writeln!(f, "Created by:           {}", created_by)?;
            writeln!(f, "Row groups:           {}", file.row_groups)?;
            writeln!(f, "Size on disk:         {} bytes", file.bytes_on_disk)?;
            for (name, compression, size) in &file.columns {
                writeln!(f, "- {:<16} | {:<8} | {} bytes", name, compression, size)?;
            }
        }
        Ok(())
    }
}
