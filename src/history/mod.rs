// src/history/mod.rs

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};

use crate::index::Thresholds;

/// One successful `build`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildRun {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub source: String,
    pub rows_written: u64,
    pub excluded: u64,
    pub high_agency_min: f64,
    pub balanced_min: f64,
}

impl BuildRun {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            high_agency_min: self.high_agency_min,
            balanced_min: self.balanced_min,
        }
    }
}

fn history_schema() -> Schema {
    let ts = DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()));
    Schema::new(vec![
        Field::new("started", ts.clone(), false),
        Field::new("finished", ts, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("rows_written", DataType::UInt64, false),
        Field::new("excluded", DataType::UInt64, false),
        Field::new("high_agency_min", DataType::Float64, false),
        Field::new("balanced_min", DataType::Float64, false),
    ])
}

/// Build log backed by one single-row Parquet file per run.
pub struct History {
    history_dir: PathBuf,
}

impl History {
    /// Construct a History at `history_dir`, creating the directory if needed.
    pub fn new(history_dir: impl Into<PathBuf>) -> Result<Self> {
        let history_dir = history_dir.into();
        fs::create_dir_all(&history_dir)
            .with_context(|| format!("creating history directory {:?}", &history_dir))?;
        Ok(Self { history_dir })
    }

    /// Open an existing history without creating anything; a missing
    /// directory simply has no runs.
    pub fn open(history_dir: impl Into<PathBuf>) -> Self {
        Self {
            history_dir: history_dir.into(),
        }
    }

    /// Writes `build_<finished µs>.parquet`.
    pub fn record_build(&self, run: &BuildRun) -> Result<PathBuf> {
        let ts = run.finished.timestamp_micros();
        let path = self.history_dir.join(format!("build_{}.parquet", ts));

        let schema = Arc::new(history_schema());
        let utc = |v: i64| TimestampMicrosecondArray::from_iter_values([v]).with_timezone("UTC");
        let columns: Vec<ArrayRef> = vec![
            Arc::new(utc(run.started.timestamp_micros())),
            Arc::new(utc(ts)),
            Arc::new(StringArray::from(vec![run.source.clone()])),
            Arc::new(UInt64Array::from(vec![run.rows_written])),
            Arc::new(UInt64Array::from(vec![run.excluded])),
            Arc::new(Float64Array::from(vec![run.high_agency_min])),
            Arc::new(Float64Array::from(vec![run.balanced_min])),
        ];
        let batch =
            RecordBatch::try_new(schema.clone(), columns).context("building history record batch")?;

        let file =
            File::create(&path).with_context(|| format!("creating history file {:?}", &path))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(file, schema, Some(props))
            .context("creating Arrow writer for history")?;
        writer.write(&batch).context("writing history batch")?;
        writer.close().context("closing history writer")?;
        debug!(path = %path.display(), "recorded build");
        Ok(path)
    }

    /// All recorded builds, oldest first. Unreadable files are skipped
    /// with a warning.
    pub fn load_builds(&self) -> Result<Vec<BuildRun>> {
        let pattern = format!("{}/build_*.parquet", self.history_dir.display());
        let mut runs = Vec::new();
        for entry in glob(&pattern)? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!("unreadable history entry: {}", e);
                    continue;
                }
            };
            match read_run(&path) {
                Ok(mut found) => runs.append(&mut found),
                Err(e) => warn!(path = %path.display(), "skipping history file: {:#}", e),
            }
        }
        runs.sort_by_key(|r| r.finished);
        Ok(runs)
    }

    pub fn last_build(&self) -> Result<Option<BuildRun>> {
        Ok(self.load_builds()?.pop())
    }
}

fn read_run(path: &Path) -> Result<Vec<BuildRun>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch?;
        let col = |name: &str| {
            batch
                .column_by_name(name)
                .with_context(|| format!("history file lacks `{}`", name))
        };
        let started = downcast::<TimestampMicrosecondArray>(col("started")?)?;
        let finished = downcast::<TimestampMicrosecondArray>(col("finished")?)?;
        let source = downcast::<StringArray>(col("source")?)?;
        let rows = downcast::<UInt64Array>(col("rows_written")?)?;
        let excluded = downcast::<UInt64Array>(col("excluded")?)?;
        let high = downcast::<Float64Array>(col("high_agency_min")?)?;
        let balanced = downcast::<Float64Array>(col("balanced_min")?)?;

        for i in 0..batch.num_rows() {
            let at = |v: i64| {
                DateTime::<Utc>::from_timestamp_micros(v)
                    .with_context(|| format!("timestamp {} out of range", v))
            };
            out.push(BuildRun {
                started: at(started.value(i))?,
                finished: at(finished.value(i))?,
                source: source.value(i).to_string(),
                rows_written: rows.value(i),
                excluded: excluded.value(i),
                high_agency_min: high.value(i),
                balanced_min: balanced.value(i),
            });
        }
    }
    Ok(out)
}

fn downcast<T: 'static>(array: &ArrayRef) -> Result<&T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .context("history column has unexpected type")
}
