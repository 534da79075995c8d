// src/store/mod.rs
pub mod export;
pub mod inspect;
pub mod query;

pub use export::{export, read_csv, write_csv, ExportFormat};
pub use query::{QueryRow, SortOrder, StoreQuery};

use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef, Float64Array, Int32Array, StringArray},
    record_batch::RecordBatch,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use std::{
    collections::{BTreeSet, HashMap},
    fs::{self, File},
    io::Write,
    path::Path,
    sync::Arc,
};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::EaiError;
use crate::index::{StressTier, Thresholds};
use crate::schema::arrow::{META_BALANCED_MIN, META_HIGH_AGENCY_MIN};
use crate::schema::{check_store_schema, store_schema, EconomicAgencyRecord};

/// An immutable, fully validated copy of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    /// Ordered by (county_id, year).
    pub records: Vec<EconomicAgencyRecord>,
    /// Thresholds the stored `stress_tier` values were computed with.
    pub thresholds: Thresholds,
}

impl StoreSnapshot {
    pub fn years(&self) -> Vec<i32> {
        let years: BTreeSet<i32> = self.records.iter().map(|r| r.year).collect();
        years.into_iter().collect()
    }

    pub fn latest_year(&self) -> Option<i32> {
        self.records.iter().map(|r| r.year).max()
    }
}

fn sort_records(records: &mut [EconomicAgencyRecord]) {
    records.sort_by(|a, b| a.county_id.cmp(&b.county_id).then(a.year.cmp(&b.year)));
}

pub(crate) fn to_record_batch(records: &[EconomicAgencyRecord]) -> Result<RecordBatch> {
    let schema = store_schema();
    let f64_col = |f: fn(&EconomicAgencyRecord) -> f64| -> ArrayRef {
        Arc::new(Float64Array::from_iter_values(records.iter().map(f)))
    };
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.county_id.as_str()),
        )),
        Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.year))),
        f64_col(|r| r.wage_income),
        f64_col(|r| r.property_income),
        f64_col(|r| r.transfer_income),
        f64_col(|r| r.total_income),
        f64_col(|r| r.eai),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.stress_tier.as_str()),
        )),
    ];

    RecordBatch::try_new(schema, columns).context("building store record batch")
}

/// Thresholds go into the Parquet footer as an ordered key/value list, so
/// identical builds give identical bytes.
fn threshold_metadata(thresholds: &Thresholds) -> Vec<KeyValue> {
    vec![
        KeyValue::new(
            META_HIGH_AGENCY_MIN.to_string(),
            thresholds.high_agency_min.to_string(),
        ),
        KeyValue::new(
            META_BALANCED_MIN.to_string(),
            thresholds.balanced_min.to_string(),
        ),
    ]
}

/// Write `records` to `path` as Parquet. The file is written next to the
/// target and renamed over it, so readers see either the old store or the
/// new one.
#[tracing::instrument(level = "info", skip(records, thresholds), fields(path = %path.display(), rows = records.len()))]
pub fn write_store(
    path: &Path,
    records: &[EconomicAgencyRecord],
    thresholds: &Thresholds,
) -> Result<()> {
    let staged = stage_store(path, records, thresholds)?;
    staged
        .persist(path)
        .with_context(|| format!("replacing store {}", path.display()))?;
    info!("store written");
    Ok(())
}

/// Write the store into a temporary file beside `path` without touching
/// `path` itself. Persist the returned file to publish it.
pub fn stage_store(
    path: &Path,
    records: &[EconomicAgencyRecord],
    thresholds: &Thresholds,
) -> Result<NamedTempFile> {
    let mut sorted = records.to_vec();
    sort_records(&mut sorted);
    let batch = to_record_batch(&sorted)?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary store in {}", dir.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(threshold_metadata(thresholds)))
        .build();
    {
        let mut writer = ArrowWriter::try_new(tmp.as_file_mut(), batch.schema(), Some(props))
            .context("creating Arrow writer for store")?;
        writer.write(&batch).context("writing store batch")?;
        writer.close().context("closing store writer")?;
    }
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, idx: usize, path: &Path) -> Result<&'a T> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| {
            anyhow::Error::from(EaiError::store_corrupt(
                path,
                format!("column {} has unexpected layout", idx),
            ))
        })
}

fn stored_thresholds(metadata: &HashMap<String, String>, path: &Path) -> Result<Thresholds> {
    let read = |key: &str| -> Result<Option<f64>> {
        metadata
            .get(key)
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|e| {
                        anyhow::Error::from(EaiError::store_corrupt(
                            path,
                            format!("{} = {:?}: {}", key, v, e),
                        ))
                    })
            })
            .transpose()
    };
    match (read(META_HIGH_AGENCY_MIN)?, read(META_BALANCED_MIN)?) {
        (Some(high), Some(balanced)) => {
            Thresholds::new(high, balanced).map_err(|e| EaiError::store_corrupt(path, e).into())
        }
        _ => {
            warn!(path = %path.display(), "store carries no threshold metadata; assuming defaults");
            Ok(Thresholds::default())
        }
    }
}

/// Read and validate the whole store.
///
/// Fails with `StoreMissing` if there is no file and `StoreCorrupt` if the
/// columns differ from the contract or any row is internally inconsistent.
#[tracing::instrument(level = "info", skip(path), fields(path = %path.display()))]
pub fn read_store(path: &Path) -> Result<StoreSnapshot> {
    if !path.is_file() {
        return Err(EaiError::StoreMissing(path.to_path_buf()).into());
    }
    let file = File::open(path).with_context(|| format!("opening store {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| EaiError::store_corrupt(path, e))?;

    let schema = builder.schema().clone();
    check_store_schema(&schema).map_err(|reason| EaiError::store_corrupt(path, reason))?;
    // footer key/values first, then anything carried in the Arrow schema
    let mut metadata: HashMap<String, String> = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .into_iter()
        .flatten()
        .filter_map(|kv| kv.value.clone().map(|v| (kv.key.clone(), v)))
        .collect();
    for (k, v) in schema.metadata() {
        metadata.entry(k.clone()).or_insert_with(|| v.clone());
    }
    let thresholds = stored_thresholds(&metadata, path)?;

    let reader = builder
        .with_batch_size(8192)
        .build()
        .map_err(|e| EaiError::store_corrupt(path, e))?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| EaiError::store_corrupt(path, e))?;
        let ids = column::<StringArray>(&batch, 0, path)?;
        let years = column::<Int32Array>(&batch, 1, path)?;
        let wage = column::<Float64Array>(&batch, 2, path)?;
        let property = column::<Float64Array>(&batch, 3, path)?;
        let transfer = column::<Float64Array>(&batch, 4, path)?;
        let total = column::<Float64Array>(&batch, 5, path)?;
        let eai = column::<Float64Array>(&batch, 6, path)?;
        let tiers = column::<StringArray>(&batch, 7, path)?;

        for i in 0..batch.num_rows() {
            let cols: [&dyn Array; 8] = [ids, years, wage, property, transfer, total, eai, tiers];
            if cols.iter().any(|c| c.is_null(i)) {
                let reason = format!("null value in row {}", i);
                return Err(EaiError::store_corrupt(path, reason).into());
            }
            let stress_tier: StressTier = tiers
                .value(i)
                .parse()
                .map_err(|e: String| EaiError::store_corrupt(path, e))?;
            let rec = EconomicAgencyRecord {
                county_id: ids.value(i).to_string(),
                year: years.value(i),
                wage_income: wage.value(i),
                property_income: property.value(i),
                transfer_income: transfer.value(i),
                total_income: total.value(i),
                eai: eai.value(i),
                stress_tier,
            };
            if !rec.is_consistent() || thresholds.classify(rec.eai) != rec.stress_tier {
                return Err(EaiError::store_corrupt(
                    path,
                    format!(
                        "row {} {}/{} disagrees with its components",
                        i, rec.county_id, rec.year
                    ),
                )
                .into());
            }
            records.push(rec);
        }
    }

    debug!(rows = records.len(), "store loaded");
    Ok(StoreSnapshot {
        records,
        thresholds,
    })
}

/// Combine a fresh build with the current store. Rows for `rebuilt_years`
/// come only from `fresh`; all other years are carried over and re-tiered
/// with `thresholds` so the whole file agrees with one set of cut points.
pub fn merge_years(
    existing: Vec<EconomicAgencyRecord>,
    fresh: Vec<EconomicAgencyRecord>,
    rebuilt_years: &BTreeSet<i32>,
    thresholds: &Thresholds,
) -> Vec<EconomicAgencyRecord> {
    let mut merged: Vec<EconomicAgencyRecord> = existing
        .into_iter()
        .filter(|r| !rebuilt_years.contains(&r.year))
        .map(|mut r| {
            r.stress_tier = thresholds.classify(r.eai);
            r
        })
        .collect();
    merged.extend(fresh);
    sort_records(&mut merged);
    merged
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::classify;
    use crate::index::score_record;
    use crate::schema::CountyIncomeRecord;
    use anyhow::Result;

    pub(crate) fn scored(county: &str, year: i32, w: f64, p: f64, t: f64) -> EconomicAgencyRecord {
        let rec = CountyIncomeRecord {
            county_id: county.into(),
            year,
            wage_income: w,
            property_income: p,
            transfer_income: t,
        };
        score_record(&rec, &Thresholds::default()).expect("scorable test record")
    }

    pub(crate) fn sample_records() -> Vec<EconomicAgencyRecord> {
        vec![
            scored("01003", 2023, 200.0, 300.0, 500.0),
            scored("01001", 2023, 600.0, 300.0, 100.0),
            scored("01001", 2022, 400.0, 300.0, 300.0),
            scored("02013", 2023, 123_456_789.0, 23_456_789.0, 3_456_789.0),
        ]
    }

    pub(crate) fn sample_snapshot() -> StoreSnapshot {
        let mut records = sample_records();
        sort_records(&mut records);
        StoreSnapshot {
            records,
            thresholds: Thresholds::default(),
        }
    }

    #[test]
    fn write_then_read_gives_sorted_identical_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("triage.parquet");
        write_store(&path, &sample_records(), &Thresholds::default())?;

        let snap = read_store(&path)?;
        assert_eq!(snap, sample_snapshot());
        assert_eq!(snap.years(), vec![2022, 2023]);
        assert_eq!(snap.latest_year(), Some(2023));
        // nothing but the store is left in the directory
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn thresholds_travel_with_the_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("triage.parquet");
        let t = Thresholds::new(0.5, 0.3)?;
        let records: Vec<_> = sample_records()
            .into_iter()
            .map(|mut r| {
                r.stress_tier = t.classify(r.eai);
                r
            })
            .collect();
        write_store(&path, &records, &t)?;
        assert_eq!(read_store(&path)?.thresholds, t);
        Ok(())
    }

    #[test]
    fn missing_store_is_reported_as_missing() {
        let err = read_store(Path::new("/nonexistent/triage.parquet")).unwrap_err();
        assert!(matches!(classify(&err), Some(EaiError::StoreMissing(_))));
        assert!(err.to_string().contains("build"));
    }

    #[test]
    fn foreign_files_are_corrupt_stores() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let garbage = dir.path().join("garbage.parquet");
        fs::write(&garbage, b"not parquet at all")?;
        let err = read_store(&garbage).unwrap_err();
        assert!(matches!(classify(&err), Some(EaiError::StoreCorrupt { .. })));

        // a valid parquet file with the wrong columns
        let other = dir.path().join("other.parquet");
        let schema = Arc::new(arrow::datatypes::Schema::new(vec![
            arrow::datatypes::Field::new("fips", arrow::datatypes::DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec!["01001"])) as ArrayRef],
        )?;
        let mut writer = ArrowWriter::try_new(File::create(&other)?, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;
        let err = read_store(&other).unwrap_err();
        assert!(matches!(classify(&err), Some(EaiError::StoreCorrupt { .. })));
        Ok(())
    }

    #[test]
    fn drifted_index_is_detected_on_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("triage.parquet");
        let mut records = sample_records();
        records[0].eai = 0.99;
        write_store(&path, &records, &Thresholds::default())?;
        let err = read_store(&path).unwrap_err();
        assert!(matches!(classify(&err), Some(EaiError::StoreCorrupt { .. })));
        Ok(())
    }

    #[test]
    fn negative_components_are_corrupt_even_with_a_valid_ratio() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("triage.parquet");
        let bad = EconomicAgencyRecord {
            county_id: "01001".into(),
            year: 2023,
            wage_income: 5.0,
            property_income: -1.0,
            transfer_income: 1.0,
            total_income: 5.0,
            eai: 1.0,
            stress_tier: StressTier::HighAgency,
        };
        write_store(&path, &[bad], &Thresholds::default())?;
        let err = read_store(&path).unwrap_err();
        assert!(matches!(classify(&err), Some(EaiError::StoreCorrupt { .. })));
        Ok(())
    }

    #[test]
    fn identical_input_gives_identical_bytes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (a, b) = (dir.path().join("a.parquet"), dir.path().join("b.parquet"));
        let t = Thresholds::new(0.55, 0.3)?;
        let records: Vec<_> = sample_records()
            .into_iter()
            .map(|mut r| {
                r.stress_tier = t.classify(r.eai);
                r
            })
            .collect();
        write_store(&a, &records, &t)?;
        write_store(&b, &records, &t)?;
        assert_eq!(fs::read(&a)?, fs::read(&b)?);
        assert_eq!(read_store(&a)?.thresholds, t);
        Ok(())
    }

    #[test]
    fn staged_store_leaves_the_target_alone_until_persisted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("triage.parquet");
        let staged = stage_store(&path, &sample_records(), &Thresholds::default())?;
        assert!(!path.exists());
        staged.persist(&path)?;
        assert_eq!(read_store(&path)?, sample_snapshot());
        Ok(())
    }

    #[test]
    fn merge_replaces_rebuilt_years_only() {
        let existing = sample_records();
        let fresh = vec![scored("01001", 2023, 100.0, 100.0, 800.0)];
        let rebuilt: BTreeSet<i32> = [2023].into_iter().collect();
        let strict = Thresholds::new(0.35, 0.2).unwrap();

        let merged = merge_years(existing, fresh, &rebuilt, &strict);
        let keys: Vec<_> = merged.iter().map(|r| (r.county_id.as_str(), r.year)).collect();
        assert_eq!(keys, vec![("01001", 2022), ("01001", 2023)]);
        assert_eq!(merged[1].wage_income, 100.0);
        // carried-over 2022 row (eai 0.4) re-tiered under the new cut points
        assert_eq!(merged[0].stress_tier, StressTier::HighAgency);
    }
}
