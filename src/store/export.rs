// src/store/export.rs

use anyhow::{anyhow, Context, Result};
use std::{
    fmt,
    fs,
    io::{Read, Write},
    path::Path,
    str::FromStr,
};
use tempfile::NamedTempFile;
use tracing::info;

use super::write_store;
use crate::error::EaiError;
use crate::index::Thresholds;
use crate::schema::{column_names, EconomicAgencyRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Parquet,
}

impl ExportFormat {
    /// Guess from a file extension; anything but `.parquet` is CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => ExportFormat::Parquet,
            _ => ExportFormat::Csv,
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "parquet" => Ok(ExportFormat::Parquet),
            other => Err(format!("unknown export format `{}` (csv|parquet)", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
        })
    }
}

/// Write rows as CSV with the store columns as header, in store order.
pub fn write_csv<W: Write>(out: W, rows: &[&EconomicAgencyRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    if rows.is_empty() {
        // serde only emits the header alongside the first row
        wtr.write_record(column_names())?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read CSV written by [`write_csv`]. The header must name exactly the store
/// columns (any order) and every row must agree with its components.
pub fn read_csv<R: Read>(input: R) -> Result<Vec<EconomicAgencyRecord>> {
    let mut rdr = csv::Reader::from_reader(input);

    let mut got: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut want: Vec<String> = column_names().into_iter().map(String::from).collect();
    got.sort();
    want.sort();
    if got != want {
        return Err(EaiError::SchemaMismatch(format!(
            "export columns {:?} differ from store columns {:?}",
            got, want
        ))
        .into());
    }

    let mut out = Vec::new();
    for (i, row) in rdr.deserialize::<EconomicAgencyRecord>().enumerate() {
        let rec = row.with_context(|| format!("parsing export row {}", i + 1))?;
        if !rec.is_consistent() {
            return Err(anyhow!(
                "export row {} ({}/{}) disagrees with its components",
                i + 1,
                rec.county_id,
                rec.year
            ));
        }
        out.push(rec);
    }
    Ok(out)
}

/// Write selected stored rows to `path`. Parquet output is a valid store
/// carrying `thresholds`; CSV keeps the given row order.
#[tracing::instrument(level = "info", skip(rows, thresholds), fields(path = %path.display(), rows = rows.len()))]
pub fn export(
    path: &Path,
    rows: &[&EconomicAgencyRecord],
    format: ExportFormat,
    thresholds: &Thresholds,
) -> Result<()> {
    match format {
        ExportFormat::Parquet => {
            let owned: Vec<EconomicAgencyRecord> = rows.iter().map(|r| (*r).clone()).collect();
            write_store(path, &owned, thresholds)?;
        }
        ExportFormat::Csv => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            let mut tmp = NamedTempFile::new_in(dir)?;
            write_csv(tmp.as_file_mut(), rows)?;
            tmp.persist(path)
                .with_context(|| format!("replacing {}", path.display()))?;
        }
    }
    info!(%format, "export written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::store::read_store;
    use crate::store::tests::{sample_records, scored};
    use anyhow::Result;

    #[test]
    fn csv_export_then_import_is_identical() -> Result<()> {
        let mut records = sample_records();
        // values that need every digit to survive
        records.push(scored("06037", 2021, 1.0 / 3.0, 2.0 / 7.0, 0.1));
        let refs: Vec<&EconomicAgencyRecord> = records.iter().collect();

        let mut buf = Vec::new();
        write_csv(&mut buf, &refs)?;
        let text = String::from_utf8(buf.clone())?;
        assert!(text.starts_with(
            "county_id,year,wage_income,property_income,transfer_income,total_income,eai,stress_tier\n"
        ));
        assert!(text.contains("high_dependency"));

        assert_eq!(read_csv(buf.as_slice())?, records);
        Ok(())
    }

    #[test]
    fn empty_export_still_has_a_header() -> Result<()> {
        let mut buf = Vec::new();
        write_csv(&mut buf, &[])?;
        assert!(read_csv(buf.as_slice())?.is_empty());
        Ok(())
    }

    #[test]
    fn import_rejects_foreign_columns_and_tampered_rows() {
        let err = read_csv("fips,eai\n01001,0.5\n".as_bytes()).unwrap_err();
        assert!(matches!(classify(&err), Some(EaiError::SchemaMismatch(_))));

        let tampered = "county_id,year,wage_income,property_income,transfer_income,total_income,eai,stress_tier\n\
                        01001,2023,600,300,100,1000,0.9,high_agency\n";
        assert!(read_csv(tampered.as_bytes()).is_err());
    }

    #[test]
    fn import_rejects_negative_and_non_finite_components() {
        let header = "county_id,year,wage_income,property_income,transfer_income,total_income,eai,stress_tier\n";
        // the ratio and total agree, but property income is negative
        let negative = format!("{}01001,2023,5,-1,1,5,1,high_agency\n", header);
        assert!(read_csv(negative.as_bytes()).is_err());

        let nan = format!("{}01001,2023,5,NaN,1,6,0.8333333333333334,high_agency\n", header);
        assert!(read_csv(nan.as_bytes()).is_err());

        let fine = format!("{}01001,2023,5,0,0,5,1,high_agency\n", header);
        assert!(read_csv(fine.as_bytes()).is_ok());
    }

    #[test]
    fn parquet_export_is_a_readable_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("subset.parquet");
        let records = sample_records();
        let subset: Vec<&EconomicAgencyRecord> =
            records.iter().filter(|r| r.year == 2023).collect();

        assert_eq!(ExportFormat::from_path(&path), ExportFormat::Parquet);
        export(&path, &subset, ExportFormat::Parquet, &Thresholds::default())?;
        let snap = read_store(&path)?;
        assert_eq!(snap.records.len(), 3);
        assert!(snap.records.iter().all(|r| r.year == 2023));
        Ok(())
    }

    #[test]
    fn csv_export_to_file_keeps_row_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out/subset.csv");
        let records = sample_records();
        let refs: Vec<&EconomicAgencyRecord> = records.iter().rev().collect();

        export(&path, &refs, "CSV".parse().map_err(anyhow::Error::msg)?, &Thresholds::default())?;
        let back = read_csv(fs::File::open(&path)?)?;
        let want: Vec<EconomicAgencyRecord> = records.into_iter().rev().collect();
        assert_eq!(back, want);
        Ok(())
    }
}
