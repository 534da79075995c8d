// src/process/mod.rs
pub mod extract;
pub mod utils;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufReader, Cursor, Read},
    path::Path,
};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::EaiError;
use utils::{clean_str, decode_latin1};

/// One source row for a line-code we care about.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub geo_fips: String,
    pub geo_name: String,
    pub line_code: u32,
    /// One cell per entry of `RawTable::years`, untouched apart from decoding.
    pub values: Vec<String>,
}

/// The wide source table, reduced to the requested line-codes.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    /// Year of each value column, in file order.
    pub years: Vec<i32>,
    pub rows: Vec<RawRow>,
}

fn is_year_header(cell: &str) -> Option<i32> {
    if cell.len() == 4 && cell.chars().all(|c| c.is_ascii_digit()) {
        cell.parse().ok()
    } else {
        None
    }
}

/// Open a ZIP and return the bytes of the entry chosen by `pick`, which sees
/// every file name in archive order and returns the one it wants.
pub fn read_zip_entry<P, F>(zip_path: P, pick: F) -> Result<(String, Vec<u8>)>
where
    P: AsRef<Path>,
    F: FnOnce(&[String]) -> Option<String>,
{
    let zip_path = zip_path.as_ref();
    let file = File::open(zip_path)
        .with_context(|| format!("Failed to open ZIP file: {:?}", zip_path))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read ZIP archive: {:?}", zip_path))?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let name = pick(&names)
        .with_context(|| format!("no suitable entry among {} in {:?}", names.len(), zip_path))?;

    let mut entry = archive
        .by_name(&name)
        .with_context(|| format!("Failed to access ZIP entry {} in {:?}", name, zip_path))?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .with_context(|| format!("Failed to read {} into memory", name))?;
    Ok((name, buf))
}

/// CAINC4 archives hold one CSV per state plus an `ALL_AREAS` file; prefer
/// the latter.
fn pick_source_csv(names: &[String]) -> Option<String> {
    let csvs: Vec<&String> = names
        .iter()
        .filter(|n| n.to_lowercase().ends_with(".csv"))
        .collect();
    csvs.iter()
        .find(|n| n.to_uppercase().contains("ALL_AREAS"))
        .or_else(|| csvs.first())
        .map(|n| n.to_string())
}

/// Load the raw table from a `.zip` or `.csv` file, keeping `line_codes` rows.
#[tracing::instrument(level = "info", skip(path, line_codes), fields(path = %path.as_ref().display()))]
pub fn load_source<P: AsRef<Path>>(path: P, line_codes: &[u32]) -> Result<RawTable> {
    let path = path.as_ref();
    let is_zip = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);

    let data = if is_zip {
        let (name, data) = read_zip_entry(path, pick_source_csv)
            .map_err(|e| EaiError::source_unavailable(path.display(), format!("{:#}", e)))?;
        info!(entry = %name, bytes = data.len(), "read source entry");
        data
    } else {
        std::fs::read(path).map_err(|e| EaiError::source_unavailable(path.display(), e))?
    };

    parse_source_table(Cursor::new(data), line_codes)
}

/// Parse the wide CSV. The first record is the header; footnote lines at the
/// end of BEA files have too few fields or no numeric line-code and are
/// skipped.
pub fn parse_source_table<R: Read>(reader: R, line_codes: &[u32]) -> Result<RawTable> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true) // footnotes have different field counts
        .from_reader(reader);
    let mut records = rdr.byte_records();

    let header: Vec<String> = match records.next() {
        Some(rec) => rec
            .map_err(|e| EaiError::source_unavailable("source table header", e))?
            .iter()
            .map(|cell| clean_str(&decode_latin1(cell)))
            .collect(),
        None => return Err(EaiError::SchemaMismatch("source table is empty".into()).into()),
    };

    let find = |name: &str| header.iter().position(|h| h.eq_ignore_ascii_case(name));
    let fips_idx = find("GeoFIPS")
        .ok_or_else(|| EaiError::SchemaMismatch("missing `GeoFIPS` column".into()))?;
    let code_idx = find("LineCode")
        .ok_or_else(|| EaiError::SchemaMismatch("missing `LineCode` column".into()))?;
    let name_idx = find("GeoName");

    let year_cols: Vec<(usize, i32)> = header
        .iter()
        .enumerate()
        .filter_map(|(i, h)| is_year_header(h).map(|y| (i, y)))
        .collect();
    if year_cols.is_empty() {
        return Err(EaiError::SchemaMismatch("no year columns in header".into()).into());
    }

    let wanted: BTreeSet<u32> = line_codes.iter().copied().collect();
    let mut seen: BTreeSet<u32> = BTreeSet::new();
    let mut table = RawTable {
        years: year_cols.iter().map(|(_, y)| *y).collect(),
        rows: Vec::new(),
    };
    let mut skipped = 0usize;

    for (idx, result) in records.enumerate() {
        let record = result
            .map_err(|e| EaiError::source_unavailable(format!("source record {}", idx + 1), e))?;

        let code = match record
            .get(code_idx)
            .and_then(|c| clean_str(&decode_latin1(c)).parse::<u32>().ok())
        {
            Some(c) => c,
            None => {
                skipped += 1;
                continue;
            }
        };
        if !wanted.contains(&code) {
            continue;
        }
        seen.insert(code);

        let cell = |i: usize| record.get(i).map(decode_latin1).unwrap_or_default();
        table.rows.push(RawRow {
            geo_fips: clean_str(&cell(fips_idx)),
            geo_name: name_idx.map(|i| clean_str(&cell(i))).unwrap_or_default(),
            line_code: code,
            values: year_cols.iter().map(|(i, _)| cell(*i)).collect(),
        });
    }

    let missing: Vec<String> = wanted.difference(&seen).map(|c| c.to_string()).collect();
    if !missing.is_empty() {
        return Err(EaiError::SchemaMismatch(format!(
            "line-codes never present in source: {}",
            missing.join(", ")
        ))
        .into());
    }

    debug!(skipped, "skipped rows without a numeric line-code");
    info!(
        rows = table.rows.len(),
        first_year = table.years.first().copied().unwrap_or_default(),
        last_year = table.years.last().copied().unwrap_or_default(),
        "loaded source table"
    );
    Ok(table)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{classify, EaiError};
    use anyhow::Result;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    pub(crate) fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,agency_index=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    /// A trimmed CAINC4 extract: US and state totals, three counties, one
    /// suppressed cell and the usual footnotes.
    pub(crate) const SAMPLE_CAINC4: &str = r#""GeoFIPS","GeoName","Region","TableName","LineCode","IndustryClassification","Description","Unit","2022","2023"
"00000","United States"," ","CAINC4","50","...","Wages and salaries","Thousands of dollars","9000000","9500000"
"01000","Alabama","5","CAINC4","50","...","Wages and salaries","Thousands of dollars","90000","95000"
" 01001","Autauga, AL","5","CAINC4","10","...","Personal income (thousands of dollars)","Thousands of dollars","3000","3100"
" 01001","Autauga, AL","5","CAINC4","50","...","Wages and salaries","Thousands of dollars","600","610"
" 01001","Autauga, AL","5","CAINC4","46","...","Dividends, interest, and rent","Thousands of dollars","300","320"
" 01001","Autauga, AL","5","CAINC4","47","...","Personal current transfer receipts","Thousands of dollars","100","70"
" 01003","Baldwin, AL","5","CAINC4","50","...","Wages and salaries","Thousands of dollars","200","(D)"
" 01003","Baldwin, AL","5","CAINC4","46","...","Dividends, interest, and rent","Thousands of dollars","300","310"
" 01003","Baldwin, AL","5","CAINC4","47","...","Personal current transfer receipts","Thousands of dollars","500","520"
" 01005","Barbour, AL","5","CAINC4","50","...","Wages and salaries","Thousands of dollars","0","0"
" 01005","Barbour, AL","5","CAINC4","46","...","Dividends, interest, and rent","Thousands of dollars","0","0"
" 01005","Barbour, AL","5","CAINC4","47","...","Personal current transfer receipts","Thousands of dollars","0","0"
"Note: See the included footnote file."
"Last updated: November 14, 2024."
"#;

    pub(crate) fn sample_zip() -> Result<NamedTempFile> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            zip.start_file("CAINC4_AL_1969_2023.csv", options)?;
            zip.write_all(b"\"GeoFIPS\",\"LineCode\",\"2023\"\n")?;
            zip.start_file("CAINC4__ALL_AREAS_1969_2023.csv", options)?;
            zip.write_all(SAMPLE_CAINC4.as_bytes())?;
            zip.start_file("CAINC4__definition.xml", options)?;
            zip.write_all(b"<xml/>")?;
            zip.finish()?;
        }
        let mut tmp = tempfile::Builder::new().suffix(".zip").tempfile()?;
        tmp.write_all(&buf)?;
        Ok(tmp)
    }

    #[test]
    fn parses_wide_table_and_keeps_only_requested_codes() -> Result<()> {
        init_test_logging();
        let table = parse_source_table(SAMPLE_CAINC4.as_bytes(), &[50, 46, 47])?;
        assert_eq!(table.years, vec![2022, 2023]);
        // line-code 10 dropped; US + state wage rows kept (filtered later)
        assert_eq!(table.rows.len(), 11);
        let autauga = &table.rows[2];
        assert_eq!(autauga.geo_fips, "01001");
        assert_eq!(autauga.geo_name, "Autauga, AL");
        assert_eq!(autauga.line_code, 50);
        assert_eq!(autauga.values, vec!["600", "610"]);
        Ok(())
    }

    #[test]
    fn loads_all_areas_entry_from_zip() -> Result<()> {
        init_test_logging();
        let zip = sample_zip()?;
        let table = load_source(zip.path(), &[50, 46, 47])?;
        assert_eq!(table.rows.len(), 11);
        Ok(())
    }

    #[test]
    fn missing_columns_or_codes_are_schema_mismatches() {
        let no_linecode = "GeoFIPS,GeoName,2023\n01001,x,5\n";
        let err = parse_source_table(no_linecode.as_bytes(), &[50]).unwrap_err();
        assert!(matches!(classify(&err), Some(EaiError::SchemaMismatch(_))));

        let no_years = "GeoFIPS,LineCode,Unit\n01001,50,x\n";
        let err = parse_source_table(no_years.as_bytes(), &[50]).unwrap_err();
        assert!(matches!(classify(&err), Some(EaiError::SchemaMismatch(_))));

        let err = parse_source_table(SAMPLE_CAINC4.as_bytes(), &[50, 46, 99]).unwrap_err();
        match classify(&err) {
            Some(EaiError::SchemaMismatch(msg)) => assert!(msg.contains("99"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }

        let err = parse_source_table("".as_bytes(), &[50]).unwrap_err();
        assert!(matches!(classify(&err), Some(EaiError::SchemaMismatch(_))));
    }

    #[test]
    fn unreadable_source_is_unavailable() {
        let err = load_source("/nonexistent/CAINC4.zip", &[50]).unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(EaiError::SourceUnavailable { .. })
        ));
        let err = load_source("/nonexistent/CAINC4.csv", &[50]).unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(EaiError::SourceUnavailable { .. })
        ));
    }
}
