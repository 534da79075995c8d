// src/schema/arrow.rs

use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema};
use std::sync::Arc;

/// Store columns, in order. Renaming or reordering these breaks every reader.
pub static STORE_COLUMNS: [(&str, DataType); 8] = [
    ("county_id", DataType::Utf8),
    ("year", DataType::Int32),
    ("wage_income", DataType::Float64),
    ("property_income", DataType::Float64),
    ("transfer_income", DataType::Float64),
    ("total_income", DataType::Float64),
    ("eai", DataType::Float64),
    ("stress_tier", DataType::Utf8),
];

/// Parquet key/value metadata keys carrying the build thresholds.
pub const META_HIGH_AGENCY_MIN: &str = "eai.high_agency_min";
pub const META_BALANCED_MIN: &str = "eai.balanced_min";

pub fn column_names() -> Vec<&'static str> {
    STORE_COLUMNS.iter().map(|(name, _)| *name).collect()
}

/// Build the store ArrowSchema (inside an Arc).
pub fn store_schema() -> Arc<ArrowSchema> {
    let fields: Vec<ArrowField> = STORE_COLUMNS
        .iter()
        .map(|(name, dt)| ArrowField::new(*name, dt.clone(), /* nullable = */ false))
        .collect();

    Arc::new(ArrowSchema::new(fields))
}

/// Compare a schema read from disk against the store contract.
/// Returns a description of the first difference.
pub fn check_store_schema(found: &ArrowSchema) -> Result<(), String> {
    let fields = found.fields();
    if fields.len() != STORE_COLUMNS.len() {
        return Err(format!(
            "expected {} columns, found {}",
            STORE_COLUMNS.len(),
            fields.len()
        ));
    }
    for (idx, (field, (name, dt))) in fields.iter().zip(STORE_COLUMNS.iter()).enumerate() {
        if field.name() != name {
            return Err(format!(
                "column {} is `{}`, expected `{}`",
                idx,
                field.name(),
                name
            ));
        }
        if field.data_type() != dt {
            return Err(format!(
                "column `{}` has type {:?}, expected {:?}",
                name,
                field.data_type(),
                dt
            ));
        }
    }
    Ok(())
}
