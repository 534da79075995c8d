pub mod arrow;
pub mod types;

pub use arrow::{check_store_schema, column_names, store_schema, STORE_COLUMNS};
pub use types::{CountyIncomeRecord, EconomicAgencyRecord};
