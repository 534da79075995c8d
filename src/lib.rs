pub mod config;
pub mod error;
pub mod fetch;
pub mod geography;
pub mod history;
pub mod index;
pub mod pipeline;
pub mod process;
pub mod schema;
pub mod serve;
pub mod store;

pub use config::Config;
pub use error::EaiError;
pub use index::{StressTier, Thresholds};
pub use schema::{CountyIncomeRecord, EconomicAgencyRecord};
