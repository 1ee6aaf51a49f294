//! Data source configuration.

mod datasource;
mod error;

pub use datasource::DataSourceConfig;
pub use error::{ConfigError, ConfigResult};
