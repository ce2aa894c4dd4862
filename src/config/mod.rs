//! Process configuration.

pub mod loader;
pub mod schema;

pub use loader::{load, ConfigError};
pub use schema::Config;
