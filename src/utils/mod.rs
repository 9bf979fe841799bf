pub mod config;
pub mod logger;

pub use config::{Config, ConfigError};
pub use logger::setup_logger;
