//! Configuration management

mod settings;

pub use settings::{AppConfig, WatchConfig, CONFIG_VERSION};
