//! Process configuration.
//!
//! Loaded once at startup from `mvno.toml` plus environment overrides and
//! passed by reference into every component. Missing Widely credentials are
//! a fatal startup error.

pub mod schema;

pub use schema::{
    Config, ConfigError, Environment, GatewayConfig, SchedulerConfig, StoreConfig, WidelyConfig,
    DEFAULT_CONFIG_FILE,
};
