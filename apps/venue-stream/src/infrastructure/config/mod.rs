//! Configuration Module
//!
//! Environment-driven configuration for the engine and its runner.

mod settings;

pub use settings::{ConfigError, StreamConfig, StreamSettings, VenueSettings};
