//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the port interfaces the engine is written against
//! and the services that depend on nothing but those ports.

/// Port interfaces for external systems (transport, dialect, REST).
pub mod ports;

/// Application services for symbol caching and resolution.
pub mod services;
