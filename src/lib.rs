//! Proxy Sieve - concurrent HTTP proxy validator
//!
//! Runs every proxy of a harvested list through a sequence of network
//! probes on a bounded worker pool and keeps the ones that answer fast
//! enough.

pub mod config;
pub mod console;
pub mod proxy;
pub mod tui;

pub use config::Settings;
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
