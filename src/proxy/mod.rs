//! Proxy validation pipeline
//!
//! This module provides functionality for:
//! - Loading and de-duplicating raw proxy lists
//! - Probing proxies (anonymity, host latency, ping, throughput)
//! - Aggregating probe outcomes into a verdict
//! - Validating many proxies concurrently and persisting the good ones

pub mod coordinator;
pub mod loader;
pub mod models;
pub mod ping;
pub mod probe;
pub mod validator;
pub mod verdict;

pub use coordinator::{Coordinator, OutputSink, PoolError, RunState, SharedState};
pub use loader::ProxyLoader;
pub use models::{
    AddressError, CheckEvent, CheckReport, ProbeFailure, ProbeOutcome, Progress, ProxyAddress,
    RunSummary,
};
pub use probe::{HttpProber, PingSwitch, ProbeConfig, Prober};
pub use validator::Validator;
pub use verdict::{aggregate, ProbeOutcomes, ScoringPolicy, Verdict, VerdictStatus};
