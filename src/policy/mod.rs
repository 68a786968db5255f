//! Policy test orchestration.
//!
//! This module provides the [`Engine`] that runs routing-policy tests and
//! one procedure per policy type:
//! - Weighted distribution sampling and validation
//! - Geolocation and latency verification protocols
//! - Failover state classification
//! - IP-based and multivalue-answer checks

pub mod context;
pub mod engine;
pub mod failover;
pub mod geolocation;
pub mod ip_based;
pub mod latency;
pub mod multivalue;
pub mod protocol;
pub mod report;
pub mod weighted;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{Collaborators, RunContext};
pub use engine::{execute, Engine, TestHandle, TestObserver};
pub use failover::FailoverState;
pub use report::ReportBuilder;
