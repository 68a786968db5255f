//! Configuration module.
//!
//! This module provides the engine settings and the functionality for
//! loading settings and test plans from various sources.

pub mod loader;
pub mod settings;

pub use loader::ConfigLoader;
pub use settings::{EngineSettings, PublicResolver, TestSubnet};
