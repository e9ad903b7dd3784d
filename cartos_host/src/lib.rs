// cartos_host/src/lib.rs

//! Everything needed to run mappers outside of a robot: scenario files,
//! simulated sensors, component registries and the run loop.

pub mod cli;
pub mod config;
pub mod registry;
pub mod runtime;
pub mod sources;

pub use runtime::{list_artifacts, Host, RunReport};
