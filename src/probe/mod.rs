//! Probe execution: one outbound HTTP(S) check against a service definition.

mod executor;

pub use executor::{ProbeError, ProbeExecutor};
