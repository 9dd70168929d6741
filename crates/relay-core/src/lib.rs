//! Plumbing shared by relay binaries: configuration, clocks and tracing.

pub mod config;
pub mod time;
pub mod tracing;
