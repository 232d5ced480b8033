//! Runtime bootstrap for the operational binary.

pub mod error;
pub mod telemetry;
