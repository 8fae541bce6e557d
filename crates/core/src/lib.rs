pub mod drain;
pub mod signal;
pub mod telemetry;
