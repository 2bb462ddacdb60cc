pub mod config;
pub mod ethereum;
pub mod face;
pub mod telemetry;
