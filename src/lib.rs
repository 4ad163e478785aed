//! atm_watch Library
//!
//! Headless ATM camera monitoring: frame-by-frame anomaly detection against a
//! detection endpoint, a camera blackout watchdog, and alert fan-out to a local
//! alert log, desktop notifications and email.
//!
//! ## Architecture
//!
//! The codebase is organized into modules:
//! - `logging`: Structured logging with tracing
//! - `config`: Paths, build info, runtime-mutable monitor settings and the config watcher
//! - `alerts`: Alert records, the persistent alert log, channels and fan-out
//! - `monitors`: Frame sources, the detection loop and the blackout watchdog
//! - `commands`: Command-line handlers
//!
//! ## Main Entry Point
//!
//! - `commands::run()`: Execute one parsed command

pub mod alerts;
pub mod commands;
pub mod config;
mod logging;
pub mod monitors;

#[cfg(test)]
mod testing;

pub use logging::{ellipse, init_tracing};
