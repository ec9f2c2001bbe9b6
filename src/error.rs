//! Error types for the capod service.
//!
//! This module defines the crate-wide error type covering Bluetooth, D-Bus,
//! I/O and configuration failures.

use thiserror::Error;

/// Main error type for the capod service.
#[derive(Error, Debug)]
pub enum CapodError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Invalid address: {0}")]
   InvalidAddress(String),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Monitor has been shut down")]
   MonitorShutdown,

   #[error("Monitor is already running")]
   AlreadyMonitoring,

   #[error("Scanner stopped: {0}")]
   ScannerStopped(String),
}

/// Convenience type alias for Results with `CapodError`.
pub type Result<T> = std::result::Result<T, CapodError>;
