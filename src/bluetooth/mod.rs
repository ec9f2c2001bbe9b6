//! Bluetooth side of the service.
//!
//! The scanner turns BlueZ advertisement updates into monitor input; the
//! control layer decides when the scanner runs.

pub mod control;
pub mod scanner;
