//! Apple accessory protocol implementation.
//!
//! This module contains the continuity envelope decoder, the proximity
//! pairing message, the model table and the device factory.

pub mod continuity;
pub mod factory;
pub mod model;
pub mod proximity;
