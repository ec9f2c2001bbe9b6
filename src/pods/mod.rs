//! Decoding of AirPods and Beats advertisements.
//!
//! Advertisements flow through the Apple continuity and proximity pairing
//! decoders into [`apple::factory::DeviceFactory`], which resolves identity
//! and produces [`device::PodDevice`] snapshots.

use std::{fmt, time::Instant};

use bluer::Address;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

pub mod apple;
pub mod device;
pub mod nibble;
pub mod recognition;

/// Raw manufacturer data, sized for a proximity pairing record.
pub type Packet = SmallVec<[u8; 32]>;

/// One BLE advertisement as handed over by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
   pub address: Address,
   /// Signal strength in dBm.
   pub rssi: i16,
   /// Monotonic receive time.
   pub received_at: Instant,
   /// Apple manufacturer data, company id already stripped.
   pub manufacturer_data: Packet,
}

impl Advertisement {
   pub fn new(address: Address, rssi: i16, received_at: Instant, data: &[u8]) -> Self {
      Self {
         address,
         rssi,
         received_at,
         manufacturer_data: Packet::from_slice(data),
      }
   }
}

/// Stable identity of a physical accessory, independent of its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodId(Uuid);

impl PodId {
   pub fn random() -> Self {
      Self(uuid::Builder::from_random_bytes(rand::random()).into_uuid())
   }
}

impl fmt::Display for PodId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      fmt::Display::fmt(&self.0, f)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_random_ids_differ() {
      let a = PodId::random();
      let b = PodId::random();
      assert_ne!(a, b);
      assert_eq!(a.0.get_version_num(), 4);
   }
}
