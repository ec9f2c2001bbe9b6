//! Proximity Pairing messages.
//!
//! AirPods and Beats advertise their model, battery and lid state in a fixed
//! 25 byte continuity record of type `0x07`.

use std::fmt;

use log::debug;

use crate::pods::{
   apple::continuity::{self, APPLE_COMPANY_ID},
   nibble::{be_u16, hex_dump, lower_nibble, upper_nibble},
};

/// Continuity record type of proximity pairing messages.
pub const PROXIMITY_PAIRING_TYPE: u8 = 0x07;
/// Payload length of a proximity pairing message.
pub const PROXIMITY_PAIRING_LENGTH: usize = 25;
/// Record length including the `(type, length)` header.
pub const CONTINUITY_MESSAGE_LENGTH: usize = PROXIMITY_PAIRING_LENGTH + 2;

/// A validated proximity pairing message.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Message {
   pub data: [u8; PROXIMITY_PAIRING_LENGTH],
}

/// Recognition fingerprint of a message.
///
/// Left/right are not known at this point, so the pod battery nibbles are kept
/// as a sorted set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Markers {
   pub vendor: u8,
   pub length: u8,
   pub device: u16,
   pub pod_battery: heapless::Vec<u8, 2>,
   pub case_battery: u8,
   pub device_color: u8,
}

impl Message {
   pub const fn kind(&self) -> u8 {
      PROXIMITY_PAIRING_TYPE
   }

   pub const fn length(&self) -> usize {
      PROXIMITY_PAIRING_LENGTH
   }

   /// Model code, bytes 1 and 2 big-endian.
   pub const fn device_model(&self) -> u16 {
      be_u16(self.data[1], self.data[2])
   }

   /// Byte 1 alone, which is all that tells some models apart.
   pub const fn device_model_dirty(&self) -> u8 {
      self.data[1]
   }

   pub fn markers(&self) -> Markers {
      let pods = self.data[4];
      let mut pod_battery: heapless::Vec<u8, 2> = heapless::Vec::new();
      for nibble in [upper_nibble(pods), lower_nibble(pods)] {
         if !pod_battery.contains(&nibble) {
            // capacity is two and at most two distinct values are pushed
            let _ = pod_battery.push(nibble);
         }
      }
      pod_battery.sort_unstable();

      Markers {
         vendor: PROXIMITY_PAIRING_TYPE,
         length: PROXIMITY_PAIRING_LENGTH as u8,
         device: self.device_model(),
         pod_battery,
         case_battery: lower_nibble(self.data[5]),
         device_color: self.data[7],
      }
   }
}

impl fmt::Debug for Message {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(
         f,
         "ProximityPairing(type={:#04x}, length={}, data={})",
         self.kind(),
         self.length(),
         hex_dump(&self.data)
      )
   }
}

/// Narrows a continuity record to a proximity pairing message.
///
/// Returns `None` for any other record type or length, which is the common
/// case for mixed Apple traffic.
pub fn decode(message: &continuity::Message) -> Option<Message> {
   if message.kind != PROXIMITY_PAIRING_TYPE {
      debug!("Not a proximity pairing message: {message:?}");
      return None;
   }
   if message.length != PROXIMITY_PAIRING_LENGTH {
      debug!("Proximity pairing message has invalid length: {}", message.length);
      return None;
   }
   let data = message.data.as_slice().try_into().ok()?;
   Some(Message { data })
}

/// Manufacturer data filter, applied by the radio or by the scanner adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFilter {
   pub company_id: u16,
   pub data: [u8; CONTINUITY_MESSAGE_LENGTH],
   pub mask: [u8; CONTINUITY_MESSAGE_LENGTH],
}

impl ScanFilter {
   /// Whether `manufacturer_data` of company `company_id` passes the filter.
   pub fn matches(&self, company_id: u16, manufacturer_data: &[u8]) -> bool {
      if company_id != self.company_id || manufacturer_data.len() < self.data.len() {
         return false;
      }
      self
         .data
         .iter()
         .zip(&self.mask)
         .zip(manufacturer_data)
         .all(|((&want, &mask), &have)| want & mask == have & mask)
   }
}

const fn scan_filter() -> ScanFilter {
   let mut data = [0u8; CONTINUITY_MESSAGE_LENGTH];
   data[0] = PROXIMITY_PAIRING_TYPE;
   data[1] = PROXIMITY_PAIRING_LENGTH as u8;
   let mut mask = [0u8; CONTINUITY_MESSAGE_LENGTH];
   mask[0] = 0xff;
   mask[1] = 0xff;
   ScanFilter {
      company_id: APPLE_COMPANY_ID,
      data,
      mask,
   }
}

/// Filter matching proximity pairing advertisements.
pub const SCAN_FILTER: ScanFilter = scan_filter();

#[cfg(test)]
mod tests {
   use super::*;
   use crate::pods::apple::continuity::Payload;

   // AirPods Pro, both pods and case at 100%, lid open
   const AIRPODS_PRO: [u8; 27] = [
      0x07, 0x19, 0x01, 0x0e, 0x20, 0x2b, 0xaa, 0x0a, 0x31, 0x00, 0x05, 0x11, 0x22, 0x33, 0x44,
      0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00,
   ];

   fn record(kind: u8, data: &[u8]) -> continuity::Message {
      continuity::Message {
         kind,
         length: data.len(),
         data: Payload::from_slice(data),
      }
   }

   #[test]
   fn test_decode_roundtrip_from_continuity() {
      let messages = continuity::decode(&AIRPODS_PRO).unwrap();
      assert_eq!(messages.len(), 1);
      let message = decode(&messages[0]).expect("proximity message");
      assert_eq!(message.data.as_slice(), &AIRPODS_PRO[2..]);
      assert_eq!(message.kind(), 0x07);
      assert_eq!(message.length(), 25);
      assert_eq!(message.device_model(), 0x0e20);
      assert_eq!(message.device_model_dirty(), 0x0e);
   }

   #[test]
   fn test_decode_keeps_every_payload_byte() {
      for offset in 2..AIRPODS_PRO.len() {
         for value in 0..=u8::MAX {
            let mut data = AIRPODS_PRO;
            data[offset] = value;

            let messages = continuity::decode(&data).unwrap();
            assert_eq!(messages.len(), 1);
            let message = decode(&messages[0]).expect("proximity message");
            assert_eq!(message.data.as_slice(), &data[2..], "offset {offset}, value {value:#04x}");
         }
      }
   }

   #[test]
   fn test_wrong_type_not_applicable() {
      assert!(decode(&record(0x10, &AIRPODS_PRO[2..])).is_none());
   }

   #[test]
   fn test_wrong_length_not_applicable() {
      assert!(decode(&record(0x07, &AIRPODS_PRO[2..26])).is_none());
      assert!(decode(&record(0x07, &[0u8; 26])).is_none());
      assert!(decode(&record(0x07, &[])).is_none());
   }

   #[test]
   fn test_markers_are_order_independent() {
      let mut swapped = AIRPODS_PRO;
      swapped[6] = 0x8a;
      let mut original = AIRPODS_PRO;
      original[6] = 0xa8;

      let a = decode(&continuity::decode(&original).unwrap()[0]).unwrap();
      let b = decode(&continuity::decode(&swapped).unwrap()[0]).unwrap();
      assert_ne!(a, b);
      assert_eq!(a.markers(), b.markers());

      let markers = a.markers();
      assert_eq!(markers.vendor, 0x07);
      assert_eq!(markers.length, 25);
      assert_eq!(markers.device, 0x0e20);
      assert_eq!(markers.pod_battery.as_slice(), &[0x08, 0x0a]);
      assert_eq!(markers.case_battery, 0x0a);
      assert_eq!(markers.device_color, 0x00);
   }

   #[test]
   fn test_markers_collapse_equal_pods() {
      let message = decode(&continuity::decode(&AIRPODS_PRO).unwrap()[0]).unwrap();
      assert_eq!(message.markers().pod_battery.as_slice(), &[0x0a]);
   }

   #[test]
   fn test_scan_filter() {
      assert!(SCAN_FILTER.matches(APPLE_COMPANY_ID, &AIRPODS_PRO));
      assert!(!SCAN_FILTER.matches(0x0006, &AIRPODS_PRO));
      assert!(!SCAN_FILTER.matches(APPLE_COMPANY_ID, &AIRPODS_PRO[..20]));

      let mut other = AIRPODS_PRO;
      other[0] = 0x10;
      assert!(!SCAN_FILTER.matches(APPLE_COMPANY_ID, &other));

      // only type and length are masked
      let mut noise = AIRPODS_PRO;
      noise[10] ^= 0xff;
      assert!(SCAN_FILTER.matches(APPLE_COMPANY_ID, &noise));
   }

   #[test]
   fn test_debug_renders_hex() {
      let message = decode(&continuity::decode(&AIRPODS_PRO).unwrap()[0]).unwrap();
      let rendered = format!("{message:?}");
      assert!(rendered.starts_with("ProximityPairing(type=0x07, length=25, data=01 0E 20 2B AA 0A 31"));
   }
}
