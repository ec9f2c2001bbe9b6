//! Decoded accessory snapshots.
//!
//! A [`PodDevice`] is an immutable view over one proximity pairing message.
//! Every decoded advertisement produces a fresh value; nothing in here is
//! ever mutated in place.

use std::{fmt, time::Instant};

use bluer::Address;
use serde_json::json;

use crate::pods::{
   Advertisement, PodId,
   apple::{
      model::{DeviceModel, PodLayout},
      proximity::{self, Markers},
   },
   nibble::{hex_dump, is_bit_set, lower_nibble, upper_nibble},
};

/// Highest battery nibble that carries a level, in tenths.
const MAX_BATTERY_LEVEL: u8 = 10;

const IDX_STATUS: usize = 3;
const IDX_POD_BATTERY: usize = 4;
const IDX_FLAGS_CASE_BATTERY: usize = 5;
const IDX_CASE_LID: usize = 6;
const IDX_COLOR: usize = 7;

/// Status bit that is set when the values are in left/right order.
const STATUS_BIT_ORDERED: u8 = 1;

const FLAG_CHARGING_FIRST: u8 = 0x01;
const FLAG_CHARGING_SECOND: u8 = 0x02;
const FLAG_CHARGING_CASE: u8 = 0x04;

const LID_OPEN: u8 = 0x31;
const LID_CLOSED: u8 = 0x38;

/// Case lid state of a dual-earbud accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum LidState {
   Open,
   Closed,
   Unknown,
}

impl LidState {
   pub const fn from_raw(raw: u8) -> Self {
      match raw {
         LID_OPEN => Self::Open,
         LID_CLOSED => Self::Closed,
         _ => Self::Unknown,
      }
   }

   pub fn to_str(self) -> &'static str {
      self.into()
   }
}

/// Battery level in tenths (`0..=10`), `None` if not reported.
pub const fn battery_level(nibble: u8) -> Option<u8> {
   if nibble <= MAX_BATTERY_LEVEL {
      Some(nibble)
   } else {
      None
   }
}

fn battery_json(level: Option<u8>) -> serde_json::Value {
   match level {
      Some(level) => json!(u32::from(level) * 10),
      None => json!(null),
   }
}

/// Fields shared by every variant.
#[derive(Clone)]
pub struct PodSnapshot {
   id: PodId,
   advertisement: Advertisement,
   message: proximity::Message,
}

impl PodSnapshot {
   pub const fn new(id: PodId, advertisement: Advertisement, message: proximity::Message) -> Self {
      Self {
         id,
         advertisement,
         message,
      }
   }

   const fn byte(&self, idx: usize) -> u8 {
      self.message.data[idx]
   }
}

/// Two earbuds and a charging case (AirPods, Powerbeats Pro).
#[derive(Clone)]
pub struct DualPods {
   model: DeviceModel,
   snapshot: PodSnapshot,
}

/// Single battery accessory (AirPods Max, most Beats).
#[derive(Clone)]
pub struct SinglePod {
   model: DeviceModel,
   snapshot: PodSnapshot,
}

/// Proximity pairing message with an unrecognised model code.
#[derive(Clone)]
pub struct UnknownPod {
   snapshot: PodSnapshot,
}

impl DualPods {
   pub const fn model(&self) -> DeviceModel {
      self.model
   }

   pub const fn id(&self) -> PodId {
      self.snapshot.id
   }

   /// Left/right values are swapped when the ordering bit is clear.
   const fn is_flipped(&self) -> bool {
      !is_bit_set(self.snapshot.byte(IDX_STATUS), STATUS_BIT_ORDERED)
   }

   const fn charging_flags(&self) -> u8 {
      upper_nibble(self.snapshot.byte(IDX_FLAGS_CASE_BATTERY))
   }

   pub const fn left_battery(&self) -> Option<u8> {
      let raw = self.snapshot.byte(IDX_POD_BATTERY);
      battery_level(if self.is_flipped() {
         lower_nibble(raw)
      } else {
         upper_nibble(raw)
      })
   }

   pub const fn right_battery(&self) -> Option<u8> {
      let raw = self.snapshot.byte(IDX_POD_BATTERY);
      battery_level(if self.is_flipped() {
         upper_nibble(raw)
      } else {
         lower_nibble(raw)
      })
   }

   pub const fn case_battery(&self) -> Option<u8> {
      battery_level(lower_nibble(self.snapshot.byte(IDX_FLAGS_CASE_BATTERY)))
   }

   pub const fn is_left_charging(&self) -> bool {
      let mask = if self.is_flipped() {
         FLAG_CHARGING_SECOND
      } else {
         FLAG_CHARGING_FIRST
      };
      self.charging_flags() & mask != 0
   }

   pub const fn is_right_charging(&self) -> bool {
      let mask = if self.is_flipped() {
         FLAG_CHARGING_FIRST
      } else {
         FLAG_CHARGING_SECOND
      };
      self.charging_flags() & mask != 0
   }

   pub const fn is_case_charging(&self) -> bool {
      self.charging_flags() & FLAG_CHARGING_CASE != 0
   }

   pub const fn raw_case_lid_state(&self) -> u8 {
      self.snapshot.byte(IDX_CASE_LID)
   }

   pub const fn lid_state(&self) -> LidState {
      LidState::from_raw(self.raw_case_lid_state())
   }

   pub const fn color(&self) -> u8 {
      self.snapshot.byte(IDX_COLOR)
   }
}

impl SinglePod {
   pub const fn model(&self) -> DeviceModel {
      self.model
   }

   pub const fn battery(&self) -> Option<u8> {
      battery_level(lower_nibble(self.snapshot.byte(IDX_POD_BATTERY)))
   }

   pub const fn is_charging(&self) -> bool {
      upper_nibble(self.snapshot.byte(IDX_FLAGS_CASE_BATTERY)) & FLAG_CHARGING_FIRST != 0
   }

   pub const fn color(&self) -> u8 {
      self.snapshot.byte(IDX_COLOR)
   }
}

/// A decoded accessory.
///
/// Two devices compare equal when they share an identity, regardless of the
/// data they carry. Use [`PodDevice::same_state`] to detect changed data.
#[derive(Clone)]
pub enum PodDevice {
   Dual(DualPods),
   Single(SinglePod),
   Unknown(UnknownPod),
}

impl PodDevice {
   /// Wraps a message in the variant matching `model`.
   pub fn new(snapshot: PodSnapshot, model: Option<DeviceModel>) -> Self {
      match model {
         Some(model) if model.layout() == PodLayout::Dual => Self::Dual(DualPods { model, snapshot }),
         Some(model) => Self::Single(SinglePod { model, snapshot }),
         None => Self::Unknown(UnknownPod { snapshot }),
      }
   }

   const fn snapshot(&self) -> &PodSnapshot {
      match self {
         Self::Dual(d) => &d.snapshot,
         Self::Single(s) => &s.snapshot,
         Self::Unknown(u) => &u.snapshot,
      }
   }

   pub const fn id(&self) -> PodId {
      self.snapshot().id
   }

   pub const fn model(&self) -> Option<DeviceModel> {
      match self {
         Self::Dual(d) => Some(d.model()),
         Self::Single(s) => Some(s.model()),
         Self::Unknown(_) => None,
      }
   }

   pub const fn address(&self) -> Address {
      self.snapshot().advertisement.address
   }

   pub const fn rssi(&self) -> i16 {
      self.snapshot().advertisement.rssi
   }

   pub const fn seen_at(&self) -> Instant {
      self.snapshot().advertisement.received_at
   }

   pub const fn message(&self) -> &proximity::Message {
      &self.snapshot().message
   }

   pub fn raw_data(&self) -> &[u8] {
      &self.snapshot().advertisement.manufacturer_data
   }

   pub fn raw_data_hex(&self) -> String {
      hex_dump(self.raw_data())
   }

   pub fn markers(&self) -> Markers {
      self.message().markers()
   }

   pub const fn as_dual(&self) -> Option<&DualPods> {
      match self {
         Self::Dual(d) => Some(d),
         _ => None,
      }
   }

   /// Same identity and byte-identical advertisement data.
   pub fn same_state(&self, other: &Self) -> bool {
      self.id() == other.id() && self.raw_data() == other.raw_data()
   }

   /// Converts the snapshot to a JSON representation.
   pub fn to_json(&self) -> serde_json::Value {
      let mut info = json!({
          "id": self.id().to_string(),
          "address": self.address().to_string(),
          "rssi": self.rssi(),
          "model": self.model().map(DeviceModel::to_str),
          "label": self.model().map_or("Unknown Apple device", DeviceModel::label),
          "raw": self.raw_data_hex(),
      });

      match self {
         Self::Dual(d) => {
            info["kind"] = json!("dual");
            info["battery"] = json!({
                "left_level": battery_json(d.left_battery()),
                "right_level": battery_json(d.right_battery()),
                "case_level": battery_json(d.case_battery()),
                "left_charging": d.is_left_charging(),
                "right_charging": d.is_right_charging(),
                "case_charging": d.is_case_charging(),
            });
            info["lid"] = json!(d.lid_state().to_str());
            info["color"] = json!(d.color());
         },
         Self::Single(s) => {
            info["kind"] = json!("single");
            info["battery"] = json!({
                "level": battery_json(s.battery()),
                "charging": s.is_charging(),
            });
            info["color"] = json!(s.color());
         },
         Self::Unknown(_) => {
            info["kind"] = json!("unknown");
         },
      }
      info
   }
}

impl PartialEq for PodDevice {
   fn eq(&self, other: &Self) -> bool {
      self.id() == other.id()
   }
}

impl Eq for PodDevice {}

impl fmt::Debug for PodDevice {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let kind = match self {
         Self::Dual(_) => "Dual",
         Self::Single(_) => "Single",
         Self::Unknown(_) => "Unknown",
      };
      f.debug_struct(kind)
         .field("id", &self.id())
         .field("model", &self.model())
         .field("address", &self.address())
         .field("rssi", &self.rssi())
         .field("markers", &self.markers())
         .field("data", &self.raw_data_hex())
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::pods::apple::continuity;

   fn device(data: [u8; 27], model: Option<DeviceModel>) -> PodDevice {
      let adv = Advertisement::new(Address::any(), -50, Instant::now(), &data);
      let message = proximity::decode(&continuity::decode(&data).unwrap()[0]).unwrap();
      PodDevice::new(PodSnapshot::new(PodId::random(), adv, message), model)
   }

   fn payload(status: u8, pods: u8, flags_case: u8, lid: u8) -> [u8; 27] {
      let mut data = [0u8; 27];
      data[..5].copy_from_slice(&[0x07, 0x19, 0x01, 0x0e, 0x20]);
      data[2 + IDX_STATUS] = status;
      data[2 + IDX_POD_BATTERY] = pods;
      data[2 + IDX_FLAGS_CASE_BATTERY] = flags_case;
      data[2 + IDX_CASE_LID] = lid;
      data[2 + IDX_COLOR] = 0x02;
      data
   }

   #[test]
   fn test_variant_by_layout() {
      let data = payload(0x2b, 0xaa, 0x0a, LID_OPEN);
      assert!(matches!(device(data, Some(DeviceModel::AirPodsPro)), PodDevice::Dual(_)));
      assert!(matches!(device(data, Some(DeviceModel::PowerBeatsPro)), PodDevice::Dual(_)));
      assert!(matches!(device(data, Some(DeviceModel::AirPodsMax)), PodDevice::Single(_)));
      assert!(matches!(device(data, Some(DeviceModel::BeatsX)), PodDevice::Single(_)));
      assert!(matches!(device(data, None), PodDevice::Unknown(_)));
   }

   #[test]
   fn test_dual_battery_ordered() {
      // ordering bit set: upper nibble is left
      let dev = device(payload(0x02, 0x73, 0x15, LID_OPEN), Some(DeviceModel::AirPodsPro));
      let dual = dev.as_dual().unwrap();
      assert_eq!(dual.left_battery(), Some(7));
      assert_eq!(dual.right_battery(), Some(3));
      assert_eq!(dual.case_battery(), Some(5));
      assert!(dual.is_left_charging());
      assert!(!dual.is_right_charging());
      assert!(!dual.is_case_charging());
   }

   #[test]
   fn test_dual_battery_flipped() {
      let dev = device(payload(0x00, 0x73, 0x65, LID_OPEN), Some(DeviceModel::AirPodsPro));
      let dual = dev.as_dual().unwrap();
      assert_eq!(dual.left_battery(), Some(3));
      assert_eq!(dual.right_battery(), Some(7));
      assert!(dual.is_left_charging());
      assert!(!dual.is_right_charging());
      assert!(dual.is_case_charging());
   }

   #[test]
   fn test_unknown_battery_nibbles() {
      let dev = device(payload(0x02, 0xfb, 0x0f, LID_OPEN), Some(DeviceModel::AirPodsGen2));
      let dual = dev.as_dual().unwrap();
      assert_eq!(dual.left_battery(), None);
      assert_eq!(dual.right_battery(), None);
      assert_eq!(dual.case_battery(), None);
      assert_eq!(battery_level(0), Some(0));
      assert_eq!(battery_level(10), Some(10));
   }

   #[test]
   fn test_lid_state() {
      let lid = |raw| {
         device(payload(0x02, 0xaa, 0x0a, raw), Some(DeviceModel::AirPodsPro))
            .as_dual()
            .unwrap()
            .lid_state()
      };
      assert_eq!(lid(0x31), LidState::Open);
      assert_eq!(lid(0x38), LidState::Closed);
      assert_eq!(lid(0x01), LidState::Unknown);
      assert_eq!(LidState::Open.to_str(), "open");
   }

   #[test]
   fn test_single_battery() {
      let dev = device(payload(0x02, 0x06, 0x10, 0x00), Some(DeviceModel::AirPodsMax));
      let PodDevice::Single(single) = &dev else {
         panic!("expected single device");
      };
      assert_eq!(single.battery(), Some(6));
      assert!(single.is_charging());
      assert_eq!(single.color(), 0x02);
   }

   #[test]
   fn test_equality_by_identity() {
      let a = device(payload(0x02, 0xaa, 0x0a, LID_OPEN), Some(DeviceModel::AirPodsPro));
      let b = device(payload(0x02, 0xaa, 0x0a, LID_OPEN), Some(DeviceModel::AirPodsPro));
      assert_ne!(a, b);
      assert!(!a.same_state(&b));

      let PodDevice::Dual(dual) = &a else {
         panic!("expected dual device");
      };
      let adv = Advertisement::new(
         Address::any(),
         -80,
         Instant::now(),
         &payload(0x02, 0x55, 0x0a, LID_CLOSED),
      );
      let message = proximity::decode(&continuity::decode(&adv.manufacturer_data).unwrap()[0]).unwrap();
      let refreshed = PodDevice::new(PodSnapshot::new(dual.id(), adv, message), Some(dual.model()));
      assert_eq!(a, refreshed);
      assert!(!a.same_state(&refreshed));
      assert!(a.same_state(&a.clone()));
   }

   #[test]
   fn test_json_rendering() {
      let dev = device(payload(0x02, 0xa5, 0x4a, LID_OPEN), Some(DeviceModel::AirPodsPro));
      let json = dev.to_json();
      assert_eq!(json["kind"], "dual");
      assert_eq!(json["model"], "AirPodsPro");
      assert_eq!(json["battery"]["left_level"], 100);
      assert_eq!(json["battery"]["right_level"], 50);
      assert_eq!(json["battery"]["case_level"], 100);
      assert_eq!(json["battery"]["case_charging"], true);
      assert_eq!(json["lid"], "open");
      assert!(json["raw"].as_str().unwrap().starts_with("07 19 01 0E 20"));

      let unknown = device(payload(0x02, 0xa5, 0x4a, LID_OPEN), None).to_json();
      assert_eq!(unknown["kind"], "unknown");
      assert!(unknown["model"].is_null());
   }
}
