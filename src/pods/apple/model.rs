//! Known AirPods and Beats models.
//!
//! Classification is a pure, total function of the model code and its first
//! byte. The table is checked in order, exact codes and first-byte matches
//! are interleaved as observed on real devices.

use serde::{Deserialize, Serialize};

/// Concrete accessory model.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
   strum::EnumIter,
)]
pub enum DeviceModel {
   AirPodsGen1,
   AirPodsGen2,
   AirPodsPro,
   AirPodsMax,
   PowerBeats3,
   BeatsSolo3,
   BeatsStudio3,
   PowerBeatsPro,
   BeatsX,
   BeatsFlex,
}

/// How a model reports its batteries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodLayout {
   /// Two earbuds and a charging case.
   Dual,
   /// A single battery (headphones, neckbands).
   Single,
}

#[derive(Debug, Clone, Copy)]
enum Code {
   Exact(u16),
   Dirty(u8),
}

impl Code {
   const fn matches(self, model: u16, dirty: u8) -> bool {
      match self {
         Self::Exact(code) => code == model,
         Self::Dirty(code) => code == dirty,
      }
   }
}

const MODEL_TABLE: &[(Code, DeviceModel)] = &[
   (Code::Exact(0x0220), DeviceModel::AirPodsGen1),
   (Code::Exact(0x0F20), DeviceModel::AirPodsGen2),
   (Code::Exact(0x0E20), DeviceModel::AirPodsPro),
   (Code::Dirty(0x0A), DeviceModel::AirPodsMax),
   (Code::Exact(0x0320), DeviceModel::PowerBeats3),
   (Code::Exact(0x0620), DeviceModel::BeatsSolo3),
   (Code::Dirty(0x09), DeviceModel::BeatsStudio3),
   (Code::Dirty(0x0B), DeviceModel::PowerBeatsPro),
   (Code::Exact(0x0520), DeviceModel::BeatsX),
   (Code::Exact(0x1020), DeviceModel::BeatsFlex),
];

/// Looks up the model for a model code and its first byte.
///
/// `None` means the signature is not known.
pub fn classify(model: u16, dirty: u8) -> Option<DeviceModel> {
   MODEL_TABLE
      .iter()
      .find(|(code, _)| code.matches(model, dirty))
      .map(|&(_, device)| device)
}

impl DeviceModel {
   pub const fn layout(self) -> PodLayout {
      match self {
         Self::AirPodsGen1 | Self::AirPodsGen2 | Self::AirPodsPro | Self::PowerBeatsPro => {
            PodLayout::Dual
         },
         Self::AirPodsMax
         | Self::PowerBeats3
         | Self::BeatsSolo3
         | Self::BeatsStudio3
         | Self::BeatsX
         | Self::BeatsFlex => PodLayout::Single,
      }
   }

   /// Human readable label.
   pub const fn label(self) -> &'static str {
      match self {
         Self::AirPodsGen1 => "AirPods (Gen 1)",
         Self::AirPodsGen2 => "AirPods (Gen 2)",
         Self::AirPodsPro => "AirPods Pro",
         Self::AirPodsMax => "AirPods Max",
         Self::PowerBeats3 => "Powerbeats 3",
         Self::BeatsSolo3 => "Beats Solo 3",
         Self::BeatsStudio3 => "Beats Studio 3",
         Self::PowerBeatsPro => "Powerbeats Pro",
         Self::BeatsX => "BeatsX",
         Self::BeatsFlex => "Beats Flex",
      }
   }

   pub fn to_str(self) -> &'static str {
      self.into()
   }
}
