//! Recognition of connected AirPods and Beats.
//!
//! Used by the automatic monitor mode, which only scans while an Apple audio
//! accessory is connected to one of the adapters.

use bluer::{Adapter, Device};
use log::debug;

/// Name patterns of supported accessories (case-insensitive)
const NAME_PATTERNS: &[&str] = &["airpods", "beats", "powerbeats"];

/// Apple vendor ID as reported in the modalias
const APPLE_VID: u32 = 0x004C;

/// Product IDs of Apple headphones as reported in the modalias
const HEADPHONE_PIDS: &[u32] = &[
   0x2002, // AirPods (1st gen)
   0x2003, // Powerbeats 3
   0x2005, // BeatsX
   0x2006, // Beats Solo 3
   0x2009, // Beats Studio 3
   0x200A, // AirPods Max
   0x200B, // Powerbeats Pro
   0x200E, // AirPods Pro
   0x200F, // AirPods (2nd gen)
   0x2010, // Beats Flex
];

fn matches_name(name: &str) -> bool {
   let name = name.to_ascii_lowercase();
   NAME_PATTERNS.iter().any(|pattern| name.contains(pattern))
}

/// Checks whether a BlueZ device is an Apple headphone accessory.
pub async fn is_apple_audio_device(dev: &Device) -> bool {
   if let Ok(Some(modalias)) = dev.modalias().await
      && modalias.vendor == APPLE_VID
      && HEADPHONE_PIDS.contains(&modalias.product)
   {
      debug!(
         "Apple audio device via modalias: vendor={:#06x}, product={:#06x}",
         modalias.vendor, modalias.product
      );
      return true;
   }

   if let Ok(Some(name)) = dev.name().await
      && matches_name(&name)
   {
      debug!("Apple audio device via name: {name}");
      return true;
   }
   if let Ok(alias) = dev.alias().await
      && matches_name(&alias)
   {
      debug!("Apple audio device via alias: {alias}");
      return true;
   }
   false
}

/// Whether any connected device on `adapter` is an Apple headphone accessory.
pub async fn has_connected_pods(adapter: &Adapter) -> bluer::Result<bool> {
   for addr in adapter.device_addresses().await? {
      let device = adapter.device(addr)?;
      if device.is_connected().await.unwrap_or(false) && is_apple_audio_device(&device).await {
         return Ok(true);
      }
   }
   Ok(false)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_name_patterns() {
      assert!(matches_name("Jane's AirPods Pro"));
      assert!(matches_name("Powerbeats Pro"));
      assert!(matches_name("BEATS FLEX"));
      assert!(!matches_name("EarPods"));
      assert!(!matches_name("WH-1000XM4"));
   }
}
