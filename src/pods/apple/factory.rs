//! Device factory: identity resolution and model classification.
//!
//! Accessories rotate their address, so an advertisement is matched against
//! the recently seen devices first by address and then by proximity. The
//! known-device table is only ever touched while holding its lock.

use std::{
   sync::Arc,
   time::{Duration, Instant},
};

use bluer::Address;
use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::pods::{
   Advertisement, PodId,
   apple::{continuity, model, proximity},
   device::{PodDevice, PodSnapshot},
   nibble::hex_dump,
};

/// Entries not refreshed for this long are dropped.
const STALE_AFTER: Duration = Duration::from_secs(20);
/// Maximum age of an entry to be reused for a rotated address.
const CLOSE_MATCH_MAX_AGE: Duration = Duration::from_secs(10);
/// Minimum signal strength (exclusive) to be reused for a rotated address.
const CLOSE_MATCH_MIN_RSSI: i16 = -60;

/// Receives reports about advertisements with an unknown model code.
pub trait DiagnosticSink: Send + Sync {
   fn report_unknown(&self, message: &proximity::Message, advertisement: &Advertisement);
}

/// Default sink, reports to the log.
#[derive(Debug, Default)]
pub struct LogDiagnostics;

impl DiagnosticSink for LogDiagnostics {
   fn report_unknown(&self, message: &proximity::Message, advertisement: &Advertisement) {
      warn!(
         "Unknown proximity message from {} (markers {:?}): {message:?}",
         advertisement.address,
         message.markers()
      );
   }
}

/// Most recent advertisement seen for an identity.
#[derive(Debug, Clone)]
pub struct KnownDevice {
   pub id: PodId,
   pub advertisement: Advertisement,
}

impl KnownDevice {
   pub const fn address(&self) -> Address {
      self.advertisement.address
   }

   pub const fn rssi(&self) -> i16 {
      self.advertisement.rssi
   }

   pub const fn seen_at(&self) -> Instant {
      self.advertisement.received_at
   }

   fn is_older_than(&self, age: Duration, now: Instant) -> bool {
      now.saturating_duration_since(self.seen_at()) > age
   }
}

/// Turns advertisements into [`PodDevice`] snapshots.
pub struct DeviceFactory {
   known: Mutex<Vec<KnownDevice>>,
   diagnostics: Arc<dyn DiagnosticSink>,
}

impl Default for DeviceFactory {
   fn default() -> Self {
      Self::new(Arc::new(LogDiagnostics))
   }
}

impl DeviceFactory {
   pub fn new(diagnostics: Arc<dyn DiagnosticSink>) -> Self {
      Self {
         known: Mutex::new(Vec::new()),
         diagnostics,
      }
   }

   /// Decodes one advertisement.
   ///
   /// Returns `None` if it carries no proximity pairing message. Staleness is
   /// measured against the advertisement's receive time.
   pub fn create(&self, advertisement: &Advertisement) -> Option<PodDevice> {
      let mut known = self.known.lock();

      let message = extract_message(&advertisement.manufacturer_data)?;
      let id = recognize_device(&mut known, advertisement);

      debug!(
         "Decoding (MAC={}, rssi={}): {}",
         advertisement.address,
         advertisement.rssi,
         hex_dump(&advertisement.manufacturer_data)
      );

      let model = model::classify(message.device_model(), message.device_model_dirty());
      if model.is_none() {
         warn!("Unknown proximity message type {:#06x}", message.device_model());
         self.diagnostics.report_unknown(&message, advertisement);
      }

      Some(PodDevice::new(
         PodSnapshot::new(id, advertisement.clone(), message),
         model,
      ))
   }

   /// Copy of the known-device table, in resolution order.
   #[cfg(test)]
   pub fn known_devices(&self) -> Vec<KnownDevice> {
      self.known.lock().clone()
   }
}

fn extract_message(data: &[u8]) -> Option<proximity::Message> {
   let messages = match continuity::decode(data) {
      Ok(messages) => messages,
      Err(e) => {
         warn!("Data wasn't continuity protocol conform: {e}");
         return None;
      },
   };

   let Some(first) = messages.first() else {
      warn!("Data contained no continuity messages: {}", hex_dump(data));
      return None;
   };
   if messages.len() > 1 {
      warn!("Decoded multiple continuity messages, picking first: {messages:?}");
   }

   let message = proximity::decode(first);
   if message.is_none() {
      debug!("Not a proximity pairing message: {first:?}");
   }
   message
}

fn recognize_device(known: &mut Vec<KnownDevice>, advertisement: &Advertisement) -> PodId {
   let now = advertisement.received_at;

   let id = if let Some(dev) = known.iter().find(|d| d.address() == advertisement.address) {
      trace!("recognizeDevice: Recovered previous ID via address: {dev:?}");
      dev.id
   } else if let Some(dev) = known
      .iter()
      .find(|d| d.rssi() > CLOSE_MATCH_MIN_RSSI && !d.is_older_than(CLOSE_MATCH_MAX_AGE, now))
   {
      trace!("recognizeDevice: Close match based on RSSI and timestamp: {dev:?}");
      dev.id
   } else {
      trace!("recognizeDevice: Mapping as new device");
      PodId::random()
   };

   let entry = KnownDevice {
      id,
      advertisement: advertisement.clone(),
   };
   match known.iter_mut().find(|d| d.id == id) {
      Some(slot) => *slot = entry,
      None => known.push(entry),
   }

   known.retain(|d| {
      let stale = d.is_older_than(STALE_AFTER, now);
      if stale {
         trace!("recognizeDevice: Removing stale known device: {d:?}");
      }
      !stale
   });

   id
}
