//! Passive LE scanner feeding the pod monitor.
//!
//! BlueZ reports advertisements as property changes on device objects, so the
//! scanner follows discovery events and subscribes to every device it sees.
//! Only manufacturer data that passes the proximity pairing filter reaches the
//! monitor.

use std::{
   collections::HashMap,
   time::{Duration, Instant},
};

use bluer::{
   Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
   DiscoveryTransport,
};
use futures::stream::{BoxStream, SelectAll, StreamExt};
use log::{debug, info, trace, warn};
use tokio::select;

use crate::{
   error::{CapodError, Result},
   monitor::PodMonitor,
   pods::{
      Advertisement, Packet,
      apple::{continuity::APPLE_COMPANY_ID, proximity::SCAN_FILTER},
   },
};

/// Identical data and signal within this window count as one advertisement.
const DUPLICATE_WINDOW: Duration = Duration::from_millis(500);

type ChangeStream = BoxStream<'static, (Address, DeviceEvent)>;

/// Drops the second report of an advertisement.
///
/// BlueZ raises a data and an RSSI property change for every received
/// advertisement; both end up here.
#[derive(Default)]
struct DuplicateFilter {
   last: HashMap<Address, (Packet, i16, Instant)>,
}

impl DuplicateFilter {
   fn is_duplicate(&mut self, advertisement: &Advertisement) -> bool {
      if let Some((data, rssi, at)) = self.last.get(&advertisement.address)
         && *data == advertisement.manufacturer_data
         && *rssi == advertisement.rssi
         && advertisement.received_at.saturating_duration_since(*at) < DUPLICATE_WINDOW
      {
         return true;
      }
      self.last.insert(
         advertisement.address,
         (advertisement.manufacturer_data.clone(), advertisement.rssi, advertisement.received_at),
      );
      false
   }

   fn forget(&mut self, address: &Address) {
      self.last.remove(address);
   }
}

/// Builds an advertisement from a manufacturer data map, if it carries a
/// proximity pairing message.
pub fn advertisement_from(
   address: Address,
   rssi: i16,
   manufacturer_data: &HashMap<u16, Vec<u8>>,
) -> Option<Advertisement> {
   let data = manufacturer_data.get(&APPLE_COMPANY_ID)?;
   if !SCAN_FILTER.matches(APPLE_COMPANY_ID, data) {
      return None;
   }
   Some(Advertisement::new(address, rssi, Instant::now(), data))
}

async fn read_advertisement(device: &Device) -> bluer::Result<Option<Advertisement>> {
   let Some(manufacturer_data) = device.manufacturer_data().await? else {
      return Ok(None);
   };
   let Some(rssi) = device.rssi().await? else {
      return Ok(None);
   };
   Ok(advertisement_from(device.address(), rssi, &manufacturer_data))
}

/// Reads the current data of `address` and forwards it to the monitor.
///
/// Device level failures are skipped; only a monitor that went away is
/// returned as an error.
async fn report_device(
   adapter: &Adapter,
   address: Address,
   monitor: &PodMonitor,
   duplicates: &mut DuplicateFilter,
) -> Result<()> {
   let advertisement = match adapter.device(address) {
      Ok(device) => read_advertisement(&device).await,
      Err(e) => Err(e),
   };
   match advertisement {
      Ok(Some(advertisement)) => forward(advertisement, monitor, duplicates).await,
      Ok(None) => Ok(()),
      Err(e) => {
         debug!("Failed to read advertisement of {address}: {e}");
         Ok(())
      },
   }
}

async fn forward(
   advertisement: Advertisement,
   monitor: &PodMonitor,
   duplicates: &mut DuplicateFilter,
) -> Result<()> {
   if duplicates.is_duplicate(&advertisement) {
      return Ok(());
   }
   trace!(
      "Proximity pairing from {} ({} dBm)",
      advertisement.address, advertisement.rssi
   );
   monitor.report(advertisement).await
}

async fn subscribe(adapter: &Adapter, address: Address) -> bluer::Result<ChangeStream> {
   let device = adapter.device(address)?;
   let events = device.events().await?;
   Ok(events.map(move |event| (address, event)).boxed())
}

/// Scans on `adapter` until discovery stops or the monitor shuts down.
pub async fn run(adapter: Adapter, monitor: PodMonitor) -> Result<()> {
   adapter
      .set_discovery_filter(DiscoveryFilter {
         transport: DiscoveryTransport::Le,
         duplicate_data: true,
         ..Default::default()
      })
      .await?;

   let mut discovery = Box::pin(adapter.discover_devices_with_changes().await?);
   let mut changes: SelectAll<ChangeStream> = SelectAll::new();
   let mut duplicates = DuplicateFilter::default();
   info!("Scanning for accessories on {}", adapter.name());

   loop {
      select! {
         event = discovery.next() => {
            let Some(event) = event else {
               warn!("Discovery on {} ended", adapter.name());
               return Err(CapodError::ScannerStopped(adapter.name().to_string()));
            };
            match event {
               AdapterEvent::DeviceAdded(address) => {
                  report_device(&adapter, address, &monitor, &mut duplicates).await?;
                  match subscribe(&adapter, address).await {
                     Ok(stream) => changes.push(stream),
                     Err(e) => debug!("Cannot follow {address}: {e}"),
                  }
               },
               AdapterEvent::DeviceRemoved(address) => {
                  trace!("Device {address} removed");
                  duplicates.forget(&address);
               },
               _ => {},
            }
         }
         Some((address, DeviceEvent::PropertyChanged(property))) = changes.next() => {
            match property {
               DeviceProperty::ManufacturerData(data) => {
                  let rssi = match adapter.device(address) {
                     Ok(device) => device.rssi().await.ok().flatten(),
                     Err(_) => None,
                  };
                  if let Some(rssi) = rssi
                     && let Some(advertisement) = advertisement_from(address, rssi, &data)
                  {
                     forward(advertisement, &monitor, &mut duplicates).await?;
                  }
               },
               DeviceProperty::Rssi(_) => {
                  report_device(&adapter, address, &monitor, &mut duplicates).await?;
               },
               _ => {},
            }
         }
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   const AIRPODS_PRO: [u8; 27] = [
      0x07, 0x19, 0x01, 0x0e, 0x20, 0x2b, 0xaa, 0x0a, 0x31, 0x00, 0x05, 0x11, 0x22, 0x33, 0x44,
      0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00,
   ];

   #[test]
   fn test_advertisement_from_apple_data() {
      let address = Address::new([1, 2, 3, 4, 5, 6]);
      let data = HashMap::from([(APPLE_COMPANY_ID, AIRPODS_PRO.to_vec())]);

      let adv = advertisement_from(address, -55, &data).unwrap();
      assert_eq!(adv.address, address);
      assert_eq!(adv.rssi, -55);
      assert_eq!(&adv.manufacturer_data[..], &AIRPODS_PRO[..]);
   }

   #[test]
   fn test_advertisement_from_rejects_other_data() {
      let address = Address::new([1, 2, 3, 4, 5, 6]);

      let other_vendor = HashMap::from([(0x0075, AIRPODS_PRO.to_vec())]);
      assert!(advertisement_from(address, -55, &other_vendor).is_none());

      let nearby_info =
         HashMap::from([(APPLE_COMPANY_ID, vec![0x10, 0x05, 0x01, 0x18, 0x44, 0x00, 0x00])]);
      assert!(advertisement_from(address, -55, &nearby_info).is_none());

      let truncated = HashMap::from([(APPLE_COMPANY_ID, AIRPODS_PRO[..20].to_vec())]);
      assert!(advertisement_from(address, -55, &truncated).is_none());
   }

   #[test]
   fn test_data_and_rssi_change_report_once() {
      let mut duplicates = DuplicateFilter::default();
      let address = Address::new([1, 2, 3, 4, 5, 6]);
      let t0 = Instant::now();
      let adv = |rssi, at| Advertisement::new(address, rssi, at, &AIRPODS_PRO);

      assert!(!duplicates.is_duplicate(&adv(-55, t0)));
      // the RSSI property change for the same advertisement
      assert!(duplicates.is_duplicate(&adv(-55, t0 + Duration::from_millis(5))));
      assert!(!duplicates.is_duplicate(&adv(-60, t0 + Duration::from_millis(10))));
      // an idle device still refreshes the monitor
      assert!(!duplicates.is_duplicate(&adv(-60, t0 + Duration::from_secs(1))));

      let mut changed = AIRPODS_PRO;
      changed[6] = 0x99;
      let battery = Advertisement::new(address, -60, t0 + Duration::from_millis(1005), &changed);
      assert!(!duplicates.is_duplicate(&battery));

      duplicates.forget(&address);
      assert!(!duplicates.is_duplicate(&adv(-60, t0 + Duration::from_millis(1010))));
   }
}
