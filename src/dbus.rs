use std::{str::FromStr, sync::Arc};

use bluer::Address;
use log::{info, warn};
use parking_lot::Mutex;
use zbus::{interface, object_server::SignalEmitter};

use crate::{
   bluetooth::control::MonitorControl, config::Config, error::CapodError, monitor::PodMonitor,
   pods::device::PodDevice,
};

pub const SERVICE_NAME: &str = "org.capodd";
pub const OBJECT_PATH: &str = "/org/capodd/monitor";

pub fn devices_json(devices: &[PodDevice]) -> String {
   serde_json::Value::Array(devices.iter().map(PodDevice::to_json).collect()).to_string()
}

pub struct CapodService {
   monitor: PodMonitor,
   control: Arc<MonitorControl>,
   config: Mutex<Config>,
}

impl CapodService {
   pub fn new(monitor: PodMonitor, control: Arc<MonitorControl>, config: Config) -> Self {
      Self {
         monitor,
         control,
         config: Mutex::new(config),
      }
   }

   fn show_all_devices(&self) -> bool {
      self.config.lock().show_all_devices
   }
}

#[interface(name = "org.capodd.Monitor")]
impl CapodService {
   async fn get_devices(&self) -> String {
      devices_json(&self.monitor.visible_devices(self.show_all_devices()))
   }

   async fn get_main_device(&self) -> String {
      let main = self.monitor.main_device().as_ref().map(PodDevice::to_json);
      main.unwrap_or_default().to_string()
   }

   async fn start_monitor(&self) -> zbus::fdo::Result<bool> {
      match self.control.start().await {
         Ok(()) => Ok(true),
         Err(CapodError::AlreadyMonitoring) => Ok(false),
         Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
      }
   }

   async fn stop_monitor(&self) -> bool {
      self.control.stop().await
   }

   /// Pins the main device; an empty address clears the pin.
   async fn set_main_device(&self, address: String) -> zbus::fdo::Result<bool> {
      let address = address.trim();
      let pin = if address.is_empty() {
         None
      } else {
         Some(
            Address::from_str(address)
               .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?,
         )
      };

      self
         .monitor
         .set_main_device_pin(pin)
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      info!("Main device set to {pin:?}");

      let mut config = self.config.lock();
      config.main_device_address = pin.map(|a| a.to_string());
      if let Err(e) = config.save() {
         warn!("Failed to persist main device: {e}");
      }
      Ok(true)
   }

   // Signals
   #[zbus(signal)]
   pub async fn pop_up_show(
      emitter: &SignalEmitter<'_>,
      address: &str,
      device: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn pop_up_close(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(signal, name = "DevicesChanged")]
   pub async fn device_set_changed(emitter: &SignalEmitter<'_>, devices: &str)
   -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn monitoring_changed(emitter: &SignalEmitter<'_>, active: bool) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn monitor_error(emitter: &SignalEmitter<'_>, message: &str) -> zbus::Result<()>;

   #[zbus(property)]
   async fn devices(&self) -> String {
      self.get_devices().await
   }

   #[zbus(property)]
   async fn is_monitoring(&self) -> bool {
      self.control.is_running().await
   }
}
