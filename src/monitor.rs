//! Live view over nearby accessories.
//!
//! The monitor owns the device factory and the map of current snapshots. It
//! runs as a single actor task and publishes the device list together with the
//! main device as one [`MonitorView`], so observers never see one without the
//! other.

use std::{
   collections::HashMap,
   sync::Arc,
   time::{Duration, Instant},
};

use bluer::Address;
use log::{debug, info};
use tokio::{
   select,
   sync::{mpsc, watch},
   time::{self, MissedTickBehavior},
};

use crate::{
   config::Config,
   error::{CapodError, Result},
   pods::{Advertisement, PodId, apple::factory::DeviceFactory, device::PodDevice},
};

/// Interval to drop devices that stopped advertising
const PRUNE_INTERVAL: Duration = Duration::from_secs(2);
/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 1000;

/// Monitor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOptions {
   /// Snapshots older than this are dropped.
   pub device_timeout: Duration,
   /// Address of the device to use as main device.
   pub main_device_pin: Option<Address>,
}

impl Default for MonitorOptions {
   fn default() -> Self {
      Self {
         device_timeout: Duration::from_secs(20),
         main_device_pin: None,
      }
   }
}

impl MonitorOptions {
   pub fn from_config(config: &Config) -> Result<Self> {
      Ok(Self {
         device_timeout: Duration::from_secs(config.device_timeout_sec),
         main_device_pin: config.main_device()?,
      })
   }
}

#[derive(Debug)]
enum MonitorCommand {
   Advertisement(Advertisement),
   SetMainDevicePin(Option<Address>),
}

/// Latest device list and main device, published as one value.
#[derive(Debug, Clone, Default)]
pub struct MonitorView {
   /// Strongest signal first.
   pub devices: Arc<[PodDevice]>,
   pub main: Option<PodDevice>,
}

impl MonitorView {
   /// Devices to present: all of them, or only the main device.
   pub fn visible(&self, show_all: bool) -> Vec<PodDevice> {
      visible_devices(&self.devices, self.main.as_ref(), show_all)
   }
}

/// Handle to the monitor actor. Cheap to clone.
#[derive(Clone)]
pub struct PodMonitor {
   inbox: mpsc::Sender<MonitorCommand>,
   view: watch::Receiver<MonitorView>,
}

impl PodMonitor {
   /// Spawns the monitor actor on the current runtime.
   pub fn spawn(factory: Arc<DeviceFactory>, options: MonitorOptions) -> Self {
      let (inbox, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let (view_tx, view) = watch::channel(MonitorView::default());

      tokio::spawn(
         MonitorActor {
            state: MonitorState::new(factory, options),
            command_rx,
            view_tx,
         }
         .run(),
      );

      Self { inbox, view }
   }

   /// Feeds one advertisement into the pipeline.
   pub async fn report(&self, advertisement: Advertisement) -> Result<()> {
      self
         .inbox
         .send(MonitorCommand::Advertisement(advertisement))
         .await
         .map_err(|_| CapodError::MonitorShutdown)
   }

   /// Pins the main device to an address, or clears the pin.
   pub async fn set_main_device_pin(&self, address: Option<Address>) -> Result<()> {
      self
         .inbox
         .send(MonitorCommand::SetMainDevicePin(address))
         .await
         .map_err(|_| CapodError::MonitorShutdown)
   }

   /// Live view, updated after every change of the device map or the pin.
   pub fn subscribe(&self) -> watch::Receiver<MonitorView> {
      self.view.clone()
   }

   pub fn main_device(&self) -> Option<PodDevice> {
      self.view.borrow().main.clone()
   }

   pub fn visible_devices(&self, show_all: bool) -> Vec<PodDevice> {
      self.view.borrow().visible(show_all)
   }
}

/// Picks the main device.
///
/// A pinned address selects that device or nothing at all; without a pin the
/// strongest signal wins.
pub fn select_main_device(devices: &[PodDevice], pin: Option<Address>) -> Option<PodDevice> {
   match pin {
      Some(address) => devices.iter().find(|d| d.address() == address).cloned(),
      None => devices.iter().max_by_key(|d| d.rssi()).cloned(),
   }
}

pub fn visible_devices(
   devices: &[PodDevice],
   main: Option<&PodDevice>,
   show_all: bool,
) -> Vec<PodDevice> {
   if show_all {
      devices.to_vec()
   } else {
      main.cloned().into_iter().collect()
   }
}

/// Snapshot map and selection, independent of the runtime.
struct MonitorState {
   factory: Arc<DeviceFactory>,
   options: MonitorOptions,
   devices: HashMap<PodId, PodDevice>,
}

impl MonitorState {
   fn new(factory: Arc<DeviceFactory>, options: MonitorOptions) -> Self {
      Self {
         factory,
         options,
         devices: HashMap::new(),
      }
   }

   /// Returns whether the device map changed.
   fn apply(&mut self, advertisement: &Advertisement) -> bool {
      let Some(device) = self.factory.create(advertisement) else {
         return false;
      };
      let now = device.seen_at();
      debug!("Device update {}: {device:?}", device.id());
      if self.devices.insert(device.id(), device).is_none() {
         info!("Tracking {} devices", self.devices.len());
      }
      self.prune(now);
      true
   }

   /// Drops stale snapshots, returns whether any were dropped.
   fn prune(&mut self, now: Instant) -> bool {
      let before = self.devices.len();
      let timeout = self.options.device_timeout;
      self
         .devices
         .retain(|_, d| now.saturating_duration_since(d.seen_at()) <= timeout);
      let removed = before - self.devices.len();
      if removed > 0 {
         debug!("Pruned {removed} stale devices");
      }
      removed > 0
   }

   fn sorted(&self) -> Vec<PodDevice> {
      let mut devices: Vec<_> = self.devices.values().cloned().collect();
      devices.sort_by(|a, b| b.rssi().cmp(&a.rssi()).then_with(|| a.id().cmp(&b.id())));
      devices
   }

   fn view(&self) -> MonitorView {
      let sorted = self.sorted();
      let main = select_main_device(&sorted, self.options.main_device_pin);
      MonitorView {
         devices: Arc::from(sorted),
         main,
      }
   }
}

struct MonitorActor {
   state: MonitorState,
   command_rx: mpsc::Receiver<MonitorCommand>,
   view_tx: watch::Sender<MonitorView>,
}

impl MonitorActor {
   async fn run(mut self) {
      info!("Pod monitor starting up");

      let mut prune_interval = time::interval(PRUNE_INTERVAL);
      prune_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
         select! {
             _ = prune_interval.tick() => {
                 if self.state.prune(Instant::now()) {
                     self.publish();
                 }
             }
             cmd = self.command_rx.recv() => {
                 let Some(cmd) = cmd else {
                     info!("Pod monitor shutting down");
                     break;
                 };
                 self.handle_command(cmd);
             }
         }
      }
   }

   fn handle_command(&mut self, cmd: MonitorCommand) {
      match cmd {
         MonitorCommand::Advertisement(advertisement) => {
            if self.state.apply(&advertisement) {
               self.publish();
            }
         },
         MonitorCommand::SetMainDevicePin(address) => {
            info!("Main device pin set to {address:?}");
            self.state.options.main_device_pin = address;
            self.publish();
         },
      }
   }

   fn publish(&self) {
      self.view_tx.send_replace(self.state.view());
   }
}
