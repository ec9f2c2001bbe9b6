//! capod D-Bus service
//!
//! Listens to AirPods and Beats proximity pairing advertisements, keeps a live
//! view of nearby accessories and their battery state, and notifies desktop
//! clients when the case of the main device is opened.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{
   signal,
   sync::{Notify, watch},
   time,
};
use zbus::{Connection, connection, object_server::InterfaceRef};

use bluetooth::control::MonitorControl;
use config::{Config, MonitorMode};
use dbus::{CapodService, OBJECT_PATH, SERVICE_NAME};
use event::{EventBus, EventSender, PodEvent};
use monitor::{MonitorOptions, MonitorView, PodMonitor};
use pods::apple::factory::DeviceFactory;
use reaction::{EventPopUp, PopUpReaction};

mod bluetooth;
mod config;
mod dbus;
mod error;
mod event;
mod monitor;
mod pods;
mod reaction;

use crate::{dbus::CapodServiceSignals, error::Result, pods::device::PodDevice};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting capod D-Bus service...");

   let config = Config::load()?;
   info!(
      "Loaded configuration: mode={}, show_all_devices={}, popup={}",
      config.monitor_mode, config.show_all_devices, config.popup_on_case_open
   );

   let event_bus = EventProcessor::new();

   let monitor = PodMonitor::spawn(
      Arc::new(DeviceFactory::default()),
      MonitorOptions::from_config(&config)?,
   );
   let control = MonitorControl::new(monitor.clone(), event_bus.clone()).await?;

   if config.popup_on_case_open {
      let reaction = PopUpReaction::new(EventPopUp::new(event_bus.clone()));
      tokio::spawn(reaction.run(monitor.subscribe()));
   }
   spawn_devices_forwarder(monitor.subscribe(), event_bus.clone(), config.show_all_devices);

   let mode = config.monitor_mode;
   let poll_interval = Duration::from_secs(config.automatic_poll_interval_sec.max(1));
   let service = CapodService::new(monitor, control.clone(), config);

   let connection = connection::Builder::session()?
      .name(SERVICE_NAME)?
      .serve_at(OBJECT_PATH, service)?
      .build()
      .await?;

   info!("capod D-Bus service started at {SERVICE_NAME}");

   event_bus.spawn_dispatcher(connection).await?;

   match mode {
      MonitorMode::Manual => info!("Manual mode, waiting for StartMonitor"),
      MonitorMode::Always => {
         if let Err(e) = control.start().await {
            warn!("Failed to start monitoring: {e}");
         }
      },
      MonitorMode::Automatic => {
         let control = control.clone();
         tokio::spawn(async move { control.run_automatic(poll_interval).await });
      },
   }

   signal::ctrl_c().await?;
   info!("Shutting down capod service...");
   control.stop().await;

   Ok(())
}

/// Publishes the visible device set whenever it changes.
fn spawn_devices_forwarder(
   mut view: watch::Receiver<MonitorView>,
   events: EventSender,
   show_all: bool,
) {
   tokio::spawn(async move {
      let mut last: Vec<PodDevice> = Vec::new();
      while view.changed().await.is_ok() {
         let visible = view.borrow_and_update().visible(show_all);
         let unchanged = visible.len() == last.len()
            && visible
               .iter()
               .zip(&last)
               .all(|(a, b)| a.same_state(b) && a.address() == b.address() && a.rssi() == b.rssi());
         if !unchanged {
            events.emit(PodEvent::DevicesChanged(visible.clone()));
            last = visible;
         }
      }
   });
}

struct EventProcessor {
   queue: SegQueue<PodEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }
}

impl EventProcessor {
   async fn recv(self: &Arc<Self>) -> Option<PodEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(&self, iface: &InterfaceRef<CapodService>, event: PodEvent) -> Result<()> {
      match event {
         PodEvent::DevicesChanged(devices) => {
            iface
               .device_set_changed(&dbus::devices_json(&devices))
               .await?;
            iface.get().await.devices_changed(iface.signal_emitter()).await?;
         },
         PodEvent::PopUpShow(device) => {
            iface
               .pop_up_show(&device.address().to_string(), &device.to_json().to_string())
               .await?;
         },
         PodEvent::PopUpClose => {
            iface.pop_up_close().await?;
         },
         PodEvent::MonitoringChanged(active) => {
            iface.monitoring_changed(active).await?;
            iface
               .get()
               .await
               .is_monitoring_changed(iface.signal_emitter())
               .await?;
         },
         PodEvent::MonitorError(message) => {
            iface.monitor_error(&message).await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, CapodService>(OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: PodEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
