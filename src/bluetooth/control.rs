//! Scanner lifecycle.
//!
//! Owns the BlueZ session and at most one scanner task. Start and stop come
//! from D-Bus, from the monitor mode at startup, or from the automatic mode
//! poller.

use std::{sync::Arc, time::Duration};

use bluer::Session;
use log::{debug, error, info, warn};
use tokio::{
   sync::Mutex,
   task::JoinHandle,
   time::{self, MissedTickBehavior},
};

use crate::{
   bluetooth::scanner,
   error::{CapodError, Result},
   event::{EventSender, PodEvent},
   monitor::PodMonitor,
   pods::recognition,
};

pub struct MonitorControl {
   session: Session,
   monitor: PodMonitor,
   events: EventSender,
   scanner: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorControl {
   pub async fn new(monitor: PodMonitor, events: EventSender) -> Result<Arc<Self>> {
      let session = Session::new().await?;
      Ok(Arc::new(Self {
         session,
         monitor,
         events,
         scanner: Mutex::new(None),
      }))
   }

   pub async fn is_running(&self) -> bool {
      self
         .scanner
         .lock()
         .await
         .as_ref()
         .is_some_and(|handle| !handle.is_finished())
   }

   /// Starts scanning on the default adapter.
   pub async fn start(&self) -> Result<()> {
      let mut scanner = self.scanner.lock().await;
      if scanner.as_ref().is_some_and(|handle| !handle.is_finished()) {
         return Err(CapodError::AlreadyMonitoring);
      }

      let adapter = match self.prepare_adapter().await {
         Ok(adapter) => adapter,
         Err(e) => {
            error!("Failed to start scanner: {e}");
            self.events.emit(PodEvent::MonitorError(e.to_string().into()));
            return Err(e);
         },
      };

      let monitor = self.monitor.clone();
      let events = self.events.clone();
      *scanner = Some(tokio::spawn(async move {
         if let Err(e) = scanner::run(adapter, monitor).await {
            error!("Scanner failed: {e}");
            events.emit(PodEvent::MonitorError(e.to_string().into()));
         }
         events.emit(PodEvent::MonitoringChanged(false));
      }));

      info!("Monitoring started");
      self.events.emit(PodEvent::MonitoringChanged(true));
      Ok(())
   }

   async fn prepare_adapter(&self) -> Result<bluer::Adapter> {
      let adapter = self.session.default_adapter().await?;
      if !adapter.is_powered().await? {
         info!("Powering on adapter {}", adapter.name());
         adapter.set_powered(true).await?;
      }
      Ok(adapter)
   }

   /// Stops the scanner, returns whether one was running.
   pub async fn stop(&self) -> bool {
      let Some(handle) = self.scanner.lock().await.take() else {
         return false;
      };
      if handle.is_finished() {
         return false;
      }
      handle.abort();
      info!("Monitoring stopped");
      self.events.emit(PodEvent::MonitoringChanged(false));
      true
   }

   async fn pods_connected(&self) -> Result<bool> {
      for name in self.session.adapter_names().await? {
         let adapter = self.session.adapter(&name)?;
         if recognition::has_connected_pods(&adapter).await? {
            return Ok(true);
         }
      }
      Ok(false)
   }

   /// Scans only while an Apple audio accessory is connected.
   pub async fn run_automatic(&self, poll_interval: Duration) {
      info!("Automatic monitoring, polling every {poll_interval:?}");
      let mut poll = time::interval(poll_interval);
      poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
         poll.tick().await;
         let connected = match self.pods_connected().await {
            Ok(connected) => connected,
            Err(e) => {
               warn!("Failed to check connected devices: {e}");
               continue;
            },
         };

         let running = self.is_running().await;
         debug!("Automatic poll: connected={connected}, running={running}");
         if connected && !running {
            info!("Apple audio device connected, starting scanner");
            if let Err(e) = self.start().await {
               warn!("Automatic start failed: {e}");
            }
         } else if !connected && running {
            info!("No Apple audio device connected, stopping scanner");
            self.stop().await;
         }
      }
   }
}
