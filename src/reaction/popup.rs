//! Case-open popup reaction.
//!
//! Watches the main device and asks a [`PopUpWindow`] to show itself when the
//! case lid opens. Advertisements flap between open and unknown near the
//! signal threshold, so repeated opens of the same device are debounced with
//! a cooldown that only an explicit close resets.

use std::{
   collections::HashMap,
   mem,
   time::{Duration, Instant},
};

use log::{debug, info, trace, warn};
use tokio::sync::watch;

use crate::{
   event::{EventSender, PodEvent},
   monitor::MonitorView,
   pods::{
      PodId,
      device::{DualPods, LidState, PodDevice},
   },
};

/// Minimum time between two popups for the same device.
const COOLDOWN: Duration = Duration::from_secs(10);

/// Presentation of the popup.
pub trait PopUpWindow: Send {
   fn show(&mut self, device: &PodDevice);
   fn close(&mut self);
}

/// Forwards popup requests to the event bus.
pub struct EventPopUp {
   events: EventSender,
}

impl EventPopUp {
   pub fn new(events: EventSender) -> Self {
      Self { events }
   }
}

impl PopUpWindow for EventPopUp {
   fn show(&mut self, device: &PodDevice) {
      self.events.emit(PodEvent::PopUpShow(device.clone()));
   }

   fn close(&mut self) {
      self.events.emit(PodEvent::PopUpClose);
   }
}

/// Lid edge detection for the main device.
///
/// Not shareable; updates must arrive one at a time in order.
pub struct PopUpReaction<W> {
   window: W,
   previous: Option<PodDevice>,
   cooldowns: HashMap<PodId, Instant>,
}

impl<W: PopUpWindow> PopUpReaction<W> {
   pub fn new(window: W) -> Self {
      Self {
         window,
         previous: None,
         cooldowns: HashMap::new(),
      }
   }

   #[cfg(test)]
   pub const fn window(&self) -> &W {
      &self.window
   }

   /// Consumes main device updates until the monitor goes away.
   pub async fn run(mut self, mut view: watch::Receiver<MonitorView>) {
      info!("Popup reaction started");
      loop {
         let current = view.borrow_and_update().main.clone();
         self.update(current.as_ref(), Instant::now());
         if view.changed().await.is_err() {
            break;
         }
      }
      info!("Popup reaction stopped");
   }

   /// Handles one main device update.
   pub fn update(&mut self, current: Option<&PodDevice>, now: Instant) {
      let unchanged = match (self.previous.as_ref(), current) {
         (Some(prev), Some(cur)) => prev.raw_data() == cur.raw_data(),
         (None, None) => true,
         _ => false,
      };
      if unchanged {
         return;
      }

      let previous = mem::replace(&mut self.previous, current.cloned());
      let Some(device) = current else {
         return;
      };
      let Some(current) = device.as_dual() else {
         return;
      };
      let previous = match previous.as_ref().map(PodDevice::as_dual) {
         None => None,
         Some(Some(dual)) => Some(dual),
         Some(None) => return,
      };

      trace!(
         "previous={:?} ({:?}), current={:02X} ({})",
         previous.map(DualPods::raw_case_lid_state),
         previous.map(DualPods::lid_state),
         current.raw_case_lid_state(),
         current.lid_state()
      );
      trace!(
         "previous-id={:?}, current-id={}",
         previous.map(DualPods::id),
         current.id()
      );

      let previous_id = previous.map(DualPods::id);
      let previous_lid = previous.map(DualPods::lid_state);
      let current_lid = Some(current.lid_state());

      let same_device_lid_changed = previous_id == Some(current.id()) && previous_lid != current_lid;
      let new_device_lid_differs = previous_id != Some(current.id()) && previous_lid != current_lid;

      if same_device_lid_changed || new_device_lid_differs {
         debug!("Case lid status changed for monitored device.");
         self.try_pop(device, current, now);
      }
   }

   fn try_pop(&mut self, device: &PodDevice, current: &DualPods, now: Instant) {
      let id = current.id();
      match current.lid_state() {
         LidState::Open => {
            if let Some(last_shown) = self.cooldowns.get(&id) {
               let since = now.saturating_duration_since(*last_shown);
               debug!("Time since last popup: {since:?}");
               if since < COOLDOWN {
                  info!("Popup is still on cooldown: {since:?}");
                  return;
               }
            }
            self.cooldowns.insert(id, now);
            info!("Show popup");
            self.window.show(device);
         },
         LidState::Closed => {
            info!("Lid was actively closed, resetting cooldown.");
            self.cooldowns.remove(&id);
            info!("Hide popup");
            self.window.close();
         },
         LidState::Unknown => {
            warn!("Lid was not actively closed, refreshing cooldown.");
            self.cooldowns.insert(id, now);
            info!("Hide popup");
            self.window.close();
         },
      }
   }
}
