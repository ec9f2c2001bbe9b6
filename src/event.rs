//! Event handling system for monitor and reaction updates.
//!
//! Core components emit [`PodEvent`]s without knowing who listens; the D-Bus
//! layer turns them into signals.

use std::sync::Arc;

use smol_str::SmolStr;

use crate::pods::device::PodDevice;

/// Events that can be emitted by the capod service.
#[derive(Debug, Clone)]
pub enum PodEvent {
   /// The visible device set changed.
   DevicesChanged(Vec<PodDevice>),
   /// Case of the main device was opened, show the popup.
   PopUpShow(PodDevice),
   /// Dismiss the popup.
   PopUpClose,
   /// Scanner started or stopped.
   MonitoringChanged(bool),
   /// Scanning failed.
   MonitorError(SmolStr),
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: PodEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
