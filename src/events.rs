//! Session events and the bus that delivers them.
//!
//! Handlers registered with [`EventBus::subscribe`] run synchronously, in
//! subscription order, on the task that publishes the event (the session
//! task). Async consumers can instead take a broadcast receiver from
//! [`EventBus::subscribe_channel`].
//!
//! Handlers must not block, and must not unregister themselves or other
//! handlers while an event is being delivered: a handler removed during
//! dispatch may still receive the event in flight. A handler that panics is
//! logged and skipped; the remaining handlers and the session keep running.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, trace};

use crate::ble::transport::AdapterState;
use crate::data::{CycleProgress, DeviceId, DiscoveredDevice, SessionState};

/// Failure and warning conditions reported by the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionCondition {
    /// Bluetooth is off, unsupported or not permitted.
    #[error("Bluetooth unavailable: {0}")]
    AdapterUnavailable(AdapterState),

    /// The scan ended without a device being selected.
    #[error("Scan timed out")]
    ScanTimeout,

    /// The selected device did not connect in time.
    #[error("Connection to {identifier} timed out")]
    ConnectTimeout {
        /// The device that did not connect.
        identifier: DeviceId,
    },

    /// The selected device could not be connected.
    #[error("Connection to {identifier} failed: {reason}")]
    ConnectFailed {
        /// The device that could not be connected.
        identifier: DeviceId,
        /// Description of the failure.
        reason: String,
    },

    /// The link dropped without a disconnect request.
    #[error("Disconnected from {identifier}")]
    UnsolicitedDisconnect {
        /// The device that disconnected.
        identifier: DeviceId,
        /// Platform-provided reason, if any.
        reason: Option<String>,
    },

    /// A status message could not be decoded.
    #[error("Malformed message: {raw:?}")]
    MalformedMessage {
        /// The message text as received.
        raw: String,
    },

    /// A disruptive request was made while a cycle is running.
    #[error("Cleaning cycle in progress")]
    CycleInProgressConflict,

    /// A command could not be written to the device.
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// Description of the failure.
        reason: String,
    },
}

impl SessionCondition {
    /// Check if the condition blocks scanning and connecting until resolved
    /// outside the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AdapterUnavailable(_))
    }

    /// Check if the condition is a warning that left the session unchanged.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::CycleInProgressConflict | Self::MalformedMessage { .. }
        )
    }
}

/// Events published by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged {
        /// The previous state.
        from: SessionState,
        /// The new state.
        to: SessionState,
    },
    /// The Bluetooth adapter changed state.
    AdapterStateChanged(AdapterState),
    /// The discovered device list changed.
    DevicesChanged(Vec<DiscoveredDevice>),
    /// Cycle progress changed.
    ProgressChanged(CycleProgress),
    /// The running cycle finished.
    CycleCompleted,
    /// A failure or warning occurred.
    Condition(SessionCondition),
}

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Publish/subscribe fan-out for [`SessionEvent`]s.
pub struct EventBus {
    /// Registered handlers in subscription order.
    handlers: RwLock<Vec<(u64, Handler)>>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Channel for async subscribers.
    event_tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a new bus whose broadcast channel holds `capacity` events.
    pub fn new(capacity: usize) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Arc::new(Self {
            handlers: RwLock::new(Vec::new()),
            callback_counter: AtomicU64::new(0),
            event_tx,
        })
    }

    /// Register a handler; it stays registered until the returned handle is
    /// dropped or unregistered.
    pub fn subscribe<F>(self: &Arc<Self>, handler: F) -> CallbackHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        self.handlers.write().push((callback_id, Arc::new(handler)));

        let bus: Weak<Self> = Arc::downgrade(self);
        CallbackHandle::new(callback_id, move || {
            if let Some(bus) = bus.upgrade() {
                bus.handlers.write().retain(|(id, _)| *id != callback_id);
            }
        })
    }

    /// Get a receiver for all events published from now on.
    pub fn subscribe_channel(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Deliver an event to every handler, then to channel subscribers.
    pub fn publish(&self, event: SessionEvent) {
        trace!("Publishing {:?}", event);

        // Release the lock before calling out so handlers may subscribe.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!("Event handler panicked on {:?}", event);
            }
        }

        let _ = self.event_tx.send(event);
    }

    /// Get the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .field("channel_receivers", &self.event_tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new(8);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = calls.clone();
        let _h1 = bus.subscribe(move |_| first.lock().push(1));
        let second = calls.clone();
        let _h2 = bus.subscribe(move |_| second.lock().push(2));

        bus.publish(SessionEvent::CycleCompleted);
        bus.publish(SessionEvent::CycleCompleted);

        assert_eq!(*calls.lock(), vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe_channel();
        let count = Arc::new(AtomicU64::new(0));

        let _h1 = bus.subscribe(|_| panic!("handler failure"));
        let counter = count.clone();
        let _h2 = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(SessionEvent::CycleCompleted);
        bus.publish(SessionEvent::CycleCompleted);

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::CycleCompleted);
        assert_eq!(bus.handler_count(), 2);
    }

    #[test]
    fn test_drop_handle_unregisters() {
        let bus = EventBus::new(8);
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let handle = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.handler_count(), 1);

        bus.publish(SessionEvent::CycleCompleted);
        drop(handle);
        bus.publish(SessionEvent::CycleCompleted);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn test_unregister_after_bus_dropped() {
        let bus = EventBus::new(8);
        let handle = bus.subscribe(|_| {});
        drop(bus);
        handle.unregister();
    }

    #[test]
    fn test_channel_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe_channel();

        bus.publish(SessionEvent::AdapterStateChanged(AdapterState::PoweredOn));

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::AdapterStateChanged(AdapterState::PoweredOn)
        );
    }

    #[test]
    fn test_condition_classification() {
        assert!(SessionCondition::AdapterUnavailable(AdapterState::PoweredOff).is_fatal());
        assert!(!SessionCondition::ScanTimeout.is_fatal());
        assert!(SessionCondition::CycleInProgressConflict.is_warning());
        assert!(!SessionCondition::ScanTimeout.is_warning());
    }

    #[test]
    fn test_condition_display() {
        let condition = SessionCondition::ConnectTimeout {
            identifier: DeviceId::new("A"),
        };
        assert_eq!(condition.to_string(), "Connection to A timed out");
    }
}
