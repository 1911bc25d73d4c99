//! Cleaner session: the command and observation boundary.
//!
//! A [`Session`] runs the state machine on its own tokio task. Commands are
//! queued to that task and answered once the machine has processed them;
//! transport events and timer expiry are consumed on the same task, so every
//! state transition happens in one place, one at a time.
//!
//! When a transport event and a timer become ready together, the transport
//! event is handled first.

pub(crate) mod machine;
pub(crate) mod timer;

pub use machine::SessionSnapshot;

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::ble::adapter::BtleplugTransport;
use crate::ble::transport::{AdapterState, Transport, TransportEvent};
use crate::config::{AdapterConfig, SessionConfig};
use crate::data::{CycleProgress, DeviceId, DiscoveredDevice, SessionState};
use crate::error::{Error, Result};
use crate::events::{CallbackHandle, EventBus, SessionEvent};
use machine::SessionMachine;

/// Capacity of the command queue.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Commands sent from [`Session`] handles to the session task.
enum Request {
    Scan(oneshot::Sender<Result<()>>),
    Select(DeviceId, oneshot::Sender<Result<()>>),
    StartCycle(oneshot::Sender<Result<()>>),
    Disconnect {
        force: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown(oneshot::Sender<Result<()>>),
}

/// Handle to a running cleaner session.
///
/// All mutable session state lives on the session task; this handle only
/// queues commands and reads published snapshots.
pub struct Session {
    /// Command queue to the session task.
    requests: mpsc::Sender<Request>,
    /// Event fan-out.
    bus: Arc<EventBus>,
    /// Latest published snapshot.
    shared: Arc<RwLock<SessionSnapshot>>,
    /// Handle to the session task.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Start a session on a custom transport.
    ///
    /// `events` must be the receiving end of the channel the transport emits
    /// its [`TransportEvent`]s on. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::new(config.event_capacity);
        let shared = Arc::new(RwLock::new(SessionSnapshot::default()));
        let machine = SessionMachine::new(&config, transport, bus.clone(), shared.clone());
        let (requests, request_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let task = tokio::spawn(run(machine, request_rx, events));

        Ok(Self {
            requests,
            bus,
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    /// Start a session on the system Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or Bluetooth is not
    /// available.
    pub async fn with_bluetooth(config: SessionConfig, adapter: AdapterConfig) -> Result<Self> {
        config.validate()?;

        let (transport, events) = BtleplugTransport::new(adapter).await?;

        Self::new(Arc::new(transport), events, config)
    }

    // === Commands ===

    /// Start scanning for cleaners, clearing the previous results.
    ///
    /// If the adapter has not reported its state yet, the scan starts as
    /// soon as it reports powered on.
    pub async fn request_scan(&self) -> Result<()> {
        self.call(Request::Scan).await
    }

    /// Connect to a device from the current or last scan.
    pub async fn select_device(&self, identifier: impl Into<DeviceId>) -> Result<()> {
        let identifier = identifier.into();
        self.call(|reply| Request::Select(identifier, reply)).await
    }

    /// Send the start command to the connected cleaner.
    pub async fn start_cycle(&self) -> Result<()> {
        self.call(Request::StartCycle).await
    }

    /// Stop scanning, cancel a connection attempt or disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleInProgress`] while a cycle is running (unless
    /// disabled in the configuration); use [`Session::force_disconnect`] to
    /// disconnect anyway.
    pub async fn disconnect(&self) -> Result<()> {
        self.call(|reply| Request::Disconnect {
            force: false,
            reply,
        })
        .await
    }

    /// Disconnect even if a cycle is running.
    pub async fn force_disconnect(&self) -> Result<()> {
        self.call(|reply| Request::Disconnect { force: true, reply })
            .await
    }

    /// Clean shutdown: stop scanning, disconnect and end the session task.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down session");

        let result = self.call(Request::Shutdown).await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        match result {
            Err(Error::SessionClosed) => Ok(()),
            other => other,
        }
    }

    async fn call<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Request,
    {
        let (reply, response) = oneshot::channel();

        self.requests
            .send(make(reply))
            .await
            .map_err(|_| Error::SessionClosed)?;

        response.await.map_err(|_| Error::SessionClosed)?
    }

    // === Observation ===

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        self.shared.read().state
    }

    /// Get the last reported adapter state.
    pub fn adapter_state(&self) -> AdapterState {
        self.shared.read().adapter_state
    }

    /// Get the discovered devices, weakest signal first.
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.shared.read().devices.clone()
    }

    /// Get the device being connected to or connected.
    pub fn selected_device(&self) -> Option<DiscoveredDevice> {
        self.shared.read().selected.clone()
    }

    /// Get the progress of the current or last cycle.
    pub fn progress(&self) -> CycleProgress {
        self.shared.read().progress
    }

    /// Get a full snapshot of the observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.read().clone()
    }

    /// Register a callback for every session event.
    ///
    /// The callback runs on the session task and must not block.
    pub fn subscribe<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    /// Subscribe to session events as an async channel.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe_channel()
    }

    /// Check if the session task is still running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("adapter_state", &self.adapter_state())
            .finish()
    }
}

/// Wait until `deadline`, or forever if there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The session task.
async fn run(
    mut machine: SessionMachine,
    mut requests: mpsc::Receiver<Request>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    debug!("Session task started");
    machine.sync_snapshot();

    let mut events_open = true;

    loop {
        let deadline = machine.next_deadline();

        tokio::select! {
            biased;

            event = events.recv(), if events_open => match event {
                Some(event) => machine.handle_transport_event(event, Instant::now()),
                None => {
                    debug!("Transport event channel closed");
                    events_open = false;
                }
            },
            request = requests.recv() => match request {
                Some(Request::Shutdown(reply)) => {
                    machine.shutdown();
                    let _ = reply.send(Ok(()));
                    break;
                }
                Some(request) => handle_request(&mut machine, request),
                None => {
                    machine.shutdown();
                    break;
                }
            },
            _ = sleep_until(deadline) => machine.handle_timers(Instant::now()),
        }
    }

    machine.sync_snapshot();
    debug!("Session task ended in state {}", machine.state());
}

fn handle_request(machine: &mut SessionMachine, request: Request) {
    let now = Instant::now();

    let (result, reply) = match request {
        Request::Scan(reply) => (machine.request_scan(now), reply),
        Request::Select(identifier, reply) => (machine.select_device(&identifier, now), reply),
        Request::StartCycle(reply) => (machine.start_cycle(), reply),
        Request::Disconnect { force, reply } => (machine.disconnect(force, now), reply),
        Request::Shutdown(reply) => {
            machine.shutdown();
            (Ok(()), reply)
        }
    };

    if let Err(e) = &result {
        debug!("Command rejected: {}", e);
    }
    let _ = reply.send(result);
}
