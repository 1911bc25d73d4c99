//! The session state machine.
//!
//! [`SessionMachine`] owns every piece of mutable session state: the
//! current [`SessionState`], the discovery registry, the selected device,
//! cycle progress, the status decoder and the timers. It is driven by three
//! kinds of input, all delivered by the session task one at a time:
//! user commands, transport events and timer expiry. Time is passed in
//! explicitly so the machine can be tested without a runtime.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::ble::transport::{AdapterState, Transport, TransportEvent, WriteMode};
use crate::config::SessionConfig;
use crate::data::{CycleProgress, DeviceId, DiscoveredDevice, SessionState};
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionCondition, SessionEvent};
use crate::protocol::{Command, StatusDecoder, StatusEvent, StatusFrame};
use crate::registry::DeviceRegistry;
use crate::session::timer::{earliest, Timeout};

/// Read-only view of the session published to observers.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionSnapshot {
    /// Current session state.
    pub state: SessionState,
    /// Last reported adapter state.
    pub adapter_state: AdapterState,
    /// Devices found by the current or last scan, weakest signal first.
    pub devices: Vec<DiscoveredDevice>,
    /// The device being connected to or connected.
    pub selected: Option<DiscoveredDevice>,
    /// Progress of the current or last cycle.
    pub progress: CycleProgress,
}

pub(crate) struct SessionMachine {
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    shared: Arc<RwLock<SessionSnapshot>>,
    write_mode: WriteMode,
    block_disconnect_while_running: bool,

    state: SessionState,
    adapter_state: AdapterState,
    registry: DeviceRegistry,
    selected: Option<DiscoveredDevice>,
    progress: CycleProgress,
    decoder: StatusDecoder,
    /// Start command written, waiting for the first progress report.
    cycle_requested: bool,
    /// Scan requested before the adapter reported powered on.
    scan_pending: bool,

    scan_timer: Timeout,
    connect_timer: Timeout,
    disconnect_timer: Timeout,
}

impl SessionMachine {
    pub(crate) fn new(
        config: &SessionConfig,
        transport: Arc<dyn Transport>,
        bus: Arc<EventBus>,
        shared: Arc<RwLock<SessionSnapshot>>,
    ) -> Self {
        Self {
            transport,
            bus,
            shared,
            write_mode: config.write_mode,
            block_disconnect_while_running: config.block_disconnect_while_running,
            state: SessionState::Idle,
            adapter_state: AdapterState::Unknown,
            registry: DeviceRegistry::new(),
            selected: None,
            progress: CycleProgress::default(),
            decoder: StatusDecoder::new(config.framing),
            cycle_requested: false,
            scan_pending: false,
            scan_timer: Timeout::new(config.scan_timeout),
            connect_timer: Timeout::new(config.connect_timeout),
            disconnect_timer: Timeout::new(config.disconnect_timeout),
        }
    }

    /// Get the current state.
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Build a snapshot of the observable state.
    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            adapter_state: self.adapter_state,
            devices: self.registry.snapshot(),
            selected: self.selected.clone(),
            progress: self.progress,
        }
    }

    /// Publish the current snapshot to readers.
    pub(crate) fn sync_snapshot(&self) {
        *self.shared.write() = self.snapshot();
    }

    // === Commands ===

    /// Start (or restart) a scan.
    pub(crate) fn request_scan(&mut self, now: Instant) -> Result<()> {
        if !matches!(self.state, SessionState::Idle | SessionState::Scanning) {
            return Err(Error::InvalidState {
                operation: "scan",
                state: self.state,
            });
        }

        if !self.adapter_state.is_powered_on() {
            if self.adapter_state.is_transient() {
                info!(
                    "Adapter {}, scan will start when it powers on",
                    self.adapter_state
                );
                self.scan_pending = true;
                return Ok(());
            }
            return Err(self.adapter_unavailable());
        }

        self.begin_scan(now);
        Ok(())
    }

    /// Connect to a device from the current or last scan.
    pub(crate) fn select_device(&mut self, identifier: &DeviceId, now: Instant) -> Result<()> {
        match self.state {
            SessionState::Idle | SessionState::Scanning => {}
            SessionState::Running => return Err(self.cycle_conflict()),
            state => {
                return Err(Error::InvalidState {
                    operation: "select a device",
                    state,
                })
            }
        }

        let device = self
            .registry
            .get(identifier)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: identifier.to_string(),
            })?;

        if !self.adapter_state.is_powered_on() {
            return Err(self.adapter_unavailable());
        }

        if self.state == SessionState::Scanning {
            self.scan_timer.cancel();
            self.transport.stop_scan();
        }
        self.scan_pending = false;

        info!("Connecting to {}", device);

        self.clear_devices();
        self.selected = Some(device);
        self.transport.connect(identifier);
        self.connect_timer.arm(now);
        self.set_state(SessionState::Connecting);

        Ok(())
    }

    /// Write the start command to the connected device.
    pub(crate) fn start_cycle(&mut self) -> Result<()> {
        match self.state {
            SessionState::Connected => {}
            SessionState::Running => return Err(self.cycle_conflict()),
            _ => return Err(Error::NotConnected),
        }

        if self.cycle_requested {
            return Err(Error::CommandPending);
        }

        let command = Command::start_cycle();
        debug!("Sending {} to device", command);

        self.transport.write(command.as_bytes(), self.write_mode);
        self.cycle_requested = true;
        self.set_progress(CycleProgress::default());

        Ok(())
    }

    /// Tear down the current scan, connection attempt or link.
    ///
    /// Without `force`, a running cycle blocks the request (when configured
    /// to) and a [`SessionCondition::CycleInProgressConflict`] is raised.
    pub(crate) fn disconnect(&mut self, force: bool, now: Instant) -> Result<()> {
        self.scan_pending = false;

        match self.state {
            SessionState::Idle | SessionState::Disconnecting => Ok(()),
            SessionState::Scanning => {
                info!("Scan cancelled");
                self.scan_timer.cancel();
                self.transport.stop_scan();
                self.set_state(SessionState::Idle);
                Ok(())
            }
            SessionState::Connecting => {
                info!("Connection attempt cancelled");
                self.transport.disconnect();
                self.end_link();
                Ok(())
            }
            SessionState::Running if !force && self.block_disconnect_while_running => {
                Err(self.cycle_conflict())
            }
            SessionState::Connected | SessionState::Running => {
                if self.state == SessionState::Running {
                    warn!("Disconnecting during a running cycle");
                }
                self.transport.disconnect();
                self.disconnect_timer.arm(now);
                self.set_state(SessionState::Disconnecting);
                Ok(())
            }
        }
    }

    /// Stop everything and return to idle.
    pub(crate) fn shutdown(&mut self) {
        match self.state {
            SessionState::Idle => {}
            SessionState::Scanning => self.transport.stop_scan(),
            _ => self.transport.disconnect(),
        }
        self.scan_pending = false;
        self.end_link();
    }

    // === Transport events ===

    pub(crate) fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::PeripheralDiscovered {
                identifier,
                name,
                rssi,
            } => self.on_discovered(identifier, name, rssi),
            TransportEvent::Connected(identifier) => self.on_connected(identifier),
            TransportEvent::ConnectFailed { identifier, reason } => {
                self.on_connect_failed(identifier, reason)
            }
            TransportEvent::Disconnected { identifier, reason } => {
                self.on_disconnected(identifier, reason)
            }
            TransportEvent::DataReceived(data) => self.on_data(&data),
            TransportEvent::WriteFailed { reason } => self.on_write_failed(reason),
            TransportEvent::AdapterStateChanged(state) => self.on_adapter_state(state, now),
        }
    }

    fn on_discovered(&mut self, identifier: DeviceId, name: Option<String>, rssi: Option<i16>) {
        if self.state != SessionState::Scanning {
            trace!("Ignoring discovery of {} while {}", identifier, self.state);
            return;
        }

        if self.registry.on_discovered(identifier, name, rssi) {
            self.emit(SessionEvent::DevicesChanged(self.registry.snapshot()));
        }
    }

    fn on_connected(&mut self, identifier: DeviceId) {
        let is_selected = self.is_selected(&identifier);

        match self.state {
            SessionState::Connecting if is_selected => {
                info!("Connected to {}", identifier);
                self.connect_timer.cancel();
                self.decoder.reset();
                self.cycle_requested = false;
                self.set_progress(CycleProgress::default());
                self.set_state(SessionState::Connected);
            }
            SessionState::Connecting => {
                debug!(
                    "Ignoring connection to {} while connecting to another device",
                    identifier
                );
            }
            SessionState::Idle | SessionState::Scanning => {
                warn!(
                    "Unexpected connection to {} while {}, disconnecting",
                    identifier, self.state
                );
                self.transport.disconnect();
            }
            _ => debug!("Ignoring connection event for {}", identifier),
        }
    }

    fn on_connect_failed(&mut self, identifier: DeviceId, reason: String) {
        if self.state != SessionState::Connecting || !self.is_selected(&identifier) {
            debug!("Ignoring connect failure for {}: {}", identifier, reason);
            return;
        }

        warn!("Connection to {} failed: {}", identifier, reason);
        self.transport.disconnect();
        self.raise(SessionCondition::ConnectFailed { identifier, reason });
        self.end_link();
    }

    fn on_disconnected(&mut self, identifier: DeviceId, reason: Option<String>) {
        if !self.is_selected(&identifier) {
            debug!("Ignoring disconnect of {}", identifier);
            return;
        }

        match self.state {
            SessionState::Connecting => {
                let reason = reason.unwrap_or_else(|| "disconnected while connecting".to_string());
                warn!("Connection to {} failed: {}", identifier, reason);
                self.raise(SessionCondition::ConnectFailed { identifier, reason });
                self.end_link();
            }
            SessionState::Connected | SessionState::Running => {
                warn!("Disconnected from {} ({:?})", identifier, reason);
                self.raise(SessionCondition::UnsolicitedDisconnect { identifier, reason });
                self.end_link();
            }
            SessionState::Disconnecting => {
                info!("Disconnected from {}", identifier);
                self.end_link();
            }
            SessionState::Idle | SessionState::Scanning => {}
        }
    }

    fn on_data(&mut self, data: &[u8]) {
        if !self.state.is_connected() {
            trace!("Ignoring {} bytes received while {}", data.len(), self.state);
            return;
        }

        for frame in self.decoder.push(data) {
            self.apply_status(frame);
        }
    }

    fn on_write_failed(&mut self, reason: String) {
        warn!("Write failed: {}", reason);
        if self.cycle_requested {
            self.cycle_requested = false;
            self.raise(SessionCondition::WriteFailed { reason });
        }
    }

    fn on_adapter_state(&mut self, adapter_state: AdapterState, now: Instant) {
        if self.adapter_state != adapter_state {
            info!(
                "Adapter state changed: {} -> {}",
                self.adapter_state, adapter_state
            );
            self.adapter_state = adapter_state;
            self.emit(SessionEvent::AdapterStateChanged(adapter_state));
        }

        if adapter_state.is_powered_on() {
            if self.scan_pending && self.state == SessionState::Idle {
                info!("Adapter powered on, starting requested scan");
                self.begin_scan(now);
            }
            return;
        }

        if !adapter_state.is_transient() {
            self.scan_pending = false;
        }

        match self.state {
            SessionState::Idle => {}
            SessionState::Scanning => {
                self.scan_timer.cancel();
                self.transport.stop_scan();
                self.raise(SessionCondition::AdapterUnavailable(adapter_state));
                self.set_state(SessionState::Idle);
            }
            _ => {
                self.transport.disconnect();
                self.raise(SessionCondition::AdapterUnavailable(adapter_state));
                self.end_link();
            }
        }
    }

    // === Status messages ===

    fn apply_status(&mut self, frame: StatusFrame) {
        match frame.event {
            StatusEvent::Invalid => self.on_malformed(frame.raw),
            StatusEvent::Progress(value) if value < 1.0 => self.on_progress(value),
            event => self.on_cycle_complete(event),
        }
    }

    fn on_progress(&mut self, value: f32) {
        if self.state == SessionState::Connected && self.cycle_requested {
            info!("Cleaning cycle started");
            self.cycle_requested = false;
            self.set_progress(CycleProgress::running(value));
            self.set_state(SessionState::Running);
            return;
        }

        if self.state == SessionState::Connected {
            debug!("Progress {:.2} reported without a requested cycle", value);
        }
        self.set_progress(StatusEvent::Progress(value).apply(self.progress));
    }

    fn on_cycle_complete(&mut self, event: StatusEvent) {
        let was_active = self.state == SessionState::Running || self.cycle_requested;

        self.cycle_requested = false;
        self.set_progress(event.apply(self.progress));
        if self.state == SessionState::Running {
            self.set_state(SessionState::Connected);
        }

        if was_active {
            info!("Cleaning cycle complete");
            self.emit(SessionEvent::CycleCompleted);
        }
    }

    fn on_malformed(&mut self, raw: String) {
        warn!("Malformed message from device: {:?}", raw);
        self.raise(SessionCondition::MalformedMessage { raw });

        self.cycle_requested = false;
        if self.state == SessionState::Running {
            self.set_state(SessionState::Connected);
        }
        self.set_progress(StatusEvent::Invalid.apply(self.progress));
    }

    // === Timers ===

    /// Get the earliest armed deadline.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        earliest([
            self.scan_timer.deadline(),
            self.connect_timer.deadline(),
            self.disconnect_timer.deadline(),
        ])
    }

    /// Fire every timer whose deadline has passed.
    pub(crate) fn handle_timers(&mut self, now: Instant) {
        if self.scan_timer.take_expired(now) && self.state == SessionState::Scanning {
            info!("Scan timed out with {} device(s) found", self.registry.len());
            self.transport.stop_scan();
            self.raise(SessionCondition::ScanTimeout);
            self.set_state(SessionState::Idle);
        }

        if self.connect_timer.take_expired(now) && self.state == SessionState::Connecting {
            let identifier = self
                .selected
                .as_ref()
                .map(|d| d.identifier.clone())
                .unwrap_or_else(|| DeviceId::new(""));
            warn!("Connection to {} timed out", identifier);
            self.transport.disconnect();
            self.raise(SessionCondition::ConnectTimeout { identifier });
            self.end_link();
        }

        if self.disconnect_timer.take_expired(now) && self.state == SessionState::Disconnecting {
            warn!("No disconnect confirmation from transport, assuming link closed");
            self.end_link();
        }
    }

    // === Internal ===

    fn begin_scan(&mut self, now: Instant) {
        info!("Starting scan");
        self.scan_pending = false;
        self.clear_devices();
        self.transport.start_scan();
        self.scan_timer.arm(now);
        self.set_state(SessionState::Scanning);
    }

    /// Drop the link state and return to idle.
    fn end_link(&mut self) {
        self.scan_timer.cancel();
        self.connect_timer.cancel();
        self.disconnect_timer.cancel();
        self.selected = None;
        self.cycle_requested = false;
        self.decoder.reset();
        self.clear_devices();
        self.set_progress(CycleProgress::default());
        self.set_state(SessionState::Idle);
    }

    fn is_selected(&self, identifier: &DeviceId) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|d| &d.identifier == identifier)
    }

    fn clear_devices(&mut self) {
        if !self.registry.is_empty() {
            self.registry.clear();
            self.emit(SessionEvent::DevicesChanged(Vec::new()));
        }
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }

        self.state = to;
        info!("Session state changed: {} -> {}", from, to);
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn set_progress(&mut self, progress: CycleProgress) {
        if self.progress != progress {
            self.progress = progress;
            self.emit(SessionEvent::ProgressChanged(progress));
        }
    }

    fn adapter_unavailable(&self) -> Error {
        warn!("Bluetooth unavailable: {}", self.adapter_state);
        self.raise(SessionCondition::AdapterUnavailable(self.adapter_state));
        Error::AdapterUnavailable {
            state: self.adapter_state,
        }
    }

    fn cycle_conflict(&self) -> Error {
        warn!("Rejected request: cleaning cycle in progress");
        self.raise(SessionCondition::CycleInProgressConflict);
        Error::CycleInProgress
    }

    fn raise(&self, condition: SessionCondition) {
        self.emit(SessionEvent::Condition(condition));
    }

    fn emit(&self, event: SessionEvent) {
        self.sync_snapshot();
        self.bus.publish(event);
    }
}
