//! [`Transport`] backed by the system Bluetooth adapter.
//!
//! Every radio operation is spawned onto the runtime the transport was
//! created on; results come back as [`TransportEvent`]s.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::connection::UartLink;
use crate::ble::transport::{AdapterState, Transport, TransportEvent, WriteMode};
use crate::config::AdapterConfig;
use crate::data::DeviceId;
use crate::error::{Error, Result};

/// The peripheral currently being connected to or connected.
struct ActiveLink {
    identifier: DeviceId,
    peripheral: Peripheral,
    /// Set once the UART link is ready.
    link: Option<Arc<UartLink>>,
    connect_task: Option<JoinHandle<()>>,
    notify_task: Option<JoinHandle<()>>,
}

impl ActiveLink {
    fn abort_tasks(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }
}

/// State shared with spawned radio tasks.
struct Shared {
    config: AdapterConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    adapter_state: RwLock<AdapterState>,
    is_scanning: RwLock<bool>,
    /// Peripherals seen since the transport was created.
    peripherals: RwLock<HashMap<DeviceId, Peripheral>>,
    active: Mutex<Option<ActiveLink>>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!("Transport event dropped, session gone");
        }
    }

    fn set_adapter_state(&self, state: AdapterState) {
        let changed = {
            let mut current = self.adapter_state.write();
            let changed = *current != state;
            *current = state;
            changed
        };

        if changed {
            info!("Bluetooth adapter {}", state);
        }
        self.emit(TransportEvent::AdapterStateChanged(state));
    }

    fn is_active(&self, identifier: &DeviceId) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| &a.identifier == identifier)
    }
}

/// [`Transport`] implementation using `btleplug`.
pub struct BtleplugTransport {
    adapter: Adapter,
    shared: Arc<Shared>,
    runtime: Handle,
    central_task: JoinHandle<()>,
}

impl BtleplugTransport {
    /// Open the first system Bluetooth adapter.
    ///
    /// Returns the transport and the channel its events are delivered on.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(
        config: AdapterConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        let central_events = adapter.events().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            events: tx,
            adapter_state: RwLock::new(AdapterState::Unknown),
            is_scanning: RwLock::new(false),
            peripherals: RwLock::new(HashMap::new()),
            active: Mutex::new(None),
        });

        let initial = match adapter.adapter_state().await {
            Ok(state) => AdapterState::from(state),
            Err(e) => {
                debug!("Adapter state not reported ({}), assuming powered on", e);
                AdapterState::PoweredOn
            }
        };
        shared.set_adapter_state(initial);

        let central_task = tokio::spawn(central_loop(
            adapter.clone(),
            central_events,
            shared.clone(),
        ));

        Ok((
            Self {
                adapter,
                shared,
                runtime: Handle::current(),
                central_task,
            },
            rx,
        ))
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Re-emit the current adapter state if it does not allow radio work.
    fn ensure_powered_on(&self) -> bool {
        let state = *self.shared.adapter_state.read();
        if state.is_powered_on() {
            return true;
        }

        debug!("Adapter {}, request dropped", state);
        self.shared.emit(TransportEvent::AdapterStateChanged(state));
        false
    }
}

impl Transport for BtleplugTransport {
    fn start_scan(&self) {
        if !self.ensure_powered_on() {
            return;
        }

        *self.shared.is_scanning.write() = true;

        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let filter = scan_filter(&shared.config);

        self.runtime.spawn(async move {
            info!("Starting BLE scan");
            if let Err(e) = adapter.start_scan(filter).await {
                error!("Failed to start scan: {}", e);
                *shared.is_scanning.write() = false;
                if let Some(state) = adapter_state_for_error(&e) {
                    shared.set_adapter_state(state);
                }
            }
        });
    }

    fn stop_scan(&self) {
        {
            let mut scanning = self.shared.is_scanning.write();
            if !*scanning {
                debug!("Not scanning, ignoring stop request");
                return;
            }
            *scanning = false;
        }

        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            info!("Stopping BLE scan");
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
    }

    fn connect(&self, identifier: &DeviceId) {
        if !self.ensure_powered_on() {
            return;
        }

        let Some(peripheral) = self.shared.peripherals.read().get(identifier).cloned() else {
            self.shared.emit(TransportEvent::ConnectFailed {
                identifier: identifier.clone(),
                reason: "unknown peripheral".to_string(),
            });
            return;
        };

        self.disconnect();

        *self.shared.active.lock() = Some(ActiveLink {
            identifier: identifier.clone(),
            peripheral: peripheral.clone(),
            link: None,
            connect_task: None,
            notify_task: None,
        });

        let task = self.runtime.spawn(open_link(
            identifier.clone(),
            peripheral,
            self.shared.clone(),
        ));

        if let Some(active) = self.shared.active.lock().as_mut() {
            if &active.identifier == identifier && active.link.is_none() {
                active.connect_task = Some(task);
            }
        }
    }

    fn disconnect(&self) {
        let Some(mut active) = self.shared.active.lock().take() else {
            return;
        };
        active.abort_tasks();

        let shared = self.shared.clone();
        self.runtime.spawn(async move {
            let result = match &active.link {
                Some(link) => link.close().await,
                None => active.peripheral.disconnect().await.map_err(Error::from),
            };
            if let Err(e) = result {
                warn!("Failed to disconnect from {}: {}", active.identifier, e);
            }

            shared.emit(TransportEvent::Disconnected {
                identifier: active.identifier,
                reason: None,
            });
        });
    }

    fn write(&self, data: &[u8], mode: WriteMode) {
        let link = self
            .shared
            .active
            .lock()
            .as_ref()
            .and_then(|a| a.link.clone());

        let Some(link) = link else {
            self.shared.emit(TransportEvent::WriteFailed {
                reason: Error::NotConnected.to_string(),
            });
            return;
        };

        let data = data.to_vec();
        let shared = self.shared.clone();
        self.runtime.spawn(async move {
            if let Err(e) = link.write(&data, mode).await {
                warn!("Write failed: {}", e);
                shared.emit(TransportEvent::WriteFailed {
                    reason: e.to_string(),
                });
            }
        });
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.central_task.abort();

        if let Some(mut active) = self.shared.active.lock().take() {
            active.abort_tasks();
            self.runtime.spawn(async move {
                let _ = active.peripheral.disconnect().await;
            });
        }
    }
}

impl std::fmt::Debug for BtleplugTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugTransport")
            .field("adapter_state", &*self.shared.adapter_state.read())
            .field("is_scanning", &*self.shared.is_scanning.read())
            .finish()
    }
}

/// Build the scan filter for `config`.
fn scan_filter(config: &AdapterConfig) -> ScanFilter {
    if config.filter_by_service {
        ScanFilter {
            services: vec![config.service_uuid],
        }
    } else {
        ScanFilter::default()
    }
}

/// Get the adapter state implied by a failed radio call, if any.
fn adapter_state_for_error(error: &btleplug::Error) -> Option<AdapterState> {
    match error {
        btleplug::Error::PermissionDenied => Some(AdapterState::Unauthorized),
        btleplug::Error::NotSupported(_) => Some(AdapterState::Unsupported),
        _ => None,
    }
}

/// Connect and report the outcome, unless the attempt was cancelled.
async fn open_link(identifier: DeviceId, peripheral: Peripheral, shared: Arc<Shared>) {
    info!("Connecting to {}", identifier);

    match UartLink::open(peripheral, &shared.config).await {
        Ok(link) => {
            let link = Arc::new(link);

            let installed = {
                let mut active = shared.active.lock();
                match active.as_mut() {
                    Some(a) if a.identifier == identifier && a.link.is_none() => {
                        a.notify_task = Some(link.spawn_notifications(shared.events.clone()));
                        a.link = Some(link.clone());
                        a.connect_task = None;
                        true
                    }
                    _ => false,
                }
            };

            if installed {
                info!("UART link to {} ready", identifier);
                shared.emit(TransportEvent::Connected(identifier));
            } else {
                debug!("Connection to {} no longer wanted, closing", identifier);
                let _ = link.close().await;
            }
        }
        Err(e) => {
            let was_active = {
                let mut active = shared.active.lock();
                if active.as_ref().is_some_and(|a| a.identifier == identifier) {
                    active.take();
                    true
                } else {
                    false
                }
            };

            if was_active {
                shared.emit(TransportEvent::ConnectFailed {
                    identifier,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Consume adapter events until the stream ends.
async fn central_loop(
    adapter: Adapter,
    mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    shared: Arc<Shared>,
) {
    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ServicesAdvertisement { id, .. } => {
                process_peripheral(&adapter, id, &shared).await;
            }
            CentralEvent::DeviceDisconnected(id) => {
                on_device_disconnected(DeviceId::new(id.to_string()), &shared);
            }
            CentralEvent::StateUpdate(state) => {
                let state = AdapterState::from(state);
                if !state.is_powered_on() {
                    *shared.is_scanning.write() = false;
                    if let Some(mut active) = shared.active.lock().take() {
                        active.abort_tasks();
                    }
                }
                shared.set_adapter_state(state);
            }
            _ => {}
        }
    }

    debug!("Adapter event stream ended");
}

/// Report a link drop the session did not ask for.
fn on_device_disconnected(identifier: DeviceId, shared: &Shared) {
    if !shared.is_active(&identifier) {
        trace!("Device disconnected: {}", identifier);
        return;
    }

    let active = {
        let mut active = shared.active.lock();
        match active.as_ref() {
            // Still connecting: the pending attempt reports its own failure.
            Some(a) if a.link.is_some() => active.take(),
            _ => None,
        }
    };

    if let Some(mut active) = active {
        active.abort_tasks();
        warn!("Link to {} lost", identifier);
        shared.emit(TransportEvent::Disconnected {
            identifier,
            reason: Some("link lost".to_string()),
        });
    }
}

/// Report a discovered peripheral if it looks like a cleaner.
async fn process_peripheral(adapter: &Adapter, id: PeripheralId, shared: &Shared) {
    if !*shared.is_scanning.read() {
        return;
    }

    let peripheral = match adapter.peripheral(&id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return;
        }
    };

    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return,
    };

    if shared.config.filter_by_service
        && !properties.services.contains(&shared.config.service_uuid)
    {
        return;
    }

    let identifier = DeviceId::new(id.to_string());
    trace!("Cleaner advertisement: {} ({:?})", identifier, properties.local_name);

    shared
        .peripherals
        .write()
        .insert(identifier.clone(), peripheral);

    shared.emit(TransportEvent::PeripheralDiscovered {
        identifier,
        name: properties.local_name,
        rssi: properties.rssi,
    });
}
