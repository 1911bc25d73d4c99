//! UART link to a connected cleaner.
//!
//! Opening a link connects the peripheral, discovers its services, resolves
//! the transmit and receive characteristics and subscribes to notifications.

use btleplug::api::{Characteristic, Peripheral as _};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{TransportEvent, WriteMode};
use crate::config::AdapterConfig;
use crate::error::{Error, Result};

/// An open UART link.
#[derive(Debug)]
pub struct UartLink {
    /// The connected peripheral.
    peripheral: Peripheral,
    /// Characteristic commands are written to.
    tx: Characteristic,
    /// Characteristic status notifications arrive on.
    rx: Characteristic,
}

impl UartLink {
    /// Connect to `peripheral` and prepare the UART characteristics.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the peripheral does not
    /// expose the configured service and characteristics. The peripheral is
    /// disconnected again in that case.
    pub async fn open(peripheral: Peripheral, config: &AdapterConfig) -> Result<Self> {
        if !peripheral.is_connected().await.unwrap_or(false) {
            debug!("Connecting to {:?}", peripheral.id());
            peripheral.connect().await?;
        } else {
            info!("Peripheral already connected at BLE level");
        }

        match Self::prepare(&peripheral, config).await {
            Ok((tx, rx)) => Ok(Self { peripheral, tx, rx }),
            Err(e) => {
                warn!("UART setup failed: {}", e);
                let _ = peripheral.disconnect().await;
                Err(e)
            }
        }
    }

    async fn prepare(
        peripheral: &Peripheral,
        config: &AdapterConfig,
    ) -> Result<(Characteristic, Characteristic)> {
        peripheral.discover_services().await?;

        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == config.service_uuid)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: config.service_uuid.to_string(),
            })?;

        let find = |uuid: Uuid| {
            service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| {
                    for c in &service.characteristics {
                        debug!("  Available characteristic: {}", c.uuid);
                    }
                    Error::CharacteristicNotFound {
                        uuid: uuid.to_string(),
                    }
                })
        };

        let tx = find(config.tx_uuid)?;
        let rx = find(config.rx_uuid)?;

        debug!("Subscribing to {}, properties: {:?}", rx.uuid, rx.properties);
        peripheral.subscribe(&rx).await?;

        Ok((tx, rx))
    }

    /// Get the connected peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Forward receive-characteristic notifications to `events` until the
    /// stream ends.
    pub fn spawn_notifications(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> JoinHandle<()> {
        let peripheral = self.peripheral.clone();
        let rx_uuid = self.rx.uuid;

        tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    warn!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                if notification.uuid != rx_uuid {
                    continue;
                }

                trace!(
                    "Notification: {} bytes, data: {:02X?}",
                    notification.value.len(),
                    notification.value
                );

                let data = Bytes::from(notification.value);
                if events.send(TransportEvent::DataReceived(data)).is_err() {
                    break;
                }
            }

            debug!("Notification stream ended");
        })
    }

    /// Write raw bytes to the transmit characteristic.
    pub async fn write(&self, data: &[u8], mode: WriteMode) -> Result<()> {
        self.peripheral.write(&self.tx, data, mode.into()).await?;
        trace!("Wrote {} bytes to {}", data.len(), self.tx.uuid);
        Ok(())
    }

    /// Unsubscribe and disconnect.
    pub async fn close(&self) -> Result<()> {
        if let Err(e) = self.peripheral.unsubscribe(&self.rx).await {
            debug!("Failed to unsubscribe from {}: {}", self.rx.uuid, e);
        }
        self.peripheral.disconnect().await?;
        info!("Disconnected from {:?}", self.peripheral.id());
        Ok(())
    }
}
