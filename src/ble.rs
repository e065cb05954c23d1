//! Bluetooth Low Energy transport
//!
//! The BMS exposes a UART-like GATT service: requests are written to one
//! characteristic and responses arrive as notifications on another, split
//! across as many notifications as the link MTU requires. Notifications are
//! passed on untouched; reassembly happens in the device's session.
//!
//! Tank sensors never connect. Their readings are scraped from the
//! manufacturer data of advertisements.

use std::sync::Arc;

use anyhow::anyhow;
use bluest::Adapter;
use bluest::AdvertisingDevice;
use bluest::Characteristic;
use bluest::Device;
use bluest::Uuid;
use futures_util::StreamExt;
use tokio::time::timeout;
use tokio::time::Duration;

use crate::frame::Command;
use crate::message::{cell_info, hardware_info};
use crate::registry::{ChunkSender, Gateway};
use crate::tank;

pub struct BmsLink {
    adapter: Adapter,
    device: Device,
    name: String,
    write: Characteristic,
    notify: Characteristic,
}

impl BmsLink {
    const UART_SERVICE_ID: &'static str = "0000ff00-0000-1000-8000-00805f9b34fb";
    const UART_NOTIFY_CHARACTERISTIC_ID: &'static str = "0000ff01-0000-1000-8000-00805f9b34fb";
    const UART_WRITE_CHARACTERISTIC_ID: &'static str = "0000ff02-0000-1000-8000-00805f9b34fb";
    const DISCOVERY_TIMEOUT_S: u64 = 30;

    /// Discover the BMS advertising `ble_name` and connect to it
    pub async fn connect(adapter: &Adapter, ble_name: &str) -> anyhow::Result<Self> {
        adapter.wait_available().await?;

        let device = timeout(
            Duration::from_secs(Self::DISCOVERY_TIMEOUT_S),
            Self::discover_device(ble_name, adapter),
        )
        .await
        .map_err(|_| anyhow!("BMS {ble_name} not found"))??;

        adapter.connect_device(&device.device).await?;

        let uart_service = device
            .device
            .discover_services_with_uuid(uuid(Self::UART_SERVICE_ID))
            .await?
            .first()
            .ok_or(anyhow!("{ble_name} does not support the BMS UART service."))?
            .clone();
        let write = uart_service
            .discover_characteristics_with_uuid(uuid(Self::UART_WRITE_CHARACTERISTIC_ID))
            .await?
            .first()
            .ok_or(anyhow!("{ble_name} does not support the BMS UART write characteristic."))?
            .clone();
        let notify = uart_service
            .discover_characteristics_with_uuid(uuid(Self::UART_NOTIFY_CHARACTERISTIC_ID))
            .await?
            .first()
            .ok_or(anyhow!("{ble_name} does not support the BMS UART notify characteristic."))?
            .clone();

        log::info!("BMS {ble_name}: connected");
        Ok(Self {
            adapter: adapter.clone(),
            device: device.device,
            name: ble_name.to_string(),
            write,
            notify,
        })
    }

    /// Disconnect from the BMS
    pub async fn stop(self) -> anyhow::Result<()> {
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }

    /// Forward notifications to `chunks` and poll the BMS until the link
    /// drops or the session goes away.
    ///
    /// Hardware info and cell info are requested alternately, so each is
    /// refreshed once per `poll_interval`.
    pub async fn run(&self, chunks: ChunkSender, poll_interval: Duration) -> anyhow::Result<()> {
        let mut notifications = self.notify.notify().await?;

        self.send(&Command::ReadDeviceName.to_bytes()).await?;

        let requests = [hardware_info::REQUEST, cell_info::REQUEST];
        let mut ticker = tokio::time::interval(poll_interval / 2);
        let mut next = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.send(&requests[next]).await?;
                    next = (next + 1) % requests.len();
                }
                notification = notifications.next() => match notification {
                    Some(Ok(data)) => {
                        if chunks.send(data).await.is_err() {
                            log::info!("BMS {}: session closed", self.name);
                            return Ok(());
                        }
                    }
                    Some(Err(err)) => {
                        log::warn!("BMS {}: notification error: {err}", self.name);
                        return Err(err.into());
                    }
                    None => return Err(anyhow!("end of notification stream")),
                },
            }
        }
    }

    async fn send(&self, rq: &[u8]) -> anyhow::Result<()> {
        self.try_connect().await?;
        log::debug!("BMS {}: TX 0x{}", self.name, hex::encode(rq));
        self.write.write(rq).await?;
        Ok(())
    }

    async fn discover_device(name: &str, adapter: &Adapter) -> anyhow::Result<AdvertisingDevice> {
        let required_services = [uuid(Self::UART_SERVICE_ID)];
        let mut adapter_events = adapter.scan(&required_services).await?;
        while let Some(device) = adapter_events.next().await {
            let device_name = device.device.name_async().await?;
            if device_name == name {
                return Ok(device);
            }
        }

        Err(anyhow!("Device not found"))
    }

    async fn try_connect(&self) -> anyhow::Result<()> {
        if !self.device.is_connected().await {
            let mut retries = 2;
            loop {
                match self.adapter.connect_device(&self.device).await {
                    Ok(()) => return Ok(()),
                    Err(err) if retries > 0 => {
                        log::warn!("BMS {}: failed to connect: {err}", self.name);
                        retries -= 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(())
    }
}

fn uuid(s: &str) -> Uuid {
    // All ids above are well formed
    Uuid::parse_str(s).unwrap_or_default()
}

/// Forward tank sensor advertisements to the gateway until the scan ends
pub async fn scan_tanks(adapter: &Adapter, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    adapter.wait_available().await?;
    let mut adapter_events = adapter.scan(&[]).await?;
    while let Some(device) = adapter_events.next().await {
        let Some(data) = device.adv_data.manufacturer_data else {
            continue;
        };
        if data.company_id != tank::MANUFACTURER_ID {
            continue;
        }
        let Some(suffix) = tank::peek_mac_suffix(&data.data) else {
            log::debug!("Tank advertisement too short: 0x{}", hex::encode(&data.data));
            continue;
        };
        gateway.route_advertisement(&suffix, &data.data);
    }

    Err(anyhow!("tank scan ended"))
}
