//! Device registry
//!
//! The [`Gateway`] owns one task per connected device. The transport pushes
//! raw chunks into the task's bounded queue; the task is the only owner of
//! the device's session, so the reassembler and telemetry are never shared.
//! Decoded events are published and forwarded to a single event channel.
//!
//! Aborting a task only takes effect at its next `.await`, so each session
//! also holds a `live` flag. The session publishes and emits events while
//! holding the flag's lock, and disconnect clears it under the same lock
//! before the device is detached or rebound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{DeviceConfig, GatewayConfig};
use crate::error::{Error, Result};
use crate::publisher::Publisher;
use crate::session::{BmsSession, DeviceSession, TankSession, TelemetryEvent};
use crate::volume::VolumeTable;

/// Raw chunks waiting to be decoded, per device
const CHUNK_QUEUE: usize = 64;
/// Decoded events waiting for the application
const EVENT_QUEUE: usize = 256;

/// Feeds raw notification chunks (or advertisement payloads) to a device
pub type ChunkSender = mpsc::Sender<Vec<u8>>;

#[derive(Debug)]
struct DeviceHandle {
    chunks: ChunkSender,
    live: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl DeviceHandle {
    /// After this returns the session can no longer publish or emit events
    fn stop(&self) {
        *lock(&self.live) = false;
        self.task.abort();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    publisher: Publisher,
    volume: Option<Arc<VolumeTable>>,
    events: mpsc::Sender<TelemetryEvent>,
    devices: Mutex<HashMap<String, DeviceHandle>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, publisher: Publisher) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (events, rx) = mpsc::channel(EVENT_QUEUE);
        let volume = config.volume_table();
        let gateway = Self {
            config: Arc::new(config),
            publisher,
            volume,
            events,
            devices: Mutex::new(HashMap::new()),
        };
        (gateway, rx)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Start a session for a configured device. An existing session for the
    /// same device is disconnected first.
    pub fn connect(&self, device_id: &str) -> Result<ChunkSender> {
        let device = self
            .config
            .device(device_id)
            .ok_or_else(|| Error::UnknownDevice(device_id.to_string()))?;

        let session = match device {
            DeviceConfig::Bms(bms) => {
                DeviceSession::Bms(BmsSession::new(&bms.id, bms.low_soc_threshold))
            }
            DeviceConfig::Tank(tank) => DeviceSession::Tank(TankSession::new(
                &tank.id,
                tank.profile(),
                self.volume.clone(),
                tank.height_offset_in,
            )),
        };

        self.disconnect(device_id);

        // Devices without topics are reported once by the publisher
        let topics = device.topics();
        if !topics.is_empty() {
            self.publisher.bind(device_id, topics.to_vec());
        }

        let (chunks, rx) = mpsc::channel(CHUNK_QUEUE);
        let live = Arc::new(Mutex::new(true));
        let task = tokio::spawn(run_session(
            session,
            rx,
            live.clone(),
            self.publisher.clone(),
            self.events.clone(),
        ));
        lock(&self.devices).insert(
            device_id.to_string(),
            DeviceHandle {
                chunks: chunks.clone(),
                live,
                task,
            },
        );
        log::info!("Gateway: {device_id} connected");
        Ok(chunks)
    }

    /// Stop a device's session and forget its telemetry. Returns false if
    /// it was not connected.
    pub fn disconnect(&self, device_id: &str) -> bool {
        let Some(handle) = lock(&self.devices).remove(device_id) else {
            return false;
        };
        handle.stop();
        self.publisher.detach(device_id);
        log::info!("Gateway: {device_id} disconnected");
        true
    }

    /// Queue a chunk for a connected device, waiting if its queue is full
    pub async fn send_chunk(&self, device_id: &str, chunk: Vec<u8>) -> Result<()> {
        let chunks = lock(&self.devices)
            .get(device_id)
            .map(|h| h.chunks.clone())
            .ok_or_else(|| Error::UnknownDevice(device_id.to_string()))?;
        chunks.send(chunk).await.map_err(|_| Error::SessionClosed)
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        lock(&self.devices).contains_key(device_id)
    }

    pub fn connected(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.devices).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Hand a tank sensor advertisement to the session configured for its
    /// MAC suffix, starting the session on first sight. Returns false if no
    /// tank is configured for the suffix or its queue is full.
    pub fn route_advertisement(&self, mac_suffix: &str, payload: &[u8]) -> bool {
        let Some(tank) = self.config.tank_by_mac_suffix(mac_suffix) else {
            log::trace!("Gateway: ignoring tank sensor {mac_suffix}");
            return false;
        };

        let existing = lock(&self.devices).get(&tank.id).map(|h| h.chunks.clone());
        let chunks = match existing {
            Some(chunks) => chunks,
            None => match self.connect(&tank.id) {
                Ok(chunks) => chunks,
                Err(e) => {
                    log::warn!("Gateway: cannot start {}: {e}", tank.id);
                    return false;
                }
            },
        };

        match chunks.try_send(payload.to_vec()) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Gateway: dropping advertisement for {}: {e}", tank.id);
                false
            }
        }
    }

    /// Disconnect every device
    pub fn shutdown(&self) {
        let handles: Vec<(String, DeviceHandle)> = lock(&self.devices).drain().collect();
        for (device_id, handle) in handles {
            handle.stop();
            self.publisher.detach(&device_id);
        }
        log::info!("Gateway: shut down");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        for handle in lock(&self.devices).values() {
            handle.stop();
        }
    }
}

async fn run_session(
    mut session: DeviceSession,
    mut chunks: mpsc::Receiver<Vec<u8>>,
    live: Arc<Mutex<bool>>,
    publisher: Publisher,
    events: mpsc::Sender<TelemetryEvent>,
) {
    while let Some(chunk) = chunks.recv().await {
        let produced = session.handle(&chunk);
        if produced.is_empty() {
            continue;
        }

        // No await while the flag is held
        let alive = lock(&live);
        if !*alive {
            log::debug!(
                "Gateway: {} stopped, dropping {} events",
                session.device_id(),
                produced.len()
            );
            return;
        }
        publisher.publish(session.device_id(), session.telemetry());
        for event in produced {
            if let Err(mpsc::error::TrySendError::Full(event)) = events.try_send(event) {
                log::debug!("Gateway: event queue full, dropping {:?}", event);
            }
        }
    }
    log::debug!("Gateway: {} transport closed", session.device_id());
}
