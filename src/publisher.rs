//! Telemetry publisher
//!
//! Turns a [`DeviceTelemetry`] snapshot into a JSON payload and queues one
//! envelope per topic bound to the device. A single dispatcher task drains
//! the queue into a [`TopicSink`], so decoding never waits on the bus.
//!
//! Payload format:
//!
//! ```text
//! {
//!   "device_id": "house-bank",
//!   "timestamp": "2024-05-01T12:00:00.000Z",
//!   "total_voltage": 26.4,
//!   ...
//!   "cell_voltages": { "1": 3.301, "2": 3.298 },
//!   "temperatures": { "1": 21.5 },
//!   "balancing": { "1": 0, "2": 1 }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::{PublisherConfig, SinkConfig};
use crate::error::{Error, Result};
use crate::telemetry::{DeviceTelemetry, FieldValue, IndexedSeries};

/// Destination for published payloads
#[async_trait]
pub trait TopicSink: Send + 'static {
    async fn publish(&mut self, topic: &str, payload: &Value) -> Result<()>;
}

/// One payload on its way to one topic
#[derive(Debug, Clone)]
struct Envelope {
    device_id: String,
    generation: u64,
    topic: String,
    payload: Value,
}

/// What a sink received, as seen by in-process consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivery {
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
struct Binding {
    topics: Vec<String>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Shared {
    bindings: Mutex<HashMap<String, Binding>>,
    last_known: Mutex<HashMap<String, Value>>,
    warned_unbound: Mutex<HashSet<String>>,
    next_generation: AtomicU64,
    queue_full: AtomicBool,
    sink_failing: AtomicBool,
    suppress_repeats: bool,
    dropped: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_current(&self, device_id: &str, generation: u64) -> bool {
        lock(&self.bindings)
            .get(device_id)
            .is_some_and(|b| b.generation == generation)
    }

    /// Set `flag` and report whether a warning should be logged
    fn raise(&self, flag: &AtomicBool) -> bool {
        !flag.swap(true, Ordering::Relaxed) || !self.suppress_repeats
    }
}

/// Handle to the publishing queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Envelope>,
    shared: Arc<Shared>,
}

impl Publisher {
    /// Start the dispatcher task. Must be called within a tokio runtime.
    pub fn spawn<S: TopicSink>(sink: S, capacity: usize, suppress_repeats: bool) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shared = Arc::new(Shared {
            suppress_repeats,
            ..Default::default()
        });
        tokio::spawn(dispatch(sink, rx, shared.clone()));
        Self { tx, shared }
    }

    /// Start a publisher with the sink named in the configuration
    pub fn from_config(config: &PublisherConfig) -> Self {
        match &config.sink {
            SinkConfig::Log => {
                Self::spawn(LogSink, config.queue_capacity, config.suppress_repeats)
            }
            SinkConfig::Tcp { address } => Self::spawn(
                TcpLineSink::new(address.clone()),
                config.queue_capacity,
                config.suppress_repeats,
            ),
        }
    }

    /// Route future payloads for `device_id` to `topics`, replacing any
    /// previous binding.
    pub fn bind(&self, device_id: &str, topics: Vec<String>) {
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        log::debug!("Publisher: {device_id} -> {topics:?}");
        lock(&self.shared.bindings).insert(device_id.to_string(), Binding { topics, generation });
        lock(&self.shared.warned_unbound).remove(device_id);
    }

    /// Forget a device. Envelopes already queued for it are not delivered.
    /// A device that was never bound stays warned about.
    pub fn detach(&self, device_id: &str) {
        lock(&self.shared.bindings).remove(device_id);
        lock(&self.shared.last_known).remove(device_id);
    }

    /// The most recent payload built for a device
    pub fn last_known(&self, device_id: &str) -> Option<Value> {
        lock(&self.shared.last_known).get(device_id).cloned()
    }

    /// Number of envelopes dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Build the payload for `telemetry` and queue it for every bound
    /// topic. Never blocks. Returns the number of envelopes queued.
    pub fn publish(&self, device_id: &str, telemetry: &DeviceTelemetry) -> usize {
        let Some(binding) = lock(&self.shared.bindings).get(device_id).cloned() else {
            if lock(&self.shared.warned_unbound).insert(device_id.to_string()) {
                log::warn!("Publisher: no topics bound for {device_id}, not publishing");
            }
            return 0;
        };

        let payload = build_payload(device_id, telemetry);
        lock(&self.shared.last_known).insert(device_id.to_string(), payload.clone());

        let mut queued = 0;
        for topic in binding.topics {
            let envelope = Envelope {
                device_id: device_id.to_string(),
                generation: binding.generation,
                topic,
                payload: payload.clone(),
            };
            match self.tx.try_send(envelope) {
                Ok(()) => {
                    queued += 1;
                    if self.shared.queue_full.swap(false, Ordering::Relaxed) {
                        log::info!("Publisher: queue drained");
                    }
                }
                Err(mpsc::error::TrySendError::Full(envelope)) => {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    if self.shared.raise(&self.shared.queue_full) {
                        log::warn!(
                            "Publisher: queue full, dropping payload for {}",
                            envelope.topic
                        );
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::error!("Publisher: dispatcher has stopped");
                    break;
                }
            }
        }
        queued
    }
}

async fn dispatch<S: TopicSink>(mut sink: S, mut rx: mpsc::Receiver<Envelope>, shared: Arc<Shared>) {
    while let Some(envelope) = rx.recv().await {
        if !shared.is_current(&envelope.device_id, envelope.generation) {
            log::debug!(
                "Publisher: {} detached, discarding payload for {}",
                envelope.device_id,
                envelope.topic
            );
            continue;
        }

        match sink.publish(&envelope.topic, &envelope.payload).await {
            Ok(()) => {
                if shared.sink_failing.swap(false, Ordering::Relaxed) {
                    log::info!("Publisher: bus available again");
                }
            }
            Err(e) => {
                if shared.raise(&shared.sink_failing) {
                    log::warn!("Publisher: failed to publish to {}: {e}", envelope.topic);
                }
            }
        }
    }
    log::debug!("Publisher: dispatcher stopped");
}

/// Build the canonical payload for a device
pub fn build_payload(device_id: &str, telemetry: &DeviceTelemetry) -> Value {
    let mut map = Map::new();
    map.insert("device_id".into(), Value::String(device_id.to_string()));
    let timestamp = telemetry.updated_at.unwrap_or_else(Utc::now);
    map.insert(
        "timestamp".into(),
        Value::String(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );

    for (name, value) in &telemetry.fields {
        map.insert(name.clone(), field_to_json(value));
    }

    insert_series(&mut map, "cell_voltages", &telemetry.cells);
    insert_series(&mut map, "temperatures", &telemetry.temperatures);
    insert_series(&mut map, "balancing", &telemetry.balancing);

    Value::Object(map)
}

fn field_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Number(v) => number(*v),
        FieldValue::Integer(v) => Value::from(*v),
        FieldValue::Bool(v) => Value::Bool(*v),
        FieldValue::Text(v) => Value::String(v.clone()),
    }
}

// NaN and infinities have no JSON representation
fn number(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn insert_series<const N: usize>(map: &mut Map<String, Value>, name: &str, series: &IndexedSeries<N>) {
    if series.is_empty() {
        return;
    }
    let nested: Map<String, Value> = series
        .iter()
        .map(|(index, value)| (index.to_string(), number(value)))
        .collect();
    map.insert(name.to_string(), Value::Object(nested));
}

/// Writes every payload to the log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl TopicSink for LogSink {
    async fn publish(&mut self, topic: &str, payload: &Value) -> Result<()> {
        log::info!("{topic}: {payload}");
        Ok(())
    }
}

/// Newline-delimited JSON over TCP
///
/// Each line is `{"topic": .., "payload": ..}`. The connection is opened
/// lazily and re-opened on the next publish after a failure.
#[derive(Debug)]
pub struct TcpLineSink {
    address: String,
    stream: Option<TcpStream>,
}

impl TcpLineSink {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: None,
        }
    }

    async fn stream(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            let stream = TcpStream::connect(&self.address).await?;
            stream.set_nodelay(true)?;
            log::info!("Publisher: connected to {}", self.address);
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| Error::Publish(format!("not connected to {}", self.address)))
    }
}

#[async_trait]
impl TopicSink for TcpLineSink {
    async fn publish(&mut self, topic: &str, payload: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(&Delivery {
            topic: topic.to_string(),
            payload: payload.clone(),
        })?;
        line.push(b'\n');

        let result = match self.stream().await {
            Ok(stream) => stream.write_all(&line).await.map_err(Error::from),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.stream = None;
        }
        result
    }
}

/// Forwards deliveries into a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TopicSink for ChannelSink {
    async fn publish(&mut self, topic: &str, payload: &Value) -> Result<()> {
        self.tx
            .send(Delivery {
                topic: topic.to_string(),
                payload: payload.clone(),
            })
            .await
            .map_err(|_| Error::Publish("receiver dropped".into()))
    }
}
