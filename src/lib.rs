//! Decode telemetry from battery management systems and ultrasonic tank sensors received over
//! Bluetooth Low Energy, and forward it to a publish/subscribe bus.
//!
//! Two kinds of device are supported:
//!
//! - JBD-style BMS. The BMS is polled over a UART-like GATT service and answers with
//!   checksummed frames that may be split across, or packed into, notifications. Frames are
//!   reassembled, validated and decoded into pack info (voltage, current, capacity, cycles,
//!   SOC, MOSFET state, errors, temperatures) and cell voltages.
//! - Mopeka-style tank sensors. Each advertisement carries one reading in its manufacturer data.
//!   The raw level is converted to millimeters with a temperature compensated polynomial
//!   chosen by the medium in the tank, and optionally to gallons with a volume table.
//!
//! Each connected device is handled by its own task, fed through a channel of raw chunks. Decoded
//! state is merged into a per-device record and published as JSON to the topics bound to the device.
//!
//! # Example
//!
//! ```rust
//! # use sensorbridge::{Gateway, GatewayConfig, Publisher, publisher::ChannelSink};
//! #
//! # #[tokio::main]
//! # pub async fn main(){
//!     let config = GatewayConfig::from_toml_str(r#"
//!         [[bms]]
//!         id = "house"
//!         ble_name = "SP04S034"
//!         topics = ["boat/bms/house"]
//!     "#).unwrap();
//!     let (sink, mut published) = ChannelSink::new(16);
//!     let (gateway, _events) = Gateway::new(config, Publisher::spawn(sink, 16, true));
//!
//!     let chunks = gateway.connect("house").unwrap();
//!     chunks.send(vec![0xdd, 0x04, 0x00, 0x02, 0x0f]).await.unwrap();
//!     chunks.send(vec![0xa0, 0xff, 0x4f, 0x77]).await.unwrap();
//!
//!     let delivery = published.recv().await.unwrap();
//!     assert_eq!(delivery.topic, "boat/bms/house");
//!     assert_eq!(delivery.payload["cell_voltages"]["1"], 4.0);
//! # }
//! ```

pub mod ble;
pub mod calibration;
pub mod checksum;
pub mod config;
pub mod error;
pub mod frame;
pub mod message;
pub mod publisher;
pub mod reassembler;
pub mod registry;
pub mod session;
pub mod tank;
pub mod telemetry;
pub mod volume;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use frame::{Command, Frame};
pub use publisher::Publisher;
pub use reassembler::FrameReassembler;
pub use registry::{ChunkSender, Gateway};
pub use session::{BmsSession, TankSession, TelemetryEvent};
pub use tank::TankReading;
pub use telemetry::DeviceTelemetry;
