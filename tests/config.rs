use std::path::PathBuf;

use sensorbridge::calibration::MediumType;
use sensorbridge::config::SinkConfig;
use sensorbridge::{Error, GatewayConfig};

fn example_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("sensorbridge.example.toml")
}

#[test]
fn example_config_loads() {
    let config = GatewayConfig::from_file(example_path()).unwrap();
    assert_eq!(config.bms.len(), 1);
    assert_eq!(config.bms[0].low_soc_threshold, Some(20));
    assert_eq!(config.tank[0].medium, Some(MediumType::Propane));
    assert_eq!(config.tank[0].height_offset_in, 0.5);
    assert_eq!(
        config.publisher.sink,
        SinkConfig::Tcp {
            address: "127.0.0.1:7000".into()
        }
    );

    let table = config.volume_table().unwrap();
    assert_eq!(table.len(), 5);
    assert_eq!(table.max_height_in(), Some(12.0));
}

#[test]
fn missing_file_is_an_io_error() {
    let path = std::env::temp_dir().join("sensorbridge-does-not-exist.toml");
    assert!(matches!(GatewayConfig::from_file(path), Err(Error::Io(_))));
}

#[test]
fn written_config_round_trips_through_a_file() {
    let path = std::env::temp_dir().join(format!("sensorbridge-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "[[tank]]\nid = \"water\"\nmac_suffix = \"aa:bb:cc\"\nmedium = \"fresh_water\"\n",
    )
    .unwrap();
    let config = GatewayConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.tank_by_mac_suffix("AA:BB:CC").unwrap().id, "water");
    assert!(config.tank[0].topics.is_empty());
    assert_eq!(config.publisher.queue_capacity, 64);
}

#[test]
fn unknown_keys_are_rejected() {
    assert!(matches!(
        GatewayConfig::from_toml_str("[mqtt]\nhost = \"x\"\n"),
        Err(Error::Config(_))
    ));
}
