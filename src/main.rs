use std::env;
use std::sync::Arc;

use anyhow::anyhow;
use sensorbridge::ble::{scan_tanks, BmsLink};
use sensorbridge::config::BmsConfig;
use sensorbridge::{Gateway, GatewayConfig, Publisher, TelemetryEvent};
use tokio::time::{sleep, Duration};

const RECONNECT_DELAY_S: u64 = 10;

/// Parse config path from command line arguments.
///
/// Supports `sensorbridge <path>`, `sensorbridge --config <path>` and
/// `sensorbridge -c <path>`. Defaults to `sensorbridge.toml`.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "sensorbridge.toml".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = parse_config_path();
    let config = GatewayConfig::from_file(&config_path)
        .map_err(|e| anyhow!("Failed to load {config_path}: {e}"))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.logging.level))
        .init();
    log::info!("Using config: {config_path}");
    log::info!(
        "{} BMS, {} tank sensors configured",
        config.bms.len(),
        config.tank.len()
    );

    let publisher = Publisher::from_config(&config.publisher);
    let bms_configs = config.bms.clone();
    let (gateway, mut events) = Gateway::new(config, publisher);
    let gateway = Arc::new(gateway);

    let adapter = bluest::Adapter::default()
        .await
        .ok_or(anyhow!("Default adapter not found"))?;

    for bms in bms_configs {
        tokio::spawn(supervise_bms(adapter.clone(), gateway.clone(), bms));
    }

    if !gateway.config().tank.is_empty() {
        let adapter = adapter.clone();
        let gateway = gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = scan_tanks(&adapter, gateway).await {
                log::error!("Tank scan stopped: {e}");
            }
        });
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TelemetryEvent::LowBattery { device_id, soc, threshold }) => {
                    log::warn!("{device_id}: low battery, {soc}% (threshold {threshold}%)");
                }
                Some(event) => log::debug!("{event:?}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received shutdown signal");
                break;
            }
        }
    }

    gateway.shutdown();
    Ok(())
}

/// Keep a BMS connected, reconnecting after any failure
async fn supervise_bms(adapter: bluest::Adapter, gateway: Arc<Gateway>, bms: BmsConfig) {
    loop {
        let result = run_bms(&adapter, &gateway, &bms).await;
        gateway.disconnect(&bms.id);
        if let Err(e) = result {
            log::warn!("{}: {e}, retrying in {RECONNECT_DELAY_S}s", bms.id);
        }
        sleep(Duration::from_secs(RECONNECT_DELAY_S)).await;
    }
}

async fn run_bms(adapter: &bluest::Adapter, gateway: &Gateway, bms: &BmsConfig) -> anyhow::Result<()> {
    let chunks = gateway.connect(&bms.id)?;
    let link = BmsLink::connect(adapter, &bms.ble_name).await?;
    let result = link
        .run(chunks, Duration::from_millis(bms.poll_interval_ms))
        .await;
    if let Err(e) = link.stop().await {
        log::debug!("{}: disconnect failed: {e}", bms.id);
    }
    result
}
