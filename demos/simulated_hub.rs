//! Run a hub with two simulated rotators, no hardware needed.
//!
//! ```sh
//! cargo run --example simulated_hub
//! curl -X PUT localhost:7070/api/rotator/roof/azimuth -d '{"azimuth": 300}'
//! websocat ws://localhost:7070/ws
//! ```
//!
//! The GS232 emulation listens on 7373 and follows `roof`, the first rotator.

use std::sync::Arc;

use anyhow::Context;

use rotator_hub::config::{HttpConfig, RotatorConfig, SimulationSettings, TcpConfig, WsConfig};
use rotator_hub::hal::SimulatedRotator;
use rotator_hub::services::{run_http_server, run_tcp_server, Hub};
use rotator_hub::traits::EventSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let hub = Hub::new(EventSink::default(), WsConfig::default());
    let settings = SimulationSettings::default();

    // 450 degree rotator with its mechanical stop in the south.
    let roof = RotatorConfig::builder("roof")
        .with_azimuth_range(0, 450)
        .with_azimuth_stop(180)
        .build()?;
    hub.add_rotator(SimulatedRotator::new(roof, settings.clone(), hub.sink()))
        .await?;

    // Az/el rotator restricted to the northern half.
    let mast = RotatorConfig::builder("mast")
        .with_azimuth_range(270, 90)
        .with_elevation(true)
        .with_elevation_range(0, 90)
        .build()?;
    hub.add_rotator(SimulatedRotator::new(mast, settings, hub.sink()))
        .await?;

    let tcp = TcpConfig::default().with_enabled(true);
    let http = HttpConfig::default();

    tokio::select! {
        res = run_tcp_server(Arc::clone(&hub), &tcp) => res.context("GS232 listener")?,
        res = run_http_server(Arc::clone(&hub), &http) => res.context("HTTP API")?,
        res = tokio::signal::ctrl_c() => res.context("waiting for Ctrl-C")?,
    }
    Ok(())
}
