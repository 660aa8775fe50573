//! Serve one rotator over GS232 TCP emulation and the HTTP/WebSocket API.
//!
//! ```sh
//! rotator_server --type yaesu --portname /dev/ttyACM0 --has-elevation true
//! rotator_server --type dummy --azimuth-max 450 --tcp-enabled true
//! RUST_LOG=debug rotator_server --config rotator.json
//! ```
//!
//! Exits when the driver reports a fatal error, a listener fails, or on Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use rotator_hub::codec::Dialect;
use rotator_hub::config::{Config, DriverKind, Endpoint};
use rotator_hub::hal::{Gs232Rotator, SimulatedRotator};
use rotator_hub::services::{run_http_server, run_tcp_server, Hub};
use rotator_hub::traits::{EventSink, Rotator};
use rotator_hub::Error;

/// Rotator controller types.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum RotatorType {
    /// Yaesu GS232 (W command for elevation)
    Yaesu,
    /// ARS (N command for elevation)
    Ars,
    /// Simulated rotator, no hardware
    Dummy,
    /// Rotator served by another hub; `--portname` is its `host:port`
    Remote,
}

/// Antenna rotator server
#[derive(Parser, Debug)]
#[command(version, about = "Antenna rotator server", long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Controller type
    #[arg(long = "type", value_enum)]
    kind: Option<RotatorType>,

    /// Rotator name
    #[arg(long)]
    name: Option<String>,

    /// Serial device, or host:port of a network bridge
    #[arg(long)]
    portname: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baudrate: Option<u32>,

    /// Polling interval in milliseconds
    #[arg(long)]
    pollingrate_ms: Option<u64>,

    /// Rotator turns horizontally
    #[arg(long)]
    has_azimuth: Option<bool>,

    /// Rotator tilts
    #[arg(long)]
    has_elevation: Option<bool>,

    /// Lowest azimuth
    #[arg(long)]
    azimuth_min: Option<i32>,

    /// Highest azimuth (up to 500 for overlap rotators)
    #[arg(long)]
    azimuth_max: Option<i32>,

    /// Mechanical stop
    #[arg(long)]
    azimuth_stop: Option<i32>,

    /// Lowest elevation
    #[arg(long)]
    elevation_min: Option<i32>,

    /// Highest elevation
    #[arg(long)]
    elevation_max: Option<i32>,

    /// Enable the GS232 TCP emulation
    #[arg(long)]
    tcp_enabled: Option<bool>,

    /// GS232 TCP host
    #[arg(long)]
    tcp_host: Option<String>,

    /// GS232 TCP port
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Enable the HTTP API
    #[arg(long)]
    http_enabled: Option<bool>,

    /// HTTP host
    #[arg(long)]
    http_host: Option<String>,

    /// HTTP port
    #[arg(long)]
    http_port: Option<u16>,
}

impl Args {
    /// Start from the config file (or defaults) and apply every given flag.
    fn into_config(self) -> anyhow::Result<(Config, RotatorType)> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };

        let kind = self.kind.unwrap_or(match (config.driver, config.gs232.dialect) {
            (DriverKind::Simulated, _) => RotatorType::Dummy,
            (DriverKind::Gs232, Dialect::Ars) => RotatorType::Ars,
            (DriverKind::Gs232, Dialect::Yaesu) => RotatorType::Yaesu,
        });
        match kind {
            RotatorType::Yaesu => {
                config.driver = DriverKind::Gs232;
                config.gs232.dialect = Dialect::Yaesu;
            }
            RotatorType::Ars => {
                config.driver = DriverKind::Gs232;
                config.gs232.dialect = Dialect::Ars;
            }
            RotatorType::Dummy => config.driver = DriverKind::Simulated,
            RotatorType::Remote => {}
        }

        let r = &mut config.rotator;
        set(&mut r.name, self.name);
        set(&mut r.has_azimuth, self.has_azimuth);
        set(&mut r.has_elevation, self.has_elevation);
        set(&mut r.azimuth_min, self.azimuth_min);
        set(&mut r.azimuth_max, self.azimuth_max);
        set(&mut r.azimuth_stop, self.azimuth_stop);
        set(&mut r.elevation_min, self.elevation_min);
        set(&mut r.elevation_max, self.elevation_max);

        if let Some(port) = self.portname {
            config.gs232.endpoint = Endpoint::parse(&port);
        }
        set(&mut config.gs232.baud_rate, self.baudrate);
        set(
            &mut config.gs232.polling_interval,
            self.pollingrate_ms.map(Duration::from_millis),
        );

        set(&mut config.tcp.enabled, self.tcp_enabled);
        set(&mut config.tcp.host, self.tcp_host);
        set(&mut config.tcp.port, self.tcp_port);
        set(&mut config.http.enabled, self.http_enabled);
        set(&mut config.http.host, self.http_host);
        set(&mut config.http.port, self.http_port);

        config.validate()?;
        Ok((config, kind))
    }
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *field = v;
    }
}

type Fatal = Option<oneshot::Receiver<Error>>;

async fn build_rotator(
    config: &Config,
    kind: RotatorType,
    sink: EventSink,
) -> anyhow::Result<(Arc<dyn Rotator>, Fatal)> {
    match kind {
        RotatorType::Yaesu | RotatorType::Ars => {
            let (rotator, fatal) =
                Gs232Rotator::connect(config.rotator.clone(), config.gs232.clone(), sink)
                    .await
                    .with_context(|| format!("opening {}", config.gs232.endpoint))?;
            let rotator: Arc<dyn Rotator> = rotator;
            Ok((rotator, Some(fatal)))
        }
        RotatorType::Dummy => {
            let rotator =
                SimulatedRotator::new(config.rotator.clone(), config.simulation.clone(), sink);
            let rotator: Arc<dyn Rotator> = rotator;
            Ok((rotator, None))
        }
        RotatorType::Remote => connect_remote(config, sink).await,
    }
}

#[cfg(feature = "remote")]
async fn connect_remote(
    config: &Config,
    sink: EventSink,
) -> anyhow::Result<(Arc<dyn Rotator>, Fatal)> {
    let Endpoint::Tcp(addr) = &config.gs232.endpoint else {
        bail!("remote rotators need --portname host:port");
    };
    let (host, port) = addr
        .rsplit_once(':')
        .context("remote address must be host:port")?;
    let port: u16 = port.parse().context("remote port")?;
    let (rotator, fatal) =
        rotator_hub::hal::RemoteRotator::connect_with(host, port, config.ws.clone(), sink)
            .await
            .with_context(|| format!("connecting to {addr}"))?;
    let rotator: Arc<dyn Rotator> = rotator;
    Ok((rotator, Some(fatal)))
}

#[cfg(not(feature = "remote"))]
async fn connect_remote(
    _config: &Config,
    _sink: EventSink,
) -> anyhow::Result<(Arc<dyn Rotator>, Fatal)> {
    bail!("built without the `remote` feature")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config, kind) = Args::parse().into_config()?;

    let hub = Hub::new(EventSink::default(), config.ws.clone());
    let (rotator, fatal) = build_rotator(&config, kind, hub.sink()).await?;
    let name = rotator.name().to_string();
    hub.add_rotator(rotator).await?;

    let supervisor = match fatal {
        Some(fatal) => hub.supervise(name.clone(), fatal),
        None => tokio::spawn(std::future::pending::<Option<Error>>()),
    };

    let mut servers = JoinSet::new();
    if config.tcp.enabled {
        let (hub, tcp) = (Arc::clone(&hub), config.tcp.clone());
        servers.spawn(async move { run_tcp_server(hub, &tcp).await.context("GS232 listener") });
    }
    if config.http.enabled {
        let (hub, http) = (Arc::clone(&hub), config.http.clone());
        servers.spawn(async move { run_http_server(hub, &http).await.context("HTTP API") });
    }

    let server_failed = async {
        match servers.join_next().await {
            Some(Ok(res)) => res,
            Some(Err(e)) => Err(e.into()),
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for Ctrl-C")?;
            log::info!("interrupted, shutting down");
        }
        res = supervisor => {
            if let Ok(Some(err)) = res {
                bail!("rotator {name} failed: {err}");
            }
        }
        res = server_failed => res?,
    }

    if let Err(e) = hub.remove_rotator(&name).await {
        log::debug!("{e}");
    }
    Ok(())
}
