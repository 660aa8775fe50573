//! Configuration for rotators, drivers and the hub's listeners.
//!
//! Every struct has a `Default` matching the stock server and `with_*`
//! setters for customization. [`RotatorConfig`] is validated once, in
//! [`RotatorConfigBuilder::build`]; after that it never changes.
//!
//! # Example
//!
//! ```rust
//! use rotator_hub::config::{Config, HttpConfig, RotatorConfig, TcpConfig};
//!
//! let rotator = RotatorConfig::builder("tower")
//!     .with_azimuth_range(0, 450)
//!     .with_elevation(true)
//!     .build()
//!     .unwrap();
//!
//! let config = Config::default()
//!     .with_rotator(rotator)
//!     .with_tcp(TcpConfig::default().with_enabled(true))
//!     .with_http(HttpConfig::default().with_port(8080));
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Dialect;
use crate::error::{Error, Result};

/// Default port of the GS232 TCP emulation.
pub const DEFAULT_TCP_PORT: u16 = 7373;

/// Default port of the HTTP/WebSocket server.
pub const DEFAULT_HTTP_PORT: u16 = 7070;

/// Highest azimuth a rotator may be configured for.
pub const MAX_AZIMUTH: i32 = 500;

/// Highest elevation a rotator may be configured for.
pub const MAX_ELEVATION: i32 = 180;

const FORBIDDEN_NAME_CHARS: &[char] = &['.', '/', '\\', '_'];

// ============================================================================
// Rotator Config
// ============================================================================

/// Static description of one rotator: capabilities and mechanical limits.
///
/// An azimuth range with `azimuth_min > azimuth_max` describes an arc that
/// crosses north, e.g. `300..60` covers `[300,360) ∪ [0,60]`. A range wider
/// than 360° (e.g. `0..450`) describes a rotator that can overlap a full turn;
/// `azimuth_stop` is then the angle of its mechanical stop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotatorConfig {
    /// Unique name used by the hub and in every API path.
    #[serde(default)]
    pub name: String,
    /// Whether the rotator turns horizontally.
    pub has_azimuth: bool,
    /// Lowest azimuth in degrees.
    pub azimuth_min: i32,
    /// Highest azimuth in degrees.
    pub azimuth_max: i32,
    /// Mechanical stop in degrees.
    pub azimuth_stop: i32,
    /// Whether the rotator turns vertically.
    pub has_elevation: bool,
    /// Lowest elevation in degrees.
    pub elevation_min: i32,
    /// Highest elevation in degrees.
    pub elevation_max: i32,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            name: "myRotator".into(),
            has_azimuth: true,
            azimuth_min: 0,
            azimuth_max: 360,
            azimuth_stop: 0,
            has_elevation: false,
            elevation_min: 0,
            elevation_max: 180,
        }
    }
}

impl RotatorConfig {
    /// Start building a config for a rotator called `name`.
    pub fn builder(name: impl Into<String>) -> RotatorConfigBuilder {
        RotatorConfigBuilder {
            config: RotatorConfig {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// True when the azimuth arc crosses 0° (`azimuth_min > azimuth_max`).
    #[inline]
    pub fn is_overlap(&self) -> bool {
        self.azimuth_min > self.azimuth_max
    }

    /// True when the rotator can travel at least a full turn.
    #[inline]
    pub fn is_full_turn(&self) -> bool {
        !self.is_overlap() && self.azimuth_max - self.azimuth_min >= 360
    }

    /// Whether `az` lies on the configured azimuth arc.
    pub fn contains_azimuth(&self, az: i32) -> bool {
        if self.is_overlap() {
            let az = az.rem_euclid(360);
            az >= self.azimuth_min || az <= self.azimuth_max
        } else {
            az >= self.azimuth_min && az <= self.azimuth_max
        }
    }

    /// Clamp a requested azimuth into the configured arc.
    ///
    /// For an arc crossing 0° an out-of-arc request snaps to whichever edge
    /// is angularly closer.
    pub fn clamp_azimuth(&self, az: i32) -> i32 {
        if !self.is_overlap() {
            return az.clamp(self.azimuth_min, self.azimuth_max);
        }

        let az = az.rem_euclid(360);
        if self.contains_azimuth(az) {
            return az;
        }
        if angular_distance(az, self.azimuth_min) < angular_distance(az, self.azimuth_max) {
            self.azimuth_min
        } else {
            self.azimuth_max
        }
    }

    /// Clamp a requested elevation into `[elevation_min, elevation_max]`.
    #[inline]
    pub fn clamp_elevation(&self, el: i32) -> i32 {
        el.clamp(self.elevation_min, self.elevation_max)
    }

    /// Check every invariant; used by the builder and by file-loaded configs.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("rotator name must not be empty".into()));
        }
        if self.name.contains(FORBIDDEN_NAME_CHARS) {
            return Err(Error::InvalidConfig(
                "rotator name must not contain '.', '/', '\\', '_' characters".into(),
            ));
        }

        if self.has_azimuth {
            let (min, max) = (self.azimuth_min, self.azimuth_max);
            if min < 0 {
                return Err(Error::InvalidConfig("azimuth-min must be >= 0".into()));
            }
            if max > MAX_AZIMUTH {
                return Err(Error::InvalidConfig(format!(
                    "azimuth-max must be <= {MAX_AZIMUTH}"
                )));
            }
            if min == max {
                return Err(Error::InvalidConfig(
                    "azimuth-min must differ from azimuth-max".into(),
                ));
            }
            if min > max && min >= 360 {
                return Err(Error::InvalidConfig(
                    "an arc crossing 0° must have both limits below 360".into(),
                ));
            }
            if max > 360 && min >= 360 {
                return Err(Error::InvalidConfig(
                    "if azimuth-max is >360, azimuth-min must be < 360".into(),
                ));
            }
            if !(0..360).contains(&self.azimuth_stop) {
                return Err(Error::InvalidConfig(
                    "azimuth-stop must be within 0..360".into(),
                ));
            }
        }

        if self.has_elevation {
            if self.elevation_min < 0 {
                return Err(Error::InvalidConfig("elevation-min must be >= 0".into()));
            }
            if self.elevation_max > MAX_ELEVATION {
                return Err(Error::InvalidConfig(format!(
                    "elevation-max must be <= {MAX_ELEVATION}"
                )));
            }
            if self.elevation_min >= self.elevation_max {
                return Err(Error::InvalidConfig(
                    "elevation-min must be smaller than elevation-max".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Shortest angle between two headings on the circle.
pub(crate) fn angular_distance(a: i32, b: i32) -> i32 {
    let d = (a - b).rem_euclid(360);
    d.min(360 - d)
}

/// Builder for [`RotatorConfig`]; nothing is checked until [`build`](Self::build).
#[derive(Clone, Debug)]
pub struct RotatorConfigBuilder {
    config: RotatorConfig,
}

impl RotatorConfigBuilder {
    /// Enable or disable the azimuth axis.
    pub fn with_azimuth(mut self, enabled: bool) -> Self {
        self.config.has_azimuth = enabled;
        self
    }

    /// Set the azimuth arc.
    pub fn with_azimuth_range(mut self, min: i32, max: i32) -> Self {
        self.config.azimuth_min = min;
        self.config.azimuth_max = max;
        self
    }

    /// Set the mechanical stop.
    pub fn with_azimuth_stop(mut self, stop: i32) -> Self {
        self.config.azimuth_stop = stop;
        self
    }

    /// Enable or disable the elevation axis.
    pub fn with_elevation(mut self, enabled: bool) -> Self {
        self.config.has_elevation = enabled;
        self
    }

    /// Set the elevation range.
    pub fn with_elevation_range(mut self, min: i32, max: i32) -> Self {
        self.config.elevation_min = min;
        self.config.elevation_max = max;
        self
    }

    /// Validate and return the finished config.
    pub fn build(self) -> Result<RotatorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Driver Settings
// ============================================================================

/// Where a GS232 controller is attached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "address")]
pub enum Endpoint {
    /// Serial device path, e.g. `/dev/ttyACM0` or `COM3`.
    Serial(String),
    /// `host:port` of a serial-to-network bridge.
    Tcp(String),
}

impl Endpoint {
    /// Interpret a user-supplied port name; anything with a `:` is a TCP address.
    pub fn parse(s: &str) -> Self {
        if s.contains(':') {
            Endpoint::Tcp(s.to_string())
        } else {
            Endpoint::Serial(s.to_string())
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Serial(path) => f.write_str(path),
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// Settings for a GS232-compatible controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gs232Settings {
    /// Serial port or TCP address of the controller.
    pub endpoint: Endpoint,
    /// Serial line speed.
    pub baud_rate: u32,
    /// Interval between `C2` position queries.
    #[serde(with = "duration_ms", rename = "polling_interval_ms")]
    pub polling_interval: Duration,
    /// Command set spoken by the controller.
    pub dialect: Dialect,
}

impl Default for Gs232Settings {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Serial("/dev/ttyACM0".into()),
            baud_rate: 9600,
            polling_interval: Duration::from_secs(1),
            dialect: Dialect::Yaesu,
        }
    }
}

impl Gs232Settings {
    /// Set the endpoint.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the baud rate.
    pub fn with_baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Set the polling interval.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Set the dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Silence after which the device counts as gone.
    #[inline]
    pub fn watchdog_timeout(&self) -> Duration {
        self.polling_interval * 5
    }
}

/// Settings for the kinematic simulator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Azimuth speed in degrees per second.
    pub azimuth_speed: f32,
    /// Elevation speed in degrees per second.
    pub elevation_speed: f32,
    /// Simulation step.
    #[serde(with = "duration_ms", rename = "tick_ms")]
    pub tick: Duration,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            azimuth_speed: 8.0,
            elevation_speed: 5.0,
            tick: Duration::from_millis(100),
        }
    }
}

impl SimulationSettings {
    /// Set both axis speeds.
    pub fn with_speeds(mut self, azimuth: f32, elevation: f32) -> Self {
        self.azimuth_speed = azimuth;
        self.elevation_speed = elevation;
        self
    }

    /// Set the simulation step.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

/// Which driver the server binary builds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// A real GS232 controller.
    #[default]
    Gs232,
    /// The kinematic simulator.
    Simulated,
}

// ============================================================================
// Listener Config
// ============================================================================

/// GS232 TCP emulation listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Whether to start the listener.
    pub enabled: bool,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Deadline for one reply or heading push to a client.
    #[serde(with = "duration_ms", rename = "write_wait_ms")]
    pub write_wait: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".into(),
            port: DEFAULT_TCP_PORT,
            write_wait: Duration::from_secs(5),
        }
    }
}

impl TcpConfig {
    /// Enable or disable the listener.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the bind host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the client write deadline.
    pub fn with_write_wait(mut self, write_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// HTTP API and WebSocket listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whether to start the listener.
    pub enabled: bool,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allow cross-origin requests from anywhere.
    pub cors_permissive: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".into(),
            port: DEFAULT_HTTP_PORT,
            cors_permissive: true,
        }
    }
}

impl HttpConfig {
    /// Enable or disable the listener.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the bind host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set whether CORS should be permissive.
    pub fn with_cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Keepalive timing for WebSocket connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// How often the server pings.
    #[serde(with = "duration_ms", rename = "ping_period_ms")]
    pub ping_period: Duration,
    /// How long a connection may stay silent before it is dropped.
    #[serde(with = "duration_ms", rename = "pong_wait_ms")]
    pub pong_wait: Duration,
    /// Deadline for a single outgoing frame.
    #[serde(with = "duration_ms", rename = "write_wait_ms")]
    pub write_wait: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_period: Duration::from_secs(3),
            pong_wait: Duration::from_secs(10),
            write_wait: Duration::from_secs(5),
        }
    }
}

impl WsConfig {
    /// Set ping period and pong wait together.
    pub fn with_keepalive(mut self, ping_period: Duration, pong_wait: Duration) -> Self {
        self.ping_period = ping_period;
        self.pong_wait = pong_wait;
        self
    }

    /// Set the write deadline.
    pub fn with_write_wait(mut self, write_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self
    }

    /// A ping must go out at least once before the pong wait runs out.
    pub fn validate(&self) -> Result<()> {
        if self.ping_period >= self.pong_wait {
            return Err(Error::InvalidConfig(
                "ping period must be shorter than pong wait".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete server configuration, loadable from a JSON file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The served rotator.
    pub rotator: RotatorConfig,
    /// Driver variant.
    pub driver: DriverKind,
    /// Used when `driver` is `gs232`.
    pub gs232: Gs232Settings,
    /// Used when `driver` is `simulated`.
    pub simulation: SimulationSettings,
    /// GS232 TCP emulation.
    pub tcp: TcpConfig,
    /// HTTP API.
    pub http: HttpConfig,
    /// WebSocket keepalive.
    pub ws: WsConfig,
}

impl Config {
    /// Set the rotator config.
    pub fn with_rotator(mut self, rotator: RotatorConfig) -> Self {
        self.rotator = rotator;
        self
    }

    /// Set the driver kind.
    pub fn with_driver(mut self, driver: DriverKind) -> Self {
        self.driver = driver;
        self
    }

    /// Set GS232 settings.
    pub fn with_gs232(mut self, gs232: Gs232Settings) -> Self {
        self.gs232 = gs232;
        self
    }

    /// Set simulator settings.
    pub fn with_simulation(mut self, simulation: SimulationSettings) -> Self {
        self.simulation = simulation;
        self
    }

    /// Set TCP listener config.
    pub fn with_tcp(mut self, tcp: TcpConfig) -> Self {
        self.tcp = tcp;
        self
    }

    /// Set HTTP listener config.
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Set WebSocket keepalive config.
    pub fn with_ws(mut self, ws: WsConfig) -> Self {
        self.ws = ws;
        self
    }

    /// Check the rotator and keepalive invariants.
    pub fn validate(&self) -> Result<()> {
        self.rotator.validate()?;
        self.ws.validate()?;
        if self.gs232.polling_interval.is_zero() {
            return Err(Error::InvalidConfig("polling interval must not be zero".into()));
        }
        if self.tcp.write_wait.is_zero() {
            return Err(Error::InvalidConfig("tcp write wait must not be zero".into()));
        }
        if self.simulation.tick.is_zero() {
            return Err(Error::InvalidConfig("simulation tick must not be zero".into()));
        }
        Ok(())
    }

    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| Error::InvalidConfig(format!("config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
