//! GS232 line codec.
//!
//! Pure functions, no I/O. Three jobs:
//!
//! - parse controller output (`+0123+0045` for GS232A, `AZ=123 EL=045`
//!   for GS232B) into a [`PartialHeading`]
//! - encode driver commands ([`Command`]) for a controller [`Dialect`]
//! - parse the client side of the protocol ([`ClientCommand`]) for the
//!   hub's TCP emulation, and format its position replies
//!
//! Anything that doesn't match (prompts like `?>`, line noise) yields an
//! empty result rather than an error.

use serde::{Deserialize, Serialize};

// ============================================================================
// Controller Output
// ============================================================================

/// Zero, one or both axes read from one controller line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartialHeading {
    /// Azimuth in degrees, if the line carried one.
    pub azimuth: Option<i32>,
    /// Elevation in degrees, if the line carried one.
    pub elevation: Option<i32>,
}

impl PartialHeading {
    /// True if the line carried neither axis.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.azimuth.is_none() && self.elevation.is_none()
    }
}

/// Parse GS232A output: up to two `+DDDD` groups, azimuth first.
///
/// The leading digit of each group is always `0` and is dropped.
pub fn parse_gs232a(line: &str) -> PartialHeading {
    let bytes = line.as_bytes();
    let mut values = Vec::with_capacity(2);
    let mut i = 0;

    while i + 5 <= bytes.len() && values.len() < 2 {
        if bytes[i] == b'+' && bytes[i + 1..i + 5].iter().all(u8::is_ascii_digit) {
            let value = bytes[i + 2..i + 5]
                .iter()
                .fold(0i32, |acc, b| acc * 10 + i32::from(b - b'0'));
            values.push(value);
            i += 5;
        } else {
            i += 1;
        }
    }

    PartialHeading {
        azimuth: values.first().copied(),
        elevation: values.get(1).copied(),
    }
}

/// Parse GS232B output: `AZ=DDD` and/or `EL=DDD`, whitespace separated, any order.
pub fn parse_gs232b(line: &str) -> PartialHeading {
    let mut heading = PartialHeading::default();

    for token in line.split_whitespace() {
        if let Some(v) = token.strip_prefix("AZ=").and_then(parse_degrees) {
            heading.azimuth = Some(v);
        } else if let Some(v) = token.strip_prefix("EL=").and_then(parse_degrees) {
            heading.elevation = Some(v);
        }
    }

    heading
}

/// Try GS232A first, then GS232B.
pub fn parse_line(line: &str) -> PartialHeading {
    let heading = parse_gs232a(line);
    if !heading.is_empty() {
        return heading;
    }
    parse_gs232b(line)
}

fn parse_degrees(s: &str) -> Option<i32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ============================================================================
// Driver Commands
// ============================================================================

/// Command set spoken by a controller.
///
/// Both understand `M`, `A`, `E`, `S` and `C2`. They differ in how
/// elevation is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Yaesu GS-232: elevation only via the combined `W### ###`.
    #[default]
    Yaesu,
    /// ARS interfaces: separate `N###`.
    Ars,
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaesu" => Ok(Dialect::Yaesu),
            "ars" => Ok(Dialect::Ars),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}

/// A command sent from a driver to a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Ask for azimuth and elevation (`C2`).
    Query,
    /// Turn to an azimuth.
    SetAzimuth(i32),
    /// Tilt to an elevation. Yaesu needs the azimuth preset alongside.
    SetElevation {
        /// Target elevation.
        elevation: i32,
        /// Current azimuth preset.
        azimuth: i32,
    },
    /// Stop azimuth movement.
    StopAzimuth,
    /// Stop elevation movement.
    StopElevation,
    /// Stop everything.
    Stop,
}

impl Command {
    /// Encode as a CRLF-terminated line.
    pub fn encode(&self, dialect: Dialect) -> String {
        match (*self, dialect) {
            (Command::Query, _) => "C2\r\n".to_string(),
            (Command::SetAzimuth(az), _) => format!("M{az:03}\r\n"),
            (Command::SetElevation { elevation, azimuth }, Dialect::Yaesu) => {
                format!("W{azimuth:03} {elevation:03}\r\n")
            }
            (Command::SetElevation { elevation, .. }, Dialect::Ars) => {
                format!("N{elevation:03}\r\n")
            }
            (Command::StopAzimuth, _) => "A\r\n".to_string(),
            (Command::StopElevation, _) => "E\r\n".to_string(),
            (Command::Stop, _) => "S\r\n".to_string(),
        }
    }
}

// ============================================================================
// Client Side (TCP emulation)
// ============================================================================

/// Prompt sent back for anything the emulation does not understand.
pub const PROMPT: &str = "?>";

/// Longest line accepted from a controller or a client, delimiter excluded.
pub const MAX_LINE_LEN: usize = 256;

/// A command received from a GS232 client such as a tracking program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// `M<ddd>`
    SetAzimuth(i32),
    /// `N<ddd>`
    SetElevation(i32),
    /// `W<ddd> <ddd>`
    SetAzimuthElevation(i32, i32),
    /// `C2`
    QueryAzimuthElevation,
    /// `C`
    QueryAzimuth,
    /// `A`
    StopAzimuth,
    /// `E`
    StopElevation,
    /// `S`
    Stop,
    /// Known command with missing payload; answered with a prompt.
    Prompt,
    /// Known command with a bad payload; logged and ignored.
    Invalid(String),
    /// Unknown command; answered with a prompt.
    Unknown,
    /// Blank line.
    Empty,
}

impl ClientCommand {
    /// Parse one line. Trailing CR/LF are ignored, the letter is case-insensitive.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut chars = line.chars();
        let Some(first) = chars.next() else {
            return ClientCommand::Empty;
        };
        let payload = chars.as_str();

        match first.to_ascii_uppercase() {
            'M' => parse_single(payload).map_or_else(|c| c, ClientCommand::SetAzimuth),
            'N' => parse_single(payload).map_or_else(|c| c, ClientCommand::SetElevation),
            'W' => {
                if payload.is_empty() {
                    return ClientCommand::Prompt;
                }
                if payload.len() != 7 {
                    return ClientCommand::Invalid(format!("W{payload}"));
                }
                let mut fields = payload.split_whitespace();
                match (
                    fields.next().and_then(|s| s.parse().ok()),
                    fields.next().and_then(|s| s.parse().ok()),
                ) {
                    (Some(az), Some(el)) => ClientCommand::SetAzimuthElevation(az, el),
                    _ => ClientCommand::Invalid(format!("W{payload}")),
                }
            }
            'C' if payload.starts_with('2') => ClientCommand::QueryAzimuthElevation,
            'C' => ClientCommand::QueryAzimuth,
            'A' => ClientCommand::StopAzimuth,
            'E' => ClientCommand::StopElevation,
            'S' => ClientCommand::Stop,
            _ => ClientCommand::Unknown,
        }
    }
}

fn parse_single(payload: &str) -> Result<i32, ClientCommand> {
    if payload.is_empty() {
        return Err(ClientCommand::Prompt);
    }
    payload
        .trim()
        .parse()
        .map_err(|_| ClientCommand::Invalid(payload.to_string()))
}

/// Position reply in GS232A form: `+0AAA\r\n` or `+0AAA+0EEE\r\n`.
pub fn format_position(azimuth: i32, elevation: Option<i32>) -> String {
    match elevation {
        Some(el) => format!("+0{azimuth:03}+0{el:03}\r\n"),
        None => format!("+0{azimuth:03}\r\n"),
    }
}
