//! Core types and structures for ptymux
//!
//! This crate provides the foundational types shared by the channel, session
//! and tool crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Grace period between a polite termination request and a forced kill
pub const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Upper bound on any single wait; longer requests are capped to it
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Size of a single read from a PTY, pipe or socket
pub const READ_CHUNK_SIZE: usize = 4096;

/// Sentinel returned when a read window elapses without data
pub const NO_DATA_MESSAGE: &str = "(no data received within timeout)";

/// Sentinel returned when the remote end of a stream closed
pub const CLOSED_MESSAGE: &str = "(socket closed by remote)";

// ============================================================================
// Channel Types
// ============================================================================

/// The singleton channel kinds a session manager can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Terminal,
    Process,
    Socket,
    Serial,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Terminal,
        ChannelKind::Process,
        ChannelKind::Socket,
        ChannelKind::Serial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Terminal => "terminal",
            ChannelKind::Process => "process",
            ChannelKind::Socket => "socket",
            ChannelKind::Serial => "serial",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminal" | "pty" => Ok(ChannelKind::Terminal),
            "process" | "proc" => Ok(ChannelKind::Process),
            "socket" => Ok(ChannelKind::Socket),
            "serial" => Ok(ChannelKind::Serial),
            _ => Err(format!("Unknown channel kind: {}", s)),
        }
    }
}

/// Socket transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

/// Outcome of a bounded read.
///
/// Timing out is not an error: an empty window is reported as `NoData`, and
/// a peer that closed the stream is reported as `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutput {
    Data(String),
    NoData,
    Closed,
}

impl ReadOutput {
    pub fn is_empty(&self) -> bool {
        match self {
            ReadOutput::Data(s) => s.is_empty(),
            _ => true,
        }
    }

    /// The received text, or an empty string for the sentinel variants
    pub fn text(&self) -> &str {
        match self {
            ReadOutput::Data(s) => s,
            _ => "",
        }
    }
}

impl fmt::Display for ReadOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOutput::Data(s) => f.write_str(s),
            ReadOutput::NoData => f.write_str(NO_DATA_MESSAGE),
            ReadOutput::Closed => f.write_str(CLOSED_MESSAGE),
        }
    }
}

// ============================================================================
// Project Types
// ============================================================================

/// The project whose path and environment apply to new spawns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveProject {
    pub name: String,
    pub path: PathBuf,
}

// ============================================================================
// Timeouts
// ============================================================================

/// Default read windows, in seconds, used by the tool handlers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadTimeouts {
    pub terminal_start: f64,
    pub terminal_send: f64,
    pub process_start: f64,
    pub process_send: f64,
    pub socket: f64,
    pub serial: f64,
    /// Per-poll window while waiting for a prompt
    pub serial_poll: f64,
}

impl Default for ReadTimeouts {
    fn default() -> Self {
        Self {
            terminal_start: 1.0,
            terminal_send: 2.0,
            process_start: 0.5,
            process_send: 1.0,
            socket: 2.0,
            serial: 2.0,
            serial_poll: 0.5,
        }
    }
}

/// Convert a caller supplied number of seconds into a `Duration`.
/// Negative and NaN values collapse to zero; anything above `MAX_WAIT`,
/// infinity included, is capped to it.
pub fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value)
        .unwrap_or(MAX_WAIT)
        .min(MAX_WAIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_channel_kind_round_trip_names() {
        for kind in ChannelKind::ALL {
            assert_eq!(kind.to_string().parse::<ChannelKind>().unwrap(), kind);
        }
        assert_eq!("PTY".parse::<ChannelKind>().unwrap(), ChannelKind::Terminal);
        assert!("fifo".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert_eq!(
            "sctp".parse::<Protocol>().unwrap_err(),
            "Unknown protocol: sctp"
        );
    }

    #[test]
    fn test_read_output_sentinels() {
        assert_eq!(ReadOutput::NoData.to_string(), NO_DATA_MESSAGE);
        assert_eq!(ReadOutput::Closed.to_string(), CLOSED_MESSAGE);
        assert_eq!(ReadOutput::Data("hi".into()).to_string(), "hi");
        assert!(ReadOutput::Data(String::new()).is_empty());
    }

    #[test]
    fn test_secs_clamps_bad_values() {
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(0.5), Duration::from_millis(500));
        assert_eq!(secs(f64::INFINITY), MAX_WAIT);
        assert_eq!(secs(1e20), MAX_WAIT);
        assert_eq!(secs(f64::MAX), MAX_WAIT);
    }

    #[test]
    fn test_timeouts_partial_override() {
        let parsed: ReadTimeouts = serde_json::from_str(r#"{"socket": 5.0}"#).unwrap();
        assert_eq!(parsed.socket, 5.0);
        assert_eq!(parsed.terminal_send, 2.0);
    }
}
