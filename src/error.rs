//! Error taxonomy for the controller. Each enum matches one failure kind from
//! the design's error handling section; callers match on variants instead of
//! sniffing strings.

use thiserror::Error;

/// Startup-fatal configuration problems: missing credentials, a malformed
/// broker string, or an out-of-range CLI argument.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required credentials: {0}")]
    MissingCredentials(String),

    #[error("invalid broker value: {0:?}")]
    InvalidBroker(String),

    #[error("{0} must be a positive integer")]
    InvalidArgument(&'static str),
}

/// Broker connection failures: fatal at startup, logged on mid-run disconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timeout waiting for MQTT connection")]
    ConnectTimeout,

    #[error("MQTT connect failed: {0}")]
    ConnectFailed(String),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
}

/// A payload on a known topic that could not be parsed. Logged and dropped;
/// controller state is left unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid bpm payload: {0:?}")]
    InvalidBpm(String),

    #[error("invalid run payload: {0:?}")]
    InvalidRunPayload(String),

    #[error("invalid start timestamp: {0:?}")]
    InvalidStartTimestamp(String),
}

/// A start request whose target lagged the current wall clock by more than
/// the staleness threshold at receipt.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("ignored stale start: target lagged now by {lag_ms}ms")]
pub struct StaleMessage {
    pub lag_ms: i64,
}

/// An Actuator call failed. Logged; the BeatScheduler continues on the next
/// tick rather than halting playback.
#[derive(Debug, Error)]
#[error("actuator error: {0}")]
pub struct DriverError(pub String);

/// A submitted command did not complete within its caller-specified timeout.
/// The scheduler keeps running the command to completion regardless.
#[derive(Debug, Error)]
#[error("command did not complete within {0:?}")]
pub struct CommandTimeoutError(pub std::time::Duration);

/// The ConfigStore failed to read or write its backing file. The in-memory
/// value remains authoritative for the session.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no config directory available")]
    NoConfigDir,
}
