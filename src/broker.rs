//! Broker connection parameters, `.env`/environment credential loading, and
//! broker host:port parsing shared by both binaries.

use std::collections::HashMap;
use std::path::Path;

use url::Url;

use crate::controller::Credentials;
use crate::error::ConfigError;

/// Map a wire-level QoS integer (0/1/2) onto rumqttc's enum, defaulting
/// unrecognized values to QoS 1 as the CLI's clap validator already rejects
/// anything outside `0..=2` before this is called.
pub fn qos_from_u8(value: u8) -> rumqttc::QoS {
    match value {
        0 => rumqttc::QoS::AtMostOnce,
        2 => rumqttc::QoS::ExactlyOnce,
        _ => rumqttc::QoS::AtLeastOnce,
    }
}

pub const ENV_APP_ID: &str = "BHAPTICS_APP_ID";
pub const ENV_API_KEY: &str = "BHAPTICS_API_KEY";
pub const ENV_APP_NAME: &str = "BHAPTICS_APP_NAME";
pub const DEFAULT_APP_NAME: &str = "Hello, bHaptics!";

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub keepalive_secs: u16,
    pub qos: u8,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Parse a broker value that is either a bare `host[:port]` or a full
/// `scheme://host[:port]` URL, mirroring the original `urlparse`-based
/// parser: the scheme is ignored, a missing port falls back to
/// `fallback_port`.
pub fn parse_broker(value: &str, fallback_port: u16) -> Result<(String, u16), ConfigError> {
    let raw = value.trim();
    if raw.is_empty() {
        return Err(ConfigError::InvalidBroker(value.to_string()));
    }

    let to_parse = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("mqtt://{raw}")
    };

    let url = Url::parse(&to_parse).map_err(|_| ConfigError::InvalidBroker(value.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::InvalidBroker(value.to_string()))?
        .to_string();
    let port = url.port().unwrap_or(fallback_port);

    Ok((host, port))
}

/// Load `KEY=VALUE` lines from a `.env` file into the process environment.
/// `#`-prefixed and blank lines are skipped; values already set in the
/// environment are never overwritten; quoted values have their matching
/// outer quote stripped.
pub fn load_dotenv(path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || std::env::var_os(key).is_some() {
            continue;
        }
        let value = strip_matching_quotes(value.trim());
        std::env::set_var(key, value);
    }
}

fn strip_matching_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if first == last && (first == b'\'' || first == b'"') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Load bHaptics device credentials, preferring the process environment and
/// falling back to a `.env` file at `dotenv_path` (loaded first so already-set
/// environment variables still win).
pub fn load_credentials(dotenv_path: &Path) -> Result<Credentials, ConfigError> {
    load_dotenv(dotenv_path);

    let app_id = std::env::var(ENV_APP_ID).unwrap_or_default().trim().to_string();
    let api_key = std::env::var(ENV_API_KEY).unwrap_or_default().trim().to_string();
    let app_name = std::env::var(ENV_APP_NAME)
        .unwrap_or_default()
        .trim()
        .to_string();
    let app_name = if app_name.is_empty() {
        DEFAULT_APP_NAME.to_string()
    } else {
        app_name
    };

    let mut missing = Vec::new();
    if app_id.is_empty() {
        missing.push(ENV_APP_ID);
    }
    if api_key.is_empty() {
        missing.push(ENV_API_KEY);
    }
    if !missing.is_empty() {
        return Err(ConfigError::MissingCredentials(missing.join(", ")));
    }

    Ok(Credentials {
        app_id,
        api_key,
        app_name,
    })
}

/// Parse a raw `.env`-style buffer into a map, for tests that don't want to
/// touch the real process environment or filesystem.
#[cfg(test)]
pub fn parse_dotenv_buffer(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim().to_string();
            if key.is_empty() {
                continue;
            }
            map.insert(key, strip_matching_quotes(value.trim()).to_string());
        }
    }
    map
}
