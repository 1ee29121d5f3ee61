use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI > ENV > defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub streaming_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub streaming_max_errors: u32,
    pub streaming_buffer_size: usize,
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn streaming_timeout(&self) -> Duration {
        Duration::from_secs(self.streaming_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

/// Optional layer used for merging configuration sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub debug: Option<bool>,
    pub max_idle_conns: Option<usize>,
    pub max_idle_conns_per_host: Option<usize>,
    pub idle_conn_timeout_seconds: Option<u64>,
    pub request_timeout_seconds: Option<u64>,
    pub streaming_timeout_seconds: Option<u64>,
    pub read_timeout_seconds: Option<u64>,
    pub streaming_max_errors: Option<u32>,
    pub streaming_buffer_size: Option<usize>,
}

impl GatewayConfigPatch {
    pub fn from_env() -> Result<Self, GatewayConfigError> {
        Ok(Self {
            host: None,
            port: env_parsed("PORT")?,
            debug: env_bool("DEBUG"),
            max_idle_conns: env_parsed("MAX_IDLE_CONNS")?,
            max_idle_conns_per_host: env_parsed("MAX_IDLE_CONNS_PER_HOST")?,
            idle_conn_timeout_seconds: env_parsed("IDLE_CONN_TIMEOUT_SECONDS")?,
            request_timeout_seconds: env_parsed("REQUEST_TIMEOUT_SECONDS")?,
            streaming_timeout_seconds: env_parsed("STREAMING_TIMEOUT_SECONDS")?,
            read_timeout_seconds: env_parsed("READ_TIMEOUT_SECONDS")?,
            streaming_max_errors: env_parsed("STREAMING_MAX_ERRORS")?,
            streaming_buffer_size: env_parsed("STREAMING_BUFFER_SIZE")?,
        })
    }

    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.debug.is_some() {
            self.debug = other.debug;
        }
        if other.max_idle_conns.is_some() {
            self.max_idle_conns = other.max_idle_conns;
        }
        if other.max_idle_conns_per_host.is_some() {
            self.max_idle_conns_per_host = other.max_idle_conns_per_host;
        }
        if other.idle_conn_timeout_seconds.is_some() {
            self.idle_conn_timeout_seconds = other.idle_conn_timeout_seconds;
        }
        if other.request_timeout_seconds.is_some() {
            self.request_timeout_seconds = other.request_timeout_seconds;
        }
        if other.streaming_timeout_seconds.is_some() {
            self.streaming_timeout_seconds = other.streaming_timeout_seconds;
        }
        if other.read_timeout_seconds.is_some() {
            self.read_timeout_seconds = other.read_timeout_seconds;
        }
        if other.streaming_max_errors.is_some() {
            self.streaming_max_errors = other.streaming_max_errors;
        }
        if other.streaming_buffer_size.is_some() {
            self.streaming_buffer_size = other.streaming_buffer_size;
        }
    }

    pub fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8143),
            debug: self.debug.unwrap_or(false),
            max_idle_conns: self.max_idle_conns.unwrap_or(100),
            max_idle_conns_per_host: self.max_idle_conns_per_host.unwrap_or(10),
            idle_conn_timeout_seconds: self.idle_conn_timeout_seconds.unwrap_or(90),
            request_timeout_seconds: self.request_timeout_seconds.unwrap_or(300),
            streaming_timeout_seconds: self.streaming_timeout_seconds.unwrap_or(900),
            read_timeout_seconds: self.read_timeout_seconds.unwrap_or(45),
            streaming_max_errors: self.streaming_max_errors.unwrap_or(3),
            streaming_buffer_size: self.streaming_buffer_size.unwrap_or(64),
        }
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            debug: Some(value.debug),
            max_idle_conns: Some(value.max_idle_conns),
            max_idle_conns_per_host: Some(value.max_idle_conns_per_host),
            idle_conn_timeout_seconds: Some(value.idle_conn_timeout_seconds),
            request_timeout_seconds: Some(value.request_timeout_seconds),
            streaming_timeout_seconds: Some(value.streaming_timeout_seconds),
            read_timeout_seconds: Some(value.read_timeout_seconds),
            streaming_max_errors: Some(value.streaming_max_errors),
            streaming_buffer_size: Some(value.streaming_buffer_size),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, GatewayConfigError> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| GatewayConfigError::InvalidValue(key, raw.to_string()))
}

fn env_bool(key: &'static str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_patch_is_empty() {
        let config = GatewayConfigPatch::default().into_config();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8143);
        assert_eq!(config.request_timeout_seconds, 300);
        assert_eq!(config.streaming_timeout_seconds, 900);
        assert_eq!(config.read_timeout_seconds, 45);
    }

    #[test]
    fn overlay_prefers_the_later_layer() {
        let mut base = GatewayConfigPatch {
            port: Some(9000),
            ..Default::default()
        };
        base.overlay(GatewayConfigPatch {
            port: Some(8143),
            debug: Some(true),
            ..Default::default()
        });
        let config = base.into_config();
        assert_eq!(config.port, 8143);
        assert!(config.debug);
    }
}
