//! Runtime configuration, read from `LEDGER_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::workflow::DuplicatePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub duplicate_policy: DuplicatePolicy,
    /// Store-level conflicts tolerated per append before giving up.
    pub append_attempts: u32,
    pub max_upload_bytes: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            duplicate_policy: DuplicatePolicy::Allow,
            append_attempts: 3,
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup("LEDGER_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LEDGER_BIND_ADDR") {
            cfg.bind_addr = parse("LEDGER_BIND_ADDR", &v, |s| {
                s.parse::<SocketAddr>().map_err(|e| e.to_string())
            })?;
        }
        if let Some(v) = lookup("LEDGER_DUPLICATE_POLICY") {
            cfg.duplicate_policy = parse("LEDGER_DUPLICATE_POLICY", &v, |s| {
                s.parse::<DuplicatePolicy>()
            })?;
        }
        if let Some(v) = lookup("LEDGER_APPEND_ATTEMPTS") {
            cfg.append_attempts = parse("LEDGER_APPEND_ATTEMPTS", &v, |s| {
                match s.parse::<u32>().map_err(|e| e.to_string())? {
                    0 => Err("must be at least 1".to_string()),
                    n => Ok(n),
                }
            })?;
        }
        if let Some(v) = lookup("LEDGER_MAX_UPLOAD_BYTES") {
            cfg.max_upload_bytes = parse("LEDGER_MAX_UPLOAD_BYTES", &v, |s| {
                s.parse::<usize>().map_err(|e| e.to_string())
            })?;
        }
        Ok(cfg)
    }
}

fn parse<T>(
    key: &'static str,
    value: &str,
    f: impl FnOnce(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    f(value.trim()).map_err(|reason| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<LedgerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LedgerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.bind_addr.port(), 5000);
        assert_eq!(cfg.duplicate_policy, DuplicatePolicy::Allow);
        assert_eq!(cfg.append_attempts, 3);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = from(&[
            ("LEDGER_DATA_DIR", "/var/lib/ledger"),
            ("LEDGER_BIND_ADDR", "0.0.0.0:8080"),
            ("LEDGER_DUPLICATE_POLICY", "reject"),
            ("LEDGER_APPEND_ATTEMPTS", "5"),
            ("LEDGER_MAX_UPLOAD_BYTES", "1024"),
        ])
        .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/ledger"));
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(cfg.append_attempts, 5);
        assert_eq!(cfg.max_upload_bytes, 1024);
    }

    #[test]
    fn bad_values_name_the_key() {
        let err = from(&[("LEDGER_APPEND_ATTEMPTS", "0")]).unwrap_err();
        assert!(err.to_string().contains("LEDGER_APPEND_ATTEMPTS"));
        assert!(from(&[("LEDGER_DUPLICATE_POLICY", "maybe")]).is_err());
        assert!(from(&[("LEDGER_BIND_ADDR", "nowhere")]).is_err());
    }
}
