use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::crypto::{DNET_KEY_SIZE, asym::key_len_for_bits};

/// Tunables for key generation and dataset bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    key_bits: usize,
    dataset_workers: usize,
    dataset_deadline_secs: Option<u64>,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            // full-size dnet keys
            key_bits: DNET_KEY_SIZE,
            dataset_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            // no deadline
            dataset_deadline_secs: None,
        }
    }
}

impl CryptoConfig {
    pub fn new(key_bits: usize, dataset_workers: usize, dataset_deadline_secs: Option<u64>) -> Result<Self> {
        let config = Self {
            key_bits,
            dataset_workers,
            dataset_deadline_secs,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("failed to parse crypto config")?;
        config.validate().context("invalid crypto config")?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize crypto config")
    }

    pub fn key_bits(&self) -> usize {
        self.key_bits
    }

    pub fn dataset_workers(&self) -> usize {
        self.dataset_workers
    }

    pub fn dataset_deadline(&self) -> Option<Duration> {
        self.dataset_deadline_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        key_len_for_bits(self.key_bits).context("unsupported key size")?;
        if self.dataset_workers < 1 {
            bail!("dataset workers must be >= 1");
        }
        if self.dataset_deadline_secs == Some(0) {
            bail!("dataset deadline must be at least one second");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = CryptoConfig::default();
        config.validate().unwrap();
        assert_eq!(config.key_bits(), 4096);
        assert!(config.dataset_workers() >= 1);
        assert_eq!(config.dataset_deadline(), None);
    }

    #[test]
    fn invalid_params_fail() {
        assert!(CryptoConfig::new(1000, 1, None).is_err());
        assert!(CryptoConfig::new(8192, 1, None).is_err());
        assert!(CryptoConfig::new(1024, 0, None).is_err());
        assert!(CryptoConfig::new(1024, 1, Some(0)).is_err());
        assert!(CryptoConfig::new(1024, 4, Some(30)).is_ok());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = CryptoConfig::from_json(r#"{ "key_bits": 1024, "dataset_deadline_secs": 60 }"#).unwrap();
        assert_eq!(config.key_bits(), 1024);
        assert_eq!(config.dataset_workers(), CryptoConfig::default().dataset_workers());
        assert_eq!(config.dataset_deadline(), Some(Duration::from_secs(60)));

        let back = CryptoConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn json_with_bad_values_is_rejected() {
        let err = CryptoConfig::from_json(r#"{ "key_bits": 300 }"#).unwrap_err();
        assert!(format!("{err:#}").contains("power of two"));
        assert!(CryptoConfig::from_json("not json").is_err());
    }
}
