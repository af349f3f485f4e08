//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use reqwest::Url;

use crate::errors::ConfigError;
use crate::reconcile::ReadConsistency;
use crate::subscriber::PollSettings;

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint of the chain (e.g. http://127.0.0.1:8545)
    pub rpc_url: String,
    /// Address of the deployed crowdfunding contract
    pub contract_address: Address,
    /// How often to poll the node for new blocks
    pub poll_interval: Duration,
    /// First block to scan; defaults to the block after the current head
    pub start_block: Option<u64>,
    /// Maximum number of blocks per `eth_getLogs` request
    pub max_block_range: u64,
    /// Consecutive failed polls before the subscription gives up
    pub max_consecutive_failures: u32,
    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
    /// Block height the reconciliation reads are evaluated at
    pub read_consistency: ReadConsistency,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let rpc_url = env.required("RPC_URL")?;
        let url = Url::parse(&rpc_url).map_err(|e| ConfigError::Invalid {
            key: "RPC_URL",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "RPC_URL",
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }

        let contract_address: Address = env
            .parsed("CONTRACT_ADDRESS")?
            .ok_or(ConfigError::Missing("CONTRACT_ADDRESS"))?;

        let poll_interval_ms: u64 = env.parsed_or("POLL_INTERVAL_MS", 4_000)?;
        let max_block_range: u64 = env.parsed_or("MAX_BLOCK_RANGE", 1_000)?;
        let max_consecutive_failures: u32 = env.parsed_or("MAX_CONSECUTIVE_FAILURES", 5)?;
        let request_timeout_secs: u64 = env.parsed_or("REQUEST_TIMEOUT_SECS", 30)?;

        for (key, value) in [
            ("POLL_INTERVAL_MS", poll_interval_ms),
            ("MAX_BLOCK_RANGE", max_block_range),
            ("MAX_CONSECUTIVE_FAILURES", u64::from(max_consecutive_failures)),
            ("REQUEST_TIMEOUT_SECS", request_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(Config {
            rpc_url,
            contract_address,
            poll_interval: Duration::from_millis(poll_interval_ms),
            start_block: env.parsed("START_BLOCK")?,
            max_block_range,
            max_consecutive_failures,
            request_timeout: Duration::from_secs(request_timeout_secs),
            read_consistency: env.parsed_or("READ_CONSISTENCY", ReadConsistency::Latest)?,
        })
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            poll_interval: self.poll_interval,
            start_block: self.start_block,
            max_block_range: self.max_block_range,
            max_consecutive_failures: self.max_consecutive_failures,
            ..PollSettings::default()
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Unset and blank values are treated alike.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn parsed_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parsed(key)?.unwrap_or(default))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use alloy_primitives::address;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("RPC_URL", "http://127.0.0.1:8545"),
        ("CONTRACT_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
    ];

    #[test]
    fn defaults() {
        let config = config(&REQUIRED).unwrap();

        assert_eq!(config.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(
            config.contract_address,
            address!("5fbdb2315678afecb367f032d93f642f64180aa3")
        );
        assert_eq!(config.poll_interval, Duration::from_millis(4_000));
        assert_eq!(config.start_block, None);
        assert_eq!(config.max_block_range, 1_000);
        assert_eq!(config.max_consecutive_failures, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.read_consistency, ReadConsistency::Latest);
    }

    #[test]
    fn overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("POLL_INTERVAL_MS", "250"),
            ("START_BLOCK", "12"),
            ("MAX_BLOCK_RANGE", "50"),
            ("READ_CONSISTENCY", "event_block"),
        ]);

        let config = config(&vars).unwrap();
        let settings = config.poll_settings();

        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.start_block, Some(12));
        assert_eq!(settings.max_block_range, 50);
        assert_eq!(config.read_consistency, ReadConsistency::EventBlock);
    }

    #[test]
    fn missing_required_values() {
        assert!(matches!(
            config(&REQUIRED[..1]),
            Err(ConfigError::Missing("CONTRACT_ADDRESS"))
        ));
        assert!(matches!(
            config(&REQUIRED[1..]),
            Err(ConfigError::Missing("RPC_URL"))
        ));
        assert!(matches!(
            config(&[("RPC_URL", "  "), REQUIRED[1]]),
            Err(ConfigError::Missing("RPC_URL"))
        ));
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            config(&[("RPC_URL", "ws://node:8546"), REQUIRED[1]]),
            Err(ConfigError::Invalid { key: "RPC_URL", .. })
        ));
        assert!(matches!(
            config(&[REQUIRED[0], ("CONTRACT_ADDRESS", "0x1234")]),
            Err(ConfigError::Invalid { key: "CONTRACT_ADDRESS", .. })
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("MAX_BLOCK_RANGE", "0"));
        assert!(matches!(
            config(&vars),
            Err(ConfigError::Invalid { key: "MAX_BLOCK_RANGE", .. })
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("READ_CONSISTENCY", "safe"));
        assert!(matches!(
            config(&vars),
            Err(ConfigError::Invalid { key: "READ_CONSISTENCY", .. })
        ));
    }
}
