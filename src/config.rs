use std::time::Duration;

use anyhow::{Context, Result};

use crate::relay::RelayConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub gateway_url: String,
    pub admin_token: Option<String>,
    pub mute_sweep: Duration,
    pub relay: RelayConfig,
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Reads the environment, loading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        let defaults = RelayConfig::default();

        Ok(Self {
            database_url: dotenv::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            gateway_url: dotenv::var("GATEWAY_URL").context("GATEWAY_URL must be set")?,
            admin_token: dotenv::var("ADMIN_TOKEN").ok().filter(|token| !token.is_empty()),
            mute_sweep: Duration::from_secs(parsed("MUTE_SWEEP_SECS", 60)?),
            relay: RelayConfig {
                mapping_capacity: parsed("MAPPING_CAPACITY", defaults.mapping_capacity)?,
                warning_cooldown: Duration::from_secs(parsed(
                    "WARNING_COOLDOWN_SECS",
                    defaults.warning_cooldown.as_secs(),
                )?),
                identity_name: dotenv::var("IDENTITY_NAME").unwrap_or(defaults.identity_name),
                ..defaults
            },
        })
    }
}
