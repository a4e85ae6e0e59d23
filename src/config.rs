use std::sync::Arc;
use std::{env, fs, path::PathBuf, time::Duration};

use anyhow::Result;
use directories::ProjectDirs;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_url: Arc<str>,
    pub storage_user: Arc<str>,
    pub storage_pass: Arc<str>,
    pub index_prefix: Arc<str>,
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub poll_interval_secs: u64,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    storage_url: String,
    #[serde(default)]
    storage_user: String,
    #[serde(default)]
    storage_pass: String,
    index_prefix: String,
    batch_size: usize,
    max_in_flight: usize,
    poll_interval_secs: u64,
    http_timeout_secs: u64,
}

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        Self {
            storage_url: raw.storage_url.into(),
            storage_user: raw.storage_user.into(),
            storage_pass: raw.storage_pass.into(),
            index_prefix: raw.index_prefix.into(),
            batch_size: raw.batch_size,
            max_in_flight: raw.max_in_flight,
            poll_interval_secs: raw.poll_interval_secs,
            http_timeout_secs: raw.http_timeout_secs,
        }
    }
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut cfg = if let Some(path) = path {
            let raw = fs::read_to_string(path)?;
            Config::from(toml::from_str::<RawConfig>(&raw)?)
        } else {
            let default_path = default_config_path();
            if default_path.exists() {
                let raw = fs::read_to_string(&default_path)?;
                Config::from(toml::from_str::<RawConfig>(&raw)?)
            } else {
                Self::default_from_env()?
            }
        };

        if let Ok(v) = env::var("STORAGE_URL") {
            cfg.storage_url = v.into();
        }
        if let Ok(v) = env::var("STORAGE_USER") {
            cfg.storage_user = v.into();
        }
        if let Ok(v) = env::var("STORAGE_PASS") {
            cfg.storage_pass = v.into();
        }
        if let Ok(v) = env::var("INDEX_PREFIX") {
            cfg.index_prefix = v.into();
        }
        maybe_env_usize(&mut cfg.batch_size, "BATCH_SIZE");
        maybe_env_usize(&mut cfg.max_in_flight, "MAX_IN_FLIGHT");
        maybe_env_u64(&mut cfg.poll_interval_secs, "POLL_INTERVAL_SECS");
        maybe_env_u64(&mut cfg.http_timeout_secs, "HTTP_TIMEOUT_SECS");
        validate_required(&cfg)?;
        Ok(cfg)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Config {
    fn default_from_env() -> Result<Self> {
        Ok(Self {
            storage_url: env_required("STORAGE_URL")?.into(),
            storage_user: env::var("STORAGE_USER").unwrap_or_default().into(),
            storage_pass: env::var("STORAGE_PASS").unwrap_or_default().into(),
            index_prefix: env::var("INDEX_PREFIX")
                .unwrap_or_else(|_| "metrics".into())
                .into(),
            batch_size: env_usize("BATCH_SIZE", 5),
            max_in_flight: env_usize("MAX_IN_FLIGHT", 30),
            poll_interval_secs: env_u64("POLL_INTERVAL_SECS", 60),
            http_timeout_secs: env_u64("HTTP_TIMEOUT_SECS", 30),
        })
    }
}

fn default_config_path() -> PathBuf {
    default_state_dir().join("config.toml")
}

fn default_state_dir() -> PathBuf {
    ProjectDirs::from("com", "rollup", "rollup")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".rollup"))
}

fn validate_required(cfg: &Config) -> Result<()> {
    if cfg.storage_url.trim().is_empty() {
        anyhow::bail!("STORAGE_URL is required (set via env or config)");
    }
    if cfg.index_prefix.trim().is_empty() {
        anyhow::bail!("INDEX_PREFIX is required (set via env or config)");
    }
    if cfg.batch_size == 0 {
        anyhow::bail!("BATCH_SIZE must be at least 1");
    }
    if cfg.max_in_flight < cfg.batch_size {
        // Fewer permits than one batch can never fill a batch: the
        // scheduler would wait on a permit that only a completed batch
        // releases.
        anyhow::bail!("MAX_IN_FLIGHT must be >= BATCH_SIZE");
    }
    Ok(())
}

fn maybe_env_usize(val: &mut usize, key: &str) {
    if let Ok(v) = env::var(key) {
        if let Ok(n) = v.parse::<usize>() {
            *val = n;
        }
    }
}

fn maybe_env_u64(val: &mut u64, key: &str) {
    if let Ok(v) = env::var(key) {
        if let Ok(n) = v.parse::<u64>() {
            *val = n;
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_required(key: &str) -> Result<String> {
    let val = env::var(key).unwrap_or_default();
    if val.trim().is_empty() {
        anyhow::bail!("{key} is required");
    }
    Ok(val)
}
