//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::lifecycle::{ActorAllowList, AllowAll, DeletePolicy};
use crate::domain::locking::{LockConfig, LockTier, MAX_TTL};
use crate::storage::default_database_path;

/// Easel configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseSettings,
    pub locking: LockingConfig,
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file; the platform config dir is used when unset
    pub path: Option<PathBuf>,
}

/// Lease settings, all durations in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    pub view_ttl_secs: u64,
    pub edit_ttl_secs: u64,
    pub system_ttl_secs: u64,
    pub emergency_ttl_secs: u64,
    pub min_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub min_override_tier_gap: u8,
    pub store_timeout_secs: u64,
    pub tombstone_retention_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Actors allowed to permanently delete; empty allows everyone
    pub delete_actors: Vec<String>,
}

impl Default for LockingConfig {
    fn default() -> Self {
        let defaults = LockConfig::default();
        Self {
            view_ttl_secs: defaults.ttl_for(LockTier::View).as_secs(),
            edit_ttl_secs: defaults.ttl_for(LockTier::Edit).as_secs(),
            system_ttl_secs: defaults.ttl_for(LockTier::System).as_secs(),
            emergency_ttl_secs: defaults.ttl_for(LockTier::Emergency).as_secs(),
            min_ttl_secs: defaults.min_ttl.as_secs(),
            max_ttl_secs: defaults.max_ttl.as_secs(),
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
            min_override_tier_gap: defaults.min_override_tier_gap,
            store_timeout_secs: defaults.store_timeout.as_secs(),
            tombstone_retention_secs: defaults.tombstone_retention.as_secs(),
        }
    }
}

impl LockingConfig {
    fn tier_ttls(&self) -> [(LockTier, u64); 4] {
        [
            (LockTier::View, self.view_ttl_secs),
            (LockTier::Edit, self.edit_ttl_secs),
            (LockTier::System, self.system_ttl_secs),
            (LockTier::Emergency, self.emergency_ttl_secs),
        ]
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.min_ttl_secs == 0 {
            return Err(anyhow!("locking.min_ttl_secs must be at least 1"));
        }
        if self.max_ttl_secs > MAX_TTL.as_secs() {
            return Err(anyhow!(
                "locking.max_ttl_secs ({}) exceeds the limit of {}",
                self.max_ttl_secs,
                MAX_TTL.as_secs()
            ));
        }
        if self.min_ttl_secs > self.max_ttl_secs {
            return Err(anyhow!(
                "locking.min_ttl_secs ({}) exceeds locking.max_ttl_secs ({})",
                self.min_ttl_secs,
                self.max_ttl_secs
            ));
        }
        for (tier, secs) in self.tier_ttls() {
            if !(self.min_ttl_secs..=self.max_ttl_secs).contains(&secs) {
                return Err(anyhow!(
                    "locking.{}_ttl_secs ({}) must be within {}..={}",
                    tier,
                    secs,
                    self.min_ttl_secs,
                    self.max_ttl_secs
                ));
            }
        }
        if self.sweep_interval_secs == 0 {
            return Err(anyhow!("locking.sweep_interval_secs must be at least 1"));
        }
        if self.store_timeout_secs == 0 {
            return Err(anyhow!("locking.store_timeout_secs must be at least 1"));
        }
        if self.min_override_tier_gap == 0 {
            return Err(anyhow!("locking.min_override_tier_gap must be at least 1"));
        }
        Ok(())
    }
}

const KEYS: [&str; 12] = [
    "database.path",
    "locking.view_ttl_secs",
    "locking.edit_ttl_secs",
    "locking.system_ttl_secs",
    "locking.emergency_ttl_secs",
    "locking.min_ttl_secs",
    "locking.max_ttl_secs",
    "locking.sweep_interval_secs",
    "locking.min_override_tier_gap",
    "locking.store_timeout_secs",
    "locking.tombstone_retention_secs",
    "lifecycle.delete_actors",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("EASEL_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("easel")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or use defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.locking.validate()
    }

    /// Database file to open
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    /// Build the lock manager settings
    pub fn to_lock_config(&self) -> LockConfig {
        let locking = &self.locking;
        locking.tier_ttls().into_iter().fold(
            LockConfig::default()
                .with_ttl_bounds(
                    Duration::from_secs(locking.min_ttl_secs),
                    Duration::from_secs(locking.max_ttl_secs),
                )
                .with_sweep_interval(Duration::from_secs(locking.sweep_interval_secs))
                .with_override_gap(locking.min_override_tier_gap)
                .with_store_timeout(Duration::from_secs(locking.store_timeout_secs))
                .with_tombstone_retention(Duration::from_secs(locking.tombstone_retention_secs)),
            |config, (tier, secs)| config.with_tier_ttl(tier, Duration::from_secs(secs)),
        )
    }

    /// Build the permanent-delete policy
    pub fn delete_policy(&self) -> Arc<dyn DeletePolicy> {
        if self.lifecycle.delete_actors.is_empty() {
            Arc::new(AllowAll)
        } else {
            Arc::new(ActorAllowList::new(self.lifecycle.delete_actors.iter().cloned()))
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let locking = &self.locking;
        match key {
            "database.path" => Ok(self.database_path().display().to_string()),
            "locking.view_ttl_secs" => Ok(locking.view_ttl_secs.to_string()),
            "locking.edit_ttl_secs" => Ok(locking.edit_ttl_secs.to_string()),
            "locking.system_ttl_secs" => Ok(locking.system_ttl_secs.to_string()),
            "locking.emergency_ttl_secs" => Ok(locking.emergency_ttl_secs.to_string()),
            "locking.min_ttl_secs" => Ok(locking.min_ttl_secs.to_string()),
            "locking.max_ttl_secs" => Ok(locking.max_ttl_secs.to_string()),
            "locking.sweep_interval_secs" => Ok(locking.sweep_interval_secs.to_string()),
            "locking.min_override_tier_gap" => Ok(locking.min_override_tier_gap.to_string()),
            "locking.store_timeout_secs" => Ok(locking.store_timeout_secs.to_string()),
            "locking.tombstone_retention_secs" => Ok(locking.tombstone_retention_secs.to_string()),
            "lifecycle.delete_actors" => Ok(self.lifecycle.delete_actors.join(", ")),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `easel config show` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    ///
    /// The whole configuration is re-validated afterwards; on error `self`
    /// is left unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut next = self.clone();
        let locking = &mut next.locking;

        match key {
            "database.path" => {
                next.database.path = if value.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "locking.view_ttl_secs" => locking.view_ttl_secs = parse_number(key, value)?,
            "locking.edit_ttl_secs" => locking.edit_ttl_secs = parse_number(key, value)?,
            "locking.system_ttl_secs" => locking.system_ttl_secs = parse_number(key, value)?,
            "locking.emergency_ttl_secs" => locking.emergency_ttl_secs = parse_number(key, value)?,
            "locking.min_ttl_secs" => locking.min_ttl_secs = parse_number(key, value)?,
            "locking.max_ttl_secs" => locking.max_ttl_secs = parse_number(key, value)?,
            "locking.sweep_interval_secs" => locking.sweep_interval_secs = parse_number(key, value)?,
            "locking.min_override_tier_gap" => {
                locking.min_override_tier_gap = parse_number(key, value)?
            }
            "locking.store_timeout_secs" => locking.store_timeout_secs = parse_number(key, value)?,
            "locking.tombstone_retention_secs" => {
                locking.tombstone_retention_secs = parse_number(key, value)?
            }
            "lifecycle.delete_actors" => {
                next.lifecycle.delete_actors = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `easel config show` to see available keys.",
                    key
                ));
            }
        }

        next.validate()?;
        *self = next;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }
}

fn parse_number<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}
