//! Runner configuration loaded from the environment.

use build_core::QueueConfig;
use db::DbConfig;
use orchestrator::{AutoBuildConfig, BridgeConfig};
use storage::StorageConfig;

use crate::error::RunnerError;

const DEFAULT_OWNER_ID: &str = "local-owner";

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub queue: QueueConfig,
    pub bridge: BridgeConfig,
    pub auto_build: AutoBuildConfig,
    pub storage: StorageConfig,
    pub database: DbConfig,
    /// Owner recorded on every artifact forwarded to the repository.
    pub owner_id: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            bridge: BridgeConfig::default(),
            auto_build: AutoBuildConfig::default(),
            storage: StorageConfig::memory(),
            database: DbConfig::memory(),
            owner_id: DEFAULT_OWNER_ID.to_string(),
        }
    }
}

impl RunnerConfig {
    /// Build a config from environment variables.
    ///
    /// - `QUEUE_DELAY_MS`, `QUEUE_TIMEOUT_MS`, `QUEUE_SUPERSEDE_GRACE_MS`
    /// - `BRIDGE_MOUNT_DELAY_MS`, `BRIDGE_WAIT_MS`
    /// - `PREGENERATED_FIELD_THRESHOLD`, `FALLBACK_ITEM_COUNT`
    /// - `ARTIFACT_OWNER_ID` (default: `local-owner`)
    ///
    /// Storage and database settings are read by their own crates.
    pub fn from_env() -> Result<Self, RunnerError> {
        let mut config = Self::from_lookup(|name| std::env::var(name).ok())?;
        config.storage = StorageConfig::from_env()?;
        config.database = DbConfig::from_env()?;
        Ok(config)
    }

    /// Build the pipeline settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RunnerError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |name: &str, default: u64| -> Result<u64, RunnerError> {
            match var(name) {
                Some(raw) => raw.parse().map_err(|_| {
                    RunnerError::Config(format!("{name} must be a non-negative integer, got {raw}"))
                }),
                None => Ok(default),
            }
        };

        let queue = QueueConfig {
            delay_between_activities_ms: number(
                "QUEUE_DELAY_MS",
                defaults.queue.delay_between_activities_ms,
            )?,
            timeout_ms: number("QUEUE_TIMEOUT_MS", defaults.queue.timeout_ms)?,
            supersede_grace_ms: number(
                "QUEUE_SUPERSEDE_GRACE_MS",
                defaults.queue.supersede_grace_ms,
            )?,
        };
        if queue.timeout_ms == 0 {
            return Err(RunnerError::Config(
                "QUEUE_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let bridge = BridgeConfig {
            mount_delay_ms: number("BRIDGE_MOUNT_DELAY_MS", defaults.bridge.mount_delay_ms)?,
            ..defaults.bridge
        };

        let auto_build = AutoBuildConfig {
            pregenerated_field_threshold: number(
                "PREGENERATED_FIELD_THRESHOLD",
                defaults.auto_build.pregenerated_field_threshold as u64,
            )? as usize,
            fallback_item_count: number(
                "FALLBACK_ITEM_COUNT",
                defaults.auto_build.fallback_item_count as u64,
            )? as usize,
            bridge_wait_ms: number("BRIDGE_WAIT_MS", defaults.auto_build.bridge_wait_ms)?,
        };

        Ok(Self {
            queue,
            bridge,
            auto_build,
            owner_id: var("ARTIFACT_OWNER_ID").unwrap_or(defaults.owner_id),
            ..Self::default()
        })
    }
}
