//! Configuration snapshot loading.
//!
//! The web layer owns the records and hands the engine a JSON snapshot;
//! loading validates every invariant up front so a bad record can never
//! reach the scheduler.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::types::EngineConfig;

pub async fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read configuration: {path:?}"))?;

    let config: EngineConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse configuration JSON: {path:?}"))?;

    config
        .validate()
        .with_context(|| format!("Invalid configuration: {path:?}"))?;

    info!(
        "Loaded configuration from {:?}: {} servers, {} notification channels",
        path,
        config.servers.len(),
        config.channels.len(),
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_and_validates_a_snapshot() {
        let dir = std::env::temp_dir().join("zephyr-engine-config-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("config.json");
        tokio::fs::write(
            &path,
            r#"{
                "settings": { "worker_pool_size": 2 },
                "servers": [{
                    "id": 1, "name": "rack-a1", "vendor": "supermicro",
                    "bmc_host": "10.0.0.10", "credential_handle": "bmc-a1",
                    "fan_zones": [
                        { "temp_threshold_c": 50.0, "target_rpm": 1800 },
                        { "temp_threshold_c": 70.0, "target_rpm": 0 }
                    ]
                }],
                "channels": [],
                "secrets": {
                    "bmc-a1": { "username": "admin", "password": "secret" }
                }
            }"#,
        )
        .await
        .unwrap();

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.settings.worker_pool_size, 2);
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].fan_zones.len(), 2);
    }

    #[tokio::test]
    async fn invalid_snapshot_is_rejected() {
        let dir = std::env::temp_dir().join("zephyr-engine-config-test-bad");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("config.json");
        // Interval below the lower bound must fail validation.
        tokio::fs::write(
            &path,
            r#"{
                "servers": [{
                    "id": 1, "name": "rack-a1", "vendor": "supermicro",
                    "bmc_host": "10.0.0.10", "credential_handle": "bmc-a1",
                    "poll_interval_seconds": 5
                }]
            }"#,
        )
        .await
        .unwrap();

        assert!(load_config(&path).await.is_err());
    }
}
