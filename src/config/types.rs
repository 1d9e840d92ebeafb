//! Engine configuration model: managed servers, fan curves, channels.
//!
//! The engine holds a read-only snapshot of this configuration; ownership
//! of the records (and their persistence) lives with the web/storage layer.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vendor::{Vendor, VendorError};

pub const MIN_POLL_INTERVAL_SECS: u64 = 30;
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;
pub const MAX_FAN_ZONES: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server {server}: {source}")]
    Vendor {
        server: String,
        #[source]
        source: VendorError,
    },
    #[error(
        "server {server}: poll interval {seconds}s outside \
         [{MIN_POLL_INTERVAL_SECS}, {MAX_POLL_INTERVAL_SECS}]"
    )]
    PollInterval { server: String, seconds: u64 },
    #[error("server {server}: {count} fan zones exceeds the maximum of {MAX_FAN_ZONES}")]
    TooManyZones { server: String, count: usize },
    #[error("server {server}: fan zone thresholds must be strictly increasing")]
    ZoneOrder { server: String },
    #[error("server {server}: duplicate fan override for '{fan}'")]
    DuplicateOverride { server: String, fan: String },
    #[error("duplicate server id {0}")]
    DuplicateServerId(i64),
    #[error("duplicate notification channel id {0}")]
    DuplicateChannelId(i64),
    #[error("server {server}: references unknown notification channel {channel}")]
    UnknownChannel { server: String, channel: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub servers: Vec<ServerTarget>,
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
    /// Inline secret store backing the default credential resolver.
    /// Deployments with an external secret store leave this empty.
    #[serde(default)]
    pub secrets: HashMap<String, SecretEntry>,
}

impl EngineConfig {
    /// Validate the whole snapshot. Called once on load so that every
    /// scheduling decision afterwards works with known-good records.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut channel_ids = HashSet::new();
        for channel in &self.channels {
            if !channel_ids.insert(channel.id) {
                return Err(ConfigError::DuplicateChannelId(channel.id));
            }
        }

        let mut server_ids = HashSet::new();
        for server in &self.servers {
            if !server_ids.insert(server.id) {
                return Err(ConfigError::DuplicateServerId(server.id));
            }
            server.validate()?;
            for channel in &server.notification_channel_ids {
                if !channel_ids.contains(channel) {
                    return Err(ConfigError::UnknownChannel {
                        server: server.name.clone(),
                        channel: *channel,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// How long a firing tick may wait for a worker before it is dropped.
    #[serde(default = "default_worker_grace_ms")]
    pub worker_grace_ms: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_command_retries")]
    pub command_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
    #[serde(default = "default_notify_retries")]
    pub notify_retries: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub default_poll_interval_seconds: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_worker_pool_size() -> usize { 4 }
fn default_worker_grace_ms() -> u64 { 250 }
fn default_command_timeout_secs() -> u64 { 10 }
fn default_command_retries() -> u32 { 2 }
fn default_retry_backoff_ms() -> u64 { 500 }
fn default_notify_timeout_secs() -> u64 { 10 }
fn default_notify_retries() -> u32 { 2 }
fn default_poll_interval_secs() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            worker_grace_ms: default_worker_grace_ms(),
            command_timeout_secs: default_command_timeout_secs(),
            command_retries: default_command_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            notify_timeout_secs: default_notify_timeout_secs(),
            notify_retries: default_notify_retries(),
            default_poll_interval_seconds: default_poll_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTarget {
    pub id: i64,
    pub name: String,
    pub vendor: Vendor,
    pub bmc_host: String,
    #[serde(default = "default_bmc_port")]
    pub bmc_port: u16,
    /// Opaque handle resolved to a login for the duration of one poll.
    pub credential_handle: String,
    #[serde(default)]
    pub poll_interval_seconds: Option<u64>,
    #[serde(default)]
    pub fan_zones: Vec<FanZone>,
    #[serde(default)]
    pub fan_overrides: Vec<FanOverride>,
    #[serde(default)]
    pub alerts: AlertSubscriptions,
    #[serde(default = "default_offline_threshold")]
    pub offline_alert_threshold_minutes: u64,
    #[serde(default = "default_critical_temp")]
    pub critical_temp_c: f64,
    #[serde(default)]
    pub notification_channel_ids: Vec<i64>,
}

fn default_bmc_port() -> u16 { 623 }
fn default_offline_threshold() -> u64 { 15 }
fn default_critical_temp() -> f64 { 80.0 }

impl ServerTarget {
    pub fn poll_interval(&self, settings: &EngineSettings) -> u64 {
        self.poll_interval_seconds
            .unwrap_or(settings.default_poll_interval_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(seconds) = self.poll_interval_seconds {
            if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&seconds) {
                return Err(ConfigError::PollInterval {
                    server: self.name.clone(),
                    seconds,
                });
            }
        }

        if self.fan_zones.len() > MAX_FAN_ZONES {
            return Err(ConfigError::TooManyZones {
                server: self.name.clone(),
                count: self.fan_zones.len(),
            });
        }
        for pair in self.fan_zones.windows(2) {
            if pair[1].temp_threshold_c <= pair[0].temp_threshold_c {
                return Err(ConfigError::ZoneOrder {
                    server: self.name.clone(),
                });
            }
        }

        let mut fans = HashSet::new();
        for fan_override in &self.fan_overrides {
            if !fans.insert(fan_override.fan_identifier.as_str()) {
                return Err(ConfigError::DuplicateOverride {
                    server: self.name.clone(),
                    fan: fan_override.fan_identifier.clone(),
                });
            }
        }

        if !self.fan_zones.is_empty() && !self.vendor.supports_fan_control() {
            return Err(ConfigError::Vendor {
                server: self.name.clone(),
                source: VendorError::FanControlUnsupported(self.vendor),
            });
        }
        Ok(())
    }
}

/// One band of the fan curve. `target_rpm` 0 is the full-speed sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FanZone {
    pub temp_threshold_c: f64,
    pub target_rpm: u32,
}

/// Per-fan floor that applies only below the first zone's threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOverride {
    pub fan_identifier: String,
    pub override_rpm: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AlertSubscriptions {
    #[serde(default)]
    pub connectivity: bool,
    #[serde(default)]
    pub temperature_critical: bool,
    #[serde(default)]
    pub memory_errors: bool,
    #[serde(default)]
    pub power_failure: bool,
    #[serde(default)]
    pub intrusion: bool,
    #[serde(default)]
    pub voltage_issues: bool,
}

impl AlertSubscriptions {
    pub fn wants_status_flags(&self) -> bool {
        self.memory_errors || self.power_failure || self.intrusion || self.voltage_issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Slack,
    Teams,
    Discord,
    Telegram,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelKind::Slack => "slack",
            ChannelKind::Teams => "teams",
            ChannelKind::Discord => "discord",
            ChannelKind::Telegram => "telegram",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    /// Secret handle for the webhook URL (or bot token for Telegram).
    pub endpoint_handle: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub chat_id: Option<String>,
}

fn default_enabled() -> bool { true }

/// Secret store entry: a BMC login pair or a single opaque value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretEntry {
    Login { username: String, password: String },
    Value(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn server() -> ServerTarget {
        ServerTarget {
            id: 1,
            name: "rack-a1".to_string(),
            vendor: Vendor::Supermicro,
            bmc_host: "10.0.0.10".to_string(),
            bmc_port: 623,
            credential_handle: "bmc-a1".to_string(),
            poll_interval_seconds: Some(300),
            fan_zones: vec![
                FanZone { temp_threshold_c: 50.0, target_rpm: 1800 },
                FanZone { temp_threshold_c: 52.0, target_rpm: 3500 },
                FanZone { temp_threshold_c: 70.0, target_rpm: 0 },
            ],
            fan_overrides: vec![FanOverride {
                fan_identifier: "FAN1".to_string(),
                override_rpm: 2200,
            }],
            alerts: AlertSubscriptions::default(),
            offline_alert_threshold_minutes: 15,
            critical_temp_c: 80.0,
            notification_channel_ids: Vec::new(),
        }
    }

    #[test]
    fn valid_server_passes() {
        assert!(server().validate().is_ok());
    }

    #[test]
    fn poll_interval_bounds_are_enforced() {
        let mut s = server();
        s.poll_interval_seconds = Some(10);
        assert!(matches!(
            s.validate(),
            Err(ConfigError::PollInterval { seconds: 10, .. })
        ));
        s.poll_interval_seconds = Some(90_000);
        assert!(s.validate().is_err());
        s.poll_interval_seconds = Some(MIN_POLL_INTERVAL_SECS);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn zone_thresholds_must_strictly_increase() {
        let mut s = server();
        s.fan_zones[1].temp_threshold_c = 50.0;
        assert!(matches!(s.validate(), Err(ConfigError::ZoneOrder { .. })));
    }

    #[test]
    fn at_most_five_zones() {
        let mut s = server();
        s.fan_zones = (0..6)
            .map(|i| FanZone {
                temp_threshold_c: 40.0 + i as f64,
                target_rpm: 1000,
            })
            .collect();
        assert!(matches!(
            s.validate(),
            Err(ConfigError::TooManyZones { count: 6, .. })
        ));
    }

    #[test]
    fn one_override_per_fan() {
        let mut s = server();
        s.fan_overrides.push(FanOverride {
            fan_identifier: "FAN1".to_string(),
            override_rpm: 2400,
        });
        assert!(matches!(
            s.validate(),
            Err(ConfigError::DuplicateOverride { .. })
        ));
    }

    #[test]
    fn hp_with_fan_zones_is_refused() {
        let mut s = server();
        s.vendor = Vendor::Hp;
        assert!(matches!(s.validate(), Err(ConfigError::Vendor { .. })));
        // Monitoring-only HP targets are fine.
        s.fan_zones.clear();
        s.fan_overrides.clear();
        assert!(s.validate().is_ok());
    }

    #[test]
    fn snapshot_cross_references_are_checked() {
        let mut config = EngineConfig {
            settings: EngineSettings::default(),
            servers: vec![server()],
            channels: Vec::new(),
            secrets: HashMap::new(),
        };
        config.servers[0].notification_channel_ids = vec![7];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownChannel { channel: 7, .. })
        ));
    }

    #[test]
    fn vendor_string_round_trips_through_serde() {
        let json = r#"{
            "id": 2, "name": "edge", "vendor": "dell",
            "bmc_host": "10.0.0.11", "credential_handle": "edge-bmc"
        }"#;
        let s: ServerTarget = serde_json::from_str(json).unwrap();
        assert_eq!(s.vendor, Vendor::Dell);
        assert_eq!(s.bmc_port, 623);
        assert_eq!(s.offline_alert_threshold_minutes, 15);
        assert!(serde_json::from_str::<ServerTarget>(&json.replace("dell", "ibm")).is_err());
    }
}
