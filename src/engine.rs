//! Orchestration core: job scheduling, the per-tick pipeline, and the
//! records flowing out of it.

pub mod poll;
pub mod scheduler;

pub use scheduler::JobScheduler;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::alerts::AlertTracker;
use crate::bmc::Executor;
use crate::config::types::{EngineSettings, NotificationChannel};
use crate::credentials::CredentialResolver;
use crate::notify::Dispatcher;
use crate::telemetry::TelemetrySample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Partial,
    Failure,
}

/// Outcome record of one tick. Ephemeral: surfaced to the persistence
/// collaborator and not retained in-process.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub id: Uuid,
    pub server_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: JobStatus,
    pub message: String,
}

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Fire-and-forget: implementations swallow their own failures, a
    /// storage hiccup never fails the job that produced the record.
    async fn record_sample(&self, sample: &TelemetrySample);
    async fn record_job_run(&self, run: &JobRun);
}

/// Sink that surfaces records through the log stream only.
pub struct LogSink;

#[async_trait]
impl PersistenceSink for LogSink {
    async fn record_sample(&self, sample: &TelemetrySample) {
        debug!(
            "Telemetry for server {}: cpu={:?}°C, {} temps, {} fans",
            sample.server_id,
            sample.cpu_temp_c,
            sample.readings.temperatures_c.len(),
            sample.readings.fan_rpms.len(),
        );
    }

    async fn record_job_run(&self, run: &JobRun) {
        match run.status {
            JobStatus::Success => debug!(
                "Job run for server {} succeeded ({} -> {})",
                run.server_id, run.started_at, run.finished_at
            ),
            JobStatus::Partial | JobStatus::Failure => info!(
                "Job run for server {} ended {:?}: {}",
                run.server_id, run.status, run.message
            ),
        }
    }
}

/// Everything a job task needs, shared read-only across all jobs.
pub struct EngineContext {
    pub settings: EngineSettings,
    pub executor: Executor,
    pub resolver: Arc<dyn CredentialResolver>,
    pub tracker: AlertTracker,
    pub dispatcher: Arc<Dispatcher>,
    pub sink: Arc<dyn PersistenceSink>,
    /// Snapshot of configured channels; jobs pick theirs by id.
    pub channels: Vec<NotificationChannel>,
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Shared fixtures for the poll and scheduler tests.

    use super::*;
    use crate::alerts::AlertStore;
    use crate::bmc::{BmcEndpoint, BmcTransport, ExecPolicy, RawOutput, TransportError};
    use crate::config::types::{
        AlertSubscriptions, ChannelKind, FanOverride, FanZone, SecretEntry, ServerTarget,
    };
    use crate::credentials::{BmcLogin, StaticResolver};
    use crate::notify::{ChannelSender, NotifyError, NotifyPolicy};
    use crate::vendor::Vendor;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    pub const SDR_CSV_COOL: &str = "\
CPU Temp,40,degrees C,ok
System Temp,31,degrees C,ok
FAN1,2100,RPM,ok
FAN2,1800,RPM,ok
";

    pub const SDR_CSV_HOT: &str = "\
CPU Temp,85,degrees C,ok
FAN1,4000,RPM,ok
";

    pub const ELIST_PSU_FAULT: &str = "\
CPU Temp         | 04h | ok  |  7.1 | 40 degrees C
PS2 Status       | c9h | nc  | 10.2 | Failure detected
";

    /// Transport with canned responses, optional delay, per-query failure
    /// switches, and a full call log.
    pub struct MockTransport {
        pub delay: Duration,
        pub fail_sensors: bool,
        pub sensor_csv: String,
        pub elist: String,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self {
                delay: Duration::ZERO,
                fail_sensors: false,
                sensor_csv: SDR_CSV_COOL.to_string(),
                elist: ELIST_PSU_FAULT.to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl MockTransport {
        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        pub fn raw_calls(&self) -> Vec<Vec<String>> {
            self.calls()
                .into_iter()
                .filter(|args| args.first().map(String::as_str) == Some("raw"))
                .collect()
        }
    }

    #[async_trait]
    impl BmcTransport for MockTransport {
        async fn run(
            &self,
            _endpoint: &BmcEndpoint,
            _login: &BmcLogin,
            args: &[String],
            _timeout: Duration,
        ) -> Result<RawOutput, TransportError> {
            self.calls.lock().unwrap().push(args.to_vec());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let is_sensor_query = args.first().map(String::as_str) == Some("-c");
            if is_sensor_query && self.fail_sensors {
                return Ok(RawOutput {
                    status_ok: false,
                    stdout: String::new(),
                    stderr: "Error: Unable to establish IPMI v2 / RAKP 2 session".to_string(),
                });
            }

            let stdout = if is_sensor_query {
                self.sensor_csv.clone()
            } else if args.iter().any(|a| a == "elist") {
                self.elist.clone()
            } else {
                String::new()
            };
            Ok(RawOutput {
                status_ok: true,
                stdout,
                stderr: String::new(),
            })
        }
    }

    /// Sender that accepts everything and counts deliveries.
    pub struct NullSender {
        pub sent: Mutex<Vec<String>>,
    }

    impl NullSender {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChannelSender for NullSender {
        async fn post(
            &self,
            url: &str,
            _payload: &serde_json::Value,
            _timeout: Duration,
        ) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    /// Sink collecting records in memory.
    #[derive(Default)]
    pub struct CollectingSink {
        pub samples: Mutex<Vec<TelemetrySample>>,
        pub runs: Mutex<Vec<JobRun>>,
    }

    #[async_trait]
    impl PersistenceSink for CollectingSink {
        async fn record_sample(&self, sample: &TelemetrySample) {
            self.samples.lock().unwrap().push(sample.clone());
        }

        async fn record_job_run(&self, run: &JobRun) {
            self.runs.lock().unwrap().push(run.clone());
        }
    }

    pub fn test_server(id: i64) -> ServerTarget {
        ServerTarget {
            id,
            name: format!("rack-{id}"),
            vendor: Vendor::Supermicro,
            bmc_host: "10.0.0.10".to_string(),
            bmc_port: 623,
            credential_handle: "bmc-test".to_string(),
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
            alerts: AlertSubscriptions {
                connectivity: true,
                temperature_critical: true,
                memory_errors: true,
                power_failure: true,
                intrusion: true,
                voltage_issues: true,
            },
            offline_alert_threshold_minutes: 15,
            critical_temp_c: 80.0,
            notification_channel_ids: Vec::new(),
        }
    }

    pub struct TestHarness {
        pub ctx: Arc<EngineContext>,
        pub transport: Arc<MockTransport>,
        pub sender: Arc<NullSender>,
        pub sink: Arc<CollectingSink>,
    }

    pub fn harness(transport: MockTransport) -> TestHarness {
        harness_with(transport, EngineSettings::default(), Vec::new())
    }

    pub fn harness_with(
        transport: MockTransport,
        settings: EngineSettings,
        channels: Vec<NotificationChannel>,
    ) -> TestHarness {
        let transport = Arc::new(transport);
        let sender = Arc::new(NullSender::new());
        let sink = Arc::new(CollectingSink::default());

        let mut secrets = HashMap::new();
        secrets.insert(
            "bmc-test".to_string(),
            SecretEntry::Login {
                username: "admin".to_string(),
                password: "secret".to_string(),
            },
        );
        secrets.insert(
            "hook-test".to_string(),
            SecretEntry::Value("https://hooks.example/zephyr".to_string()),
        );
        let resolver: Arc<dyn CredentialResolver> = Arc::new(StaticResolver::new(secrets));

        let store = Arc::new(AlertStore::new());
        let ctx = Arc::new(EngineContext {
            settings,
            executor: Executor::new(
                Arc::clone(&transport) as Arc<dyn BmcTransport>,
                ExecPolicy {
                    attempt_timeout: Duration::from_secs(5),
                    retries: 0,
                    backoff_base: Duration::from_millis(10),
                },
            ),
            resolver: Arc::clone(&resolver),
            tracker: AlertTracker::new(store),
            dispatcher: Arc::new(Dispatcher::new(
                Arc::clone(&sender) as Arc<dyn ChannelSender>,
                resolver,
                NotifyPolicy::default(),
            )),
            sink: Arc::clone(&sink) as Arc<dyn PersistenceSink>,
            channels,
        });

        TestHarness {
            ctx,
            transport,
            sender,
            sink,
        }
    }

    pub fn test_channel(id: i64) -> NotificationChannel {
        NotificationChannel {
            id,
            name: format!("hook-{id}"),
            kind: ChannelKind::Slack,
            endpoint_handle: "hook-test".to_string(),
            enabled: true,
            chat_id: None,
        }
    }
}
