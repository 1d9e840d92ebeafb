//! The per-tick pipeline for one server.
//!
//! Strict order within a tick: resolve credentials, query sensors, evaluate
//! the curve, apply fan targets, query status flags, update alerts, emit
//! records. Cancellation is honored at step boundaries only, so an in-flight
//! ipmitool invocation is never interrupted and can never leave the BMC in a
//! half-applied state.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{EngineContext, JobRun, JobStatus};
use crate::alerts::{AlertEvent, AlertType, ConnectivityWindow};
use crate::bmc::{BmcEndpoint, ExecOutcome};
use crate::config::types::ServerTarget;
use crate::curve;
use crate::telemetry::TelemetrySample;
use crate::vendor::{CommandAdapter, CommandIntent, FanTarget};
use crate::vendor::parse::ParsedResponse;

/// Run one tick. Returns `None` when the tick was cancelled mid-flight, in
/// which case no `JobRun` is recorded.
pub async fn run_tick(
    ctx: &EngineContext,
    server: &ServerTarget,
    window: &mut ConnectivityWindow,
    cancel: &watch::Receiver<bool>,
) -> Option<JobRun> {
    let started_at = Utc::now();
    let adapter = CommandAdapter::new(server.vendor);
    let endpoint = BmcEndpoint {
        host: server.bmc_host.clone(),
        port: server.bmc_port,
    };

    // Credentials live exactly as long as this tick's executor calls.
    let login = match ctx.resolver.resolve_login(&server.credential_handle).await {
        Ok(login) => login,
        Err(e) => {
            return Some(
                finish(
                    ctx,
                    server,
                    started_at,
                    JobStatus::Failure,
                    format!("credential resolution failed: {e}"),
                )
                .await,
            );
        }
    };
    if cancelled(cancel) {
        return None;
    }

    // Sensor sweep.
    let descriptor = match adapter.describe(&CommandIntent::QuerySensors) {
        Ok(d) => d,
        Err(e) => {
            return Some(
                finish(ctx, server, started_at, JobStatus::Failure, e.to_string()).await,
            )
        }
    };
    let outcome = ctx.executor.execute(&endpoint, &login, &descriptor).await;
    if cancelled(cancel) {
        return None;
    }
    let readings = match outcome {
        ExecOutcome::Success(ParsedResponse::Sensors(readings)) => readings,
        ExecOutcome::Success(_) => {
            return Some(
                finish(
                    ctx,
                    server,
                    started_at,
                    JobStatus::Failure,
                    "sensor query returned an unexpected payload".to_string(),
                )
                .await,
            );
        }
        failure => {
            let message = failure
                .failure_message()
                .unwrap_or("sensor query failed")
                .to_string();
            if failure.feeds_connectivity_alert() {
                if server.alerts.connectivity {
                    let event = ctx
                        .tracker
                        .observe_connectivity(server, window, Some(message.clone()), Utc::now())
                        .await;
                    emit(ctx, server, event).await;
                } else {
                    window.record_failure(Utc::now());
                }
            }
            return Some(
                finish(
                    ctx,
                    server,
                    started_at,
                    JobStatus::Failure,
                    format!("sensor query failed: {message}"),
                )
                .await,
            );
        }
    };

    // The BMC answered: the unreachable stretch, if any, ends here.
    if server.alerts.connectivity {
        let event = ctx
            .tracker
            .observe_connectivity(server, window, None, Utc::now())
            .await;
        emit(ctx, server, event).await;
    } else {
        window.record_success(Utc::now());
    }

    let cpu_temp = readings.cpu_temp_c();
    let mut failures: Vec<String> = Vec::new();

    // Fan control: base target for all fans, then pinned override fans.
    if let Some(temp) = cpu_temp {
        if let Some(base) = curve::zone_target(temp, &server.fan_zones) {
            let targets =
                curve::evaluate(temp, &server.fan_zones, &server.fan_overrides, &readings.fan_rpms);
            debug!(
                "Server {}: CPU {:.1}°C -> base fan target {:?}",
                server.name, temp, base
            );
            apply_fan_target(ctx, &adapter, &endpoint, &login, None, base, &mut failures).await;
            if cancelled(cancel) {
                return None;
            }
            for fan_override in &server.fan_overrides {
                let target = targets
                    .get(&fan_override.fan_identifier)
                    .copied()
                    .unwrap_or(base);
                apply_fan_target(
                    ctx,
                    &adapter,
                    &endpoint,
                    &login,
                    Some(fan_override.fan_identifier.clone()),
                    target,
                    &mut failures,
                )
                .await;
                if cancelled(cancel) {
                    return None;
                }
            }
        }

        if server.alerts.temperature_critical {
            let condition = (temp >= server.critical_temp_c).then(|| {
                format!(
                    "CPU temperature critical: {temp:.1}°C (threshold {:.1}°C)",
                    server.critical_temp_c
                )
            });
            let event = ctx
                .tracker
                .observe(server, AlertType::TemperatureCritical, condition, Utc::now())
                .await;
            emit(ctx, server, event).await;
        }
    } else {
        warn!(
            "Server {}: no CPU temperature in SDR output, skipping fan control",
            server.name
        );
    }

    // Raw health flags, only when some subscription needs them.
    let mut flags = None;
    if server.alerts.wants_status_flags() {
        match adapter.describe(&CommandIntent::QueryStatusFlags) {
            Ok(descriptor) => {
                match ctx.executor.execute(&endpoint, &login, &descriptor).await {
                    ExecOutcome::Success(ParsedResponse::Status(parsed)) => {
                        if server.alerts.memory_errors {
                            let condition = parsed
                                .memory_error
                                .clone()
                                .map(|d| format!("Memory errors detected:\n{d}"));
                            let event = ctx
                                .tracker
                                .observe(server, AlertType::MemoryErrors, condition, Utc::now())
                                .await;
                            emit(ctx, server, event).await;
                        }
                        if server.alerts.power_failure {
                            let condition = parsed
                                .power_supply_fault
                                .clone()
                                .map(|d| format!("Power supply issue detected:\n{d}"));
                            let event = ctx
                                .tracker
                                .observe(server, AlertType::PowerFailure, condition, Utc::now())
                                .await;
                            emit(ctx, server, event).await;
                        }
                        if server.alerts.intrusion {
                            let condition = parsed
                                .intrusion
                                .clone()
                                .map(|d| format!("Chassis intrusion detected:\n{d}"));
                            let event = ctx
                                .tracker
                                .observe(server, AlertType::Intrusion, condition, Utc::now())
                                .await;
                            emit(ctx, server, event).await;
                        }
                        if server.alerts.voltage_issues {
                            let condition = parsed
                                .voltage_fault
                                .clone()
                                .map(|d| format!("Voltage issues detected:\n{d}"));
                            let event = ctx
                                .tracker
                                .observe(server, AlertType::VoltageIssues, condition, Utc::now())
                                .await;
                            emit(ctx, server, event).await;
                        }
                        flags = Some(parsed);
                    }
                    ExecOutcome::Success(_) => {
                        failures.push("status query returned an unexpected payload".to_string());
                    }
                    failure => {
                        failures.push(format!(
                            "status query failed: {}",
                            failure.failure_message().unwrap_or("unknown")
                        ));
                    }
                }
            }
            Err(e) => failures.push(format!("status query: {e}")),
        }
        if cancelled(cancel) {
            return None;
        }
    }

    let sample = TelemetrySample {
        server_id: server.id,
        taken_at: started_at,
        cpu_temp_c: cpu_temp,
        readings,
        flags,
    };
    ctx.sink.record_sample(&sample).await;

    let (status, message) = if failures.is_empty() {
        (JobStatus::Success, "ok".to_string())
    } else {
        (JobStatus::Partial, failures.join("; "))
    };
    Some(finish(ctx, server, started_at, status, message).await)
}

fn cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

async fn apply_fan_target(
    ctx: &EngineContext,
    adapter: &CommandAdapter,
    endpoint: &BmcEndpoint,
    login: &crate::credentials::BmcLogin,
    fan_id: Option<String>,
    target: FanTarget,
    failures: &mut Vec<String>,
) {
    let label = fan_id.clone().unwrap_or_else(|| "all fans".to_string());
    let intent = CommandIntent::SetFanTarget { fan_id, target };
    let descriptor = match adapter.describe(&intent) {
        Ok(d) => d,
        Err(e) => {
            failures.push(format!("fan command for {label}: {e}"));
            return;
        }
    };
    match ctx.executor.execute(endpoint, login, &descriptor).await {
        outcome if outcome.is_success() => {
            debug!("Applied {target:?} to {label}");
        }
        outcome => failures.push(format!(
            "set fan {label}: {}",
            outcome.failure_message().unwrap_or("unknown")
        )),
    }
}

/// Send an alert event, if any, to the channels bound to this server.
async fn emit(ctx: &EngineContext, server: &ServerTarget, event: Option<AlertEvent>) {
    let Some(event) = event else { return };
    let channels: Vec<_> = ctx
        .channels
        .iter()
        .filter(|c| server.notification_channel_ids.contains(&c.id))
        .cloned()
        .collect();
    if channels.is_empty() {
        debug!(
            "No notification channels bound to {}, alert recorded only",
            server.name
        );
        return;
    }
    ctx.dispatcher.dispatch(&event, &channels).await;
}

async fn finish(
    ctx: &EngineContext,
    server: &ServerTarget,
    started_at: chrono::DateTime<Utc>,
    status: JobStatus,
    message: String,
) -> JobRun {
    let run = JobRun {
        id: Uuid::new_v4(),
        server_id: server.id,
        started_at,
        finished_at: Utc::now(),
        status,
        message,
    };
    ctx.sink.record_job_run(&run).await;
    run
}
