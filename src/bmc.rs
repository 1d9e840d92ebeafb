//! BMC request/response boundary.
//!
//! Everything that touches a network-reachable BMC goes through here; the
//! rest of the engine sees only typed outcomes.

pub mod executor;

pub use executor::{ExecOutcome, ExecPolicy, Executor};

use std::time::Duration;

use async_trait::async_trait;

/// Network address of one BMC.
#[derive(Debug, Clone)]
pub struct BmcEndpoint {
    pub host: String,
    pub port: u16,
}

/// Raw result of one ipmitool invocation before outcome classification.
#[derive(Debug, Clone)]
pub struct RawOutput {
    pub status_ok: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub enum TransportError {
    /// The per-attempt timeout elapsed before the command finished.
    TimedOut,
    /// The command could not be launched at all.
    Spawn(String),
}

#[async_trait]
pub trait BmcTransport: Send + Sync {
    /// Run one ipmitool invocation against a BMC, bounded by `timeout`.
    async fn run(
        &self,
        endpoint: &BmcEndpoint,
        login: &crate::credentials::BmcLogin,
        args: &[String],
        timeout: Duration,
    ) -> Result<RawOutput, TransportError>;
}

/// Production transport: spawns `ipmitool -I lanplus` subprocesses.
pub struct IpmitoolTransport;

#[async_trait]
impl BmcTransport for IpmitoolTransport {
    async fn run(
        &self,
        endpoint: &BmcEndpoint,
        login: &crate::credentials::BmcLogin,
        args: &[String],
        timeout: Duration,
    ) -> Result<RawOutput, TransportError> {
        let mut cmd = tokio::process::Command::new("ipmitool");
        cmd.args([
            "-I",
            "lanplus",
            "-H",
            &endpoint.host,
            "-p",
            &endpoint.port.to_string(),
            "-U",
            &login.username,
            "-P",
            &login.password,
        ]);
        cmd.args(args);
        // A timed-out attempt must not leave the subprocess running.
        cmd.kill_on_drop(true);

        tracing::trace!("Executing: ipmitool ... {}", args.join(" "));

        match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => Err(TransportError::TimedOut),
            Ok(Err(e)) => Err(TransportError::Spawn(e.to_string())),
            Ok(Ok(output)) => Ok(RawOutput {
                status_ok: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
        }
    }
}
