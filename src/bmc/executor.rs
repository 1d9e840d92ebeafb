//! Retrying command executor with a typed outcome taxonomy.
//!
//! Transient failures (timeout, connection refused) are retried with
//! exponential backoff; definitive rejections (bad parameters, hard auth
//! failure) surface immediately. The executor knows nothing about fan
//! curves — vendor quirks stay in the adapter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{BmcEndpoint, BmcTransport, TransportError};
use crate::credentials::BmcLogin;
use crate::vendor::adapter::CommandDescriptor;
use crate::vendor::parse::ParsedResponse;

#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Success(ParsedResponse),
    Timeout { message: String },
    ConnectivityFailure { message: String },
    AuthFailure { message: String },
    ProtocolError { message: String },
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecOutcome::Success(_))
    }

    /// Retry only what a later attempt could plausibly fix.
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecOutcome::Timeout { .. } | ExecOutcome::ConnectivityFailure { .. }
        )
    }

    /// Whether this outcome counts toward the offline/connectivity alert.
    /// Protocol errors do not: the BMC answered, just not usefully.
    pub fn feeds_connectivity_alert(&self) -> bool {
        matches!(
            self,
            ExecOutcome::Timeout { .. }
                | ExecOutcome::ConnectivityFailure { .. }
                | ExecOutcome::AuthFailure { .. }
        )
    }

    pub fn failure_message(&self) -> Option<&str> {
        match self {
            ExecOutcome::Success(_) => None,
            ExecOutcome::Timeout { message }
            | ExecOutcome::ConnectivityFailure { message }
            | ExecOutcome::AuthFailure { message }
            | ExecOutcome::ProtocolError { message } => Some(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecPolicy {
    pub attempt_timeout: Duration,
    pub retries: u32,
    pub backoff_base: Duration,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }
}

pub struct Executor {
    transport: Arc<dyn BmcTransport>,
    policy: ExecPolicy,
}

impl Executor {
    pub fn new(transport: Arc<dyn BmcTransport>, policy: ExecPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn execute(
        &self,
        endpoint: &BmcEndpoint,
        login: &BmcLogin,
        descriptor: &CommandDescriptor,
    ) -> ExecOutcome {
        let mut attempt = 0u32;
        loop {
            let outcome = self.attempt(endpoint, login, descriptor).await;
            if !outcome.is_transient() || attempt >= self.policy.retries {
                return outcome;
            }

            let backoff = self.policy.backoff_base * 2u32.pow(attempt);
            debug!(
                "Transient BMC failure ({}), retrying in {:?} (attempt {}/{})",
                outcome.failure_message().unwrap_or("unknown"),
                backoff,
                attempt + 1,
                self.policy.retries,
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        endpoint: &BmcEndpoint,
        login: &BmcLogin,
        descriptor: &CommandDescriptor,
    ) -> ExecOutcome {
        if let Some(prepare) = &descriptor.prepare {
            match self.run_once(endpoint, login, prepare).await {
                Ok(_) => {}
                Err(outcome) => return outcome,
            }
        }

        let output = match self.run_once(endpoint, login, &descriptor.args).await {
            Ok(output) => output,
            Err(outcome) => return outcome,
        };

        match (descriptor.parser)(&output) {
            Ok(parsed) => ExecOutcome::Success(parsed),
            Err(e) => ExecOutcome::ProtocolError {
                message: format!("response parse failed: {e}"),
            },
        }
    }

    /// One transport invocation, mapped to an outcome on any failure and
    /// to the raw stdout on success.
    async fn run_once(
        &self,
        endpoint: &BmcEndpoint,
        login: &BmcLogin,
        args: &[String],
    ) -> Result<String, ExecOutcome> {
        match self
            .transport
            .run(endpoint, login, args, self.policy.attempt_timeout)
            .await
        {
            Err(TransportError::TimedOut) => Err(ExecOutcome::Timeout {
                message: format!(
                    "command timed out after {:?}",
                    self.policy.attempt_timeout
                ),
            }),
            Err(TransportError::Spawn(e)) => Err(ExecOutcome::ProtocolError {
                message: format!("failed to launch ipmitool: {e}"),
            }),
            Ok(output) if !output.status_ok => {
                let outcome = classify_failure(&output.stderr);
                warn!(
                    "BMC command failed at {}:{}: {}",
                    endpoint.host,
                    endpoint.port,
                    outcome.failure_message().unwrap_or("unknown"),
                );
                Err(outcome)
            }
            Ok(output) => Ok(output.stdout),
        }
    }
}

/// Classify a non-zero ipmitool exit by its stderr.
/// A rejected HMAC means the BMC answered and turned the session down, so
/// auth markers are checked before the broader session-setup phrases.
pub(crate) fn classify_failure(stderr: &str) -> ExecOutcome {
    let text = stderr.trim();
    let lower = text.to_ascii_lowercase();

    const AUTH_MARKERS: &[&str] = &[
        "hmac is invalid",
        "invalid user",
        "authentication",
        "password invalid",
        "insufficient privilege",
    ];
    const CONNECTIVITY_MARKERS: &[&str] = &[
        "unable to establish",
        "connection refused",
        "no route to host",
        "network is unreachable",
        "timeout",
        "timed out",
        "insufficient resources for session",
    ];

    let message = if text.is_empty() {
        "ipmitool exited with an error and no output".to_string()
    } else {
        text.to_string()
    };

    if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        ExecOutcome::AuthFailure { message }
    } else if CONNECTIVITY_MARKERS.iter().any(|m| lower.contains(m)) {
        ExecOutcome::ConnectivityFailure { message }
    } else {
        ExecOutcome::ProtocolError { message }
    }
}
