//! Per-channel delivery with isolation.
//!
//! Channels are sent concurrently, each with its own timeout and
//! retry/backoff; one channel failing never blocks or fails another, and
//! `dispatch` itself never errors — callers read the outcome list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::channels::{self, FormattedMessage};
use crate::alerts::AlertEvent;
use crate::config::types::{ChannelKind, NotificationChannel};
use crate::credentials::CredentialResolver;

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("telegram channel is missing its chat_id")]
    MissingChatId,
    #[error("endpoint resolution failed: {0}")]
    Endpoint(String),
    #[error("request timed out")]
    Timeout,
    #[error("endpoint answered HTTP {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

impl NotifyError {
    /// Another attempt only makes sense for transient delivery failures.
    fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Timeout | NotifyError::Transport(_) => true,
            NotifyError::Status(code) => *code >= 500,
            NotifyError::MissingChatId | NotifyError::Endpoint(_) => false,
        }
    }
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn post(
        &self,
        url: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<(), NotifyError>;
}

/// Production sender: one shared reqwest client for all channels.
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSender for HttpSender {
    async fn post(
        &self,
        url: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout
                } else {
                    NotifyError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct DispatchOutcome {
    pub channel_id: i64,
    pub channel_name: String,
    pub attempts: u32,
    pub result: Result<(), NotifyError>,
}

#[derive(Debug, Clone)]
pub struct NotifyPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff_base: Duration,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }
}

pub struct Dispatcher {
    sender: Arc<dyn ChannelSender>,
    resolver: Arc<dyn CredentialResolver>,
    policy: NotifyPolicy,
    failure_counts: Mutex<HashMap<i64, u64>>,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn ChannelSender>,
        resolver: Arc<dyn CredentialResolver>,
        policy: NotifyPolicy,
    ) -> Self {
        Self {
            sender,
            resolver,
            policy,
            failure_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Fan an alert event out to every enabled channel. Infallible by
    /// contract: partial failure is visible only in the outcome list.
    pub async fn dispatch(
        &self,
        event: &AlertEvent,
        channels: &[NotificationChannel],
    ) -> Vec<DispatchOutcome> {
        let message = channels::render_event(event);
        let sends = channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| self.deliver_with_retry(c, &message));
        let outcomes = join_all(sends).await;

        let mut counts = self.failure_counts.lock().await;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(()) => debug!(
                    "Delivered {} event to channel {}",
                    event.alert_type, outcome.channel_name
                ),
                Err(e) => {
                    *counts.entry(outcome.channel_id).or_insert(0) += 1;
                    warn!(
                        "Notification to channel {} failed after {} attempt(s): {}",
                        outcome.channel_name, outcome.attempts, e
                    );
                }
            }
        }
        outcomes
    }

    /// User-triggered test: one attempt, no retry, immediate outcome.
    pub async fn send_test(&self, channel: &NotificationChannel) -> DispatchOutcome {
        let message = channels::render_test();
        let result = self.deliver_once(channel, &message).await;
        DispatchOutcome {
            channel_id: channel.id,
            channel_name: channel.name.clone(),
            attempts: 1,
            result,
        }
    }

    /// Delivery failures seen so far, per channel id.
    pub async fn failure_counts(&self) -> HashMap<i64, u64> {
        self.failure_counts.lock().await.clone()
    }

    async fn deliver_with_retry(
        &self,
        channel: &NotificationChannel,
        message: &FormattedMessage,
    ) -> DispatchOutcome {
        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            match self.deliver_once(channel, message).await {
                Ok(()) => break Ok(()),
                Err(e) if e.is_retryable() && attempts <= self.policy.retries => {
                    let backoff = self.policy.backoff_base * 2u32.pow(attempts - 1);
                    debug!(
                        "Channel {} delivery failed ({}), retrying in {:?}",
                        channel.name, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => break Err(e),
            }
        };
        DispatchOutcome {
            channel_id: channel.id,
            channel_name: channel.name.clone(),
            attempts,
            result,
        }
    }

    async fn deliver_once(
        &self,
        channel: &NotificationChannel,
        message: &FormattedMessage,
    ) -> Result<(), NotifyError> {
        if channel.kind == ChannelKind::Telegram && channel.chat_id.is_none() {
            return Err(NotifyError::MissingChatId);
        }

        // Endpoint secrets are resolved per delivery and dropped with it.
        let endpoint = self
            .resolver
            .resolve_secret(&channel.endpoint_handle)
            .await
            .map_err(|e| NotifyError::Endpoint(e.to_string()))?;

        let url = channels::delivery_url(channel.kind, &endpoint);
        let payload =
            channels::webhook_payload(channel.kind, message, channel.chat_id.as_deref());
        self.sender.post(&url, &payload, self.policy.timeout).await
    }
}
