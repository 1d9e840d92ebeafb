//! Alert transition engine.
//!
//! Decides, per poll observation, whether an alert opens, refreshes or
//! clears, and returns the event to dispatch when (and only when) the
//! state actually transitions.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::store::{AlertStore, RaiseOutcome};
use super::types::{AlertEvent, AlertEventKind, AlertType};
use crate::config::types::ServerTarget;

/// Tracks how long a server has been continuously unreachable.
///
/// The window anchors at the last successful poll, so a server polled every
/// five minutes crosses a fifteen-minute threshold on its third consecutive
/// failure. A server that has never succeeded anchors at its first observed
/// failure instead.
#[derive(Debug, Default, Clone)]
pub struct ConnectivityWindow {
    last_success_at: Option<DateTime<Utc>>,
    first_failure_at: Option<DateTime<Utc>>,
}

impl ConnectivityWindow {
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_success_at = Some(now);
        self.first_failure_at = None;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.first_failure_at.get_or_insert(now);
    }

    pub fn first_failure_at(&self) -> Option<DateTime<Utc>> {
        self.first_failure_at
    }

    /// Start of the current unreachable stretch, if one is ongoing.
    pub fn unreachable_since(&self) -> Option<DateTime<Utc>> {
        let first_failure = self.first_failure_at?;
        Some(self.last_success_at.unwrap_or(first_failure))
    }

    pub fn past_threshold(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.unreachable_since()
            .map(|since| now - since >= threshold)
            .unwrap_or(false)
    }
}

/// Thin transition layer over the store; cheap to clone per job.
#[derive(Clone)]
pub struct AlertTracker {
    store: Arc<AlertStore>,
}

impl AlertTracker {
    pub fn new(store: Arc<AlertStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    /// Observe a condition for a non-connectivity alert type.
    /// `condition` carries the alert message when the trigger is present.
    pub async fn observe(
        &self,
        server: &ServerTarget,
        alert_type: AlertType,
        condition: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        match condition {
            Some(message) => {
                match self
                    .store
                    .raise(server.id, alert_type, message.clone(), now, now)
                    .await
                {
                    RaiseOutcome::Opened => {
                        info!("Alert opened for {}: {}", server.name, alert_type);
                        Some(self.event(server, alert_type, AlertEventKind::Opened, message, now))
                    }
                    RaiseOutcome::Retriggered { .. } => None,
                }
            }
            None => self.auto_clear(server, alert_type, now).await,
        }
    }

    /// Observe the outcome of a poll for the connectivity alert.
    /// `failure` carries the failure message on an unreachable poll; the
    /// alert only opens once the window crosses the server's offline
    /// threshold, so single-poll blips never notify.
    pub async fn observe_connectivity(
        &self,
        server: &ServerTarget,
        window: &mut ConnectivityWindow,
        failure: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        match failure {
            Some(message) => {
                window.record_failure(now);
                let threshold =
                    Duration::minutes(server.offline_alert_threshold_minutes as i64);
                if !window.past_threshold(now, threshold) {
                    return None;
                }
                let first_failure = window.first_failure_at().unwrap_or(now);
                match self
                    .store
                    .raise(
                        server.id,
                        AlertType::Connectivity,
                        message.clone(),
                        first_failure,
                        now,
                    )
                    .await
                {
                    RaiseOutcome::Opened => {
                        info!("Connectivity alert opened for {}", server.name);
                        Some(self.event(
                            server,
                            AlertType::Connectivity,
                            AlertEventKind::Opened,
                            message,
                            now,
                        ))
                    }
                    RaiseOutcome::Retriggered { .. } => None,
                }
            }
            None => {
                window.record_success(now);
                self.auto_clear(server, AlertType::Connectivity, now).await
            }
        }
    }

    /// Explicit clear from the user-facing layer.
    pub async fn clear_manual(
        &self,
        server: &ServerTarget,
        alert_type: AlertType,
        user: &str,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let cleared = self.store.clear(server.id, alert_type, user, now).await?;
        info!(
            "Alert {} for {} cleared by {}",
            alert_type, server.name, user
        );
        Some(self.event(server, alert_type, AlertEventKind::Cleared, cleared.message, now))
    }

    async fn auto_clear(
        &self,
        server: &ServerTarget,
        alert_type: AlertType,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let cleared = self.store.clear(server.id, alert_type, "system", now).await?;
        info!("Alert {} for {} cleared", alert_type, server.name);
        Some(self.event(server, alert_type, AlertEventKind::Cleared, cleared.message, now))
    }

    fn event(
        &self,
        server: &ServerTarget,
        alert_type: AlertType,
        kind: AlertEventKind,
        message: String,
        at: DateTime<Utc>,
    ) -> AlertEvent {
        AlertEvent {
            server_id: server.id,
            server_name: server.name.clone(),
            alert_type,
            kind,
            message,
            at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{AlertSubscriptions, ServerTarget};
    use crate::vendor::Vendor;
    use chrono::TimeZone;

    fn server() -> ServerTarget {
        ServerTarget {
            id: 7,
            name: "rack-b2".to_string(),
            vendor: Vendor::Supermicro,
            bmc_host: "10.0.0.20".to_string(),
            bmc_port: 623,
            credential_handle: "bmc-b2".to_string(),
            poll_interval_seconds: Some(300),
            fan_zones: Vec::new(),
            fan_overrides: Vec::new(),
            alerts: AlertSubscriptions::default(),
            offline_alert_threshold_minutes: 15,
            critical_temp_c: 80.0,
            notification_channel_ids: Vec::new(),
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, minute, 0).unwrap()
    }

    fn tracker() -> AlertTracker {
        AlertTracker::new(Arc::new(AlertStore::new()))
    }

    #[tokio::test]
    async fn third_failed_poll_opens_exactly_one_alert() {
        let tracker = tracker();
        let server = server();
        let mut window = ConnectivityWindow::default();

        // Last good poll at t=0, then failures every 5 minutes.
        window.record_success(at(0));
        let e1 = tracker
            .observe_connectivity(&server, &mut window, Some("unreachable".into()), at(5))
            .await;
        let e2 = tracker
            .observe_connectivity(&server, &mut window, Some("unreachable".into()), at(10))
            .await;
        let e3 = tracker
            .observe_connectivity(&server, &mut window, Some("unreachable".into()), at(15))
            .await;

        assert!(e1.is_none());
        assert!(e2.is_none());
        let event = e3.expect("third failure crosses the 15 minute threshold");
        assert_eq!(event.kind, AlertEventKind::Opened);

        let open = tracker.store().open_for_server(server.id).await;
        assert_eq!(open.len(), 1);
        // first_triggered_at backdates to the first failed poll.
        assert_eq!(open[0].first_triggered_at, at(5));

        // A fourth failure re-triggers without a second alert or event.
        let e4 = tracker
            .observe_connectivity(&server, &mut window, Some("unreachable".into()), at(20))
            .await;
        assert!(e4.is_none());
        assert_eq!(tracker.store().open_for_server(server.id).await.len(), 1);
    }

    #[tokio::test]
    async fn successful_poll_clears_with_system() {
        let tracker = tracker();
        let server = server();
        let mut window = ConnectivityWindow::default();

        window.record_success(at(0));
        for minute in [5u32, 10, 15] {
            tracker
                .observe_connectivity(&server, &mut window, Some("unreachable".into()), at(minute))
                .await;
        }
        let cleared = tracker
            .observe_connectivity(&server, &mut window, None, at(20))
            .await
            .expect("recovery clears the open alert");
        assert_eq!(cleared.kind, AlertEventKind::Cleared);
        assert!(tracker.store().open_for_server(server.id).await.is_empty());
    }

    #[tokio::test]
    async fn never_successful_server_anchors_at_first_failure() {
        let tracker = tracker();
        let server = server();
        let mut window = ConnectivityWindow::default();

        assert!(tracker
            .observe_connectivity(&server, &mut window, Some("unreachable".into()), at(0))
            .await
            .is_none());
        assert!(tracker
            .observe_connectivity(&server, &mut window, Some("unreachable".into()), at(10))
            .await
            .is_none());
        // 15 minutes after the first failure the alert opens.
        assert!(tracker
            .observe_connectivity(&server, &mut window, Some("unreachable".into()), at(15))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn condition_alerts_follow_open_retrigger_clear() {
        let tracker = tracker();
        let server = server();

        let opened = tracker
            .observe(&server, AlertType::PowerFailure, Some("PS2 failed".into()), at(0))
            .await;
        assert_eq!(opened.unwrap().kind, AlertEventKind::Opened);

        let retriggered = tracker
            .observe(&server, AlertType::PowerFailure, Some("PS2 failed".into()), at(5))
            .await;
        assert!(retriggered.is_none());

        let cleared = tracker
            .observe(&server, AlertType::PowerFailure, None, at(10))
            .await;
        assert_eq!(cleared.unwrap().kind, AlertEventKind::Cleared);

        // Clearing again stays quiet.
        assert!(tracker
            .observe(&server, AlertType::PowerFailure, None, at(15))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn manual_clear_reports_the_user() {
        let tracker = tracker();
        let server = server();
        tracker
            .observe(&server, AlertType::Intrusion, Some("chassis open".into()), at(0))
            .await;
        let event = tracker
            .clear_manual(&server, AlertType::Intrusion, "ops-jane", at(2))
            .await
            .unwrap();
        assert_eq!(event.kind, AlertEventKind::Cleared);
        assert!(tracker.store().open_for_server(server.id).await.is_empty());
    }
}
