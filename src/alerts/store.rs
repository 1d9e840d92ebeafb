//! Open-alert bookkeeping.
//!
//! Holds only open alerts; a cleared record is stamped and handed back to
//! the caller (which forwards it to persistence and the dispatcher), so the
//! "at most one open alert per (server, alert type)" invariant is simply
//! the map key. Writes for a given server only ever come from that
//! server's own job task; the read path serves open-alert queries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::types::{ActiveAlert, AlertType};

#[derive(Debug, PartialEq, Eq)]
pub enum RaiseOutcome {
    /// Clear -> Open: a fresh alert was created.
    Opened,
    /// Open -> Open: the existing alert was refreshed.
    Retriggered { message_updated: bool },
}

#[derive(Default)]
pub struct AlertStore {
    open: RwLock<HashMap<(i64, AlertType), ActiveAlert>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a trigger observation. Opens a new alert when none is open,
    /// otherwise refreshes the existing one — rewriting the message only
    /// when its content materially differs.
    pub async fn raise(
        &self,
        server_id: i64,
        alert_type: AlertType,
        message: String,
        first_triggered_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RaiseOutcome {
        let mut open = self.open.write().await;
        match open.entry((server_id, alert_type)) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let alert = entry.get_mut();
                alert.last_updated_at = now;
                let message_updated = alert.message.trim() != message.trim();
                if message_updated {
                    alert.message = message;
                }
                RaiseOutcome::Retriggered { message_updated }
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(ActiveAlert {
                    server_id,
                    alert_type,
                    message,
                    first_triggered_at,
                    last_updated_at: now,
                    cleared_at: None,
                    cleared_by: None,
                });
                RaiseOutcome::Opened
            }
        }
    }

    /// Close the open alert for this key, if any, and return the stamped
    /// record. Idempotent: clearing a clear key is a no-op.
    pub async fn clear(
        &self,
        server_id: i64,
        alert_type: AlertType,
        cleared_by: &str,
        now: DateTime<Utc>,
    ) -> Option<ActiveAlert> {
        let mut open = self.open.write().await;
        let mut alert = open.remove(&(server_id, alert_type))?;
        alert.cleared_at = Some(now);
        alert.cleared_by = Some(cleared_by.to_string());
        alert.last_updated_at = now;
        Some(alert)
    }

    pub async fn open_for_server(&self, server_id: i64) -> Vec<ActiveAlert> {
        let open = self.open.read().await;
        let mut alerts: Vec<ActiveAlert> = open
            .values()
            .filter(|a| a.server_id == server_id)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.first_triggered_at);
        alerts
    }

    pub async fn open_alerts(&self) -> Vec<ActiveAlert> {
        let open = self.open.read().await;
        let mut alerts: Vec<ActiveAlert> = open.values().cloned().collect();
        alerts.sort_by_key(|a| (a.server_id, a.first_triggered_at));
        alerts
    }
}
