//! Alert records and events.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Connectivity,
    TemperatureCritical,
    MemoryErrors,
    PowerFailure,
    Intrusion,
    VoltageIssues,
}

impl AlertType {
    /// Notification subject line for an opened alert.
    pub fn subject(&self) -> &'static str {
        match self {
            AlertType::Connectivity => "Server Connectivity Alert",
            AlertType::TemperatureCritical => "Critical Temperature Alert",
            AlertType::MemoryErrors => "Memory Error Alert",
            AlertType::PowerFailure => "Power Supply Failure",
            AlertType::Intrusion => "Chassis Intrusion Alert",
            AlertType::VoltageIssues => "Voltage Issue Alert",
        }
    }

    /// Short label used inside message bodies.
    pub fn label(&self) -> &'static str {
        match self {
            AlertType::Connectivity => "Connectivity",
            AlertType::TemperatureCritical => "Temperature Critical",
            AlertType::MemoryErrors => "Memory Errors",
            AlertType::PowerFailure => "Power Failure",
            AlertType::Intrusion => "Intrusion",
            AlertType::VoltageIssues => "Voltage Issues",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One open (or just-cleared) alert. At most one open alert exists per
/// (server, alert type) pair at any time.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveAlert {
    pub server_id: i64,
    pub alert_type: AlertType,
    pub message: String,
    pub first_triggered_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    /// `"system"` on auto-clear, a user id on manual clear.
    pub cleared_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEventKind {
    Opened,
    Cleared,
}

/// What the tracker hands the dispatcher. Emitted once per Clear -> Open
/// transition and once per Open -> Clear transition, never on re-triggers.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub server_id: i64,
    pub server_name: String,
    pub alert_type: AlertType,
    pub kind: AlertEventKind,
    pub message: String,
    pub at: DateTime<Utc>,
}
