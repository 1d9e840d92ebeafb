//! Alert lifecycle: open/clear state per (server, alert type), with the
//! transition rules that decide when a notification goes out.

pub mod store;
pub mod tracker;
pub mod types;

pub use store::AlertStore;
pub use tracker::{AlertTracker, ConnectivityWindow};
pub use types::{ActiveAlert, AlertEvent, AlertEventKind, AlertType};
