//! Zephyr polling and fan-control engine.
//!
//! The core control loop of the Zephyr IPMI server-management service:
//! periodic BMC polling, fan-curve evaluation, vendor-specific fan
//! commands, alert lifecycle tracking and notification fan-out. The web
//! transport, credential encryption and storage engine are external
//! collaborators reaching in through the seams defined here.
//!
//! # Module structure
//!
//! - `config/` - configuration snapshot types and loading
//! - `credentials` - per-call credential resolution seam
//! - `vendor/` - vendor command adapter (descriptors + response parsers)
//! - `bmc/` - ipmitool transport and retrying executor
//! - `curve` - pure fan curve evaluation
//! - `telemetry` - per-poll records
//! - `alerts/` - alert store, transition engine, connectivity window
//! - `notify/` - channel formatting and dispatch
//! - `engine/` - job scheduler and the per-tick pipeline
//! - `app/` - CLI and tracing setup for the binary

pub mod alerts;
pub mod app;
pub mod bmc;
pub mod config;
pub mod credentials;
pub mod curve;
pub mod engine;
pub mod notify;
pub mod telemetry;
pub mod vendor;
