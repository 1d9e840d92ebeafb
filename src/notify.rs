//! Alert notification fan-out to external channels.

pub mod channels;
pub mod dispatcher;

pub use dispatcher::{ChannelSender, DispatchOutcome, Dispatcher, HttpSender, NotifyError, NotifyPolicy};
