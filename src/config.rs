//! Configuration snapshot: types and loading.

pub mod persistence;
pub mod types;
