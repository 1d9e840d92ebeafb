//! Credential resolution seam.
//!
//! The engine never owns long-lived plaintext credentials: a handle is
//! resolved at call time, used for that call, and dropped with it. The
//! production resolver sits in the web layer next to the secret store;
//! `StaticResolver` backs self-contained deployments and tests from the
//! `secrets` table of the configuration file.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::config::types::SecretEntry;

/// Decrypted BMC login, valid for the duration of one executor call.
#[derive(Debug, Clone)]
pub struct BmcLogin {
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve a BMC credential handle into a login pair.
    async fn resolve_login(&self, handle: &str) -> Result<BmcLogin>;

    /// Resolve an opaque secret handle (webhook URL, bot token).
    async fn resolve_secret(&self, handle: &str) -> Result<String>;
}

pub struct StaticResolver {
    secrets: HashMap<String, SecretEntry>,
}

impl StaticResolver {
    pub fn new(secrets: HashMap<String, SecretEntry>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl CredentialResolver for StaticResolver {
    async fn resolve_login(&self, handle: &str) -> Result<BmcLogin> {
        match self.secrets.get(handle) {
            Some(SecretEntry::Login { username, password }) => Ok(BmcLogin {
                username: username.clone(),
                password: password.clone(),
            }),
            Some(SecretEntry::Value(_)) => {
                Err(anyhow!("secret '{handle}' is not a login pair"))
            }
            None => Err(anyhow!("unknown credential handle '{handle}'")),
        }
    }

    async fn resolve_secret(&self, handle: &str) -> Result<String> {
        match self.secrets.get(handle) {
            Some(SecretEntry::Value(value)) => Ok(value.clone()),
            Some(SecretEntry::Login { .. }) => {
                Err(anyhow!("secret '{handle}' is a login pair, not a value"))
            }
            None => Err(anyhow!("unknown secret handle '{handle}'")),
        }
    }
}
