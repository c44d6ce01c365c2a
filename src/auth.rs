//! Agent authentication collaborator
//!
//! The gateway asks an [`Authenticator`] once per connection attempt whether the
//! presented agent key is valid. Two implementations ship with the crate: a
//! static key table (used by the server binary) and a callback adapter for
//! business code that verifies against its own user/server records.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::types::identifiers::AgentId;

/// Environment variable holding `id:key` pairs for [`StaticKeyAuthenticator::from_env`]
pub const KEYS_ENV: &str = "AGENT_GATEWAY_KEYS";

/// Boxed future returned by [`Authenticator::verify`]
pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Callback type wrapped by [`callback`]
pub type AuthCallback =
    Arc<dyn Fn(AgentId, String) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// Verifies agent credentials
pub trait Authenticator: Send + Sync {
    /// Return `true` if `agent_key` is valid for `agent_id`
    fn verify<'a>(&'a self, agent_id: &'a AgentId, agent_key: &'a str) -> AuthFuture<'a>;
}

/// Wrap an async closure as an authenticator
///
/// # Example
/// ```
/// use kodegen_agent_gateway::auth;
///
/// let verifier = auth::callback(|agent_id, key| async move {
///     agent_id.as_str() == "web-01" && key == "secret"
/// });
/// # drop(verifier);
/// ```
pub fn callback<F, Fut>(f: F) -> Arc<dyn Authenticator>
where
    F: Fn(AgentId, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let callback: AuthCallback = Arc::new(move |agent_id, key| {
        Box::pin(f(agent_id, key)) as Pin<Box<dyn Future<Output = bool> + Send>>
    });
    Arc::new(CallbackAuthenticator { callback })
}

struct CallbackAuthenticator {
    callback: AuthCallback,
}

impl Authenticator for CallbackAuthenticator {
    fn verify<'a>(&'a self, agent_id: &'a AgentId, agent_key: &'a str) -> AuthFuture<'a> {
        (self.callback)(agent_id.clone(), agent_key.to_string())
    }
}

/// Authenticator backed by a fixed table of agent keys
#[derive(Debug, Clone, Default)]
pub struct StaticKeyAuthenticator {
    keys: HashMap<AgentId, String>,
}

impl StaticKeyAuthenticator {
    /// Create an empty table (rejects everyone)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the key of one agent
    #[must_use]
    pub fn with_key(mut self, agent_id: impl Into<AgentId>, key: impl Into<String>) -> Self {
        self.keys.insert(agent_id.into(), key.into());
        self
    }

    /// Parse `id:key` pairs separated by commas
    ///
    /// # Errors
    /// Returns `GatewayError::InvalidConfig` for an entry without `:` or with
    /// an empty id or key
    pub fn parse(pairs: &str) -> Result<Self> {
        let mut table = Self::new();
        for entry in pairs.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((id, key)) = entry.split_once(':') else {
                return Err(GatewayError::invalid_config(format!(
                    "agent key entry {entry:?} is not of the form id:key"
                )));
            };
            if id.is_empty() || key.is_empty() {
                return Err(GatewayError::invalid_config(format!(
                    "agent key entry {entry:?} has an empty id or key"
                )));
            }
            table.keys.insert(AgentId::new(id), key.to_string());
        }
        Ok(table)
    }

    /// Load the table from [`KEYS_ENV`]; empty when unset
    ///
    /// # Errors
    /// Same as [`parse`](Self::parse)
    pub fn from_env() -> Result<Self> {
        match std::env::var(KEYS_ENV) {
            Ok(pairs) => Self::parse(&pairs),
            Err(_) => Ok(Self::new()),
        }
    }

    /// Number of agents with a key
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Authenticator for StaticKeyAuthenticator {
    fn verify<'a>(&'a self, agent_id: &'a AgentId, agent_key: &'a str) -> AuthFuture<'a> {
        let valid = self
            .keys
            .get(agent_id)
            .is_some_and(|expected| expected.as_bytes() == agent_key.as_bytes());
        Box::pin(std::future::ready(valid))
    }
}
