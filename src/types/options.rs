//! Gateway options and configuration
//!
//! This module contains the tunables for the gateway core, a builder for
//! programmatic configuration, and loading from `AGENT_GATEWAY_*` environment
//! variables for the server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Prefix of every environment variable read by [`GatewayOptions::from_env`]
pub const ENV_PREFIX: &str = "AGENT_GATEWAY_";

// ============================================================================
// Gateway Options
// ============================================================================

/// Main options for the agent gateway
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Address the HTTP/WebSocket server binds to
    pub bind_addr: SocketAddr,
    /// Maximum inbound envelopes emitted per batch
    pub inbound_batch_size: usize,
    /// Interval of the inbound batch tick
    pub inbound_interval: Duration,
    /// Number of recent dedup keys remembered
    pub dedup_window: usize,
    /// Interval of the outbound dispatch tick
    pub dispatch_interval: Duration,
    /// How long a dispatched command may run before its agent is freed
    pub command_timeout: Duration,
    /// Interval of the timeout sweep
    pub timeout_sweep_interval: Duration,
    /// Interval of the pending-operation retry sweep
    pub retry_sweep_interval: Duration,
    /// Consecutive loop failures before the loop pauses
    pub breaker_threshold: u32,
    /// How long a tripped loop stays paused
    pub breaker_cooldown: Duration,
    /// Maximum per-agent entries in the stats snapshot
    pub stats_agent_limit: usize,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
    /// Treat reconnection after a self-update command as its success
    pub reconnect_implies_update_success: bool,
    /// How long after timing out a self-update may still be confirmed by a reconnect
    pub update_confirm_window: Duration,
    /// JSON file backing the operation store; in-memory when `None`
    pub store_path: Option<PathBuf>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 30480)),
            inbound_batch_size: 50,
            inbound_interval: Duration::from_millis(100),
            dedup_window: 1000,
            dispatch_interval: Duration::from_secs(1),
            command_timeout: Duration::from_secs(5 * 60),
            timeout_sweep_interval: Duration::from_secs(60),
            retry_sweep_interval: Duration::from_secs(60),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
            stats_agent_limit: 50,
            event_capacity: 1024,
            reconnect_implies_update_success: true,
            update_confirm_window: Duration::from_secs(15 * 60),
            store_path: None,
        }
    }
}

impl GatewayOptions {
    /// Create a new builder for `GatewayOptions`
    #[must_use]
    pub fn builder() -> GatewayOptionsBuilder {
        GatewayOptionsBuilder::default()
    }

    /// Load options from `AGENT_GATEWAY_*` environment variables.
    ///
    /// # Errors
    /// Returns error if a variable is set but cannot be parsed, or the result
    /// fails [`validate`](Self::validate)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load options through an arbitrary key lookup (keys include the prefix)
    ///
    /// # Errors
    /// Same as [`from_env`](Self::from_env)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut options = Self::default();

        if let Some(v) = get("BIND") {
            options.bind_addr = parse_value("BIND", &v)?;
        }
        if let Some(v) = get("BATCH_SIZE") {
            options.inbound_batch_size = parse_value("BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("INBOUND_INTERVAL_MS") {
            options.inbound_interval = Duration::from_millis(parse_value("INBOUND_INTERVAL_MS", &v)?);
        }
        if let Some(v) = get("DEDUP_WINDOW") {
            options.dedup_window = parse_value("DEDUP_WINDOW", &v)?;
        }
        if let Some(v) = get("DISPATCH_INTERVAL_MS") {
            options.dispatch_interval = Duration::from_millis(parse_value("DISPATCH_INTERVAL_MS", &v)?);
        }
        if let Some(v) = get("COMMAND_TIMEOUT_SECS") {
            options.command_timeout = Duration::from_secs(parse_value("COMMAND_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("TIMEOUT_SWEEP_SECS") {
            options.timeout_sweep_interval = Duration::from_secs(parse_value("TIMEOUT_SWEEP_SECS", &v)?);
        }
        if let Some(v) = get("RETRY_SWEEP_SECS") {
            options.retry_sweep_interval = Duration::from_secs(parse_value("RETRY_SWEEP_SECS", &v)?);
        }
        if let Some(v) = get("BREAKER_THRESHOLD") {
            options.breaker_threshold = parse_value("BREAKER_THRESHOLD", &v)?;
        }
        if let Some(v) = get("BREAKER_COOLDOWN_SECS") {
            options.breaker_cooldown = Duration::from_secs(parse_value("BREAKER_COOLDOWN_SECS", &v)?);
        }
        if let Some(v) = get("STATS_AGENT_LIMIT") {
            options.stats_agent_limit = parse_value("STATS_AGENT_LIMIT", &v)?;
        }
        if let Some(v) = get("EVENT_CAPACITY") {
            options.event_capacity = parse_value("EVENT_CAPACITY", &v)?;
        }
        if let Some(v) = get("RECONNECT_IMPLIES_UPDATE") {
            options.reconnect_implies_update_success = parse_value("RECONNECT_IMPLIES_UPDATE", &v)?;
        }
        if let Some(v) = get("UPDATE_CONFIRM_WINDOW_SECS") {
            options.update_confirm_window =
                Duration::from_secs(parse_value("UPDATE_CONFIRM_WINDOW_SECS", &v)?);
        }
        if let Some(v) = get("STORE_PATH") {
            options.store_path = Some(PathBuf::from(v));
        }

        options.validate()?;
        Ok(options)
    }

    /// Reject values that would stall or spin the processing loops
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidConfig`] naming the offending field
    pub fn validate(&self) -> Result<()> {
        if self.inbound_batch_size == 0 {
            return Err(GatewayError::invalid_config("inbound_batch_size must be > 0"));
        }
        if self.dedup_window == 0 {
            return Err(GatewayError::invalid_config("dedup_window must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(GatewayError::invalid_config("event_capacity must be > 0"));
        }
        if self.breaker_threshold == 0 {
            return Err(GatewayError::invalid_config("breaker_threshold must be > 0"));
        }
        let intervals = [
            ("inbound_interval", self.inbound_interval),
            ("dispatch_interval", self.dispatch_interval),
            ("command_timeout", self.command_timeout),
            ("timeout_sweep_interval", self.timeout_sweep_interval),
            ("retry_sweep_interval", self.retry_sweep_interval),
            ("update_confirm_window", self.update_confirm_window),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(GatewayError::invalid_config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| {
        GatewayError::invalid_config(format!("{ENV_PREFIX}{name}={raw:?}: {e}"))
    })
}

// ============================================================================
// Builder for GatewayOptions
// ============================================================================

/// Builder for `GatewayOptions`
#[derive(Debug, Default)]
pub struct GatewayOptionsBuilder {
    options: GatewayOptions,
}

impl GatewayOptionsBuilder {
    /// Set the bind address
    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.options.bind_addr = addr;
        self
    }

    /// Set the inbound batch size
    #[must_use]
    pub fn inbound_batch_size(mut self, size: usize) -> Self {
        self.options.inbound_batch_size = size;
        self
    }

    /// Set the inbound batch interval
    #[must_use]
    pub fn inbound_interval(mut self, interval: Duration) -> Self {
        self.options.inbound_interval = interval;
        self
    }

    /// Set the dedup window size
    #[must_use]
    pub fn dedup_window(mut self, size: usize) -> Self {
        self.options.dedup_window = size;
        self
    }

    /// Set the dispatch tick interval
    #[must_use]
    pub fn dispatch_interval(mut self, interval: Duration) -> Self {
        self.options.dispatch_interval = interval;
        self
    }

    /// Set the command timeout
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = timeout;
        self
    }

    /// Set the timeout sweep interval
    #[must_use]
    pub fn timeout_sweep_interval(mut self, interval: Duration) -> Self {
        self.options.timeout_sweep_interval = interval;
        self
    }

    /// Set the retry sweep interval
    #[must_use]
    pub fn retry_sweep_interval(mut self, interval: Duration) -> Self {
        self.options.retry_sweep_interval = interval;
        self
    }

    /// Set the circuit breaker threshold and cooldown
    #[must_use]
    pub fn breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.options.breaker_threshold = threshold;
        self.options.breaker_cooldown = cooldown;
        self
    }

    /// Enable or disable the reconnect-implies-update-success heuristic
    #[must_use]
    pub const fn reconnect_implies_update_success(mut self, enabled: bool) -> Self {
        self.options.reconnect_implies_update_success = enabled;
        self
    }

    /// Set how long a timed-out self-update stays open to reconnect confirmation
    #[must_use]
    pub fn update_confirm_window(mut self, window: Duration) -> Self {
        self.options.update_confirm_window = window;
        self
    }

    /// Back the operation store with a JSON file
    #[must_use]
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.store_path = Some(path.into());
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> GatewayOptions {
        self.options
    }
}
