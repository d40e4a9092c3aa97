//! Builder pattern for session configuration.
//!
//! Provides a fluent API for configuring and creating [`Session`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use viewshare::Session;
//!
//! # fn example() -> viewshare::Result<()> {
//! let session = Session::builder()
//!     .credentials("alice", "secret")
//!     .call_timeout(Duration::from_secs(30))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::IceServer;
use crate::transport::backoff::{INITIAL_BACKOFF, MAX_BACKOFF};

use super::calls::{DEFAULT_CALL_TIMEOUT, ProgressSink};
use super::core::Session;

// ============================================================================
// Constants
// ============================================================================

/// Interval at which the reconnect countdown is published.
pub const COUNTDOWN_TICK: Duration = Duration::from_millis(250);

/// STUN servers used until the far end supplies its own list.
const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.services.mozilla.com",
    "stun:stun.l.google.com:19302",
];

// ============================================================================
// SessionConfig
// ============================================================================

/// Validated session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Default time a call may go without reply or progress.
    pub call_timeout: Duration,
    /// First reconnect delay.
    pub backoff_initial: Duration,
    /// Reconnect delay cap.
    pub backoff_max: Duration,
    /// Reconnect countdown publishing interval.
    pub countdown_tick: Duration,
    /// Login name.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Token from an earlier session.
    pub token: Option<String>,
    /// Initial ICE servers for peer links.
    pub ice_servers: Vec<IceServer>,
    /// Allow direct peer links.
    pub direct_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            backoff_initial: INITIAL_BACKOFF,
            backoff_max: MAX_BACKOFF,
            countdown_tick: COUNTDOWN_TICK,
            username: None,
            password: None,
            token: None,
            ice_servers: DEFAULT_ICE_SERVERS
                .iter()
                .map(|url| IceServer::new(*url))
                .collect(),
            direct_enabled: true,
        }
    }
}

// ============================================================================
// SessionBuilder
// ============================================================================

/// Builder for configuring a [`Session`].
///
/// Use [`Session::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default call timeout.
    #[inline]
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Sets the first reconnect delay and its cap.
    #[inline]
    #[must_use]
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.backoff_initial = initial;
        self.config.backoff_max = max;
        self
    }

    /// Sets how often the reconnect countdown is published.
    #[inline]
    #[must_use]
    pub fn countdown_tick(mut self, tick: Duration) -> Self {
        self.config.countdown_tick = tick;
        self
    }

    /// Sets login credentials.
    #[inline]
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Sets a token issued by an earlier login.
    #[inline]
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    /// Replaces the initial ICE server list.
    #[inline]
    #[must_use]
    pub fn ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.config.ice_servers = servers;
        self
    }

    /// Enables or disables direct peer links.
    #[inline]
    #[must_use]
    pub fn direct_enabled(mut self, enabled: bool) -> Self {
        self.config.direct_enabled = enabled;
        self
    }

    /// Builds the session with validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero durations or a backoff cap below
    /// the initial delay.
    pub fn build(self) -> Result<Session> {
        self.validate()?;
        Ok(Session::new(self.config))
    }

    fn validate(&self) -> Result<()> {
        let config = &self.config;
        if config.call_timeout.is_zero() {
            return Err(Error::config("call timeout must be greater than zero"));
        }
        if config.backoff_initial.is_zero() {
            return Err(Error::config("initial backoff must be greater than zero"));
        }
        if config.backoff_max < config.backoff_initial {
            return Err(Error::config(format!(
                "backoff cap {:?} is below initial backoff {:?}",
                config.backoff_max, config.backoff_initial
            )));
        }
        if config.countdown_tick.is_zero() {
            return Err(Error::config("countdown tick must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// RpcOptions
// ============================================================================

/// Per-call options for [`Session::rpc`].
#[derive(Clone, Default)]
pub struct RpcOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) progress: Option<ProgressSink>,
}

impl std::fmt::Debug for RpcOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcOptions")
            .field("timeout", &self.timeout)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl RpcOptions {
    /// Creates options using the session defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the call timeout.
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Installs a progress callback, invoked with `(status, value)`.
    #[must_use]
    pub fn on_progress(
        mut self,
        sink: impl Fn(&serde_json::Value, &serde_json::Value) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(std::sync::Arc::new(sink));
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
