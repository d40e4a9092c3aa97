//! Observable connection state of a session.
//!
//! Published through a `tokio::sync::watch` channel so UIs can render
//! connecting spinners, login prompts and reconnect countdowns.

use std::time::Duration;

/// Outcome of the most recent login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthStatus {
    /// No login attempted yet.
    #[default]
    Unknown,
    /// A link is up but no username is configured.
    NeedLogin,
    /// The far end rejected the credentials or token.
    BadLogin,
    /// Logged in.
    LoggedIn,
}

/// Snapshot of the session as seen by observers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalState {
    /// A connection attempt is in progress.
    pub connecting: bool,
    /// Login outcome.
    pub auth_status: AuthStatus,
    /// Code of the last transport failure, 0 after a successful connect.
    pub error_code: u32,
    /// Message of the last transport failure.
    pub error: Option<String>,
    /// Time left until the next reconnect attempt.
    pub reconnect_countdown: Option<Duration>,
    /// Identifier the far end assigned at login.
    pub my_id: Option<String>,
}
