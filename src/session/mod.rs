//! Session orchestration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`SessionBuilder`], [`SessionConfig`] and [`RpcOptions`] |
//! | `calls` | Outstanding call table and [`Reply`] |
//! | `core` | [`Session`] itself |
//! | `state` | Observable [`LocalState`] |
//! | `subscription` | [`Subscription`] trait and routing |

// ============================================================================
// Submodules
// ============================================================================

/// Session configuration.
pub mod builder;

/// Outstanding calls.
pub mod calls;

/// Session orchestrator.
pub mod core;

/// Observable state.
pub mod state;

/// Subscription routing.
pub mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{COUNTDOWN_TICK, RpcOptions, SessionBuilder, SessionConfig};
pub use calls::{DEFAULT_CALL_TIMEOUT, ProgressSink, Reply};
pub use self::core::{MethodHandler, Session, SessionHandle};
pub use state::{AuthStatus, LocalState};
pub use subscription::Subscription;
