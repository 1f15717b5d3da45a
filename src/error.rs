//! Error type and result alias for the profiling core.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ProfileError>;

/// Errors reported by the profiling core.
///
/// These are caller-contract violations, not runtime conditions: a profile
/// that never reaches a milestone is a valid state, never an error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    /// A command identity was attached to a profile that already has one.
    #[error("command identity already attached")]
    IdentityAttached,
}
