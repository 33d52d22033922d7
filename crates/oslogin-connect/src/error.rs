// ABOUTME: Public error taxonomy for connection establishment using thiserror.
// ABOUTME: Distinguishes resolution, provider, auth, transport, and abort failures.

use crate::provider::{ApiError, TransportError};
use thiserror::Error;

/// Errors surfaced by a connection attempt.
///
/// Only `TransportError::AuthMethodsExhausted` is ever retried internally,
/// and only while fingerprint evidence suggests a concurrent writer; every
/// variant here is terminal from the caller's point of view.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Identity or endpoint lookup failed.
    #[error("failed to resolve {what}: {source}")]
    Resolution {
        what: &'static str,
        #[source]
        source: ApiError,
    },

    /// The instance has no public NAT address to connect to.
    #[error("instance has no public address")]
    NoPublicAddress,

    /// Key registration failed for a reason other than the race signal.
    #[error("key registration failed: {0}")]
    Provider(#[source] ApiError),

    /// Registration succeeded but issued no POSIX accounts to log in as.
    #[error("login profile has no POSIX accounts")]
    NoLoginAccounts,

    /// Genuine authentication failure: either a non-race auth signal, or the
    /// race-eligible signal with an unchanged fingerprint set on re-probe.
    #[error("authentication failed: {0}")]
    Auth(#[source] TransportError),

    /// Network-level transport failure. Never classified as a race.
    #[error("connection failed: {0}")]
    Transport(#[source] TransportError),

    /// Ephemeral key generation or serialization failed.
    #[error(transparent)]
    Key(#[from] oslogin_keys::KeyError),

    /// The session was ended by the caller before completion.
    #[error("aborted")]
    Aborted,
}

/// Result type alias using ConnectError.
pub type Result<T> = std::result::Result<T, ConnectError>;
