// ABOUTME: Error types for ephemeral key operations using thiserror.
// ABOUTME: Provides typed errors for key generation, serialization, and fingerprinting.

use thiserror::Error;

/// Errors that can occur during ephemeral key operations.
#[derive(Error, Debug)]
pub enum KeyError {
    /// Failed to generate an SSH key.
    #[error("failed to generate SSH key: {0}")]
    GenerateKey(#[source] ssh_key::Error),

    /// Failed to serialize a key.
    #[error("failed to serialize key: {0}")]
    SerializeKey(#[source] ssh_key::Error),

    /// Unsupported key type for the requested operation.
    #[error("unsupported key type: {0} (only ed25519 is supported)")]
    UnsupportedKeyType(String),
}

/// Result type alias using KeyError.
pub type Result<T> = std::result::Result<T, KeyError>;
