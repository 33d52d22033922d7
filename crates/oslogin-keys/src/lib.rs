// ABOUTME: Ephemeral SSH keypair and fingerprint primitives for oslogin sessions.
// ABOUTME: Keys are generated in memory per session and never touch disk.

mod error;
mod fingerprint;
mod keypair;

pub use error::{KeyError, Result};
pub use fingerprint::compute_fingerprint;
pub use keypair::EphemeralKeypair;

// Re-exported so downstream crates can name transport key material
// without depending on ssh-key directly.
pub use ssh_key::{PrivateKey, PublicKey};
