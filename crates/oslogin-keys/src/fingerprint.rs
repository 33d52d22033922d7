// ABOUTME: SSH public key fingerprint computation.
// ABOUTME: Computes SHA256 fingerprints over SSH wire format, hex encoded.

use crate::error::{KeyError, Result};
use sha2::{Digest, Sha256};
use ssh_key::PublicKey;

const ALGO_NAME: &str = "ssh-ed25519";

/// Compute SHA256 fingerprint of a public key (hex encoded, lowercase).
///
/// The digest is taken over the SSH wire format of the key:
///
/// - Algorithm name as SSH string (4-byte length prefix + "ssh-ed25519")
/// - Key data as SSH string (4-byte length prefix + 32-byte public key)
///
/// This matches the fingerprint the identity provider indexes registered
/// keys by, so it can be compared directly against profile lookups.
/// Only ed25519 keys are supported. Other key types will return an error.
///
/// # Returns
/// A 64-character lowercase hex string representing the SHA256 hash.
///
/// # Errors
/// Returns `KeyError::UnsupportedKeyType` for non-ed25519 keys.
pub fn compute_fingerprint(public_key: &PublicKey) -> Result<String> {
    let key_bytes = match public_key.key_data() {
        ssh_key::public::KeyData::Ed25519(ed) => ed.as_ref(),
        other => {
            return Err(KeyError::UnsupportedKeyType(format!(
                "{:?}",
                other.algorithm()
            )));
        }
    };

    // Wire format: two length-prefixed strings, algorithm name then raw key.
    let mut wire = Vec::with_capacity(4 + ALGO_NAME.len() + 4 + key_bytes.len());
    push_ssh_string(&mut wire, ALGO_NAME.as_bytes());
    push_ssh_string(&mut wire, key_bytes);

    Ok(hex::encode(Sha256::digest(&wire)))
}

/// Append an SSH string: 4-byte big-endian length prefix followed by the data.
fn push_ssh_string(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}
