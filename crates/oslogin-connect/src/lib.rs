// ABOUTME: Cancellable SSH sessions against an OS Login-style identity provider.
// ABOUTME: Registers ephemeral keys just-in-time and absorbs key-propagation races.

use std::sync::Arc;
use std::time::Duration;

pub mod broker;
pub mod error;
pub mod identity;
pub mod lock;
pub mod provider;
pub mod session;

pub use broker::CredentialBroker;
pub use error::{ConnectError, Result};
pub use identity::EphemeralIdentity;
pub use lock::{RegistrationLock, REGISTRATION_LOCK_TOKEN};
pub use provider::{
    AccessConfig, ApiError, ComputeInventory, ConnectParams, InstanceNetwork, LoginProfile,
    NetworkInterface, OsLoginApi, ShellSession, ShellTransport, TransportError,
};
pub use session::{CancellableSession, SessionAborter};

/// Validity of each uploaded ephemeral key. Keys are short-lived by design;
/// a session registers a fresh one per attempt.
pub const KEY_TTL: Duration = Duration::from_secs(10 * 60);

/// How long to wait before re-reading the fingerprint set after a
/// race-candidate authentication failure. The provider's write path is
/// assumed eventually consistent within this order of magnitude.
pub const RACE_BACKOFF: Duration = Duration::from_secs(1);

/// A compute instance named by zone and instance name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    pub zone: String,
    pub name: String,
}

/// Construction input for one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// The logical instance to connect to.
    pub instance: InstanceRef,
    /// Connect to this host directly instead of resolving the instance's
    /// public address from the inventory.
    pub host: Option<String>,
}

/// Entry point: holds the collaborator clients and hands out sessions.
///
/// The process may host any number of concurrent sessions from one
/// `Connector` (or several); they share the registration lock but nothing
/// else.
pub struct Connector {
    oslogin: Arc<dyn OsLoginApi>,
    compute: Arc<dyn ComputeInventory>,
    transport: Arc<dyn ShellTransport>,
    lock: RegistrationLock,
}

impl Connector {
    /// Build a connector using the process-wide registration lock.
    pub fn new(
        oslogin: Arc<dyn OsLoginApi>,
        compute: Arc<dyn ComputeInventory>,
        transport: Arc<dyn ShellTransport>,
    ) -> Self {
        Self::with_lock(oslogin, compute, transport, RegistrationLock::process_wide())
    }

    /// Build a connector with an explicit registration lock.
    ///
    /// Tests substitute [`RegistrationLock::isolated`] to avoid cross-test
    /// interference; embedders with several API identities can scope a lock
    /// per identity the same way.
    pub fn with_lock(
        oslogin: Arc<dyn OsLoginApi>,
        compute: Arc<dyn ComputeInventory>,
        transport: Arc<dyn ShellTransport>,
        lock: RegistrationLock,
    ) -> Self {
        Self {
            oslogin,
            compute,
            transport,
            lock,
        }
    }

    /// Begin a connection attempt.
    ///
    /// Nothing happens until the returned session's
    /// [`establish`](CancellableSession::establish) future is driven; keep an
    /// [`aborter`](CancellableSession::aborter) handle to cancel it.
    pub fn connect(&self, options: ConnectOptions) -> CancellableSession {
        let identity = EphemeralIdentity::new(
            self.oslogin.clone(),
            self.compute.clone(),
            options.instance,
            options.host,
        );
        let broker = CredentialBroker::new(self.oslogin.clone(), self.lock.clone());
        CancellableSession::new(identity, broker, self.transport.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_match_provider_assumptions() {
        // Keys are meant to be ~10 minutes; the race backoff ~1 second.
        assert_eq!(KEY_TTL, Duration::from_secs(600));
        assert_eq!(RACE_BACKOFF, Duration::from_secs(1));
    }

    #[test]
    fn test_connect_options_clone() {
        let options = ConnectOptions {
            instance: InstanceRef {
                zone: "us-central1-a".to_string(),
                name: "builder-1".to_string(),
            },
            host: Some("203.0.113.5".to_string()),
        };
        let copied = options.clone();
        assert_eq!(copied.instance, options.instance);
        assert_eq!(copied.host, options.host);
    }
}
