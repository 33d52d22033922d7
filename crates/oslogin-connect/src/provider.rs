// ABOUTME: Collaborator trait seams for the identity provider, compute inventory, and shell transport.
// ABOUTME: Implementations adapt real cloud clients; tests substitute in-process mocks.

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

/// Failures from the identity provider or compute inventory APIs.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The caller lacks permission for the operation.
    #[error("permission denied: {0}")]
    Denied(String),

    /// The API could not be reached or returned a server-side failure.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Any other provider-reported failure.
    #[error("{0}")]
    Other(String),
}

/// Failures from the shell transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The server rejected every offered authentication method.
    ///
    /// This is the only failure eligible for race-detection retry: it is
    /// what an eventually-consistent provider produces when a just-uploaded
    /// key has not propagated to the host yet.
    #[error("all configured authentication methods failed")]
    AuthMethodsExhausted,

    /// Authentication failed for a reason other than method exhaustion.
    #[error("authentication failed: {0}")]
    AuthRejected(String),

    /// Network-level failure. Never classified as a race.
    #[error("network error: {0}")]
    Network(String),
}

/// POSIX login accounts issued by a successful key registration.
///
/// The provider returns the full profile on every registration; it replaces
/// any previously held profile wholesale, never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginProfile {
    /// Valid remote account usernames, in provider order.
    pub usernames: Vec<String>,
}

/// Network shape of a compute instance, as reported by the inventory API.
#[derive(Debug, Clone, Default)]
pub struct InstanceNetwork {
    pub interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkInterface {
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct AccessConfig {
    pub nat_ip: Option<String>,
}

impl InstanceNetwork {
    /// First public NAT address across all interfaces, if any.
    pub fn first_nat_ip(&self) -> Option<&str> {
        self.interfaces
            .iter()
            .flat_map(|iface| iface.access_configs.iter())
            .find_map(|cfg| cfg.nat_ip.as_deref())
    }
}

/// The identity provider's key-management surface.
#[async_trait]
pub trait OsLoginApi: Send + Sync {
    /// Email of the service account the API client authenticates as.
    async fn service_account(&self) -> Result<String, ApiError>;

    /// Upload a public key valid until `expiry_micros` (unix epoch microseconds)
    /// and return the refreshed login profile.
    ///
    /// The provider's write path is not safe under concurrent mutation; callers
    /// must serialize invocations (see `RegistrationLock`).
    async fn import_public_key(
        &self,
        principal: &str,
        public_key_openssh: &str,
        expiry_micros: i64,
    ) -> Result<LoginProfile, ApiError>;

    /// Fingerprints of every key currently registered for `principal`.
    ///
    /// Read-only; safe to call concurrently with registrations.
    async fn registered_fingerprints(&self, principal: &str) -> Result<BTreeSet<String>, ApiError>;
}

/// The compute inventory's instance-lookup surface.
#[async_trait]
pub trait ComputeInventory: Send + Sync {
    /// Network interfaces of the named instance.
    async fn instance_network(&self, zone: &str, name: &str) -> Result<InstanceNetwork, ApiError>;
}

/// Parameters for opening a shell transport.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub username: String,
    /// Private key in OpenSSH PEM format.
    pub private_key_openssh: String,
}

/// A live remote-shell session surrendered by the transport.
#[async_trait]
pub trait ShellSession: Send {
    /// Write data to the remote shell.
    ///
    /// # Errors
    /// Fails with a network error once the session is closed.
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the underlying transport. Safe to call more than once.
    async fn close(&mut self);

    /// Whether the session has been closed.
    fn is_closed(&self) -> bool;
}

/// The remote-shell transport.
#[async_trait]
pub trait ShellTransport: Send + Sync {
    /// Open a session, suspending until the transport reports ready or error.
    async fn connect(&self, params: ConnectParams) -> Result<Box<dyn ShellSession>, TransportError>;
}
