// ABOUTME: Per-session identity material with lazy one-shot resolution.
// ABOUTME: Memoizes keypair, fingerprint, principal, and endpoint for the session's lifetime.

use crate::error::{ConnectError, Result};
use crate::provider::{ComputeInventory, OsLoginApi};
use crate::InstanceRef;
use oslogin_keys::EphemeralKeypair;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::OnceCell;

/// Identity material for one session attempt.
///
/// Every piece is computed on first access and memoized; once resolved,
/// none of it changes for the life of the session. The keypair is generated
/// fresh per session and is never persisted or regenerated.
pub struct EphemeralIdentity {
    oslogin: Arc<dyn OsLoginApi>,
    compute: Arc<dyn ComputeInventory>,
    instance: InstanceRef,
    host_override: Option<String>,
    keypair: OnceLock<EphemeralKeypair>,
    principal: OnceCell<String>,
    endpoint: OnceCell<String>,
}

impl EphemeralIdentity {
    pub fn new(
        oslogin: Arc<dyn OsLoginApi>,
        compute: Arc<dyn ComputeInventory>,
        instance: InstanceRef,
        host_override: Option<String>,
    ) -> Self {
        Self {
            oslogin,
            compute,
            instance,
            host_override,
            keypair: OnceLock::new(),
            principal: OnceCell::new(),
            endpoint: OnceCell::new(),
        }
    }

    /// The session's ephemeral keypair, generated on first access.
    ///
    /// # Errors
    /// Returns an error if key generation fails, which does not happen under
    /// normal operation.
    pub fn keypair(&self) -> Result<&EphemeralKeypair> {
        if let Some(keypair) = self.keypair.get() {
            return Ok(keypair);
        }
        let generated = EphemeralKeypair::generate()?;
        // The session runs as a single task, so this init does not race in
        // practice; if it ever did, the first stored keypair wins.
        Ok(self.keypair.get_or_init(|| generated))
    }

    /// SHA256 fingerprint of the session's public key (lowercase hex).
    pub fn fingerprint(&self) -> Result<&str> {
        Ok(self.keypair()?.fingerprint()?)
    }

    /// The principal keys are registered under, resolved from the provider's
    /// own credential discovery on first access.
    ///
    /// # Errors
    /// Returns `ConnectError::Resolution` if credential discovery fails.
    pub async fn principal(&self) -> Result<&str> {
        self.principal
            .get_or_try_init(|| async {
                self.oslogin
                    .service_account()
                    .await
                    .map_err(|source| ConnectError::Resolution {
                        what: "principal",
                        source,
                    })
            })
            .await
            .map(String::as_str)
    }

    /// The host to connect to: the explicit override if one was supplied,
    /// otherwise the instance's first public NAT address.
    ///
    /// # Errors
    /// Returns `ConnectError::Resolution` if the inventory lookup fails, or
    /// `ConnectError::NoPublicAddress` if the instance has no NAT address.
    pub async fn endpoint(&self) -> Result<&str> {
        self.endpoint
            .get_or_try_init(|| async {
                if let Some(host) = &self.host_override {
                    return Ok(host.clone());
                }
                let network = self
                    .compute
                    .instance_network(&self.instance.zone, &self.instance.name)
                    .await
                    .map_err(|source| ConnectError::Resolution {
                        what: "endpoint",
                        source,
                    })?;
                network
                    .first_nat_ip()
                    .map(str::to_string)
                    .ok_or(ConnectError::NoPublicAddress)
            })
            .await
            .map(String::as_str)
    }
}
