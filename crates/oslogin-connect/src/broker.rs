// ABOUTME: Credential broker registering ephemeral keys with the identity provider.
// ABOUTME: Serializes registrations and probes other registered fingerprints for race detection.

use crate::error::{ConnectError, Result};
use crate::identity::EphemeralIdentity;
use crate::lock::RegistrationLock;
use crate::provider::{LoginProfile, OsLoginApi};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Registers the session's ephemeral public key and observes the set of
/// other fingerprints registered for the same principal.
pub struct CredentialBroker {
    oslogin: Arc<dyn OsLoginApi>,
    lock: RegistrationLock,
}

impl CredentialBroker {
    pub fn new(oslogin: Arc<dyn OsLoginApi>, lock: RegistrationLock) -> Self {
        Self { oslogin, lock }
    }

    /// Upload the session's public key, valid for `ttl` from now.
    ///
    /// Runs under the registration lock: at most one registration executes
    /// at a time across all sessions in the process. Returns the freshly
    /// issued login profile, which replaces any previous one.
    ///
    /// # Errors
    /// `ConnectError::Provider` if the upload fails, `ConnectError::NoLoginAccounts`
    /// if the issued profile carries no usernames to authenticate as.
    pub async fn register(
        &self,
        identity: &EphemeralIdentity,
        ttl: Duration,
    ) -> Result<LoginProfile> {
        let principal = identity.principal().await?;
        let public_key = identity.keypair()?.public_openssh()?;
        let expiry = expiry_micros(ttl);

        let _guard = self.lock.acquire().await;
        tracing::debug!(principal, "registering ephemeral public key");
        let profile = self
            .oslogin
            .import_public_key(principal, &public_key, expiry)
            .await
            .map_err(ConnectError::Provider)?;

        if profile.usernames.is_empty() {
            return Err(ConnectError::NoLoginAccounts);
        }
        Ok(profile)
    }

    /// Fingerprints currently registered for the principal, excluding the
    /// session's own key.
    ///
    /// Read-only and unserialized; used purely as an observability probe
    /// for race detection and may interleave freely with registrations.
    pub async fn other_fingerprints(
        &self,
        identity: &EphemeralIdentity,
    ) -> Result<BTreeSet<String>> {
        let principal = identity.principal().await?;
        let own = identity.fingerprint()?;

        let mut fingerprints = self
            .oslogin
            .registered_fingerprints(principal)
            .await
            .map_err(ConnectError::Provider)?;
        fingerprints.remove(own);
        Ok(fingerprints)
    }
}

/// Unix-epoch microseconds at which a key uploaded now with lifetime `ttl` expires.
fn expiry_micros(ttl: Duration) -> i64 {
    let expires_at = SystemTime::now() + ttl;
    expires_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ApiError;
    use crate::InstanceRef;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Provider mock recording uploads and serving a configurable key set.
    struct RecordingOsLogin {
        usernames: Vec<String>,
        registered: Mutex<BTreeSet<String>>,
        uploads: Mutex<Vec<(String, String, i64)>>,
        fail_import: bool,
    }

    impl RecordingOsLogin {
        fn new(usernames: Vec<&str>) -> Self {
            Self {
                usernames: usernames.into_iter().map(String::from).collect(),
                registered: Mutex::new(BTreeSet::new()),
                uploads: Mutex::new(Vec::new()),
                fail_import: false,
            }
        }
    }

    #[async_trait]
    impl OsLoginApi for RecordingOsLogin {
        async fn service_account(&self) -> std::result::Result<String, ApiError> {
            Ok("svc@project.iam.gserviceaccount.com".to_string())
        }

        async fn import_public_key(
            &self,
            principal: &str,
            public_key_openssh: &str,
            expiry_micros: i64,
        ) -> std::result::Result<LoginProfile, ApiError> {
            if self.fail_import {
                return Err(ApiError::Denied("missing osLogin role".to_string()));
            }
            self.uploads.lock().unwrap().push((
                principal.to_string(),
                public_key_openssh.to_string(),
                expiry_micros,
            ));
            let parsed: oslogin_keys::PublicKey =
                public_key_openssh.parse().expect("mock should parse key");
            let fingerprint =
                oslogin_keys::compute_fingerprint(&parsed).expect("mock should fingerprint");
            self.registered.lock().unwrap().insert(fingerprint);
            Ok(LoginProfile {
                usernames: self.usernames.clone(),
            })
        }

        async fn registered_fingerprints(
            &self,
            _principal: &str,
        ) -> std::result::Result<BTreeSet<String>, ApiError> {
            Ok(self.registered.lock().unwrap().clone())
        }
    }

    /// Inventory is unused by broker tests.
    struct NoInventory;

    #[async_trait]
    impl crate::provider::ComputeInventory for NoInventory {
        async fn instance_network(
            &self,
            _zone: &str,
            _name: &str,
        ) -> std::result::Result<crate::provider::InstanceNetwork, ApiError> {
            unreachable!("broker tests never resolve endpoints")
        }
    }

    fn test_identity(oslogin: Arc<RecordingOsLogin>) -> EphemeralIdentity {
        EphemeralIdentity::new(
            oslogin,
            Arc::new(NoInventory),
            InstanceRef {
                zone: "us-central1-a".to_string(),
                name: "builder-1".to_string(),
            },
            None,
        )
    }

    const TEST_TTL: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn test_register_uploads_public_key_with_ttl() {
        let oslogin = Arc::new(RecordingOsLogin::new(vec!["sa_123"]));
        let identity = test_identity(oslogin.clone());
        let broker = CredentialBroker::new(oslogin.clone(), RegistrationLock::isolated());

        let before = expiry_micros(TEST_TTL);
        let profile = broker
            .register(&identity, TEST_TTL)
            .await
            .expect("should register");
        let after = expiry_micros(TEST_TTL);

        assert_eq!(profile.usernames, vec!["sa_123"]);

        let uploads = oslogin.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        let (principal, key, expiry) = &uploads[0];
        assert_eq!(principal, "svc@project.iam.gserviceaccount.com");
        assert_eq!(key, &identity.keypair().unwrap().public_openssh().unwrap());
        assert!(
            (before..=after).contains(expiry),
            "expiry should be now + ttl in unix micros"
        );
    }

    #[tokio::test]
    async fn test_register_rejects_empty_profile() {
        let oslogin = Arc::new(RecordingOsLogin::new(vec![]));
        let identity = test_identity(oslogin.clone());
        let broker = CredentialBroker::new(oslogin, RegistrationLock::isolated());

        let err = broker.register(&identity, TEST_TTL).await.unwrap_err();
        assert!(matches!(err, ConnectError::NoLoginAccounts));
    }

    #[tokio::test]
    async fn test_register_propagates_provider_failure() {
        let mut inner = RecordingOsLogin::new(vec!["sa_123"]);
        inner.fail_import = true;
        let oslogin = Arc::new(inner);
        let identity = test_identity(oslogin.clone());
        let broker = CredentialBroker::new(oslogin, RegistrationLock::isolated());

        let err = broker.register(&identity, TEST_TTL).await.unwrap_err();
        assert!(matches!(err, ConnectError::Provider(ApiError::Denied(_))));
    }

    #[tokio::test]
    async fn test_other_fingerprints_excludes_own_key() {
        let oslogin = Arc::new(RecordingOsLogin::new(vec!["sa_123"]));
        let identity = test_identity(oslogin.clone());
        let broker = CredentialBroker::new(oslogin.clone(), RegistrationLock::isolated());

        oslogin
            .registered
            .lock()
            .unwrap()
            .insert("other-fingerprint".to_string());
        broker
            .register(&identity, TEST_TTL)
            .await
            .expect("should register");

        let others = broker
            .other_fingerprints(&identity)
            .await
            .expect("should probe");
        assert_eq!(others.len(), 1);
        assert!(others.contains("other-fingerprint"));
        assert!(!others.contains(identity.fingerprint().unwrap()));
    }

    #[tokio::test]
    async fn test_other_fingerprints_empty_provider() {
        let oslogin = Arc::new(RecordingOsLogin::new(vec!["sa_123"]));
        let identity = test_identity(oslogin.clone());
        let broker = CredentialBroker::new(oslogin, RegistrationLock::isolated());

        let others = broker
            .other_fingerprints(&identity)
            .await
            .expect("should probe");
        assert!(others.is_empty());
    }

    #[test]
    fn test_expiry_micros_is_in_the_future() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_micros() as i64;
        let expiry = expiry_micros(Duration::from_secs(600));
        assert!(expiry > now);
        // Within ten minutes plus a generous scheduling allowance.
        assert!(expiry < now + 601_000_000);
    }
}
