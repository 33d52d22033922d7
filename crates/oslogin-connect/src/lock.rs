// ABOUTME: Named process-wide mutex serializing key registrations.
// ABOUTME: The provider's key-set write path is not safe under concurrent mutation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::{Mutex, MutexGuard};

/// Token naming the shared registration lock.
pub const REGISTRATION_LOCK_TOKEN: &str = "key";

/// Process-lifetime registry of named locks.
static NAMED_LOCKS: OnceLock<StdMutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();

/// A named async mutex shared across every session in the process.
///
/// All registrations against the identity provider funnel through one
/// critical section, because the provider's key-set mutation is not safe
/// under concurrent writers from the same process. Fingerprint probes are
/// read-only and do not take this lock.
///
/// Cloning yields a handle to the same underlying lock. Tests should use
/// [`RegistrationLock::isolated`] to avoid cross-test interference.
#[derive(Clone)]
pub struct RegistrationLock {
    inner: Arc<Mutex<()>>,
}

impl RegistrationLock {
    /// The process-wide lock under the fixed registration token.
    pub fn process_wide() -> Self {
        Self::named(REGISTRATION_LOCK_TOKEN)
    }

    /// The process-wide lock registered under `token`. Every call with the
    /// same token returns a handle to the same lock.
    pub fn named(token: &str) -> Self {
        let registry = NAMED_LOCKS.get_or_init(|| StdMutex::new(HashMap::new()));
        let mut map = registry.lock().expect("lock registry poisoned");
        let inner = map
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self { inner }
    }

    /// An independent lock instance, unrelated to any named lock.
    pub fn isolated() -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// Acquire the lock, suspending until it is available.
    ///
    /// The returned guard releases on drop, so the lock is released even
    /// when the critical section exits with an error.
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }
}
