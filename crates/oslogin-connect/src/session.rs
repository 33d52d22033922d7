// ABOUTME: Race-retry coordinator and cancellable session wrapper.
// ABOUTME: Drives probe/register/connect and retries only on fingerprint-set evidence of a race.

use crate::broker::CredentialBroker;
use crate::error::{ConnectError, Result};
use crate::identity::EphemeralIdentity;
use crate::provider::{ConnectParams, ShellSession, ShellTransport, TransportError};
use crate::{KEY_TTL, RACE_BACKOFF};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Handle for aborting a pending session from another task.
///
/// `end()` is idempotent: the first call marks the session aborted; the
/// pending future resolves with `ConnectError::Aborted` at its next
/// suspension point, closing any already-open transport on the way out.
#[derive(Clone)]
pub struct SessionAborter {
    cancel: CancellationToken,
}

impl SessionAborter {
    /// Abort the session. Takes effect at the next state transition.
    pub fn end(&self) {
        self.cancel.cancel();
    }
}

/// One end-to-end cancellable unit of work producing a connected shell.
///
/// Created by [`Connector::connect`](crate::Connector::connect); driven to
/// completion with [`establish`](CancellableSession::establish).
pub struct CancellableSession {
    identity: EphemeralIdentity,
    broker: CredentialBroker,
    transport: Arc<dyn ShellTransport>,
    cancel: CancellationToken,
}

impl CancellableSession {
    pub(crate) fn new(
        identity: EphemeralIdentity,
        broker: CredentialBroker,
        transport: Arc<dyn ShellTransport>,
    ) -> Self {
        Self {
            identity,
            broker,
            transport,
            cancel: CancellationToken::new(),
        }
    }

    /// A handle that can abort this session from another task.
    pub fn aborter(&self) -> SessionAborter {
        SessionAborter {
            cancel: self.cancel.clone(),
        }
    }

    /// Drive the session to completion: register the ephemeral key, connect,
    /// and absorb propagation races per the retry protocol.
    ///
    /// The retry loop has no count bound; it terminates on success, on any
    /// non-race failure, on a re-probe showing an unchanged fingerprint set,
    /// or on cancellation.
    ///
    /// # Errors
    /// See [`ConnectError`] for the full taxonomy. Once the paired
    /// [`SessionAborter::end`] has been called the result is always
    /// `ConnectError::Aborted`, regardless of in-flight outcomes.
    pub async fn establish(self) -> Result<Box<dyn ShellSession>> {
        let cancel = self.cancel.clone();

        // Baseline set of fingerprints registered by anyone else; retry
        // decisions compare against this.
        let mut baseline =
            checkpoint(&cancel, self.broker.other_fingerprints(&self.identity)).await?;

        loop {
            let profile =
                checkpoint(&cancel, self.broker.register(&self.identity, KEY_TTL)).await?;
            let username = profile
                .usernames
                .first()
                .cloned()
                .ok_or(ConnectError::NoLoginAccounts)?;
            let host = checkpoint(&cancel, self.identity.endpoint())
                .await?
                .to_string();
            let private_key = self.identity.keypair()?.private_openssh()?;

            tracing::debug!(%host, %username, "attempting shell connection");
            let transport = Arc::clone(&self.transport);
            let mut connect_task = tokio::spawn(async move {
                transport
                    .connect(ConnectParams {
                        host,
                        username,
                        private_key_openssh: private_key,
                    })
                    .await
            });
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // The in-flight attempt may still come up after the abort;
                    // close whatever it opens so no transport is left behind.
                    tokio::spawn(async move {
                        if let Ok(Ok(mut session)) = connect_task.await {
                            session.close().await;
                        }
                    });
                    return Err(ConnectError::Aborted);
                }
                joined = &mut connect_task => match joined {
                    Ok(attempt) => attempt,
                    Err(err) => {
                        return Err(ConnectError::Transport(TransportError::Network(format!(
                            "transport task failed: {err}"
                        ))))
                    }
                },
            };

            // end() may have fired while the transport was coming up; the
            // abort supersedes whatever the attempt reported.
            if cancel.is_cancelled() {
                if let Ok(mut session) = attempt {
                    session.close().await;
                }
                return Err(ConnectError::Aborted);
            }

            match attempt {
                Ok(session) => {
                    tracing::debug!("shell session established");
                    return Ok(session);
                }
                Err(TransportError::AuthMethodsExhausted) => {
                    tracing::debug!(
                        "authentication methods exhausted; probing for a concurrent key writer"
                    );
                    // Give the provider's eventually-consistent write path a
                    // moment before re-reading the fingerprint set.
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ConnectError::Aborted),
                        _ = tokio::time::sleep(RACE_BACKOFF) => {}
                    }

                    let current =
                        checkpoint(&cancel, self.broker.other_fingerprints(&self.identity))
                            .await?;
                    if current == baseline {
                        // No concurrent mutation observed; the failure is genuine.
                        return Err(ConnectError::Auth(TransportError::AuthMethodsExhausted));
                    }
                    tracing::info!(
                        before = baseline.len(),
                        after = current.len(),
                        "fingerprint set changed under us; re-registering and retrying"
                    );
                    baseline = current;
                }
                Err(err @ TransportError::AuthRejected(_)) => {
                    return Err(ConnectError::Auth(err));
                }
                Err(err @ TransportError::Network(_)) => {
                    return Err(ConnectError::Transport(err));
                }
            }
        }
    }
}

/// Await `fut`, aborting with `ConnectError::Aborted` if the session is
/// cancelled first. Cancellation is cooperative and observed only at these
/// suspension points. An abort always supersedes whatever classification the
/// in-flight call would have produced: the cancelled arm is polled first, and
/// a failure that lands in the same poll as the abort is reported as Aborted.
async fn checkpoint<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConnectError::Aborted),
        out = fut => match out {
            Err(_) if cancel.is_cancelled() => Err(ConnectError::Aborted),
            out => out,
        },
    }
}
