//! Rotate-and-retry over a set of interchangeable credentials.

use crate::{CredentialSet, RateLimitSignal};
use metrics::{counter, describe_counter};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Counter of credential rotations caused by rate-limit failures.
pub const CREDENTIAL_ROTATIONS_TOTAL: &str = "lumen_credential_rotations_total";

/// Register rotator metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        CREDENTIAL_ROTATIONS_TOTAL,
        "Total number of credential rotations caused by rate-limit failures"
    );
}

type ClientFactory<C> = Arc<dyn Fn(&str) -> C + Send + Sync>;

/// Hands out clients bound to the current credential and rotates to the
/// next one when the provider reports an exceeded quota.
///
/// The cursor is shared by every caller of the same rotator, so a rotation
/// made by one job is seen by the next.
pub struct CredentialRotator<C> {
    credentials: CredentialSet,
    factory: ClientFactory<C>,
    cursor: AtomicUsize,
}

impl<C> CredentialRotator<C> {
    /// Creates a rotator starting at the first credential.
    pub fn new<F>(credentials: CredentialSet, factory: F) -> Self
    where
        F: Fn(&str) -> C + Send + Sync + 'static,
    {
        Self {
            credentials,
            factory: Arc::new(factory),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Index of the credential the next attempt will use.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Number of credentials in rotation.
    #[must_use]
    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    /// Runs `operation` with a client bound to the current credential.
    ///
    /// A rate-limited failure advances the cursor and retries, up to
    /// `max_retries` attempts in total (default: one per credential). The
    /// last rate-limited failure is returned once attempts run out. Any
    /// other failure is returned immediately without rotating.
    pub async fn with_rotation<F, Fut, T, E>(&self, mut operation: F, max_retries: Option<usize>) -> Result<T, E>
    where
        F: FnMut(C) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal + fmt::Display,
    {
        let attempts = max_retries.unwrap_or_else(|| self.credentials.len()).max(1);
        let mut attempt = 1;

        loop {
            let index = self.current_index();
            let client = (self.factory)(self.credentials.get(index));

            match operation(client).await {
                Ok(value) => {
                    debug!(credential_index = index, attempt, "Provider call succeeded");
                    return Ok(value);
                }
                Err(e) if e.is_rate_limited() => {
                    let next = self.rotate_from(index);
                    warn!(
                        credential_index = index,
                        next_index = next,
                        attempt,
                        attempts,
                        error = %e,
                        "Provider rate limited, rotating credential"
                    );
                    if attempt >= attempts {
                        return Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    debug!(credential_index = index, attempt, error = %e, "Provider call failed");
                    return Err(e);
                }
            }
        }
    }

    /// Advances the cursor past `observed`.
    ///
    /// If another caller already moved the cursor, its rotation stands.
    fn rotate_from(&self, observed: usize) -> usize {
        let next = (observed + 1) % self.credentials.len();
        match self
            .cursor
            .compare_exchange(observed, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                counter!(CREDENTIAL_ROTATIONS_TOTAL).increment(1);
                next
            }
            Err(current) => current,
        }
    }
}

impl<C> fmt::Debug for CredentialRotator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRotator")
            .field("credentials", &self.credentials)
            .field("current_index", &self.current_index())
            .finish_non_exhaustive()
    }
}
