//! Bounded readiness probes for the KMS and the store.
//!
//! The service refuses to start until both dependencies answer. Each probe is
//! tried a fixed number of times with a fixed delay between attempts; when the
//! attempts run out startup aborts with [`StartupError::DependencyUnavailable`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartupError {
    #[error("{dependency} not ready after {attempts} attempts")]
    DependencyUnavailable {
        dependency: &'static str,
        attempts: u32,
    },
}

/// How many times to probe and how long to sleep between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    attempts: u32,
    delay: Duration,
}

impl ProbePolicy {
    /// `attempts` is clamped to at least one.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Call `probe` until it succeeds or `policy.attempts()` tries have failed.
///
/// No sleep follows the final failed attempt.
///
/// # Errors
///
/// Returns [`StartupError::DependencyUnavailable`] once the attempts are exhausted.
pub async fn wait_until_ready<F, Fut, E>(
    dependency: &'static str,
    policy: &ProbePolicy,
    mut probe: F,
) -> Result<(), StartupError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    for attempt in 1..=policy.attempts {
        match probe().await {
            Ok(()) => {
                info!(dependency, attempt, "dependency ready");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    dependency,
                    attempt,
                    max_attempts = policy.attempts,
                    error = %e,
                    "dependency not ready"
                );
                if attempt < policy.attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
    Err(StartupError::DependencyUnavailable {
        dependency,
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::KeyWrapper;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> ProbePolicy {
        ProbePolicy::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn ready_on_first_try() {
        let calls = AtomicU32::new(0);
        wait_until_ready("kms", &fast(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ready_after_failures() {
        let calls = AtomicU32::new(0);
        wait_until_ready("store", &fast(5), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("connection refused")
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_exact_attempts() {
        let calls = AtomicU32::new(0);
        let err = wait_until_ready("kms", &fast(4), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("sealed")
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            err,
            StartupError::DependencyUnavailable {
                dependency: "kms",
                attempts: 4
            }
        );
        assert_eq!(err.to_string(), "kms not ready after 4 attempts");
    }

    #[test]
    fn zero_attempts_still_probes_once() {
        assert_eq!(ProbePolicy::new(0, Duration::ZERO).attempts(), 1);
    }

    #[tokio::test]
    async fn probes_a_live_vault() {
        let vault = crate::test_support::FakeVault::start().await;
        let client = vault.client();
        wait_until_ready("kms", &fast(2), || client.probe())
            .await
            .unwrap();

        vault.set_health_status(503);
        assert!(wait_until_ready("kms", &fast(2), || client.probe())
            .await
            .is_err());
    }
}
