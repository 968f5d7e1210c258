//! DEK creation, active-key selection, and key-loss recovery.
//!
//! # States
//!
//! ```text
//!  NoActiveKey ──ensure_active_key──► Active
//!       ▲                               │ unwrap → KeyMaterialLost
//!       │                               ▼
//!       └────── purge_all ◄──────── Recovering ──ensure──► Active
//! ```
//!
//! Recovery is destructive (every record and key row is deleted) and only runs
//! under [`RecoveryPolicy::PurgeOnKeyLoss`]. It is attempted at most once per
//! operation; a second key-loss report ends in [`EnvelopeError::RecoveryExhausted`].
//!
//! Plaintext DEKs are unwrapped per call and dropped (zeroized) when the
//! caller is done with them. Nothing is cached between operations.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::crypto::Dek;
use crate::error::EnvelopeError;
use crate::kms::KeyWrapper;
use crate::store::{KeyId, KeyStore};

/// Attempts made by [`EnvelopeKeyLifecycle::run_with_recovery`]: the first
/// try plus one retry after recovery.
const MAX_ATTEMPTS: u32 = 2;

/// What to do when the KMS reports it has lost the wrapping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Surface [`crate::kms::KmsError::KeyMaterialLost`] to the caller.
    Fail,
    /// Development mode: wipe every record and key, create a fresh DEK, retry once.
    PurgeOnKeyLoss,
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NoActiveKey,
    Active,
    Recovering,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::NoActiveKey => "no_active_key",
            LifecycleState::Active => "active",
            LifecycleState::Recovering => "recovering",
        }
    }
}

/// The active key's row id and its unwrapped bytes.
#[derive(Debug)]
pub struct ActiveDek {
    pub id: KeyId,
    pub dek: Dek,
}

/// Orchestrates DEK lifecycle over a [`KeyWrapper`] and a [`KeyStore`].
pub struct EnvelopeKeyLifecycle {
    kms: Arc<dyn KeyWrapper>,
    store: Arc<dyn KeyStore>,
    logical_name: String,
    kek_id: String,
    policy: RecoveryPolicy,
    /// Serialises create-if-missing and purge within this process.
    guard: Mutex<()>,
    recovering: AtomicBool,
    /// Bumped after every completed recovery.
    generation: AtomicU64,
}

impl EnvelopeKeyLifecycle {
    pub fn new(
        kms: Arc<dyn KeyWrapper>,
        store: Arc<dyn KeyStore>,
        logical_name: impl Into<String>,
        kek_id: impl Into<String>,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            kms,
            store,
            logical_name: logical_name.into(),
            kek_id: kek_id.into(),
            policy,
            guard: Mutex::new(()),
            recovering: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Current state, read from the store.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Store`] if the store cannot be queried.
    pub async fn state(&self) -> Result<LifecycleState, EnvelopeError> {
        if self.recovering.load(Ordering::Acquire) {
            return Ok(LifecycleState::Recovering);
        }
        Ok(match self.store.find_active_key(&self.logical_name).await? {
            Some(_) => LifecycleState::Active,
            None => LifecycleState::NoActiveKey,
        })
    }

    /// Create and persist a wrapped DEK unless an active one already exists.
    ///
    /// Returns the id of the active key, new or existing.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Kms`] if wrapping fails and
    /// [`EnvelopeError::Store`] if the key row cannot be read or written.
    pub async fn ensure_active_key(&self) -> Result<KeyId, EnvelopeError> {
        let _held = self.guard.lock().await;
        self.ensure_locked().await
    }

    async fn ensure_locked(&self) -> Result<KeyId, EnvelopeError> {
        if let Some(row) = self.store.find_active_key(&self.logical_name).await? {
            debug!(key_id = row.id, "active DEK already present");
            return Ok(row.id);
        }

        let dek = Dek::generate();
        let wrapped = self.kms.wrap(dek.as_bytes()).await?;
        let id = self
            .store
            .insert_key(&self.logical_name, &wrapped, &self.kek_id)
            .await?;
        info!(key_id = id, logical_name = %self.logical_name, kek_id = %self.kek_id, "created active DEK");
        Ok(id)
    }

    /// Unwrap the active DEK, recovering once from key loss if policy allows.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::Kms`] for KMS failures (including key loss under
    ///   [`RecoveryPolicy::Fail`]).
    /// - [`EnvelopeError::RecoveryExhausted`] if key loss persists after recovery.
    /// - [`EnvelopeError::Store`] if the store fails.
    pub async fn get_active_key(&self) -> Result<ActiveDek, EnvelopeError> {
        self.run_with_recovery(|| self.load_active_key()).await
    }

    async fn load_active_key(&self) -> Result<ActiveDek, EnvelopeError> {
        let row = match self.store.find_active_key(&self.logical_name).await? {
            Some(row) => row,
            None => {
                self.ensure_active_key().await?;
                self.store
                    .find_active_key(&self.logical_name)
                    .await?
                    .ok_or_else(|| EnvelopeError::NoActiveKey(self.logical_name.clone()))?
            }
        };
        let dek = self.unwrap_dek(&row.wrapped).await?;
        Ok(ActiveDek { id: row.id, dek })
    }

    /// Unwrap any stored DEK through the KMS.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Kms`] on KMS failure and [`EnvelopeError::Cipher`]
    /// if the KMS returns key bytes of the wrong length.
    pub async fn unwrap_dek(&self, wrapped: &str) -> Result<Dek, EnvelopeError> {
        let bytes = self.kms.unwrap(wrapped).await?;
        Ok(Dek::from_slice(&bytes)?)
    }

    /// Run `op`; if it fails with key loss, recover and run it exactly once more.
    ///
    /// Errors other than key loss are returned unchanged and never retried.
    ///
    /// # Errors
    ///
    /// Whatever `op` returns, plus [`EnvelopeError::RecoveryExhausted`] when the
    /// retry also reports key loss.
    pub async fn run_with_recovery<T, F, Fut>(&self, mut op: F) -> Result<T, EnvelopeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EnvelopeError>>,
    {
        let mut attempt = 1;
        loop {
            let seen = self.generation.load(Ordering::Acquire);
            match op().await {
                Err(e) if e.is_key_material_lost() => {
                    if attempt >= MAX_ATTEMPTS {
                        error!(attempts = attempt, "key material still lost after recovery");
                        return Err(EnvelopeError::RecoveryExhausted);
                    }
                    self.recover(e, seen).await?;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Purge and re-key, unless another caller already did so since `seen`.
    async fn recover(&self, cause: EnvelopeError, seen: u64) -> Result<(), EnvelopeError> {
        if self.policy == RecoveryPolicy::Fail {
            warn!(error = %cause, "KMS lost key material; destructive recovery disabled");
            return Err(cause);
        }

        let _held = self.guard.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            debug!("recovery already completed by a concurrent caller");
            return Ok(());
        }

        self.recovering.store(true, Ordering::Release);
        warn!(
            error = %cause,
            logical_name = %self.logical_name,
            "KMS lost key material; purging all records and keys (dev mode)"
        );
        let result = async {
            self.store.purge_all().await?;
            self.ensure_locked().await
        }
        .await;
        self.recovering.store(false, Ordering::Release);

        let id = result?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!(key_id = id, "recovery complete; new active DEK in place");
        Ok(())
    }
}
