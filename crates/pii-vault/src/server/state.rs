//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::lifecycle::EnvelopeKeyLifecycle;
use crate::pipeline::{DecryptionPipeline, SubmissionPipeline};
use crate::store::KeyStore;

/// Application state shared across all request handlers.
///
/// Every field is `Arc`-wrapped so Axum can clone the state per request.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<EnvelopeKeyLifecycle>,
    pub submission: Arc<SubmissionPipeline>,
    pub decryption: Arc<DecryptionPipeline>,
}

impl AppState {
    /// Build both pipelines over the same lifecycle and store.
    pub fn new(lifecycle: Arc<EnvelopeKeyLifecycle>, store: Arc<dyn KeyStore>) -> Self {
        Self {
            submission: Arc::new(SubmissionPipeline::new(lifecycle.clone(), store.clone())),
            decryption: Arc::new(DecryptionPipeline::new(lifecycle.clone(), store)),
            lifecycle,
        }
    }
}
