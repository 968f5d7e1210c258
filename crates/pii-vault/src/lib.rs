//! Contact-form PII vault.
//!
//! Envelope encryption for form submissions: each field is sealed with
//! AES-256-GCM under a per-deployment DEK, and the DEK is stored only in
//! wrapped form, wrapped by a Vault transit key that never leaves the KMS.
//!
//! Layering, bottom up:
//! - [`crypto`]: field cipher and zeroizing key type.
//! - [`kms`]: DEK wrap/unwrap through Vault transit.
//! - [`store`]: wrapped keys and sealed rows (MySQL or in-memory).
//! - [`lifecycle`]: active-key selection and key-loss recovery.
//! - [`pipeline`]: record-level submit and decrypt.
//! - [`server`]: HTTP surface.

pub mod config;
pub mod crypto;
pub mod error;
pub mod kms;
pub mod lifecycle;
pub mod pipeline;
pub mod server;
pub mod startup;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::EnvelopeError;
