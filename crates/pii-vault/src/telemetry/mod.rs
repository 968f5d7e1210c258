//! Tracing setup: structured JSON logs, plus OTLP span export when configured.
//!
//! # Telemetry invariants
//!
//! - **No PII or key material** may appear in any span attribute or log field.
//!   Handlers and pipelines log ids, counts and error kinds only.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`); `RUST_LOG`
//!   overrides it when set.

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
