//! Request and response types exchanged over the public HTTP API.
//!
//! The ETL CLI reuses [`ContactRecord`] so that the printed report and the
//! `/etl/records` JSON share one shape.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Upper bound applied to every name field.
pub const NAME_MAX_LEN: usize = 128;
/// Lower bound for the phone field.
pub const PHONE_MIN_LEN: usize = 5;
/// Upper bound for the phone field.
pub const PHONE_MAX_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Submit endpoint
// ---------------------------------------------------------------------------

/// Request body for `POST /submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactForm {
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub phone_dnc: bool,
    pub email_dnc: bool,
}

impl ContactForm {
    /// Check field shapes before the form is handed to the encryption core.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::BadRequest`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ServiceError> {
        check_len("first_name", &self.first_name, 1, NAME_MAX_LEN)?;
        if let Some(middle) = &self.middle_name {
            check_len("middle_name", middle, 0, NAME_MAX_LEN)?;
        }
        check_len("last_name", &self.last_name, 1, NAME_MAX_LEN)?;
        check_len("phone", &self.phone, PHONE_MIN_LEN, PHONE_MAX_LEN)?;
        if !is_plausible_email(&self.email) {
            return Err(ServiceError::BadRequest(
                "email is not a valid address".into(),
            ));
        }
        Ok(())
    }
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), ServiceError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ServiceError::BadRequest(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(())
}

/// Syntax-only check: one `@`, non-empty local part, dotted domain, no whitespace.
fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

/// Successful response body for `POST /submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Always `"ok"`.
    pub status: String,
}

impl SubmitResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Records endpoint
// ---------------------------------------------------------------------------

/// One decrypted contact-form row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: i64,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub phone_dnc: bool,
    pub email_dnc: bool,
    /// RFC 3339 insertion time.
    pub created_at: Option<String>,
}

/// Response body for `GET /etl/records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsResponse {
    pub records: Vec<ContactRecord>,
}

// ---------------------------------------------------------------------------
// Root banner
// ---------------------------------------------------------------------------

/// Response body for `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"bad_request"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Key lifecycle state: `"active"`, `"no_active_key"` or `"recovering"`.
    pub key_state: String,
}
