//! Record-level encryption on top of the key lifecycle.
//!
//! [`SubmissionPipeline`] seals a contact form under the active DEK and
//! appends it; [`DecryptionPipeline`] reads rows back through whichever DEK
//! each row references. Every field is sealed with its column's logical name
//! as AAD, so a blob moved to another field fails authentication.

pub mod decrypt;
pub mod submit;

pub use decrypt::DecryptionPipeline;
pub use submit::SubmissionPipeline;

/// AAD labels. Changing any of these makes existing rows unreadable.
pub mod labels {
    pub const FIRST_NAME: &str = "first_name";
    pub const MIDDLE_NAME: &str = "middle_name";
    pub const LAST_NAME: &str = "last_name";
    pub const PHONE: &str = "phone";
    pub const EMAIL: &str = "email";
}
