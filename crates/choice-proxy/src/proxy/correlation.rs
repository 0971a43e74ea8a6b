//! Correlation ID generation for request tracing.
//!
//! The ID only appears in spans and logs. It is never added to the upstream
//! request, so forwarding stays transparent.

use uuid::Uuid;

/// Generate a new correlation ID (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
