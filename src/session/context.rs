//! Call identity and the identification-context parameter codec.
//!
//! The webhook smuggles the lookup result to the media session through the
//! carrier's custom stream parameters, base64 JSON in a single parameter.
//! That is the carrier protocol; the bytes are opaque to everything in
//! between and validated against the typed schema on the way back in.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::backend::IdentificationContext;

/// Custom stream parameter names set by the webhook and read back at
/// session start.
pub const PARAM_CUSTOMER_CONTEXT: &str = "customerContext";
pub const PARAM_CALLER_PHONE: &str = "callerPhone";
pub const PARAM_CALL_SID: &str = "callSid";

/// Immutable identity of one call.
#[derive(Debug, Clone)]
pub struct CallIdentity {
    pub call_sid: String,
    pub caller_number: String,
    pub started_at: DateTime<Utc>,
}

impl CallIdentity {
    pub fn new(call_sid: impl Into<String>, caller_number: impl Into<String>) -> Self {
        Self {
            call_sid: call_sid.into(),
            caller_number: caller_number.into(),
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid context JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an identification context for the `customerContext` parameter.
pub fn encode_context(ctx: &IdentificationContext) -> String {
    let json = serde_json::to_vec(ctx).expect("context serializes");
    BASE64.encode(json)
}

/// Decode the `customerContext` parameter back into a typed context.
pub fn decode_context(encoded: &str) -> Result<IdentificationContext, ContextError> {
    let bytes = BASE64.decode(encoded.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}
