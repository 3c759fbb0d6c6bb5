//! Retry classification for RPC failures.
//!
//! Many providers answer a throttled request with HTTP 200 and a JSON-RPC error body, so the
//! classification looks at transport faults *and* at error payloads of otherwise successful
//! responses.

use alloy::transports::{RpcError, TransportErrorKind};

/// HTTP status / JSON-RPC error codes used by providers to signal throttling.
pub const RATE_LIMIT_CODES: [i64; 3] = [429, -32029, -32097];

/// Lower-case message fragments used by providers to signal throttling.
pub const RATE_LIMIT_MESSAGES: [&str; 5] = [
    "too many requests",
    "rate limit exceeded",
    "max message response size exceed",
    "upgrade your plan",
    "exceeded its compute units",
];

/// Returns `true` when `err` should make the pool rotate to the next endpoint.
#[must_use]
pub fn is_retryable(err: &RpcError<TransportErrorKind>) -> bool {
    match err {
        // connection refused, reset, HTTP 5xx/429, backend gone...
        RpcError::Transport(_) => true,
        RpcError::NullResp => true,
        RpcError::ErrorResp(payload) => is_rate_limit_signature(payload.code, &payload.message),
        RpcError::DeserError { text, .. } => contains_rate_limit_message(text),
        _ => false,
    }
}

/// Returns `true` when `err` specifically carries a rate-limit signature.
#[must_use]
pub fn is_rate_limited(err: &RpcError<TransportErrorKind>) -> bool {
    match err {
        RpcError::Transport(TransportErrorKind::HttpError(http)) => {
            i64::from(http.status) == 429 || contains_rate_limit_message(&http.body)
        }
        RpcError::ErrorResp(payload) => is_rate_limit_signature(payload.code, &payload.message),
        RpcError::DeserError { text, .. } => contains_rate_limit_message(text),
        _ => false,
    }
}

fn is_rate_limit_signature(code: i64, message: &str) -> bool {
    RATE_LIMIT_CODES.contains(&code) || contains_rate_limit_message(message)
}

fn contains_rate_limit_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    RATE_LIMIT_MESSAGES.iter().any(|needle| message.contains(needle))
}
