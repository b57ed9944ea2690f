//! Classify HTTP status, curl errors and transport messages into failure kinds.

use super::error::RequestError;
use super::policy::ClassifiedError;

/// Message fragments that indicate a timeout.
const TIMEOUT_HINTS: &[&str] = &["timed out", "timeout", "deadline exceeded"];

/// Message fragments that indicate a connectivity failure.
const NETWORK_HINTS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "broken pipe",
    "could not resolve",
    "dns",
    "network",
    "offline",
    "unreachable",
    "failed to fetch",
];

/// Classify an HTTP status code.
///
/// Only meaningful for non-2xx codes; anything outside 4xx/5xx is `Unknown`.
pub fn classify_http_status(code: u16) -> ClassifiedError {
    match code {
        401 | 403 => ClassifiedError::Permission,
        400 | 422 => ClassifiedError::Validation,
        408 => ClassifiedError::Timeout,
        429 => ClassifiedError::ServerError(code),
        400..=499 => ClassifiedError::ClientError(code),
        500..=599 => ClassifiedError::ServerError(code),
        _ => ClassifiedError::Unknown,
    }
}

/// Classify a curl error.
pub fn classify_curl_error(e: &curl::Error) -> ClassifiedError {
    if e.is_operation_timedout() {
        return ClassifiedError::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_ssl_connect_error()
    {
        return ClassifiedError::Network;
    }
    classify_message(e.description())
}

/// Classify free text from a transport that has no structured error.
pub fn classify_message(msg: &str) -> ClassifiedError {
    let lower = msg.to_ascii_lowercase();
    if TIMEOUT_HINTS.iter().any(|h| lower.contains(h)) {
        return ClassifiedError::Timeout;
    }
    if NETWORK_HINTS.iter().any(|h| lower.contains(h)) {
        return ClassifiedError::Network;
    }
    ClassifiedError::Unknown
}

fn classify_io(e: &std::io::Error) -> ClassifiedError {
    use std::io::ErrorKind as K;
    match e.kind() {
        K::TimedOut => ClassifiedError::Timeout,
        K::ConnectionRefused
        | K::ConnectionReset
        | K::ConnectionAborted
        | K::NotConnected
        | K::BrokenPipe
        | K::AddrNotAvailable
        | K::UnexpectedEof => ClassifiedError::Network,
        K::PermissionDenied => ClassifiedError::Permission,
        _ => classify_message(&e.to_string()),
    }
}

/// Classify a request failure. Never fails; unrecognised input is `Unknown`.
///
/// HTTP status wins over everything else, then structured transport errors,
/// then message heuristics.
pub fn classify(e: &RequestError) -> ClassifiedError {
    let kind = match e {
        RequestError::Http { status, .. } => classify_http_status(*status),
        RequestError::TimedOut(_) => ClassifiedError::Timeout,
        RequestError::Curl(ce) => classify_curl_error(ce),
        RequestError::Io(io) => classify_io(io),
        RequestError::Transport(msg) => classify_message(msg),
    };
    if kind == ClassifiedError::Unknown {
        tracing::warn!(error = %e, "unclassified request failure; treating as retryable");
    }
    kind
}
