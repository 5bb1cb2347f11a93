//! Unified error taxonomy for the observability service.
//!
//! Every domain error carries an [`ErrorKind`] (a machine-readable, stable
//! tag mapped to an HTTP status), a human-readable message, an optional
//! cause chain, and arbitrary key-value context. Use the builder returned by
//! [`ObsError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable, machine-readable error kind.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases, and maps to exactly one
/// HTTP status via [`ErrorKind::http_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Requested entity does not exist.
    NotFound,
    /// Input failed domain validation.
    Validation,
    /// Caller is not authenticated.
    Unauthorized,
    /// Caller is authenticated but not permitted.
    Forbidden,
    /// Operation conflicts with existing state (e.g. duplicate trace).
    Conflict,
    /// Request is structurally malformed.
    BadRequest,
    /// Unexpected internal failure.
    Internal,
    /// A downstream collaborator is unavailable or returned an unexpected status.
    ServiceUnavailable,
    /// A downstream call exceeded its deadline.
    Timeout,
}

impl ErrorKind {
    /// Stable `&'static str` representation (e.g. `"NOT_FOUND"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Validation => "VALIDATION",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::Conflict => "CONFLICT",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// The HTTP status code the web surface should render for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Validation => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::Conflict => 409,
            Self::BadRequest => 400,
            Self::Internal => 500,
            Self::ServiceUnavailable => 503,
            Self::Timeout => 504,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ObsError
// ---------------------------------------------------------------------------

/// Unified domain error.
///
/// Carries a stable [`ErrorKind`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use obs_error::{ObsError, ErrorKind};
///
/// let err = ObsError::new(ErrorKind::ServiceUnavailable, "backend unreachable")
///     .with_context("backend", "responses")
///     .with_context("status", 503);
/// ```
pub struct ObsError {
    /// Machine-readable error kind.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl ObsError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Shorthand constructors for the common kinds.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Shorthand for a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.kind.http_status()`.
    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    /// Render the stable, user-facing error body.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.kind.as_str().to_string(),
            message: self.message.clone(),
            details: if self.context.is_empty() {
                None
            } else {
                Some(self.context.clone())
            },
        }
    }
}

impl fmt::Debug for ObsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ObsError");
        d.field("kind", &self.kind);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for ObsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ObsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Wire representation
// ---------------------------------------------------------------------------

/// Stable, user-visible rendering of an [`ObsError`]: `{code, message, details?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `"NOT_FOUND"`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured context, omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, serde_json::Value>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const ALL_KINDS: &[ErrorKind] = &[
        ErrorKind::NotFound,
        ErrorKind::Validation,
        ErrorKind::Unauthorized,
        ErrorKind::Forbidden,
        ErrorKind::Conflict,
        ErrorKind::BadRequest,
        ErrorKind::Internal,
        ErrorKind::ServiceUnavailable,
        ErrorKind::Timeout,
    ];

    #[test]
    fn basic_construction() {
        let err = ObsError::new(ErrorKind::Internal, "boom");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = ObsError::not_found("no such trace");
        assert_eq!(err.to_string(), "[NOT_FOUND] no such trace");
    }

    #[test]
    fn display_with_context() {
        let err = ObsError::new(ErrorKind::Timeout, "timed out").with_context("timeout_ms", 30_000);
        let s = err.to_string();
        assert!(s.starts_with("[TIMEOUT] timed out"));
        assert!(s.contains("timeout_ms"));
        assert!(s.contains("30000"));
    }

    #[test]
    fn debug_with_source() {
        let src = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err = ObsError::new(ErrorKind::ServiceUnavailable, "fetch failed").with_source(src);
        let dbg = format!("{err:?}");
        assert!(dbg.contains("source"));
        assert!(dbg.contains("file missing"));
    }

    #[test]
    fn http_status_mapping_is_total_and_exact() {
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Validation.http_status(), 400);
        assert_eq!(ErrorKind::Unauthorized.http_status(), 401);
        assert_eq!(ErrorKind::Forbidden.http_status(), 403);
        assert_eq!(ErrorKind::Conflict.http_status(), 409);
        assert_eq!(ErrorKind::BadRequest.http_status(), 400);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
        assert_eq!(ErrorKind::ServiceUnavailable.http_status(), 503);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
    }

    #[test]
    fn as_str_round_trips_through_serde() {
        for kind in ALL_KINDS {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: ErrorKind = serde_json::from_str(&json).unwrap();
            assert_eq!(&back, kind);
        }
    }

    #[test]
    fn to_response_omits_empty_details() {
        let err = ObsError::validation("missing field");
        let resp = err.to_response();
        assert_eq!(resp.code, "VALIDATION");
        assert!(resp.details.is_none());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("details"));
    }

    #[test]
    fn to_response_carries_context_as_details() {
        let err = ObsError::conflict("trace exists").with_context("conversation_id", "c1");
        let resp = err.to_response();
        assert!(resp.details.is_some());
        assert_eq!(
            resp.details.unwrap().get("conversation_id").unwrap(),
            "c1"
        );
    }
}
