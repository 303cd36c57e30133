//! A shared vocabulary for tagging `anyhow::Error`s with the information
//! needed to classify and respond to them at the system's edges (HTTP
//! responses, operator status pages, retry decisions).
//!
//! Library code returns plain `anyhow::Result<T>`. At the point where an
//! error is first understood well enough to classify -- an upstream fetch
//! failing with a 401, a chunk failing to decode, a client sending a bad
//! range -- attach an [`ErrorMetadata`] via `.context(...)`. Everything
//! downstream (HTTP handlers, `/status` snapshots) reads it back out with
//! [`ErrorMetadataAnyhowExt`] instead of pattern-matching on error text.

use std::borrow::Cow;

use http::StatusCode;
use serde::{
    Deserialize,
    Serialize,
};

/// Attached to an anyhow error chain via `.context(e)` to classify it.
///
/// `short_msg` is a stable, ScreamingCamelCase tag usable in tests and in
/// the `code` field of the JSON error body. `msg` is the human-readable,
/// developer-facing description.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    pub short_msg: Cow<'static, str>,
    pub msg: Cow<'static, str>,
}

/// The six error kinds this system distinguishes, per the error handling
/// design: client input, auth/permission failures on upstream or operator
/// endpoints, not-found, rate limiting, unavailable tiers, deadline
/// exceeded, and an internal catch-all for everything else (upstream
/// permanent failures, storage permanent failures, invariant violations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Invalid client input: bad range, too-wide query, malformed params.
    BadRequest,
    /// Missing or invalid bearer token on a protected endpoint.
    Unauthenticated,
    /// Valid token but insufficient privileges.
    Forbidden,
    /// Referenced resource (backfill job, chunk) does not exist.
    NotFound,
    /// Upstream or storage is rate-limiting us; retry with backoff.
    Overloaded,
    /// Both tiers (or the requested tier) are unreachable.
    Unavailable,
    /// A request-scoped deadline elapsed before a result was ready.
    DeadlineExceeded,
    /// Catch-all internal failure: upstream permanent error, storage
    /// permanent error, or an invariant violation caught before it could
    /// corrupt persisted state.
    Internal,
}

impl ErrorCode {
    pub fn http_status(self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorMetadata {
    pub fn bad_request(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code: ErrorCode::BadRequest, short_msg: short_msg.into(), msg: msg.into() }
    }

    pub fn unauthenticated(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code: ErrorCode::Unauthenticated, short_msg: short_msg.into(), msg: msg.into() }
    }

    pub fn forbidden(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code: ErrorCode::Forbidden, short_msg: short_msg.into(), msg: msg.into() }
    }

    pub fn not_found(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code: ErrorCode::NotFound, short_msg: short_msg.into(), msg: msg.into() }
    }

    pub fn overloaded(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code: ErrorCode::Overloaded, short_msg: short_msg.into(), msg: msg.into() }
    }

    pub fn unavailable(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code: ErrorCode::Unavailable, short_msg: short_msg.into(), msg: msg.into() }
    }

    pub fn deadline_exceeded(short_msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::DeadlineExceeded,
            short_msg: short_msg.into(),
            msg: Cow::Borrowed("Deadline exceeded"),
        }
    }

    pub fn internal(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code: ErrorCode::Internal, short_msg: short_msg.into(), msg: msg.into() }
    }
}

/// Extension trait for reading classification back out of an `anyhow::Error`
/// chain that may or may not have been tagged with [`ErrorMetadata`].
/// Untagged errors are treated as `Internal` -- a bug or an unclassified
/// dependency failure, never a client's fault.
pub trait ErrorMetadataAnyhowExt {
    fn error_metadata(&self) -> Option<&ErrorMetadata>;
    fn code(&self) -> ErrorCode {
        self.error_metadata().map(|m| m.code).unwrap_or(ErrorCode::Internal)
    }
    fn short_msg(&self) -> Cow<'static, str> {
        self.error_metadata().map(|m| m.short_msg.clone()).unwrap_or(Cow::Borrowed("InternalError"))
    }
    fn msg(&self) -> String {
        match self.error_metadata() {
            Some(m) => m.msg.to_string(),
            None => "An internal error occurred".to_string(),
        }
    }
    /// Is this error worth retrying without operator intervention? Transient
    /// upstream/storage failures and untagged (likely-transient, unclassified)
    /// errors are retriable; everything else is not.
    fn is_retriable(&self) -> bool {
        !matches!(
            self.error_metadata().map(|m| m.code),
            Some(ErrorCode::BadRequest)
                | Some(ErrorCode::Unauthenticated)
                | Some(ErrorCode::Forbidden)
                | Some(ErrorCode::NotFound)
        )
    }
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn error_metadata(&self) -> Option<&ErrorMetadata> {
        self.chain().find_map(|e| e.downcast_ref::<ErrorMetadata>())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn untagged_error_is_internal_and_retriable_by_default_classification() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(err.code(), ErrorCode::Internal);
        // Untagged errors are treated as transient-unclassified, so retriable.
        assert!(err.is_retriable());
    }

    #[test]
    fn tagged_bad_request_is_not_retriable() {
        let err = anyhow::anyhow!("bad range")
            .context(ErrorMetadata::bad_request("InvalidRange", "t_start must be <= t_end"));
        assert_eq!(err.code(), ErrorCode::BadRequest);
        assert_eq!(err.short_msg(), "InvalidRange");
        assert!(!err.is_retriable());
    }

    #[test]
    fn tagged_overloaded_is_retriable_and_maps_to_429() {
        let err = anyhow::anyhow!("rate limited").context(ErrorMetadata::overloaded("RateLimited", "upstream 429"));
        assert!(err.is_retriable());
        assert_eq!(err.code().http_status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
