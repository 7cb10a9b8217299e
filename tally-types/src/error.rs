//! The API error taxonomy.
//!
//! Every failure surfaced to a caller falls into one of these categories.
//! Mutation paths guarantee no partial side effects when one of these is
//! returned; read paths have no side effects at all.

use thiserror::Error;

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur while handling an API request.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Capability or ownership check failed. The message may name the
    /// offending fields (sorted) but never reveals data.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Missing, repeated, or un-parseable input.
    #[error("malformed parameters: {0}")]
    Malformed(String),

    /// Kind key not present in the registry.
    #[error("{0} is not a recognized entity kind")]
    UnrecognizedKind(String),

    /// Primary-key or natural-key lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or foreign-key violation at persistence time.
    #[error("integrity conflict: {0}")]
    IntegrityConflict(String),

    /// Entity-level invariant violation.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Partial failure resolving a list of relation keys.
    #[error("could not resolve keys for field \"{field}\": {keys:?}")]
    UnresolvedRelations { field: String, keys: Vec<String> },

    /// Unanticipated failure; never silently converted to an empty result.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Machine-parseable category tag for the structured error body.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "permission_denied",
            Self::Malformed(_) => "malformed_parameters",
            Self::UnrecognizedKind(_) => "unrecognized_kind",
            Self::NotFound(_) => "not_found",
            Self::IntegrityConflict(_) => "integrity_conflict",
            Self::ValidationFailed(_) => "validation_failed",
            Self::UnresolvedRelations { .. } => "unresolved_relation",
            Self::Internal(_) => "internal",
        }
    }

    /// Convenience constructor for permission failures with no detail.
    #[must_use]
    pub fn denied() -> Self {
        Self::PermissionDenied("denied".into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(format!("invalid json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_stable() {
        assert_eq!(ApiError::denied().category(), "permission_denied");
        assert_eq!(
            ApiError::UnresolvedRelations {
                field: "runners".into(),
                keys: vec!["99".into()],
            }
            .category(),
            "unresolved_relation"
        );
        assert_eq!(
            ApiError::UnrecognizedKind("gizmo".into()).category(),
            "unrecognized_kind"
        );
    }
}
