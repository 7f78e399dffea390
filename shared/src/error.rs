//! Structured kernel errors.
//!
//! Mirrors the teacher's split between an internal, `thiserror`-derived
//! error enum (`ActorError` there, `KernelError` here) and a small
//! category/code vocabulary (`ExitCode` there) that every public boundary
//! collapses its errors into. Internal call sites propagate `KernelError`
//! with `?`; the kernel surface (the action executor, the query handler,
//! the CLI) converts it into the user-visible `{success, message, code,
//! category, retriable}` record described by the specification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category, used by callers to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Permission,
    Resource,
    Execution,
    Internal,
}

impl ErrorCategory {
    /// Validation and permission errors are caller mistakes and will never
    /// succeed on retry; resource and execution errors may succeed later;
    /// internal errors are never considered safe to retry automatically.
    pub fn is_retriable(self) -> bool {
        matches!(self, ErrorCategory::Resource | ErrorCategory::Execution)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// Structured kernel error. Every variant carries its category up front so
/// `category()`/`code()`/`is_retriable()` never need to re-derive it from
/// the variant name.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("artifact not found: {id}")]
    ArtifactNotFound { id: String },

    #[error("artifact already exists: {id}")]
    ArtifactAlreadyExists { id: String },

    #[error("no escrow listing for artifact {id}")]
    ListingNotFound { id: String },

    #[error("artifact {id} is a tombstone and cannot be read")]
    ArtifactTombstoned { id: String },

    #[error("artifact {id} is kernel protected")]
    ArtifactProtected { id: String },

    #[error("invalid artifact type: {kind}")]
    InvalidArtifactType { kind: String },

    #[error("artifact content exceeds size limit: {size} > {limit}")]
    ArtifactTooLarge { size: usize, limit: usize },

    #[error("dependency cycle detected involving artifact {id}")]
    DependencyCycle { id: String },

    #[error("dependency depth limit exceeded: {depth} > {limit}")]
    DepthExceeded { depth: u32, limit: u32 },

    #[error("missing dependency: {id}")]
    MissingDependency { id: String },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("insufficient resources: needed {needed}, available {available}")]
    InsufficientResources { needed: f64, available: f64 },

    #[error("rate limit exceeded for charger {charger} on payer {payer}")]
    RateLimitExceeded { payer: String, charger: String },

    #[error("delegation not found for payer {payer} / charger {charger}")]
    DelegationNotFound { payer: String, charger: String },

    #[error("delegation expired for payer {payer} / charger {charger}")]
    DelegationExpired { payer: String, charger: String },

    #[error("invalid query type: {query_type}")]
    InvalidQueryType { query_type: String },

    #[error("invalid parameter: {param}")]
    InvalidParam { param: String },

    #[error("missing required parameter: {param}")]
    MissingParam { param: String },

    #[error("invalid parameter type: {param}")]
    InvalidParamType { param: String },

    #[error("query not implemented: {query_type}")]
    QueryNotImplemented { query_type: String },

    #[error("unknown filter operator: {operator}")]
    UnknownFilterOperator { operator: String },

    #[error("execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("execution deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid intent: {reason}")]
    InvalidIntent { reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl KernelError {
    pub fn category(&self) -> ErrorCategory {
        use KernelError::*;
        match self {
            ArtifactNotFound { .. }
            | ArtifactAlreadyExists { .. }
            | ListingNotFound { .. }
            | InvalidArtifactType { .. }
            | ArtifactTooLarge { .. }
            | DependencyCycle { .. }
            | MissingDependency { .. }
            | InvalidQueryType { .. }
            | InvalidParam { .. }
            | MissingParam { .. }
            | InvalidParamType { .. }
            | QueryNotImplemented { .. }
            | UnknownFilterOperator { .. }
            | InvalidIntent { .. } => ErrorCategory::Validation,

            ArtifactTombstoned { .. }
            | ArtifactProtected { .. }
            | PermissionDenied { .. }
            | DelegationNotFound { .. }
            | DelegationExpired { .. } => ErrorCategory::Permission,

            DepthExceeded { .. }
            | InsufficientFunds { .. }
            | InsufficientResources { .. }
            | RateLimitExceeded { .. } => ErrorCategory::Resource,

            ExecutionFailed { .. } | DeadlineExceeded => ErrorCategory::Execution,

            Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        use KernelError::*;
        match self {
            ArtifactNotFound { .. } => "artifact_not_found",
            ArtifactAlreadyExists { .. } => "artifact_already_exists",
            ListingNotFound { .. } => "listing_not_found",
            ArtifactTombstoned { .. } => "artifact_tombstoned",
            ArtifactProtected { .. } => "artifact_protected",
            InvalidArtifactType { .. } => "invalid_artifact_type",
            ArtifactTooLarge { .. } => "artifact_too_large",
            DependencyCycle { .. } => "dependency_cycle",
            DepthExceeded { .. } => "depth_exceeded",
            MissingDependency { .. } => "missing_dependency",
            PermissionDenied { .. } => "permission_denied",
            InsufficientFunds { .. } => "insufficient_funds",
            InsufficientResources { .. } => "insufficient_resources",
            RateLimitExceeded { .. } => "rate_limit_exceeded",
            DelegationNotFound { .. } => "delegation_not_found",
            DelegationExpired { .. } => "delegation_expired",
            InvalidQueryType { .. } => "invalid_query_type",
            InvalidParam { .. } => "invalid_param",
            MissingParam { .. } => "missing_param",
            InvalidParamType { .. } => "invalid_param_type",
            QueryNotImplemented { .. } => "not_implemented",
            UnknownFilterOperator { .. } => "unknown_filter_operator",
            ExecutionFailed { .. } => "execution_failed",
            DeadlineExceeded => "deadline_exceeded",
            InvalidIntent { .. } => "invalid_intent",
            Internal(_) => "internal_error",
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Render into the wire-level record every public boundary returns.
    pub fn to_action_result(&self) -> ActionResult {
        ActionResult {
            success: false,
            message: Some(self.to_string()),
            code: Some(self.code().to_string()),
            category: Some(self.category()),
            retriable: self.is_retriable(),
        }
    }
}

/// The `{success, message, code, category, retriable}` shape every public
/// kernel boundary returns, whether the call succeeded or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    pub retriable: bool,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            code: None,
            category: None,
            retriable: false,
        }
    }
}

impl From<&KernelError> for ActionResult {
    fn from(err: &KernelError) -> Self {
        err.to_action_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_exceeded_is_resource_and_retriable() {
        let err = KernelError::DepthExceeded { depth: 6, limit: 5 };
        assert_eq!(err.category(), ErrorCategory::Resource);
        assert!(err.is_retriable());
        assert_eq!(err.code(), "depth_exceeded");
    }

    #[test]
    fn permission_errors_are_not_retriable() {
        let err = KernelError::PermissionDenied {
            reason: "not creator".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Permission);
        assert!(!err.is_retriable());
    }

    #[test]
    fn action_result_serializes_without_nulls_on_success() {
        let result = ActionResult::ok();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("message").is_none());
    }
}
