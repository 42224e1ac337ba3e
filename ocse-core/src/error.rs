use crate::rsc::ResponseStatusCode;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, CseError>;

/// Structured error carried between components.
///
/// Every failure inside the CSE maps to a oneM2M response status code; the
/// dispatcher is the single place where a `CseError` becomes a wire response.
#[derive(Clone, PartialEq, Eq)]
pub struct CseError {
    rsc: ResponseStatusCode,
    message: String,
}

impl CseError {
    pub fn new(rsc: ResponseStatusCode, message: impl Into<String>) -> Self {
        Self {
            rsc,
            message: message.into(),
        }
    }

    pub fn rsc(&self) -> ResponseStatusCode {
        self.rsc
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    // -- constructors per taxonomy class --

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::NotFound, message)
    }

    pub fn operation_not_allowed(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::OperationNotAllowed, message)
    }

    pub fn no_privilege(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::OriginatorHasNoPrivilege, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::RequestTimeout, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::Conflict, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::AlreadyExists, message)
    }

    pub fn release_version_not_supported(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::ReleaseVersionNotSupported, message)
    }

    pub fn invalid_child_type(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::InvalidChildResourceType, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::TargetNotReachable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::InternalServerError, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ResponseStatusCode::NotImplemented, message)
    }
}

impl std::fmt::Display for CseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rsc {}: {}", self.rsc.code(), self.message)
    }
}

impl std::fmt::Debug for CseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for CseError {}
