/// Errors a cookie operation can be rejected with.
///
/// Every variant rejects the whole operation and leaves the jar untouched for
/// the record the operation would have written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CookieError {
    #[error("Invalid cookie: {0}")]
    Validation(String),

    #[error("Cookie prefix violation: {0}")]
    PrefixViolation(String),

    #[error("Secure cookies cannot be set from an insecure context")]
    InsecureContext,

    #[error("Domain '{domain}' is not within the scope of host '{host}'")]
    DomainScope { domain: String, host: String },

    #[error("Cookie limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Cannot parse expiry date '{0}'")]
    DateParse(String),

    #[error("Cookie access is disabled for this context")]
    PermissionDenied,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Fieldless discriminant of [`CookieError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookieErrorKind {
    Validation,
    PrefixViolation,
    InsecureContext,
    DomainScope,
    LimitExceeded,
    DateParse,
    PermissionDenied,
    InvalidState,
}

impl CookieError {
    pub fn kind(&self) -> CookieErrorKind {
        match self {
            CookieError::Validation(_) => CookieErrorKind::Validation,
            CookieError::PrefixViolation(_) => CookieErrorKind::PrefixViolation,
            CookieError::InsecureContext => CookieErrorKind::InsecureContext,
            CookieError::DomainScope { .. } => CookieErrorKind::DomainScope,
            CookieError::LimitExceeded(_) => CookieErrorKind::LimitExceeded,
            CookieError::DateParse(_) => CookieErrorKind::DateParse,
            CookieError::PermissionDenied => CookieErrorKind::PermissionDenied,
            CookieError::InvalidState(_) => CookieErrorKind::InvalidState,
        }
    }
}
