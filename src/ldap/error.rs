//! Directory error taxonomy.
//!
//! Protocol-level errors ([`ConnectError`], [`BindError`], [`SearchError`],
//! [`ModifyError`]) are produced by a [`super::Session`]. Workflow errors
//! ([`AuthError`], [`WriteError`], [`CheckError`]) are composed from them.

use thiserror::Error;

/// LDAP result codes the workflows care about.
pub mod code {
    pub const SUCCESS: u32 = 0;
    pub const TIME_LIMIT_EXCEEDED: u32 = 3;
    pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
    pub const CONSTRAINT_VIOLATION: u32 = 19;
    pub const NO_SUCH_OBJECT: u32 = 32;
    pub const INVALID_CREDENTIALS: u32 = 49;
    pub const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
    pub const BUSY: u32 = 51;
    pub const UNAVAILABLE: u32 = 52;
    pub const UNWILLING_TO_PERFORM: u32 = 53;
    pub const SERVER_DOWN: u32 = 81;
}

/// Misuse of a session. Never retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionFault {
    #[error("session is closed")]
    Closed,
    #[error("session is not bound")]
    NotBound,
    #[error("session is not bound as the service account")]
    NotPrivileged,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection timed out")]
    Timeout,
    #[error("cannot reach directory: {0}")]
    Unreachable(String),
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("directory unavailable: {0}")]
    ServerUnavailable(String),
    #[error("bind rejected with code {rc}: {text}")]
    Other { rc: u32, text: String },
    #[error(transparent)]
    Fault(#[from] SessionFault),
}

impl BindError {
    /// Map a bind result code.
    pub fn from_code(rc: u32, text: impl Into<String>) -> Self {
        match rc {
            code::INVALID_CREDENTIALS => Self::InvalidCredentials,
            code::BUSY | code::UNAVAILABLE | code::SERVER_DOWN => {
                Self::ServerUnavailable(text.into())
            },
            rc => Self::Other {
                rc,
                text: text.into(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search timed out")]
    Timeout,
    #[error("search failed: {0}")]
    Other(String),
    #[error(transparent)]
    Fault(#[from] SessionFault),
}

#[derive(Debug, Error)]
pub enum ModifyError {
    #[error("entry not found")]
    NotFound,
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("modify failed: {0}")]
    Other(String),
    #[error(transparent)]
    Fault(#[from] SessionFault),
}

impl ModifyError {
    /// Map a modify result code.
    pub fn from_code(rc: u32, text: impl Into<String>) -> Self {
        let text = text.into();
        match rc {
            code::NO_SUCH_OBJECT => Self::NotFound,
            code::CONSTRAINT_VIOLATION | code::UNWILLING_TO_PERFORM => {
                Self::ConstraintViolation(text)
            },
            code::INSUFFICIENT_ACCESS_RIGHTS => Self::PermissionDenied,
            rc => Self::Other(format!("code {rc}: {text}")),
        }
    }
}

/// Credential verification failure.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("user not found")]
    UserNotFound,
    #[error("account is disabled")]
    AccountDisabled,
    #[error("account is locked")]
    AccountLocked,
    #[error("directory unavailable")]
    DirectoryUnavailable,
    #[error("authentication failed: {0}")]
    Other(String),
}

impl From<ConnectError> for AuthError {
    fn from(_: ConnectError) -> Self {
        Self::DirectoryUnavailable
    }
}

impl From<BindError> for AuthError {
    fn from(err: BindError) -> Self {
        match err {
            BindError::InvalidCredentials => Self::InvalidCredentials,
            BindError::ServerUnavailable(_) => Self::DirectoryUnavailable,
            err => Self::Other(err.to_string()),
        }
    }
}

impl From<SearchError> for AuthError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Timeout => Self::DirectoryUnavailable,
            err => Self::Other(err.to_string()),
        }
    }
}

/// Attribute write failure.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("caller is not allowed to modify this entry")]
    Unauthorized,
    #[error("user not found")]
    UserNotFound,
    #[error("old secret is invalid")]
    OldSecretInvalid,
    #[error("directory rejected the change: {0}")]
    ConstraintViolation(String),
    #[error("directory unavailable")]
    DirectoryUnavailable,
    #[error("write failed: {0}")]
    Other(String),
}

impl From<ConnectError> for WriteError {
    fn from(_: ConnectError) -> Self {
        Self::DirectoryUnavailable
    }
}

impl From<SearchError> for WriteError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Timeout => Self::DirectoryUnavailable,
            err => Self::Other(err.to_string()),
        }
    }
}

impl From<ModifyError> for WriteError {
    fn from(err: ModifyError) -> Self {
        match err {
            ModifyError::ConstraintViolation(text) => {
                Self::ConstraintViolation(text)
            },
            ModifyError::NotFound => Self::UserNotFound,
            err => Self::Other(err.to_string()),
        }
    }
}

impl From<SessionFault> for WriteError {
    fn from(err: SessionFault) -> Self {
        Self::Other(err.to_string())
    }
}

/// Existence check failure.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("directory unavailable")]
    DirectoryUnavailable,
}
