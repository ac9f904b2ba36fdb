use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("{0} is required")]
    MissingParameter(&'static str),
    #[error("permission denied")]
    PermissionDenied,
    #[error("a permission request is already in progress")]
    PermissionRequestInProgress,
    #[error("a call is already in progress")]
    CallInProgress,
    #[error("no active call")]
    NoActiveCall,
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("audio routing unavailable: {0}")]
    RoutingUnavailable(String),
    #[error("audio session error: {0}")]
    Audio(String),
    #[error("call registrar error: {0}")]
    Registrar(String),
}
