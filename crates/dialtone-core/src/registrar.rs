use std::fmt;

use crate::errors::CallError;
use crate::session::SessionId;

/// Opaque handle the call-registration subsystem issued for one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrarToken(String);

impl RegistrarToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistrarToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Failed,
    RemoteEnded,
    LocalEnded,
}

/// Platform call-management subsystem (CallKit, ConnectionService).
///
/// Optional: a session runs on telephony events alone when it is absent,
/// and every error it returns is logged and absorbed.
pub trait NativeCallRegistrar: Send + Sync {
    fn report_outgoing(&self, id: &SessionId, destination: &str)
    -> Result<RegistrarToken, CallError>;
    fn report_connected(&self, token: &RegistrarToken) -> Result<(), CallError>;
    fn report_ended(&self, token: &RegistrarToken, reason: EndReason) -> Result<(), CallError>;
}

/// Advisory callbacks from the call-registration subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrarEvent {
    PerformStart,
    /// Hang-up requested from system call UI.
    PerformEnd,
    AudioSessionActivated,
    AudioSessionDeactivated,
    SetMuted(bool),
}
