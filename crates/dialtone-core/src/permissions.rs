use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::errors::CallError;

/// Capabilities a call needs before it may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Microphone,
    BluetoothConnect,
}

/// Platform permission facility (runtime permission dialog).
///
/// `request` shows the OS prompt; the host reports the user's answer
/// back through [`PermissionGate::resolve`].
pub trait PermissionPrompt: Send + Sync {
    fn is_granted(&self, capabilities: &[Capability]) -> bool;
    fn request(&self, capabilities: &[Capability]);
}

/// Gates call initiation on the required capabilities.
///
/// At most one prompt is outstanding at a time. A second `ensure` while
/// the first is waiting fails with `PermissionRequestInProgress`.
pub struct PermissionGate {
    prompt: Arc<dyn PermissionPrompt>,
    pending: Mutex<Option<oneshot::Sender<bool>>>,
}

impl PermissionGate {
    pub fn new(prompt: Arc<dyn PermissionPrompt>) -> Self {
        Self {
            prompt,
            pending: Mutex::new(None),
        }
    }

    pub async fn ensure(&self, capabilities: &[Capability]) -> Result<(), CallError> {
        if self.prompt.is_granted(capabilities) {
            return Ok(());
        }

        let rx = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            // A sender whose receiver is gone belongs to an abandoned request.
            if pending.as_ref().is_some_and(|tx| !tx.is_closed()) {
                tracing::warn!("permission request already pending, rejecting new request");
                return Err(CallError::PermissionRequestInProgress);
            }
            let (tx, rx) = oneshot::channel();
            *pending = Some(tx);
            rx
        };

        tracing::info!("requesting permissions: {capabilities:?}");
        self.prompt.request(capabilities);

        match rx.await {
            Ok(true) => {
                tracing::info!("permissions granted");
                Ok(())
            }
            Ok(false) | Err(_) => {
                tracing::warn!("permissions denied");
                Err(CallError::PermissionDenied)
            }
        }
    }

    /// Deliver the prompt result. Returns false if no request was pending.
    pub fn resolve(&self, granted: bool) -> bool {
        let tx = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match tx {
            Some(tx) => tx.send(granted).is_ok(),
            None => {
                tracing::debug!("permission result {granted} with no pending request");
                false
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}
