use std::sync::Arc;

use crate::errors::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Normal,
    InCommunication,
}

/// Device audio-session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfiguration {
    pub mode: AudioMode,
    pub speaker_on: bool,
}

impl Default for AudioConfiguration {
    fn default() -> Self {
        Self {
            mode: AudioMode::Normal,
            speaker_on: false,
        }
    }
}

/// Platform audio session (AudioManager on Android, AVAudioSession on iOS).
pub trait AudioSession: Send + Sync {
    fn current(&self) -> AudioConfiguration;
    fn apply(&self, config: &AudioConfiguration) -> Result<(), CallError>;
    /// Switch output between loudspeaker and earpiece.
    /// Refusal is reported as `RoutingUnavailable`.
    fn route_to_speaker(&self, enabled: bool) -> Result<(), CallError>;
}

/// Owns the audio-session configuration for the lifetime of one call.
///
/// `activate` remembers the configuration it replaced and `deactivate`
/// puts it back. Dropping an active router restores it too.
pub struct AudioRouter {
    platform: Arc<dyn AudioSession>,
    saved: Option<AudioConfiguration>,
    speaker_on: bool,
}

impl AudioRouter {
    pub fn new(platform: Arc<dyn AudioSession>) -> Self {
        Self {
            platform,
            saved: None,
            speaker_on: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }

    pub fn speaker_on(&self) -> bool {
        self.speaker_on
    }

    /// Configure the device for a voice call. A second call while active is a no-op.
    pub fn activate(&mut self, speaker: bool) -> Result<(), CallError> {
        if self.is_active() {
            return Ok(());
        }

        let previous = self.platform.current();
        self.platform.apply(&AudioConfiguration {
            mode: AudioMode::InCommunication,
            speaker_on: false,
        })?;
        self.saved = Some(previous);
        self.speaker_on = false;
        tracing::info!("audio session activated (previous: {previous:?})");

        if speaker {
            self.set_speaker(true);
        }
        Ok(())
    }

    /// Switch output routing and return the effective state.
    pub fn set_speaker(&mut self, enabled: bool) -> bool {
        if !self.is_active() {
            tracing::debug!("speaker change to {enabled} ignored, audio session inactive");
            return self.speaker_on;
        }
        match self.platform.route_to_speaker(enabled) {
            Ok(()) => {
                self.speaker_on = enabled;
                tracing::info!("speaker enabled: {enabled}");
            }
            Err(e) => tracing::warn!("speaker routing refused: {e}"),
        }
        self.speaker_on
    }

    /// Restore the configuration saved by `activate`. Idempotent.
    pub fn deactivate(&mut self) {
        let Some(previous) = self.saved.take() else {
            return;
        };
        if let Err(e) = self.platform.apply(&previous) {
            tracing::warn!("failed to restore audio session: {e}");
        }
        self.speaker_on = previous.speaker_on;
        tracing::info!("audio session restored");
    }
}

impl Drop for AudioRouter {
    fn drop(&mut self) {
        self.deactivate();
    }
}
