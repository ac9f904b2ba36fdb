use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

const SETTINGS_FILE: &str = "call_settings.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CallSettings {
    /// Ask for Bluetooth access alongside the microphone.
    #[serde(default = "default_true")]
    pub request_bluetooth: bool,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Buffer events emitted while no listener is attached.
    #[serde(default)]
    pub replay_events: bool,
    #[serde(default)]
    pub speaker_on_connect: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            request_bluetooth: true,
            connect_timeout_secs: None,
            replay_events: false,
            speaker_on_connect: false,
        }
    }
}

pub struct SettingsStore {
    settings: Mutex<CallSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &str) -> Self {
        let file_path = PathBuf::from(data_dir).join(SETTINGS_FILE);
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> CallSettings {
        self.lock().clone()
    }

    pub fn set_request_bluetooth(&self, enabled: bool) {
        self.lock().request_bluetooth = enabled;
        self.save();
    }

    pub fn set_connect_timeout_secs(&self, secs: Option<u64>) {
        // Zero would fire before the SDK can answer.
        self.lock().connect_timeout_secs = secs.filter(|s| *s > 0);
        self.save();
    }

    pub fn set_replay_events(&self, enabled: bool) {
        self.lock().replay_events = enabled;
        self.save();
    }

    pub fn set_speaker_on_connect(&self, enabled: bool) {
        self.lock().speaker_on_connect = enabled;
        self.save();
    }

    fn lock(&self) -> MutexGuard<'_, CallSettings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("failed to write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("failed to serialize call settings: {e}"),
        }
    }

    fn load(path: &Path) -> CallSettings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable {}: {e}", path.display());
                CallSettings::default()
            }),
            Err(_) => CallSettings::default(),
        }
    }
}
