use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use crate::evtc::TriggerId;

pub const DPS_REPORT_USER_TOKEN_LENGTH: usize = 32;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 180_000;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write settings '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoUploadFilter {
    #[default]
    All,
    SuccessfulOnly,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateChannel {
    Latest,
    #[default]
    LatestWingman,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpsReportSettings {
    pub auto_upload: bool,
    pub copy_to_clipboard: bool,
    pub user_token: String,
    pub anonymize: bool,
    pub detailed_wvw: bool,
    pub auto_upload_filter: AutoUploadFilter,
    pub auto_upload_encounters: Vec<TriggerId>,
    pub request_timeout_ms: u64,
    pub base_url: String,
}

impl Default for DpsReportSettings {
    fn default() -> Self {
        Self {
            auto_upload: false,
            copy_to_clipboard: false,
            user_token: String::new(),
            anonymize: false,
            detailed_wvw: false,
            auto_upload_filter: AutoUploadFilter::All,
            auto_upload_encounters: Vec::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            base_url: "https://dps.report".to_string(),
        }
    }
}

impl DpsReportSettings {
    /// Tokens are only kept when empty or exactly 32 characters long.
    pub fn set_user_token(&mut self, token: String) {
        if token.is_empty() || token.chars().count() == DPS_REPORT_USER_TOKEN_LENGTH {
            self.user_token = token;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WingmanSettings {
    pub auto_upload: bool,
    pub auto_upload_filter: AutoUploadFilter,
    pub auto_upload_encounters: Vec<TriggerId>,
    pub request_timeout_ms: u64,
    pub base_url: String,
}

impl Default for WingmanSettings {
    fn default() -> Self {
        Self {
            auto_upload: false,
            auto_upload_filter: AutoUploadFilter::SuccessfulOnly,
            auto_upload_encounters: Vec::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            base_url: "https://gw2wingman.nevermindcreations.de".to_string(),
        }
    }
}

impl WingmanSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EliteInsightsSettings {
    pub auto_update: bool,
    pub update_channel: UpdateChannel,
    pub auto_parse: bool,
    /// `None` parses every encounter automatically.
    pub auto_parse_encounters: Option<Vec<TriggerId>>,
    pub request_timeout_ms: u64,
}

impl Default for EliteInsightsSettings {
    fn default() -> Self {
        Self {
            auto_update: true,
            update_channel: UpdateChannel::LatestWingman,
            auto_parse: true,
            auto_parse_encounters: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl EliteInsightsSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderSettings {
    pub dps_report: DpsReportSettings,
    pub wingman: WingmanSettings,
    pub elite_insights: EliteInsightsSettings,
}

impl UploaderSettings {
    pub fn verify(&mut self) {
        let user_token = std::mem::take(&mut self.dps_report.user_token);
        self.dps_report.set_user_token(user_token);
    }
}

/// Shared settings document. Readers take a snapshot so a slow worker never
/// blocks a settings change.
#[derive(Debug)]
pub struct SettingsStore {
    settings_file_path: Option<PathBuf>,
    settings: RwLock<UploaderSettings>,
}

impl SettingsStore {
    pub fn in_memory(settings: UploaderSettings) -> Self {
        Self {
            settings_file_path: None,
            settings: RwLock::new(settings),
        }
    }

    /// Loads the document, falling back to defaults and rewriting the file when
    /// it is missing or unreadable.
    pub fn initialize(settings_file_path: PathBuf) -> Self {
        let settings = match read_settings(&settings_file_path) {
            Ok(Some(settings)) => {
                tracing::info!(
                    settings_path = %settings_file_path.display(),
                    "Settings loaded from file"
                );
                Some(settings)
            }
            Ok(None) => None,
            Err(error) => {
                tracing::error!("{error}");
                None
            }
        };

        let needs_save = settings.is_none();
        let store = Self {
            settings_file_path: Some(settings_file_path),
            settings: RwLock::new(settings.unwrap_or_default()),
        };

        if needs_save {
            match store.save() {
                Ok(()) => tracing::info!("Settings file created"),
                Err(error) => tracing::error!("Failed to create settings file: {error}"),
            }
        }

        store
    }

    pub fn get(&self) -> UploaderSettings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn read<R>(&self, reader: impl FnOnce(&UploaderSettings) -> R) -> R {
        let settings = self
            .settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        reader(&settings)
    }

    pub fn write<R>(&self, writer: impl FnOnce(&mut UploaderSettings) -> R) -> R {
        let mut settings = self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = writer(&mut settings);
        settings.verify();
        result
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        let Some(settings_file_path) = self.settings_file_path.as_deref() else {
            return Ok(());
        };

        write_settings(settings_file_path, &self.get())?;
        tracing::info!(
            settings_path = %settings_file_path.display(),
            "Settings saved to file"
        );
        Ok(())
    }
}

pub fn read_settings(settings_file_path: &Path) -> Result<Option<UploaderSettings>, SettingsError> {
    let raw_json = match std::fs::read_to_string(settings_file_path) {
        Ok(content) => content,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SettingsError::Read {
                path: settings_file_path.to_path_buf(),
                source,
            })
        }
    };

    let mut settings =
        serde_json::from_str::<UploaderSettings>(&raw_json).map_err(|source| {
            SettingsError::Parse {
                path: settings_file_path.to_path_buf(),
                source,
            }
        })?;
    settings.verify();

    Ok(Some(settings))
}

pub fn write_settings(
    settings_file_path: &Path,
    settings: &UploaderSettings,
) -> Result<(), SettingsError> {
    let write_error = |source| SettingsError::Write {
        path: settings_file_path.to_path_buf(),
        source,
    };

    if let Some(parent_directory) = settings_file_path.parent() {
        std::fs::create_dir_all(parent_directory).map_err(write_error)?;
    }

    let serialized = serde_json::to_string_pretty(settings)?;
    let temp_path = settings_file_path.with_extension("json.tmp");
    std::fs::write(&temp_path, serialized).map_err(write_error)?;
    std::fs::rename(&temp_path, settings_file_path).map_err(write_error)?;

    Ok(())
}
