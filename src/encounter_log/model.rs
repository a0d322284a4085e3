use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};

use crate::evtc::EvtcData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Unparsed,
    Queued,
    Parsing,
    Parsed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncounterDifficulty {
    #[default]
    NormalMode,
    ChallengeMode,
    LegendaryChallengeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpsReportUploadStatus {
    Available,
    Queued,
    Uploading,
    Uploaded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WingmanUploadStatus {
    Available,
    Queued,
    Uploading,
    Uploaded,
    Skipped,
    Failed,
}

/// Encounter details read from the structured Elite Insights report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncounterData {
    pub encounter_name: String,
    pub account_name: String,
    pub duration_ms: i64,
    pub success: bool,
    /// Set when the primary target of the trigger id was found in the report.
    pub valid_boss: bool,
    pub health_percent_burned: f64,
    pub difficulty: EncounterDifficulty,
    pub start_time: Option<DateTime<FixedOffset>>,
    pub end_time: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportData {
    pub json_file_path: Option<PathBuf>,
    pub html_file_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DpsReportUpload {
    pub status: DpsReportUploadStatus,
    pub id: String,
    pub permalink: String,
    pub user_token: String,
    pub is_auto_upload: bool,
    pub error_message: Option<String>,
}

impl Default for DpsReportUpload {
    fn default() -> Self {
        Self {
            status: DpsReportUploadStatus::Available,
            id: String::new(),
            permalink: String::new(),
            user_token: String::new(),
            is_auto_upload: false,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WingmanUpload {
    pub status: WingmanUploadStatus,
    pub error_message: Option<String>,
}

impl Default for WingmanUpload {
    fn default() -> Self {
        Self {
            status: WingmanUploadStatus::Available,
            error_message: None,
        }
    }
}

/// Display strings derived from the record, recomputed after each parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncounterLogView {
    pub name: String,
    pub time: String,
    pub result: String,
    pub duration: String,
}

/// The mutable part of an encounter record.
#[derive(Debug, Clone, PartialEq)]
pub struct EncounterLogData {
    pub parse_status: ParseStatus,
    pub encounter_data: EncounterData,
    pub report_data: ReportData,
    pub dps_report_upload: DpsReportUpload,
    pub wingman_upload: WingmanUpload,
    pub view: EncounterLogView,
}

impl EncounterLogData {
    pub(crate) fn new(evtc_data: &EvtcData) -> Self {
        let mut data = Self {
            parse_status: ParseStatus::Unparsed,
            encounter_data: EncounterData::default(),
            report_data: ReportData::default(),
            dps_report_upload: DpsReportUpload::default(),
            wingman_upload: WingmanUpload::default(),
            view: EncounterLogView::default(),
        };
        data.update_view(evtc_data);
        data
    }
}

/// Copy of everything an upload worker needs, taken while the record lock is held.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub log_id: String,
    pub evtc_file_path: PathBuf,
    pub json_file_path: Option<PathBuf>,
    pub html_file_path: Option<PathBuf>,
    pub account_name: String,
}

/// Result of running Elite Insights over one recording.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub status: ParseStatus,
    pub encounter_data: EncounterData,
    pub report_data: ReportData,
}

impl ParseOutcome {
    pub fn failed(report_data: ReportData) -> Self {
        Self {
            status: ParseStatus::Failed,
            encounter_data: EncounterData::default(),
            report_data,
        }
    }

    pub fn failed_with(message: impl Into<String>) -> Self {
        Self::failed(ReportData {
            error_message: Some(message.into()),
            ..ReportData::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DpsReportResult {
    pub status: DpsReportUploadStatus,
    pub id: String,
    pub permalink: String,
    pub user_token: String,
    pub error_message: Option<String>,
}

impl DpsReportResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: DpsReportUploadStatus::Failed,
            id: String::new(),
            permalink: String::new(),
            user_token: String::new(),
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WingmanResult {
    pub status: WingmanUploadStatus,
    pub error_message: Option<String>,
}

impl WingmanResult {
    pub fn uploaded() -> Self {
        Self {
            status: WingmanUploadStatus::Uploaded,
            error_message: None,
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: WingmanUploadStatus::Skipped,
            error_message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: WingmanUploadStatus::Failed,
            error_message: Some(message.into()),
        }
    }
}
