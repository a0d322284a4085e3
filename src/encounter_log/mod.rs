mod model;
mod store;
mod view;

use std::path::{Component, Path};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::evtc::EvtcData;

pub use model::{
    DpsReportResult, DpsReportUpload, DpsReportUploadStatus, EncounterData, EncounterDifficulty,
    EncounterLogData, EncounterLogView, ParseOutcome, ParseStatus, ReportData, UploadJob,
    WingmanResult, WingmanUpload, WingmanUploadStatus,
};
pub use store::LogStore;

/// Directory arcdps writes its recordings under; ids are the path below it.
pub const LOGS_ROOT_MARKER: &str = "arcdps.cbtlogs";

/// Why a state transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("encounter log has invalid parse state ({0:?})")]
    ParseStatus(ParseStatus),
    #[error("log is not available for dps.report upload ({0:?})")]
    DpsReportStatus(DpsReportUploadStatus),
    #[error("log is not available for wingman upload ({0:?})")]
    WingmanStatus(WingmanUploadStatus),
    #[error("log must be parsed before uploading to wingman ({0:?})")]
    NotParsed(ParseStatus),
}

/// One detected recording and everything the pipeline learned about it.
///
/// Identity and header data never change. The rest sits behind the record's own
/// lock, which workers hold only while reading or writing fields, never across
/// a process or network call. Every state change goes through one of the
/// transition methods below.
#[derive(Debug)]
pub struct EncounterLog {
    id: String,
    evtc_data: EvtcData,
    data: RwLock<EncounterLogData>,
}

impl EncounterLog {
    pub fn new(evtc_data: EvtcData) -> Self {
        Self {
            id: generate_id(&evtc_data.evtc_file_path),
            data: RwLock::new(EncounterLogData::new(&evtc_data)),
            evtc_data,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn evtc_data(&self) -> &EvtcData {
        &self.evtc_data
    }

    pub fn read(&self) -> RwLockReadGuard<'_, EncounterLogData> {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EncounterLogData> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copies the current state out of the lock.
    pub fn snapshot(&self) -> EncounterLogData {
        self.read().clone()
    }

    pub fn parse_status(&self) -> ParseStatus {
        self.read().parse_status
    }

    pub fn queue_parse(&self) -> Result<(), TransitionError> {
        let mut data = self.write();
        if data.parse_status != ParseStatus::Unparsed {
            return Err(TransitionError::ParseStatus(data.parse_status));
        }
        data.parse_status = ParseStatus::Queued;
        Ok(())
    }

    /// Moves a failed parse back to `Unparsed` so it can be queued again.
    pub fn reset_failed_parse(&self) -> Result<(), TransitionError> {
        let mut data = self.write();
        if data.parse_status != ParseStatus::Failed {
            return Err(TransitionError::ParseStatus(data.parse_status));
        }
        data.parse_status = ParseStatus::Unparsed;
        let stale_reports = std::mem::take(&mut data.report_data);
        data.update_view(&self.evtc_data);
        drop(data);

        remove_generated_reports(&self.id, &stale_reports, &ReportData::default());
        Ok(())
    }

    /// Undoes `queue_parse` when the record could not be handed to the worker.
    pub(crate) fn revert_queued_parse(&self) {
        let mut data = self.write();
        if data.parse_status == ParseStatus::Queued {
            data.parse_status = ParseStatus::Unparsed;
        }
    }

    pub fn begin_parse(&self) -> Result<(), TransitionError> {
        let mut data = self.write();
        if data.parse_status != ParseStatus::Queued {
            return Err(TransitionError::ParseStatus(data.parse_status));
        }
        data.parse_status = ParseStatus::Parsing;
        Ok(())
    }

    pub fn finish_parse(&self, outcome: ParseOutcome) {
        let mut data = self.write();
        data.parse_status = outcome.status;
        data.encounter_data = outcome.encounter_data;
        let stale_reports = std::mem::replace(&mut data.report_data, outcome.report_data);
        data.update_view(&self.evtc_data);
        let current_reports = data.report_data.clone();
        drop(data);

        remove_generated_reports(&self.id, &stale_reports, &current_reports);
    }

    /// Returns the upload state from before queueing, for `revert_queued_dps_report`.
    pub fn queue_dps_report(
        &self,
        is_auto_upload: bool,
    ) -> Result<DpsReportUpload, TransitionError> {
        let mut data = self.write();
        let upload = &mut data.dps_report_upload;
        if !matches!(
            upload.status,
            DpsReportUploadStatus::Available | DpsReportUploadStatus::Failed
        ) {
            return Err(TransitionError::DpsReportStatus(upload.status));
        }
        let previous = upload.clone();
        upload.is_auto_upload = is_auto_upload;
        upload.status = DpsReportUploadStatus::Queued;
        Ok(previous)
    }

    /// Undoes `queue_dps_report` when the record could not be handed to the worker.
    pub(crate) fn revert_queued_dps_report(&self, previous: DpsReportUpload) {
        let mut data = self.write();
        if data.dps_report_upload.status == DpsReportUploadStatus::Queued {
            data.dps_report_upload = previous;
        }
    }

    pub fn begin_dps_report_upload(&self) -> Result<UploadJob, TransitionError> {
        let mut data = self.write();
        if data.dps_report_upload.status != DpsReportUploadStatus::Queued {
            return Err(TransitionError::DpsReportStatus(
                data.dps_report_upload.status,
            ));
        }
        data.dps_report_upload.status = DpsReportUploadStatus::Uploading;
        Ok(self.upload_job(&data))
    }

    pub fn finish_dps_report_upload(&self, result: DpsReportResult) {
        let mut data = self.write();
        let upload = &mut data.dps_report_upload;
        upload.status = result.status;
        upload.id = result.id;
        upload.permalink = result.permalink;
        upload.user_token = result.user_token;
        upload.error_message = result.error_message;
    }

    /// Returns the status from before queueing, for `revert_queued_wingman`.
    pub fn queue_wingman(&self) -> Result<WingmanUploadStatus, TransitionError> {
        let mut data = self.write();
        if data.parse_status != ParseStatus::Parsed {
            return Err(TransitionError::NotParsed(data.parse_status));
        }
        let upload = &mut data.wingman_upload;
        if !matches!(
            upload.status,
            WingmanUploadStatus::Available | WingmanUploadStatus::Failed
        ) {
            return Err(TransitionError::WingmanStatus(upload.status));
        }
        let previous = upload.status;
        upload.status = WingmanUploadStatus::Queued;
        Ok(previous)
    }

    pub(crate) fn revert_queued_wingman(&self, previous: WingmanUploadStatus) {
        let mut data = self.write();
        if data.wingman_upload.status == WingmanUploadStatus::Queued {
            data.wingman_upload.status = previous;
        }
    }

    pub fn begin_wingman_upload(&self) -> Result<UploadJob, TransitionError> {
        let mut data = self.write();
        if data.parse_status != ParseStatus::Parsed {
            return Err(TransitionError::NotParsed(data.parse_status));
        }
        if data.wingman_upload.status != WingmanUploadStatus::Queued {
            return Err(TransitionError::WingmanStatus(data.wingman_upload.status));
        }
        data.wingman_upload.status = WingmanUploadStatus::Uploading;
        Ok(self.upload_job(&data))
    }

    pub fn finish_wingman_upload(&self, result: WingmanResult) {
        let mut data = self.write();
        data.wingman_upload.status = result.status;
        data.wingman_upload.error_message = result.error_message;
    }

    fn upload_job(&self, data: &EncounterLogData) -> UploadJob {
        UploadJob {
            log_id: self.id.clone(),
            evtc_file_path: self.evtc_data.evtc_file_path.clone(),
            json_file_path: data.report_data.json_file_path.clone(),
            html_file_path: data.report_data.html_file_path.clone(),
            account_name: data.encounter_data.account_name.clone(),
        }
    }
}

impl Drop for EncounterLog {
    fn drop(&mut self) {
        let data = self
            .data
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        remove_generated_reports(&self.id, &data.report_data, &ReportData::default());
    }
}

/// Deletes the reports in `stale` that `current` no longer points at.
fn remove_generated_reports(log_id: &str, stale: &ReportData, current: &ReportData) {
    let kept = [
        current.html_file_path.as_deref(),
        current.json_file_path.as_deref(),
    ];
    let generated_files = [
        stale.html_file_path.as_deref(),
        stale.json_file_path.as_deref(),
    ];

    for path in generated_files.into_iter().flatten() {
        if kept.contains(&Some(path)) || !path.exists() {
            continue;
        }
        if let Err(error) = std::fs::remove_file(path) {
            tracing::warn!(
                log_id,
                report_path = %path.display(),
                "Failed to remove generated report: {error}"
            );
        }
    }
}

/// Path components after the logs root marker, or the whole path when the
/// marker is missing or last.
pub fn generate_id(path: &Path) -> String {
    let components: Vec<Component<'_>> = path.components().collect();
    let marker_index = components
        .iter()
        .position(|component| component.as_os_str() == LOGS_ROOT_MARKER);

    match marker_index {
        Some(index) if index + 1 < components.len() => components[index + 1..]
            .iter()
            .collect::<std::path::PathBuf>()
            .to_string_lossy()
            .to_string(),
        _ => path.to_string_lossy().to_string(),
    }
}
