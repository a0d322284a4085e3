use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::multipart::Form;
use serde::Deserialize;

use super::{is_in_allow_list, read_reply, AutoUploadTrigger, HttpReply, Uploader};
use crate::clipboard::ClipboardSink;
use crate::encounter_log::{DpsReportResult, DpsReportUploadStatus, EncounterLog};
use crate::settings::{
    AutoUploadFilter, DpsReportSettings, SettingsStore, DPS_REPORT_USER_TOKEN_LENGTH,
};
use crate::work_queue::{QueueError, WorkQueue};

const UPLOADER_NAME: &str = "dps.report";
const UPLOAD_CONTENT_PATH: &str = "/uploadContent";

/// One `uploadContent` call, built from the settings at upload time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpsReportRequest {
    pub url: String,
    pub evtc_file_path: PathBuf,
    pub user_token: Option<String>,
    pub anonymize: bool,
    pub detailed_wvw: bool,
    pub timeout: Duration,
}

impl DpsReportRequest {
    pub fn new(settings: &DpsReportSettings, evtc_file_path: PathBuf) -> Self {
        let user_token = (settings.user_token.chars().count() == DPS_REPORT_USER_TOKEN_LENGTH)
            .then(|| settings.user_token.clone());

        Self {
            url: format!(
                "{}{UPLOAD_CONTENT_PATH}",
                settings.base_url.trim_end_matches('/')
            ),
            evtc_file_path,
            user_token,
            anonymize: settings.anonymize,
            detailed_wvw: settings.detailed_wvw,
            timeout: settings.request_timeout(),
        }
    }

    pub fn query_parameters(&self) -> Vec<(&'static str, String)> {
        let mut parameters = Vec::new();
        if let Some(user_token) = &self.user_token {
            parameters.push(("userToken", user_token.clone()));
        }
        if self.anonymize {
            parameters.push(("anonymous", "true".to_string()));
        }
        if self.detailed_wvw {
            parameters.push(("detailedwvw", "true".to_string()));
        }
        parameters
    }
}

pub trait DpsReportApi: Send + Sync {
    fn upload_content(&self, request: &DpsReportRequest) -> Result<HttpReply, String>;
}

pub struct DpsReportClient {
    http: reqwest::blocking::Client,
}

impl DpsReportClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()?;
        Ok(Self { http })
    }
}

impl DpsReportApi for DpsReportClient {
    fn upload_content(&self, request: &DpsReportRequest) -> Result<HttpReply, String> {
        let form = Form::new()
            .file("file", &request.evtc_file_path)
            .map_err(|error| format!("Failed to read recording: {error}"))?
            .text("json", "1");

        let response = self
            .http
            .post(&request.url)
            .query(&request.query_parameters())
            .multipart(form)
            .timeout(request.timeout)
            .send()
            .map_err(|error| format!("Upload failed: {error}"))?;

        read_reply(response)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadContentResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    user_token: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Maps a dps.report reply onto the record's upload result.
pub fn interpret_response(reply: &HttpReply) -> DpsReportResult {
    if reply.is_success() {
        let response = match serde_json::from_str::<UploadContentResponse>(&reply.body) {
            Ok(response) => response,
            Err(error) => {
                return DpsReportResult::failed(format!("Failed to parse response: {error}"))
            }
        };

        let error_message = match response.error {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(message)) => Some(message),
            Some(_) => Some("Json contains errors".to_string()),
        };

        return DpsReportResult {
            status: if error_message.is_some() {
                DpsReportUploadStatus::Failed
            } else {
                DpsReportUploadStatus::Uploaded
            },
            id: response.id.unwrap_or_default(),
            permalink: response.permalink.unwrap_or_default(),
            user_token: response.user_token.unwrap_or_default(),
            error_message,
        };
    }

    if reply.is_client_error() {
        if reply.body.is_empty() {
            return DpsReportResult::failed(format!("Client error: {}", reply.status));
        }

        return match serde_json::from_str::<serde_json::Value>(&reply.body) {
            Ok(body) => match body.get("error").and_then(serde_json::Value::as_str) {
                Some(message) => DpsReportResult::failed(format!("Error: {message}")),
                None => DpsReportResult::failed(format!("Client error: {}", reply.status)),
            },
            Err(error) => {
                DpsReportResult::failed(format!("Failed to parse error message: {error}"))
            }
        };
    }

    DpsReportResult::failed(format!("Server error: {}", reply.status))
}

/// Single-step uploads of raw recordings to dps.report.
pub struct DpsReportUploader {
    settings: Arc<SettingsStore>,
    api: Box<dyn DpsReportApi>,
    clipboard: Box<dyn ClipboardSink>,
    queue: WorkQueue<Arc<EncounterLog>>,
}

impl DpsReportUploader {
    pub fn new(
        settings: Arc<SettingsStore>,
        api: Box<dyn DpsReportApi>,
        clipboard: Box<dyn ClipboardSink>,
    ) -> Self {
        Self {
            settings,
            api,
            clipboard,
            queue: WorkQueue::new(),
        }
    }

    pub fn queue(
        &self,
        encounter_log: &Arc<EncounterLog>,
        is_auto_upload: bool,
    ) -> Result<(), QueueError> {
        if !self.queue.is_running() {
            tracing::warn!(log_id = %encounter_log.id(), "dps.report uploader is not running");
            return Err(QueueError::NotRunning(UPLOADER_NAME));
        }

        let previous = match encounter_log.queue_dps_report(is_auto_upload) {
            Ok(previous) => previous,
            Err(error) => {
                tracing::warn!(log_id = %encounter_log.id(), "{error}");
                return Err(error.into());
            }
        };

        if !self.queue.push(Arc::clone(encounter_log)) {
            encounter_log.revert_queued_dps_report(previous);
            return Err(QueueError::NotRunning(UPLOADER_NAME));
        }

        tracing::info!(
            log_id = %encounter_log.id(),
            is_auto_upload,
            "Queued encounter log for dps.report upload"
        );
        Ok(())
    }

    fn upload(&self, encounter_log: &EncounterLog) {
        let job = match encounter_log.begin_dps_report_upload() {
            Ok(job) => job,
            Err(error) => {
                tracing::debug!(log_id = %encounter_log.id(), "Skipping dps.report upload: {error}");
                return;
            }
        };

        tracing::info!(log_id = %job.log_id, "Uploading encounter log to dps.report");

        let settings = self.settings.read(|settings| settings.dps_report.clone());
        let request = DpsReportRequest::new(&settings, job.evtc_file_path);
        let result = match self.api.upload_content(&request) {
            Ok(reply) => interpret_response(&reply),
            Err(error) => DpsReportResult::failed(error),
        };

        let permalink = (result.status == DpsReportUploadStatus::Uploaded)
            .then(|| result.permalink.clone());
        match (&permalink, &result.error_message) {
            (Some(permalink), _) => {
                tracing::info!(log_id = %job.log_id, permalink = %permalink, "Encounter log uploaded to dps.report")
            }
            (None, Some(message)) => {
                tracing::error!(log_id = %job.log_id, "Failed to upload encounter log to dps.report: {message}")
            }
            (None, None) => {
                tracing::error!(log_id = %job.log_id, "Failed to upload encounter log to dps.report")
            }
        }

        encounter_log.finish_dps_report_upload(result);

        if let Some(permalink) = permalink.filter(|_| settings.copy_to_clipboard) {
            if let Err(error) = self.clipboard.copy_text(&permalink) {
                tracing::warn!(log_id = %job.log_id, "Failed to copy permalink to clipboard: {error}");
            }
        }
    }
}

impl Uploader for DpsReportUploader {
    fn name(&self) -> &'static str {
        UPLOADER_NAME
    }

    fn queue_upload(&self, encounter_log: &Arc<EncounterLog>) -> Result<(), QueueError> {
        self.queue(encounter_log, false)
    }

    /// With the `successful_only` filter the decision waits for the parse
    /// result; otherwise it is made as soon as the record exists.
    fn process_auto_upload(&self, encounter_log: &Arc<EncounterLog>, trigger: AutoUploadTrigger) {
        let settings = self.settings.read(|settings| settings.dps_report.clone());
        if !settings.auto_upload {
            return;
        }

        let decides_now = match settings.auto_upload_filter {
            AutoUploadFilter::All => trigger == AutoUploadTrigger::Created,
            AutoUploadFilter::SuccessfulOnly => trigger == AutoUploadTrigger::Parsed,
        };
        if !decides_now {
            return;
        }

        let trigger_id = encounter_log.evtc_data().trigger_id;
        if !is_in_allow_list(&settings.auto_upload_encounters, trigger_id) {
            tracing::info!(
                log_id = %encounter_log.id(),
                trigger_id,
                "Skipping dps.report auto upload for encounter"
            );
            return;
        }

        if settings.auto_upload_filter == AutoUploadFilter::SuccessfulOnly
            && !encounter_log.read().encounter_data.success
        {
            tracing::info!(
                log_id = %encounter_log.id(),
                trigger_id,
                "Skipping dps.report auto upload because the encounter was not a success"
            );
            return;
        }

        let _ = self.queue(encounter_log, true);
    }

    fn run(&self) {
        tracing::info!("dps.report uploader started");

        while let Some(encounter_log) = self.queue.pop() {
            self.upload(&encounter_log);
        }

        tracing::info!("dps.report uploader stopped");
    }

    fn shutdown(&self) {
        self.queue.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::tests::RecordingClipboard;
    use crate::encounter_log::tests::{evtc_data, parsed_outcome};
    use crate::settings::UploaderSettings;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct ScriptedApi {
        replies: Mutex<VecDeque<Result<HttpReply, String>>>,
        requests: Mutex<Vec<DpsReportRequest>>,
    }

    impl ScriptedApi {
        fn with_replies(replies: Vec<Result<HttpReply, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::default(),
            }
        }
    }

    impl DpsReportApi for Arc<ScriptedApi> {
        fn upload_content(&self, request: &DpsReportRequest) -> Result<HttpReply, String> {
            self.requests.lock().expect("requests").push(request.clone());
            self.replies
                .lock()
                .expect("replies")
                .pop_front()
                .unwrap_or_else(|| Err("no scripted reply".to_string()))
        }
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "Timed out waiting for worker");
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn uploader_with(
        settings: UploaderSettings,
        api: Arc<ScriptedApi>,
        clipboard: RecordingClipboard,
    ) -> Arc<DpsReportUploader> {
        Arc::new(DpsReportUploader::new(
            Arc::new(SettingsStore::in_memory(settings)),
            Box::new(api),
            Box::new(clipboard),
        ))
    }

    #[test]
    fn successful_reply_is_uploaded() {
        let result = interpret_response(&HttpReply::new(
            200,
            r#"{"id":"x","permalink":"https://dps.report/x","userToken":"t","error":null}"#,
        ));
        assert_eq!(result.status, DpsReportUploadStatus::Uploaded);
        assert_eq!(result.id, "x");
        assert_eq!(result.permalink, "https://dps.report/x");
        assert_eq!(result.user_token, "t");
        assert_eq!(result.error_message, None);
    }

    #[test]
    fn embedded_error_fails_despite_http_success() {
        let result = interpret_response(&HttpReply::new(200, r#"{"error":"bad file"}"#));
        assert_eq!(result.status, DpsReportUploadStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("bad file"));

        let result = interpret_response(&HttpReply::new(200, r#"{"error":{"code":3}}"#));
        assert_eq!(result.error_message.as_deref(), Some("Json contains errors"));
    }

    #[test]
    fn maps_http_error_classes() {
        let result = interpret_response(&HttpReply::new(403, r#"{"error":"Encounter too short"}"#));
        assert_eq!(result.error_message.as_deref(), Some("Error: Encounter too short"));

        let result = interpret_response(&HttpReply::new(429, ""));
        assert_eq!(result.error_message.as_deref(), Some("Client error: 429"));

        let result = interpret_response(&HttpReply::new(400, "<html>"));
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|message| message.starts_with("Failed to parse error message")));

        let result = interpret_response(&HttpReply::new(502, "{}"));
        assert_eq!(result.status, DpsReportUploadStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("Server error: 502"));
    }

    #[test]
    fn unreadable_success_body_is_reported() {
        let result = interpret_response(&HttpReply::new(200, "not json"));
        assert_eq!(result.status, DpsReportUploadStatus::Failed);
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|message| message.starts_with("Failed to parse response")));
    }

    #[test]
    fn sends_user_token_only_when_complete() {
        let mut settings = DpsReportSettings {
            anonymize: true,
            ..DpsReportSettings::default()
        };
        settings.user_token = "abc".to_string();
        let request = DpsReportRequest::new(&settings, PathBuf::from("a.zevtc"));
        assert_eq!(request.url, "https://dps.report/uploadContent");
        assert_eq!(
            request.query_parameters(),
            vec![("anonymous", "true".to_string())]
        );

        settings.user_token = "t".repeat(DPS_REPORT_USER_TOKEN_LENGTH);
        settings.detailed_wvw = true;
        let request = DpsReportRequest::new(&settings, PathBuf::from("a.zevtc"));
        assert_eq!(request.query_parameters().len(), 3);
        assert_eq!(request.query_parameters()[0].0, "userToken");
    }

    #[test]
    fn worker_uploads_queued_log_and_copies_permalink() {
        let mut settings = UploaderSettings::default();
        settings.dps_report.copy_to_clipboard = true;
        let api = Arc::new(ScriptedApi::with_replies(vec![Ok(HttpReply::new(
            200,
            r#"{"id":"abc","permalink":"https://dps.report/abc"}"#,
        ))]));
        let clipboard = RecordingClipboard::default();
        let uploader = uploader_with(settings, Arc::clone(&api), clipboard.clone());

        let worker = {
            let uploader = Arc::clone(&uploader);
            thread::spawn(move || uploader.run())
        };

        let log = Arc::new(EncounterLog::new(evtc_data("/logs/arcdps.cbtlogs/1.zevtc", 19450)));
        uploader.queue_upload(&log).expect("queue");
        wait_for(|| log.read().dps_report_upload.status == DpsReportUploadStatus::Uploaded);

        uploader.shutdown();
        worker.join().expect("worker thread");

        let upload = log.snapshot().dps_report_upload;
        assert_eq!(upload.permalink, "https://dps.report/abc");
        assert!(!upload.is_auto_upload);
        assert_eq!(
            *clipboard.copied.lock().expect("clipboard"),
            vec!["https://dps.report/abc".to_string()]
        );
        assert_eq!(
            api.requests.lock().expect("requests")[0].evtc_file_path,
            PathBuf::from("/logs/arcdps.cbtlogs/1.zevtc")
        );
    }

    #[test]
    fn transport_errors_fail_the_upload() {
        let api = Arc::new(ScriptedApi::with_replies(vec![Err(
            "Upload failed: connection refused".to_string(),
        )]));
        let uploader = uploader_with(
            UploaderSettings::default(),
            api,
            RecordingClipboard::default(),
        );
        let worker = {
            let uploader = Arc::clone(&uploader);
            thread::spawn(move || uploader.run())
        };

        let log = Arc::new(EncounterLog::new(evtc_data("/logs/1.zevtc", 19450)));
        uploader.queue_upload(&log).expect("queue");
        wait_for(|| log.read().dps_report_upload.status == DpsReportUploadStatus::Failed);
        uploader.shutdown();
        worker.join().expect("worker thread");

        assert_eq!(
            log.snapshot().dps_report_upload.error_message.as_deref(),
            Some("Upload failed: connection refused")
        );
    }

    #[test]
    fn rejects_queueing_after_shutdown() {
        let uploader = uploader_with(
            UploaderSettings::default(),
            Arc::new(ScriptedApi::default()),
            RecordingClipboard::default(),
        );
        uploader.shutdown();

        let log = Arc::new(EncounterLog::new(evtc_data("/logs/1.zevtc", 19450)));
        assert_eq!(
            uploader.queue_upload(&log),
            Err(QueueError::NotRunning(UPLOADER_NAME))
        );
        assert_eq!(
            log.snapshot().dps_report_upload.status,
            DpsReportUploadStatus::Available
        );
    }

    #[test]
    fn auto_upload_with_all_filter_queues_on_creation() {
        let mut settings = UploaderSettings::default();
        settings.dps_report.auto_upload = true;
        settings.dps_report.auto_upload_encounters = vec![19450];
        let uploader = uploader_with(
            settings,
            Arc::new(ScriptedApi::default()),
            RecordingClipboard::default(),
        );

        let listed = Arc::new(EncounterLog::new(evtc_data("/logs/1.zevtc", 19450)));
        let unlisted = Arc::new(EncounterLog::new(evtc_data("/logs/2.zevtc", 17154)));
        uploader.process_auto_upload(&listed, AutoUploadTrigger::Created);
        uploader.process_auto_upload(&unlisted, AutoUploadTrigger::Created);

        let upload = listed.snapshot().dps_report_upload;
        assert_eq!(upload.status, DpsReportUploadStatus::Queued);
        assert!(upload.is_auto_upload);
        assert_eq!(
            unlisted.snapshot().dps_report_upload.status,
            DpsReportUploadStatus::Available
        );
    }

    #[test]
    fn successful_only_filter_waits_for_parse_result() {
        let mut settings = UploaderSettings::default();
        settings.dps_report.auto_upload = true;
        settings.dps_report.auto_upload_filter = AutoUploadFilter::SuccessfulOnly;
        settings.dps_report.auto_upload_encounters = vec![19450];
        let uploader = uploader_with(
            settings,
            Arc::new(ScriptedApi::default()),
            RecordingClipboard::default(),
        );

        let parsed_log = |success: bool| {
            let log = Arc::new(EncounterLog::new(evtc_data("/logs/1.zevtc", 19450)));
            log.queue_parse().expect("queue parse");
            log.begin_parse().expect("begin parse");
            log.finish_parse(parsed_outcome("Player.1234", success));
            log
        };

        let kill = Arc::new(EncounterLog::new(evtc_data("/logs/1.zevtc", 19450)));
        uploader.process_auto_upload(&kill, AutoUploadTrigger::Created);
        assert_eq!(
            kill.snapshot().dps_report_upload.status,
            DpsReportUploadStatus::Available
        );

        let kill = parsed_log(true);
        uploader.process_auto_upload(&kill, AutoUploadTrigger::Parsed);
        assert_eq!(
            kill.snapshot().dps_report_upload.status,
            DpsReportUploadStatus::Queued
        );

        let wipe = parsed_log(false);
        uploader.process_auto_upload(&wipe, AutoUploadTrigger::Parsed);
        assert_eq!(
            wipe.snapshot().dps_report_upload.status,
            DpsReportUploadStatus::Available
        );
    }
}
