use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::blocking::multipart::Form;

use super::{is_in_allow_list, read_reply, AutoUploadTrigger, HttpReply, Uploader};
use crate::encounter_log::{EncounterLog, UploadJob, WingmanResult, WingmanUploadStatus};
use crate::settings::{AutoUploadFilter, SettingsStore, WingmanSettings};
use crate::work_queue::{QueueError, WorkQueue};

const UPLOADER_NAME: &str = "wingman";

/// Metadata sent to `/checkUpload` so the backend can reject duplicates
/// before anything is uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckUploadRequest {
    pub file_name: String,
    /// Last write time of the recording, unix seconds.
    pub timestamp: i64,
    pub file_size: u64,
    pub account: String,
}

impl CheckUploadRequest {
    pub fn from_file(evtc_file_path: &Path, account: &str) -> Result<Self, String> {
        let metadata = std::fs::metadata(evtc_file_path)
            .map_err(|error| format!("Failed to read recording metadata: {error}"))?;
        let modified = metadata
            .modified()
            .map_err(|error| format!("Failed to read recording write time: {error}"))?;

        Ok(Self {
            file_name: file_name(evtc_file_path),
            timestamp: DateTime::<Utc>::from(modified).timestamp(),
            file_size: metadata.len(),
            account: account.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProcessedRequest {
    pub evtc_file_path: PathBuf,
    pub json_file_path: PathBuf,
    pub html_file_path: PathBuf,
    pub account: String,
}

pub trait WingmanApi: Send + Sync {
    fn test_connection(&self, settings: &WingmanSettings) -> Result<HttpReply, String>;

    fn check_upload(
        &self,
        settings: &WingmanSettings,
        request: &CheckUploadRequest,
    ) -> Result<HttpReply, String>;

    fn upload_processed(
        &self,
        settings: &WingmanSettings,
        request: &UploadProcessedRequest,
    ) -> Result<HttpReply, String>;
}

pub struct WingmanClient {
    http: reqwest::blocking::Client,
}

impl WingmanClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()?;
        Ok(Self { http })
    }
}

fn endpoint(settings: &WingmanSettings, path: &str) -> String {
    format!("{}/{path}", settings.base_url.trim_end_matches('/'))
}

impl WingmanApi for WingmanClient {
    fn test_connection(&self, settings: &WingmanSettings) -> Result<HttpReply, String> {
        let response = self
            .http
            .get(endpoint(settings, "testConnection"))
            .timeout(settings.request_timeout())
            .send()
            .map_err(|error| format!("Connection test failed: {error}"))?;

        read_reply(response)
    }

    fn check_upload(
        &self,
        settings: &WingmanSettings,
        request: &CheckUploadRequest,
    ) -> Result<HttpReply, String> {
        let form = Form::new()
            .text("file", request.file_name.clone())
            .text("timestamp", request.timestamp.to_string())
            .text("filesize", request.file_size.to_string())
            .text("account", request.account.clone());

        let response = self
            .http
            .post(endpoint(settings, "checkUpload"))
            .multipart(form)
            .timeout(settings.request_timeout())
            .send()
            .map_err(|error| format!("Request to /checkUpload failed: {error}"))?;

        read_reply(response)
    }

    fn upload_processed(
        &self,
        settings: &WingmanSettings,
        request: &UploadProcessedRequest,
    ) -> Result<HttpReply, String> {
        let form = Form::new()
            .file("file", &request.evtc_file_path)
            .and_then(|form| form.file("jsonfile", &request.json_file_path))
            .and_then(|form| form.file("htmlfile", &request.html_file_path))
            .map_err(|error| format!("Failed to read upload files: {error}"))?
            .text("account", request.account.clone());

        let response = self
            .http
            .post(endpoint(settings, "uploadProcessed"))
            .multipart(form)
            .timeout(settings.request_timeout())
            .send()
            .map_err(|error| format!("Request to /uploadProcessed failed: {error}"))?;

        read_reply(response)
    }
}

/// `Ok` means the log may be uploaded; `Err` carries the final result.
pub fn interpret_check_reply(reply: &HttpReply) -> Result<(), WingmanResult> {
    if !reply.is_success() {
        return Err(WingmanResult::failed(format!(
            "Wingman returned an http error on /checkUpload ({})",
            reply.status
        )));
    }

    match reply.body.trim() {
        "True" => Ok(()),
        "False" => Err(WingmanResult::skipped(
            "Log already exists in the wingman database",
        )),
        "Error" => Err(WingmanResult::failed(
            "Wingman returned an error on /checkUpload",
        )),
        "" => Err(WingmanResult::failed(
            "Wingman returned no data on /checkUpload",
        )),
        body => Err(WingmanResult::failed(format!(
            "Wingman returned an error on /checkUpload: {body}"
        ))),
    }
}

pub fn interpret_upload_reply(reply: &HttpReply) -> WingmanResult {
    if !reply.is_success() {
        return WingmanResult::failed(format!(
            "Wingman returned an http error on /uploadProcessed ({})",
            reply.status
        ));
    }

    match reply.body.trim() {
        "True" => WingmanResult::uploaded(),
        "" => WingmanResult::failed("Wingman returned an error on /uploadProcessed"),
        body => WingmanResult::failed(format!(
            "Wingman returned an error on /uploadProcessed: {body}"
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WingmanTimings {
    /// How long a successful health probe is trusted.
    pub availability_interval: Duration,
    /// Pause after a failed probe before probing again.
    pub backoff: Duration,
    pub backoff_step: Duration,
}

impl Default for WingmanTimings {
    fn default() -> Self {
        Self {
            availability_interval: Duration::from_secs(180),
            backoff: Duration::from_secs(60),
            backoff_step: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
struct Availability {
    available: bool,
    checked_at: Option<Instant>,
}

/// Check-then-upload of parsed logs to Wingman, paused while the backend is unreachable.
pub struct WingmanUploader {
    settings: Arc<SettingsStore>,
    api: Box<dyn WingmanApi>,
    timings: WingmanTimings,
    availability: Mutex<Availability>,
    queue: WorkQueue<Arc<EncounterLog>>,
}

impl WingmanUploader {
    pub fn new(settings: Arc<SettingsStore>, api: Box<dyn WingmanApi>) -> Self {
        Self::with_timings(settings, api, WingmanTimings::default())
    }

    pub fn with_timings(
        settings: Arc<SettingsStore>,
        api: Box<dyn WingmanApi>,
        timings: WingmanTimings,
    ) -> Self {
        Self {
            settings,
            api,
            timings,
            availability: Mutex::new(Availability::default()),
            queue: WorkQueue::new(),
        }
    }

    fn check_server_availability(&self, settings: &WingmanSettings) -> bool {
        let mut availability = self
            .availability
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let is_fresh = availability
            .checked_at
            .is_some_and(|checked_at| checked_at.elapsed() <= self.timings.availability_interval);
        if availability.available && is_fresh {
            return true;
        }

        availability.checked_at = Some(Instant::now());
        availability.available = match self.api.test_connection(settings) {
            Ok(reply) => reply.is_success() && reply.body.trim() == "True",
            Err(error) => {
                tracing::debug!("Wingman connection test failed: {error}");
                false
            }
        };
        availability.available
    }

    /// Returns `false` if shutdown interrupted the pause.
    fn back_off(&self) -> bool {
        let mut remaining = self.timings.backoff;
        while !remaining.is_zero() {
            let step = self.timings.backoff_step.min(remaining);
            if !self.queue.sleep_while_running(step) {
                return false;
            }
            remaining -= step;
            tracing::debug!(
                remaining_secs = remaining.as_secs(),
                "Delaying wingman uploads"
            );
        }
        true
    }

    fn upload(&self, encounter_log: &EncounterLog, settings: &WingmanSettings) {
        let job = match encounter_log.begin_wingman_upload() {
            Ok(job) => job,
            Err(error) => {
                tracing::debug!(log_id = %encounter_log.id(), "Skipping wingman upload: {error}");
                return;
            }
        };

        tracing::info!(log_id = %job.log_id, "Uploading encounter log to wingman");

        let result = self.process_job(&job, settings);
        match (result.status, &result.error_message) {
            (WingmanUploadStatus::Uploaded, _) => {
                tracing::info!(log_id = %job.log_id, "Encounter log uploaded to wingman")
            }
            (WingmanUploadStatus::Skipped, _) => {
                tracing::info!(log_id = %job.log_id, "Encounter log skipped by wingman")
            }
            (_, Some(message)) => {
                tracing::error!(log_id = %job.log_id, "Wingman upload failed: {message}")
            }
            (_, None) => tracing::error!(log_id = %job.log_id, "Wingman upload failed"),
        }

        encounter_log.finish_wingman_upload(result);
    }

    fn process_job(&self, job: &UploadJob, settings: &WingmanSettings) -> WingmanResult {
        let (Some(json_file_path), Some(html_file_path)) =
            (&job.json_file_path, &job.html_file_path)
        else {
            return WingmanResult::failed("Evtc, html or json file does not exist");
        };
        if !job.evtc_file_path.exists() || !json_file_path.exists() || !html_file_path.exists() {
            return WingmanResult::failed("Evtc, html or json file does not exist");
        }

        let check_request = match CheckUploadRequest::from_file(&job.evtc_file_path, &job.account_name)
        {
            Ok(request) => request,
            Err(error) => return WingmanResult::failed(error),
        };

        let check_reply = match self.api.check_upload(settings, &check_request) {
            Ok(reply) => reply,
            Err(error) => return WingmanResult::failed(error),
        };
        if let Err(result) = interpret_check_reply(&check_reply) {
            return result;
        }

        let upload_request = UploadProcessedRequest {
            evtc_file_path: job.evtc_file_path.clone(),
            json_file_path: json_file_path.clone(),
            html_file_path: html_file_path.clone(),
            account: job.account_name.clone(),
        };
        match self.api.upload_processed(settings, &upload_request) {
            Ok(reply) => interpret_upload_reply(&reply),
            Err(error) => WingmanResult::failed(error),
        }
    }
}

impl Uploader for WingmanUploader {
    fn name(&self) -> &'static str {
        UPLOADER_NAME
    }

    fn queue_upload(&self, encounter_log: &Arc<EncounterLog>) -> Result<(), QueueError> {
        if !self.queue.is_running() {
            tracing::warn!(log_id = %encounter_log.id(), "Wingman uploader is not running");
            return Err(QueueError::NotRunning(UPLOADER_NAME));
        }

        let previous = match encounter_log.queue_wingman() {
            Ok(previous) => previous,
            Err(error) => {
                tracing::warn!(log_id = %encounter_log.id(), "{error}");
                return Err(error.into());
            }
        };

        if !self.queue.push(Arc::clone(encounter_log)) {
            encounter_log.revert_queued_wingman(previous);
            return Err(QueueError::NotRunning(UPLOADER_NAME));
        }

        tracing::info!(log_id = %encounter_log.id(), "Queued encounter log for wingman upload");
        Ok(())
    }

    /// Wingman needs the generated reports, so only parsed records are considered.
    fn process_auto_upload(&self, encounter_log: &Arc<EncounterLog>, trigger: AutoUploadTrigger) {
        if trigger != AutoUploadTrigger::Parsed {
            return;
        }

        let settings = self.settings.read(|settings| settings.wingman.clone());
        if !settings.auto_upload {
            return;
        }

        let trigger_id = encounter_log.evtc_data().trigger_id;
        if !is_in_allow_list(&settings.auto_upload_encounters, trigger_id) {
            tracing::info!(
                log_id = %encounter_log.id(),
                trigger_id,
                "Skipping wingman auto upload for encounter"
            );
            return;
        }

        if settings.auto_upload_filter == AutoUploadFilter::SuccessfulOnly
            && !encounter_log.read().encounter_data.success
        {
            tracing::info!(
                log_id = %encounter_log.id(),
                trigger_id,
                "Skipping wingman auto upload because the encounter was not a success"
            );
            return;
        }

        let _ = self.queue_upload(encounter_log);
    }

    fn run(&self) {
        tracing::info!("Wingman uploader started");

        while self.queue.wait_for_item() {
            let settings = self.settings.read(|settings| settings.wingman.clone());

            if !self.check_server_availability(&settings) {
                tracing::warn!(
                    backoff_secs = self.timings.backoff.as_secs(),
                    "Wingman servers unavailable, pausing uploads"
                );
                if !self.back_off() {
                    break;
                }
                continue;
            }

            if let Some(encounter_log) = self.queue.try_pop() {
                self.upload(&encounter_log, &settings);
            }
        }

        tracing::info!("Wingman uploader stopped");
    }

    fn shutdown(&self) {
        self.queue.shutdown();
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encounter_log::tests::{evtc_data, parsed_outcome};
    use crate::encounter_log::{ParseStatus, TransitionError};
    use crate::settings::UploaderSettings;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct ScriptedWingman {
        probes: Mutex<VecDeque<bool>>,
        probe_calls: AtomicUsize,
        check_replies: Mutex<VecDeque<HttpReply>>,
        check_requests: Mutex<Vec<CheckUploadRequest>>,
        upload_replies: Mutex<VecDeque<HttpReply>>,
        upload_calls: AtomicUsize,
    }

    impl WingmanApi for Arc<ScriptedWingman> {
        fn test_connection(&self, _settings: &WingmanSettings) -> Result<HttpReply, String> {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            let available = self.probes.lock().expect("probes").pop_front().unwrap_or(true);
            Ok(HttpReply::new(200, if available { "True" } else { "False" }))
        }

        fn check_upload(
            &self,
            _settings: &WingmanSettings,
            request: &CheckUploadRequest,
        ) -> Result<HttpReply, String> {
            self.check_requests
                .lock()
                .expect("check requests")
                .push(request.clone());
            self.check_replies
                .lock()
                .expect("check replies")
                .pop_front()
                .ok_or_else(|| "no scripted reply".to_string())
        }

        fn upload_processed(
            &self,
            _settings: &WingmanSettings,
            _request: &UploadProcessedRequest,
        ) -> Result<HttpReply, String> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            self.upload_replies
                .lock()
                .expect("upload replies")
                .pop_front()
                .ok_or_else(|| "no scripted reply".to_string())
        }
    }

    fn fast_timings() -> WingmanTimings {
        WingmanTimings {
            availability_interval: Duration::from_secs(180),
            backoff: Duration::from_millis(30),
            backoff_step: Duration::from_millis(10),
        }
    }

    fn uploader_with(settings: UploaderSettings, api: Arc<ScriptedWingman>) -> Arc<WingmanUploader> {
        Arc::new(WingmanUploader::with_timings(
            Arc::new(SettingsStore::in_memory(settings)),
            Box::new(api),
            fast_timings(),
        ))
    }

    fn parsed_log_with_files(directory: &Path, success: bool) -> Arc<EncounterLog> {
        let evtc_path = directory.join("20240612-201500.zevtc");
        let json_path = directory.join("20240612-201500_dhuum_kill.json");
        let html_path = directory.join("20240612-201500_dhuum_kill.html");
        std::fs::write(&evtc_path, b"EVTC").expect("write evtc");
        std::fs::write(&json_path, b"{}").expect("write json");
        std::fs::write(&html_path, b"<html/>").expect("write html");

        let log = Arc::new(EncounterLog::new(evtc_data(
            evtc_path.to_str().expect("utf-8 path"),
            19450,
        )));
        log.queue_parse().expect("queue parse");
        log.begin_parse().expect("begin parse");
        let mut outcome = parsed_outcome("Player.1234", success);
        outcome.report_data.json_file_path = Some(json_path);
        outcome.report_data.html_file_path = Some(html_path);
        log.finish_parse(outcome);
        log
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "Timed out waiting for worker");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn interprets_check_upload_replies() {
        assert_eq!(interpret_check_reply(&HttpReply::new(200, "True")), Ok(()));
        assert_eq!(
            interpret_check_reply(&HttpReply::new(200, "False")),
            Err(WingmanResult::skipped("Log already exists in the wingman database"))
        );
        assert_eq!(
            interpret_check_reply(&HttpReply::new(200, "Error")),
            Err(WingmanResult::failed("Wingman returned an error on /checkUpload"))
        );
        assert_eq!(
            interpret_check_reply(&HttpReply::new(200, "Maybe")),
            Err(WingmanResult::failed(
                "Wingman returned an error on /checkUpload: Maybe"
            ))
        );
        assert_eq!(
            interpret_check_reply(&HttpReply::new(500, "True")),
            Err(WingmanResult::failed(
                "Wingman returned an http error on /checkUpload (500)"
            ))
        );
    }

    #[test]
    fn interprets_upload_processed_replies() {
        assert_eq!(
            interpret_upload_reply(&HttpReply::new(200, "True")),
            WingmanResult::uploaded()
        );
        assert_eq!(
            interpret_upload_reply(&HttpReply::new(200, "False")),
            WingmanResult::failed("Wingman returned an error on /uploadProcessed: False")
        );
        assert_eq!(
            interpret_upload_reply(&HttpReply::new(200, "")),
            WingmanResult::failed("Wingman returned an error on /uploadProcessed")
        );
        assert_eq!(
            interpret_upload_reply(&HttpReply::new(413, "")).error_message.as_deref(),
            Some("Wingman returned an http error on /uploadProcessed (413)")
        );
    }

    #[test]
    fn rejects_unparsed_logs_even_when_requested() {
        let uploader = uploader_with(UploaderSettings::default(), Arc::default());
        let log = Arc::new(EncounterLog::new(evtc_data("/logs/1.zevtc", 19450)));

        assert_eq!(
            uploader.queue_upload(&log),
            Err(QueueError::Transition(TransitionError::NotParsed(
                ParseStatus::Unparsed
            )))
        );
        assert_eq!(
            log.snapshot().wingman_upload.status,
            WingmanUploadStatus::Available
        );
    }

    #[test]
    fn waits_for_backend_before_dequeuing() {
        let directory = tempfile::tempdir().expect("tempdir");
        let api = Arc::new(ScriptedWingman {
            probes: Mutex::new(VecDeque::from([false, false, false])),
            check_replies: Mutex::new(VecDeque::from([HttpReply::new(200, "True")])),
            upload_replies: Mutex::new(VecDeque::from([HttpReply::new(200, "True")])),
            ..ScriptedWingman::default()
        });
        let uploader = uploader_with(UploaderSettings::default(), Arc::clone(&api));

        let log = parsed_log_with_files(directory.path(), true);
        uploader.queue_upload(&log).expect("queue");

        let worker = {
            let uploader = Arc::clone(&uploader);
            thread::spawn(move || uploader.run())
        };
        wait_for(|| log.read().wingman_upload.status == WingmanUploadStatus::Uploaded);
        uploader.shutdown();
        worker.join().expect("worker thread");

        assert_eq!(api.probe_calls.load(Ordering::SeqCst), 4);
        let check_requests = api.check_requests.lock().expect("check requests");
        assert_eq!(check_requests.len(), 1);
        assert_eq!(check_requests[0].file_name, "20240612-201500.zevtc");
        assert_eq!(check_requests[0].file_size, 4);
        assert_eq!(check_requests[0].account, "Player.1234");
    }

    #[test]
    fn duplicate_logs_are_skipped_without_uploading() {
        let directory = tempfile::tempdir().expect("tempdir");
        let api = Arc::new(ScriptedWingman {
            check_replies: Mutex::new(VecDeque::from([HttpReply::new(200, "False")])),
            ..ScriptedWingman::default()
        });
        let uploader = uploader_with(UploaderSettings::default(), Arc::clone(&api));
        let worker = {
            let uploader = Arc::clone(&uploader);
            thread::spawn(move || uploader.run())
        };

        let log = parsed_log_with_files(directory.path(), true);
        uploader.queue_upload(&log).expect("queue");
        wait_for(|| log.read().wingman_upload.status == WingmanUploadStatus::Skipped);
        uploader.shutdown();
        worker.join().expect("worker thread");

        assert_eq!(api.upload_calls.load(Ordering::SeqCst), 0);
        assert!(log.queue_wingman().is_err());
    }

    #[test]
    fn missing_reports_fail_without_network_calls() {
        let directory = tempfile::tempdir().expect("tempdir");
        let api = Arc::new(ScriptedWingman::default());
        let uploader = uploader_with(UploaderSettings::default(), Arc::clone(&api));

        let log = parsed_log_with_files(directory.path(), true);
        let json_path = log
            .snapshot()
            .report_data
            .json_file_path
            .expect("json path");
        std::fs::remove_file(json_path).expect("remove json");

        log.queue_wingman().expect("queue");
        let job = log.begin_wingman_upload().expect("begin");
        let settings = WingmanSettings::default();
        let result = uploader.process_job(&job, &settings);

        assert_eq!(
            result,
            WingmanResult::failed("Evtc, html or json file does not exist")
        );
        assert!(api.check_requests.lock().expect("check requests").is_empty());
    }

    #[test]
    fn shutdown_interrupts_backoff() {
        let api = Arc::new(ScriptedWingman {
            probes: Mutex::new(VecDeque::from([false; 8])),
            ..ScriptedWingman::default()
        });
        let uploader = Arc::new(WingmanUploader::with_timings(
            Arc::new(SettingsStore::in_memory(UploaderSettings::default())),
            Box::new(Arc::clone(&api)),
            WingmanTimings {
                backoff: Duration::from_secs(60),
                ..WingmanTimings::default()
            },
        ));
        let directory = tempfile::tempdir().expect("tempdir");
        let log = parsed_log_with_files(directory.path(), true);
        uploader.queue_upload(&log).expect("queue");

        let worker = {
            let uploader = Arc::clone(&uploader);
            thread::spawn(move || uploader.run())
        };
        wait_for(|| api.probe_calls.load(Ordering::SeqCst) == 1);

        let started_at = Instant::now();
        uploader.shutdown();
        worker.join().expect("worker thread");
        assert!(started_at.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn auto_upload_waits_for_successful_parse() {
        let directory = tempfile::tempdir().expect("tempdir");
        let mut settings = UploaderSettings::default();
        settings.wingman.auto_upload = true;
        settings.wingman.auto_upload_encounters = vec![19450];
        let uploader = uploader_with(settings, Arc::default());

        let kill = parsed_log_with_files(directory.path(), true);
        uploader.process_auto_upload(&kill, AutoUploadTrigger::Created);
        assert_eq!(
            kill.snapshot().wingman_upload.status,
            WingmanUploadStatus::Available
        );
        uploader.process_auto_upload(&kill, AutoUploadTrigger::Parsed);
        assert_eq!(
            kill.snapshot().wingman_upload.status,
            WingmanUploadStatus::Queued
        );

        let wipe_directory = tempfile::tempdir().expect("tempdir");
        let wipe = parsed_log_with_files(wipe_directory.path(), false);
        uploader.process_auto_upload(&wipe, AutoUploadTrigger::Parsed);
        assert_eq!(
            wipe.snapshot().wingman_upload.status,
            WingmanUploadStatus::Available
        );
    }
}
