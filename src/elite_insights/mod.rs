mod catalog;
mod installer;
mod output;
mod process;
mod report;
mod version;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use catalog::{parse_release, GithubReleaseCatalog, Release, ReleaseCatalog};
pub use installer::{
    provision, tool_config_contents, write_tool_config, ProvisionError, ProvisionOutcome,
    ToolPaths,
};
pub use output::{scan_output, ToolOutput, FAILURE_MARKER, SUCCESS_MARKER};
pub use process::{ProcessToolRunner, ToolInvocation, ToolRunOutcome, ToolRunner};
pub use report::{parse_encounter_data, read_encounter_data};
pub use version::ToolVersion;

use crate::encounter_log::{EncounterLog, ParseOutcome, ParseStatus, ReportData};
use crate::settings::SettingsStore;
use crate::uploader::{is_in_allow_list, AutoUploadTrigger, Uploader};
use crate::work_queue::{QueueError, WorkQueue};

const PARSER_NAME: &str = "Elite Insights";
pub const PARSE_TIMEOUT: Duration = Duration::from_secs(180);

/// Serial parse worker around the Elite Insights CLI.
///
/// Records are parsed one at a time in queue order. After a successful parse
/// every registered uploader gets a chance to auto-upload the record.
pub struct EliteInsights {
    paths: ToolPaths,
    runner: Box<dyn ToolRunner>,
    settings: Arc<SettingsStore>,
    uploaders: Vec<Arc<dyn Uploader>>,
    queue: WorkQueue<Arc<EncounterLog>>,
    parse_timeout: Duration,
}

impl EliteInsights {
    pub fn new(
        paths: ToolPaths,
        runner: Box<dyn ToolRunner>,
        settings: Arc<SettingsStore>,
        uploaders: Vec<Arc<dyn Uploader>>,
    ) -> Self {
        Self {
            paths,
            runner,
            settings,
            uploaders,
            queue: WorkQueue::new(),
            parse_timeout: PARSE_TIMEOUT,
        }
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    pub fn queue_encounter_log(&self, encounter_log: &Arc<EncounterLog>) -> Result<(), QueueError> {
        if !self.queue.is_running() {
            tracing::warn!(log_id = %encounter_log.id(), "Elite Insights parser is not running");
            return Err(QueueError::NotRunning(PARSER_NAME));
        }

        if let Err(error) = encounter_log.queue_parse() {
            tracing::warn!(log_id = %encounter_log.id(), "{error}");
            return Err(error.into());
        }

        if !self.queue.push(Arc::clone(encounter_log)) {
            encounter_log.revert_queued_parse();
            return Err(QueueError::NotRunning(PARSER_NAME));
        }

        tracing::info!(log_id = %encounter_log.id(), "Queued encounter log for parsing");
        Ok(())
    }

    /// Gives a failed record another parse attempt.
    pub fn retry_parse(&self, encounter_log: &Arc<EncounterLog>) -> Result<(), QueueError> {
        if !self.queue.is_running() {
            return Err(QueueError::NotRunning(PARSER_NAME));
        }
        encounter_log.reset_failed_parse()?;
        self.queue_encounter_log(encounter_log)
    }

    pub fn process_auto_parse(&self, encounter_log: &Arc<EncounterLog>) {
        let settings = self.settings.read(|settings| settings.elite_insights.clone());
        if !settings.auto_parse {
            return;
        }

        let trigger_id = encounter_log.evtc_data().trigger_id;
        if let Some(encounters) = &settings.auto_parse_encounters {
            if !is_in_allow_list(encounters, trigger_id) {
                tracing::info!(
                    log_id = %encounter_log.id(),
                    trigger_id,
                    "Skipping auto parse for encounter"
                );
                return;
            }
        }

        let _ = self.queue_encounter_log(encounter_log);
    }

    pub fn run(&self) {
        tracing::info!("Elite Insights parser started");

        while let Some(encounter_log) = self.queue.pop() {
            self.parse(&encounter_log);
        }

        tracing::info!("Elite Insights parser stopped");
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    fn parse(&self, encounter_log: &Arc<EncounterLog>) {
        if let Err(error) = encounter_log.begin_parse() {
            tracing::debug!(log_id = %encounter_log.id(), "Skipping parse: {error}");
            return;
        }

        tracing::info!(log_id = %encounter_log.id(), "Parsing encounter log");
        let outcome = self.run_tool(&encounter_log.evtc_data().evtc_file_path);

        match outcome.status {
            ParseStatus::Parsed => tracing::info!(
                log_id = %encounter_log.id(),
                encounter = %outcome.encounter_data.encounter_name,
                success = outcome.encounter_data.success,
                "Encounter log parsed"
            ),
            _ => tracing::error!(
                log_id = %encounter_log.id(),
                "Failed to parse encounter log: {}",
                outcome.report_data.error_message.as_deref().unwrap_or("unknown error")
            ),
        }

        let parsed = outcome.status == ParseStatus::Parsed;
        encounter_log.finish_parse(outcome);

        if parsed {
            for uploader in &self.uploaders {
                uploader.process_auto_upload(encounter_log, AutoUploadTrigger::Parsed);
            }
        }
    }

    fn run_tool(&self, evtc_file_path: &Path) -> ParseOutcome {
        if let Err(error) = std::fs::create_dir_all(&self.paths.output_directory) {
            return ParseOutcome::failed_with(format!(
                "Failed to create output directory {}: {error}",
                self.paths.output_directory.display()
            ));
        }

        let invocation = ToolInvocation {
            executable: self.paths.executable_file.clone(),
            config_file: self.paths.config_file.clone(),
            input_file: evtc_file_path.to_path_buf(),
            timeout: self.parse_timeout,
        };

        match self.runner.run(&invocation) {
            Ok(ToolRunOutcome::Completed { output }) => outcome_from_output(&output),
            Ok(ToolRunOutcome::TimedOut { pid }) => {
                ParseOutcome::failed_with(format!("Elite Insights parser timeout. PID: {pid}"))
            }
            Err(error) => ParseOutcome::failed_with(error),
        }
    }
}

/// A run counts as parsed only when the success marker is present, no failure
/// marker is, and both announced reports exist on disk.
pub fn outcome_from_output(output: &str) -> ParseOutcome {
    let scanned = scan_output(output);
    let reports_exist = [&scanned.json_file_path, &scanned.html_file_path]
        .iter()
        .all(|path| path.as_deref().is_some_and(Path::exists));

    let report_data = ReportData {
        json_file_path: scanned.json_file_path.clone(),
        html_file_path: scanned.html_file_path.clone(),
        error_message: None,
    };

    if !scanned.succeeded || !reports_exist {
        let error_message = scanned.failure_message.unwrap_or_else(|| {
            if scanned.succeeded {
                "Elite Insights did not generate the json and html reports".to_string()
            } else {
                "Elite Insights did not report a successful parse".to_string()
            }
        });
        return ParseOutcome::failed(ReportData {
            error_message: Some(error_message),
            ..report_data
        });
    }

    let Some(json_file_path) = &report_data.json_file_path else {
        return ParseOutcome::failed_with("Elite Insights did not generate a json report");
    };

    match read_encounter_data(json_file_path) {
        Ok(encounter_data) => ParseOutcome {
            status: ParseStatus::Parsed,
            encounter_data,
            report_data,
        },
        Err(error_message) => ParseOutcome::failed(ReportData {
            error_message: Some(error_message),
            ..report_data
        }),
    }
}
