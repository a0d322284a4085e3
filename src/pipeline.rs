use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};

use crate::clipboard::SystemClipboard;
use crate::elite_insights::{
    provision, EliteInsights, GithubReleaseCatalog, ProcessToolRunner, ReleaseCatalog, ToolPaths,
    ToolRunner,
};
use crate::encounter_log::{EncounterLog, LogStore};
use crate::evtc::EvtcData;
use crate::log_watcher::LogWatcher;
use crate::settings::SettingsStore;
use crate::uploader::{
    AutoUploadTrigger, DpsReportClient, DpsReportUploader, Uploader, WingmanClient,
    WingmanUploader,
};
use crate::work_queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to create http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Filesystem locations the pipeline works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub logs_directory: PathBuf,
    pub data_directory: PathBuf,
}

impl PipelineConfig {
    pub fn settings_file(&self) -> PathBuf {
        self.data_directory.join("settings.json")
    }

    pub fn tool_paths(&self) -> ToolPaths {
        ToolPaths::new(
            self.data_directory.join("elite-insights"),
            self.data_directory.join("data"),
        )
    }
}

/// Application context: the record store plus every worker, wired together.
///
/// Workers only run between `start` and `shutdown`. Manual requests address
/// records by id and go through the same state transitions as automatic ones.
pub struct Pipeline {
    logs_directory: PathBuf,
    settings: Arc<SettingsStore>,
    store: LogStore,
    parser: Arc<EliteInsights>,
    dps_report: Arc<DpsReportUploader>,
    wingman: Arc<WingmanUploader>,
    watcher: Mutex<Option<LogWatcher>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(
        logs_directory: PathBuf,
        settings: Arc<SettingsStore>,
        parser_paths: ToolPaths,
        parser_runner: Box<dyn ToolRunner>,
        dps_report: Arc<DpsReportUploader>,
        wingman: Arc<WingmanUploader>,
    ) -> Self {
        let uploaders: Vec<Arc<dyn Uploader>> = vec![
            Arc::clone(&dps_report) as Arc<dyn Uploader>,
            Arc::clone(&wingman) as Arc<dyn Uploader>,
        ];
        let parser = Arc::new(EliteInsights::new(
            parser_paths,
            parser_runner,
            Arc::clone(&settings),
            uploaders,
        ));

        Self {
            logs_directory,
            settings,
            store: LogStore::new(),
            parser,
            dps_report,
            wingman,
            watcher: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Production wiring: real HTTP clients, the system clipboard and the CLI runner.
    pub fn from_config(
        config: &PipelineConfig,
        settings: Arc<SettingsStore>,
    ) -> Result<Self, PipelineError> {
        let dps_report = Arc::new(DpsReportUploader::new(
            Arc::clone(&settings),
            Box::new(DpsReportClient::new()?),
            Box::new(SystemClipboard),
        ));
        let wingman = Arc::new(WingmanUploader::new(
            Arc::clone(&settings),
            Box::new(WingmanClient::new()?),
        ));

        Ok(Self::new(
            config.logs_directory.clone(),
            settings,
            config.tool_paths(),
            Box::new(ProcessToolRunner),
            dps_report,
            wingman,
        ))
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Records newest first.
    pub fn logs(&self) -> Vec<Arc<EncounterLog>> {
        self.store.snapshot()
    }

    pub fn log(&self, id: &str) -> Option<Arc<EncounterLog>> {
        self.store.get(id)
    }

    /// Forgets every record. Workers still holding one finish it first; its
    /// generated reports are removed once the last reference is gone.
    pub fn clear_logs(&self) {
        self.store.clear();
    }

    /// Inserts a detected recording and runs the automatic decisions for it.
    /// A recording that is already tracked is ignored.
    pub fn add_encounter_log(&self, evtc_data: EvtcData) -> Option<Arc<EncounterLog>> {
        let encounter_log = Arc::new(EncounterLog::new(evtc_data));
        if !self.store.insert(Arc::clone(&encounter_log)) {
            tracing::debug!(log_id = %encounter_log.id(), "Encounter log already tracked");
            return None;
        }

        tracing::info!(
            log_id = %encounter_log.id(),
            encounter = encounter_log.evtc_data().encounter_name(),
            "Added encounter log"
        );

        self.dps_report
            .process_auto_upload(&encounter_log, AutoUploadTrigger::Created);
        self.wingman
            .process_auto_upload(&encounter_log, AutoUploadTrigger::Created);
        self.parser.process_auto_parse(&encounter_log);

        Some(encounter_log)
    }

    pub fn queue_parse(&self, id: &str) -> Result<(), QueueError> {
        self.parser.queue_encounter_log(&self.require_log(id)?)
    }

    pub fn retry_parse(&self, id: &str) -> Result<(), QueueError> {
        self.parser.retry_parse(&self.require_log(id)?)
    }

    pub fn queue_dps_report(&self, id: &str) -> Result<(), QueueError> {
        self.dps_report.queue_upload(&self.require_log(id)?)
    }

    pub fn queue_wingman(&self, id: &str) -> Result<(), QueueError> {
        self.wingman.queue_upload(&self.require_log(id)?)
    }

    fn require_log(&self, id: &str) -> Result<Arc<EncounterLog>, QueueError> {
        self.store
            .get(id)
            .ok_or_else(|| QueueError::UnknownLog(id.to_string()))
    }

    /// Provisions the parser, starts every worker and begins watching for recordings.
    pub fn start(self: &Arc<Self>, catalog: &dyn ReleaseCatalog) {
        self.start_workers(catalog);
        self.start_watcher();
    }

    /// The parser only starts when a usable Elite Insights installation exists;
    /// otherwise parse requests are refused while uploads keep working.
    pub fn start_workers(&self, catalog: &dyn ReleaseCatalog) {
        let settings = self.settings.read(|settings| settings.elite_insights.clone());
        let mut workers = self.lock_workers();

        match provision(self.parser.paths(), catalog, &settings) {
            Ok(outcome) => {
                tracing::info!(?outcome, "Elite Insights ready");
                let parser = Arc::clone(&self.parser);
                workers.push(thread::spawn(move || parser.run()));
            }
            Err(error) => {
                tracing::error!("Elite Insights is unavailable, parsing disabled: {error}");
                self.parser.shutdown();
            }
        }

        let dps_report = Arc::clone(&self.dps_report);
        workers.push(thread::spawn(move || dps_report.run()));
        let wingman = Arc::clone(&self.wingman);
        workers.push(thread::spawn(move || wingman.run()));
    }

    pub fn start_watcher(self: &Arc<Self>) {
        let pipeline: Weak<Self> = Arc::downgrade(self);
        let started = LogWatcher::start(&self.logs_directory, move |evtc_data| {
            if let Some(pipeline) = pipeline.upgrade() {
                pipeline.add_encounter_log(evtc_data);
            }
        });

        match started {
            Ok(watcher) => *self.lock_watcher() = Some(watcher),
            Err(error) => tracing::error!("Failed to start log watcher: {error}"),
        }
    }

    /// Stops the watcher, wakes every worker and waits for all threads to exit.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down log uploader");

        if let Some(mut watcher) = self.lock_watcher().take() {
            watcher.stop();
        }

        self.parser.shutdown();
        self.dps_report.shutdown();
        self.wingman.shutdown();

        let workers = std::mem::take(&mut *self.lock_workers());
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }

    fn lock_watcher(&self) -> MutexGuard<'_, Option<LogWatcher>> {
        self.watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Default catalog for `Pipeline::start`, honoring the configured request timeout.
pub fn release_catalog(settings: &SettingsStore) -> Result<GithubReleaseCatalog, PipelineError> {
    let timeout = settings.read(|settings| settings.elite_insights.request_timeout());
    Ok(GithubReleaseCatalog::new(timeout)?)
}
