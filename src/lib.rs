pub mod clipboard;
pub mod elite_insights;
pub mod encounter_log;
pub mod evtc;
pub mod log_watcher;
pub mod pipeline;
pub mod settings;
pub mod uploader;
mod work_queue;

pub use pipeline::{release_catalog, Pipeline, PipelineConfig, PipelineError};
pub use work_queue::QueueError;

pub(crate) const USER_AGENT: &str = concat!("log-uploader/", env!("CARGO_PKG_VERSION"));
