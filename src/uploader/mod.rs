pub mod dps_report;
pub mod wingman;

use std::sync::Arc;

use crate::encounter_log::EncounterLog;
use crate::evtc::TriggerId;
use crate::work_queue::QueueError;

pub use dps_report::{DpsReportApi, DpsReportClient, DpsReportRequest, DpsReportUploader};
pub use wingman::{WingmanApi, WingmanClient, WingmanUploader};

/// Point in a record's life at which automatic uploads are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoUploadTrigger {
    /// The record was just detected and inserted.
    Created,
    /// Elite Insights finished parsing the record successfully.
    Parsed,
}

/// An upload backend with its own queue and worker loop.
pub trait Uploader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Manual request from the user.
    fn queue_upload(&self, encounter_log: &Arc<EncounterLog>) -> Result<(), QueueError>;

    /// Applies the configured auto-upload rules and queues the record when they match.
    fn process_auto_upload(&self, encounter_log: &Arc<EncounterLog>, trigger: AutoUploadTrigger);

    /// Worker loop; returns once `shutdown` is called.
    fn run(&self);

    fn shutdown(&self);
}

/// Status code and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

pub(crate) fn is_in_allow_list(encounters: &[TriggerId], trigger_id: TriggerId) -> bool {
    encounters.contains(&trigger_id)
}

pub(crate) fn read_reply(response: reqwest::blocking::Response) -> Result<HttpReply, String> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .map_err(|error| format!("Failed to read response: {error}"))?;
    Ok(HttpReply { status, body })
}
