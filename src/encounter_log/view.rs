use chrono::{DateTime, Local, TimeZone};

use super::model::{EncounterLogData, ParseStatus};
use crate::evtc::EvtcData;

impl EncounterLogData {
    /// Recomputes the display strings from the header data or, once parsed,
    /// from the report. Other parse states keep the previous view.
    pub(crate) fn update_view(&mut self, evtc_data: &EvtcData) {
        match self.parse_status {
            ParseStatus::Unparsed => {
                self.view.time = format_local_time(&evtc_data.time);
                self.view.name = evtc_data.encounter_name().to_string();
            }
            ParseStatus::Parsed => {
                let encounter = &self.encounter_data;
                if let Some(end_time) = &encounter.end_time {
                    self.view.time = format_local_time(end_time);
                }
                self.view.name = encounter.encounter_name.clone();
                self.view.result = format_result(
                    encounter.success,
                    encounter.valid_boss,
                    encounter.health_percent_burned,
                );
                self.view.duration = format_duration(encounter.duration_ms);
            }
            ParseStatus::Queued | ParseStatus::Parsing | ParseStatus::Failed => {}
        }
    }
}

fn format_local_time<Tz: TimeZone>(time: &DateTime<Tz>) -> String {
    time.with_timezone(&Local).format("%H:%M").to_string()
}

pub(crate) fn format_result(success: bool, valid_boss: bool, health_percent_burned: f64) -> String {
    if success {
        return "Success".to_string();
    }

    if valid_boss {
        return format!("{:.2}%", 100.0 - health_percent_burned);
    }

    "Failure".to_string()
}

pub(crate) fn format_duration(duration_ms: i64) -> String {
    let duration_ms = duration_ms.max(0);
    let minutes = duration_ms / 60_000;
    let seconds = (duration_ms / 1000) % 60;
    let milliseconds = duration_ms % 1000;

    if minutes > 0 {
        format!("{minutes}m {seconds}s {milliseconds}ms")
    } else {
        format!("{seconds}s {milliseconds}ms")
    }
}
