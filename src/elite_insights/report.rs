use std::path::Path;

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use crate::encounter_log::{EncounterData, EncounterDifficulty};

const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// The subset of the Elite Insights JSON report the uploader shows.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EliteInsightsReport {
    #[serde(rename = "triggerID", default)]
    trigger_id: u32,
    #[serde(default)]
    fight_name: String,
    #[serde(default)]
    recorded_account_by: String,
    #[serde(rename = "durationMS", default)]
    duration_ms: i64,
    #[serde(default)]
    success: bool,
    #[serde(rename = "isCM", default)]
    is_cm: bool,
    #[serde(rename = "isLegendaryCM", default)]
    is_legendary_cm: bool,
    #[serde(default)]
    time_start_std: Option<String>,
    #[serde(default)]
    time_end_std: Option<String>,
    #[serde(default)]
    targets: Vec<ReportTarget>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportTarget {
    #[serde(default)]
    id: u32,
    #[serde(default)]
    health_percent_burned: f64,
}

pub fn read_encounter_data(json_file_path: &Path) -> Result<EncounterData, String> {
    let raw_json = std::fs::read_to_string(json_file_path).map_err(|error| {
        format!(
            "Failed to open json file: {} ({error})",
            json_file_path.display()
        )
    })?;

    parse_encounter_data(&raw_json).map_err(|error| {
        format!(
            "Failed to parse json file: {} ({error})",
            json_file_path.display()
        )
    })
}

pub fn parse_encounter_data(raw_json: &str) -> Result<EncounterData, String> {
    let report: EliteInsightsReport =
        serde_json::from_str(raw_json).map_err(|error| error.to_string())?;

    let difficulty = if report.is_legendary_cm {
        EncounterDifficulty::LegendaryChallengeMode
    } else if report.is_cm {
        EncounterDifficulty::ChallengeMode
    } else {
        EncounterDifficulty::NormalMode
    };

    let primary_target = (report.trigger_id != 0)
        .then(|| {
            report
                .targets
                .iter()
                .find(|target| target.id == report.trigger_id)
        })
        .flatten();

    Ok(EncounterData {
        encounter_name: report.fight_name,
        account_name: report.recorded_account_by,
        duration_ms: report.duration_ms,
        success: report.success,
        valid_boss: primary_target.is_some(),
        health_percent_burned: primary_target
            .map(|target| target.health_percent_burned)
            .unwrap_or_default(),
        difficulty,
        start_time: parse_report_time(report.time_start_std.as_deref())?,
        end_time: parse_report_time(report.time_end_std.as_deref())?,
    })
}

fn parse_report_time(value: Option<&str>) -> Result<Option<DateTime<FixedOffset>>, String> {
    value
        .map(|value| {
            DateTime::parse_from_str(value, REPORT_TIME_FORMAT)
                .map_err(|error| format!("invalid time '{value}': {error}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DHUUM_REPORT: &str = r#"{
        "triggerID": 19450,
        "fightName": "Dhuum CM",
        "recordedAccountBy": "Player.1234",
        "durationMS": 301250,
        "success": false,
        "isCM": true,
        "isLegendaryCM": false,
        "timeStartStd": "2024-06-12 20:10:00 +02:00",
        "timeEndStd": "2024-06-12 20:15:01 +0200",
        "targets": [
            { "id": 19600, "healthPercentBurned": 100.0 },
            { "id": 19450, "healthPercentBurned": 87.5 }
        ],
        "players": []
    }"#;

    #[test]
    fn extracts_encounter_details() {
        let data = parse_encounter_data(DHUUM_REPORT).expect("parse report");

        assert_eq!(data.encounter_name, "Dhuum CM");
        assert_eq!(data.account_name, "Player.1234");
        assert_eq!(data.duration_ms, 301_250);
        assert!(!data.success);
        assert!(data.valid_boss);
        assert_eq!(data.health_percent_burned, 87.5);
        assert_eq!(data.difficulty, EncounterDifficulty::ChallengeMode);

        let end_time = data.end_time.expect("end time");
        assert_eq!(end_time.offset().local_minus_utc(), 2 * 3600);
        assert_eq!(end_time.format("%H:%M:%S").to_string(), "20:15:01");
        assert!(data.start_time.is_some());
    }

    #[test]
    fn legendary_flag_takes_precedence() {
        let data = parse_encounter_data(r#"{ "isCM": true, "isLegendaryCM": true }"#)
            .expect("parse report");
        assert_eq!(data.difficulty, EncounterDifficulty::LegendaryChallengeMode);
        assert!(!data.valid_boss);
        assert_eq!(data.start_time, None);
    }

    #[test]
    fn boss_health_requires_matching_target() {
        let data = parse_encounter_data(
            r#"{ "triggerID": 1, "targets": [{ "id": 2, "healthPercentBurned": 50.0 }] }"#,
        )
        .expect("parse report");
        assert!(!data.valid_boss);
        assert_eq!(data.health_percent_burned, 0.0);
    }

    #[test]
    fn shape_errors_are_reported() {
        assert!(parse_encounter_data(r#"{ "durationMS": "long" }"#).is_err());
        assert!(parse_encounter_data(r#"{ "timeEndStd": "yesterday" }"#)
            .expect_err("bad time")
            .contains("invalid time"));
    }
}
