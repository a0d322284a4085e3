use std::path::PathBuf;

use regex::Regex;

pub const SUCCESS_MARKER: &str = "Parsing Successful";
pub const FAILURE_MARKER: &str = "Parsing Failure";

lazy_static::lazy_static! {
    static ref JSON_REPORT: Regex = Regex::new(r"Generated:\s*(.+\.json)\s*").expect("valid regex");
    static ref HTML_REPORT: Regex = Regex::new(r"Generated:\s*(.+\.html)\s*").expect("valid regex");
    static ref FAILURE_REASON: Regex =
        Regex::new(r"Parsing Failure - .*?: .*?: (.+)").expect("valid regex");
}

/// What a finished Elite Insights run printed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub json_file_path: Option<PathBuf>,
    pub html_file_path: Option<PathBuf>,
    /// Success marker present and failure marker absent.
    pub succeeded: bool,
    pub failure_message: Option<String>,
}

pub fn scan_output(output: &str) -> ToolOutput {
    let generated_path = |pattern: &Regex| {
        pattern
            .captures(output)
            .and_then(|captures| captures.get(1))
            .map(|path| PathBuf::from(path.as_str().trim()))
    };

    let failure_message = FAILURE_REASON
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|reason| format!("Parsing failed: {}", reason.as_str().trim()));

    ToolOutput {
        json_file_path: generated_path(&JSON_REPORT),
        html_file_path: generated_path(&HTML_REPORT),
        succeeded: output.contains(SUCCESS_MARKER) && !output.contains(FAILURE_MARKER),
        failure_message,
    }
}
