use std::io::Write;
use std::process::{Command, Stdio};

/// Destination for a freshly uploaded permalink.
pub trait ClipboardSink: Send + Sync {
    fn copy_text(&self, text: &str) -> Result<(), String>;
}

/// Pipes text into the platform clipboard utility.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl ClipboardSink for SystemClipboard {
    fn copy_text(&self, text: &str) -> Result<(), String> {
        let mut last_error = String::from("no clipboard command available");

        for (program, args) in clipboard_commands() {
            match pipe_to_command(program, args, text) {
                Ok(()) => return Ok(()),
                Err(error) => {
                    tracing::debug!(program, "Clipboard command failed: {error}");
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }
}

fn clipboard_commands() -> &'static [(&'static str, &'static [&'static str])] {
    if cfg!(target_os = "windows") {
        &[("clip", &[])]
    } else if cfg!(target_os = "macos") {
        &[("pbcopy", &[])]
    } else {
        &[
            ("wl-copy", &[]),
            ("xclip", &["-selection", "clipboard"]),
            ("xsel", &["--clipboard", "--input"]),
        ]
    }
}

fn pipe_to_command(program: &str, args: &[&str], text: &str) -> Result<(), String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|error| format!("Failed to start {program}: {error}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .map_err(|error| format!("Failed to write to {program}: {error}"))?;
    }

    let status = child
        .wait()
        .map_err(|error| format!("Failed to wait for {program}: {error}"))?;
    if !status.success() {
        return Err(format!("{program} exited with status {status}"));
    }

    Ok(())
}
