use std::io::{BufRead, BufReader, Read};
#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `<executable> -c <config_file> <input_file>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub executable: PathBuf,
    pub config_file: PathBuf,
    pub input_file: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRunOutcome {
    /// The process exited on its own; stdout and stderr merged in arrival order.
    Completed { output: String },
    /// The process outlived the timeout and was killed.
    TimedOut { pid: u32 },
}

pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolRunOutcome, String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessToolRunner;

impl ToolRunner for ProcessToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolRunOutcome, String> {
        let mut command = Command::new(&invocation.executable);
        #[cfg(target_os = "windows")]
        command.creation_flags(CREATE_NO_WINDOW);
        command
            .arg("-c")
            .arg(&invocation.config_file)
            .arg(&invocation.input_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|error| format!("Failed to start Elite Insights: {error}"))?;
        let pid = child.id();

        tracing::debug!(
            pid,
            executable = %invocation.executable.display(),
            input_file = %invocation.input_file.display(),
            "Started Elite Insights"
        );

        let (line_tx, line_rx) = mpsc::channel::<String>();
        let mut reader_threads = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            reader_threads.push(spawn_line_reader(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            reader_threads.push(spawn_line_reader(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let started_at = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(pid, %status, "Elite Insights exited");
                    break;
                }
                Ok(None) => {}
                Err(error) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("Failed to wait for Elite Insights: {error}"));
                }
            }

            if started_at.elapsed() >= invocation.timeout {
                if let Err(error) = child.kill() {
                    tracing::warn!(pid, "Failed to kill Elite Insights: {error}");
                }
                let _ = child.wait();
                return Ok(ToolRunOutcome::TimedOut { pid });
            }

            thread::sleep(EXIT_POLL_INTERVAL);
        }

        for reader_thread in reader_threads {
            let _ = reader_thread.join();
        }

        let output = line_rx.into_iter().collect::<Vec<_>>().join("\n");
        Ok(ToolRunOutcome::Completed { output })
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(
    stream: R,
    line_tx: mpsc::Sender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    tracing::warn!("Failed to read Elite Insights output: {error}");
                    break;
                }
            }
        }
    })
}
