use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::evtc::{self, EvtcData};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("logs directory '{0}' does not exist")]
    MissingDirectory(PathBuf),
    #[error("failed to watch logs directory: {0}")]
    Notify(#[from] notify::Error),
}

/// How long a new recording may stay locked by its writer before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolling {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for ReadinessPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            attempts: 100,
        }
    }
}

enum WatcherMessage {
    Notification(notify::Result<Event>),
    Stop,
}

/// Watches the arcdps logs directory for finished recordings.
///
/// arcdps writes a recording under a temporary name and renames it into place
/// once complete, so only rename targets with a recording extension count.
pub struct LogWatcher {
    message_tx: mpsc::Sender<WatcherMessage>,
    stop_requested: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LogWatcher {
    pub fn start<F>(directory: &Path, on_recording: F) -> Result<Self, WatchError>
    where
        F: Fn(EvtcData) + Send + 'static,
    {
        Self::start_with_polling(directory, ReadinessPolling::default(), on_recording)
    }

    pub fn start_with_polling<F>(
        directory: &Path,
        polling: ReadinessPolling,
        on_recording: F,
    ) -> Result<Self, WatchError>
    where
        F: Fn(EvtcData) + Send + 'static,
    {
        if !directory.is_dir() {
            return Err(WatchError::MissingDirectory(directory.to_path_buf()));
        }

        let (message_tx, message_rx) = mpsc::channel::<WatcherMessage>();
        let notification_tx = message_tx.clone();
        let mut watcher = notify::recommended_watcher(move |result| {
            if notification_tx
                .send(WatcherMessage::Notification(result))
                .is_err()
            {
                tracing::debug!("Log watcher notification receiver dropped");
            }
        })?;
        watcher.watch(directory, RecursiveMode::Recursive)?;

        tracing::info!(directory = %directory.display(), "Watching logs directory");

        let stop_requested = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop_requested = Arc::clone(&stop_requested);
            thread::spawn(move || {
                watch_loop(watcher, message_rx, &stop_requested, polling, on_recording)
            })
        };

        Ok(Self {
            message_tx,
            stop_requested,
            thread: Some(thread),
        })
    }

    /// Interrupts any pending wait and joins the watcher thread.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.message_tx.send(WatcherMessage::Stop);
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::error!("Log watcher thread panicked");
        }
    }
}

impl Drop for LogWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_loop<F>(
    _watcher: RecommendedWatcher,
    message_rx: mpsc::Receiver<WatcherMessage>,
    stop_requested: &AtomicBool,
    polling: ReadinessPolling,
    on_recording: F,
) where
    F: Fn(EvtcData),
{
    while let Ok(message) = message_rx.recv() {
        let event = match message {
            WatcherMessage::Stop => break,
            WatcherMessage::Notification(Ok(event)) => event,
            WatcherMessage::Notification(Err(error)) => {
                tracing::warn!("Log watcher error: {error}");
                continue;
            }
        };

        let Some(path) = renamed_recording_path(&event) else {
            continue;
        };

        if !wait_until_readable(path, polling, stop_requested) {
            if stop_requested.load(Ordering::SeqCst) {
                break;
            }
            tracing::warn!(path = %path.display(), "Recording never became readable, skipping");
            continue;
        }

        match evtc::parse(path) {
            Ok(evtc_data) if evtc_data.is_valid() => {
                tracing::info!(
                    path = %path.display(),
                    trigger_id = evtc_data.trigger_id,
                    "Detected new recording"
                );
                on_recording(evtc_data);
            }
            Ok(_) => {
                tracing::info!(path = %path.display(), "Ignoring recording without encounter");
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), "Failed to read recording: {error}");
            }
        }
    }

    tracing::info!("Log watcher stopped");
}

/// The final path of a rename into the watched tree, when it names a recording.
fn renamed_recording_path(event: &Event) -> Option<&Path> {
    let path = match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.last()?,
        // Backends that cannot tell the rename sides apart report both paths.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.iter().rev().find(|path| path.exists())?
        }
        _ => return None,
    };

    evtc::is_recording_file(path).then_some(path.as_path())
}

fn wait_until_readable(path: &Path, polling: ReadinessPolling, stop_requested: &AtomicBool) -> bool {
    for attempt in 0..polling.attempts {
        if stop_requested.load(Ordering::SeqCst) {
            return false;
        }
        match OpenOptions::new().read(true).open(path) {
            Ok(_) => return true,
            Err(error) => {
                tracing::trace!(path = %path.display(), attempt, "Recording not readable yet: {error}");
            }
        }
        thread::sleep(polling.interval);
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evtc::tests::{build_header, write_zevtc};
    use std::time::Instant;

    fn rename_event(mode: RenameMode, paths: &[&Path]) -> Event {
        paths.iter().fold(
            Event::new(EventKind::Modify(ModifyKind::Name(mode))),
            |event, path| event.add_path(path.to_path_buf()),
        )
    }

    #[test]
    fn only_rename_targets_with_recording_extensions_count() {
        let target = Path::new("/logs/arcdps.cbtlogs/1.zevtc");
        let temporary = Path::new("/logs/arcdps.cbtlogs/1.tmp");

        assert_eq!(
            renamed_recording_path(&rename_event(RenameMode::To, &[target])),
            Some(target)
        );
        assert_eq!(
            renamed_recording_path(&rename_event(RenameMode::From, &[target])),
            None
        );
        assert_eq!(
            renamed_recording_path(&rename_event(RenameMode::Both, &[temporary, target])),
            None
        );
        assert_eq!(
            renamed_recording_path(&rename_event(RenameMode::To, &[temporary])),
            None
        );

        let created = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(target.to_path_buf());
        assert_eq!(renamed_recording_path(&created), None);
    }

    #[test]
    fn readiness_wait_is_bounded_and_interruptible() {
        let polling = ReadinessPolling {
            interval: Duration::from_millis(5),
            attempts: 3,
        };
        let stop_requested = AtomicBool::new(false);
        let directory = tempfile::tempdir().expect("tempdir");
        let existing = directory.path().join("1.evtc");
        std::fs::write(&existing, build_header(19450)).expect("write evtc");

        assert!(wait_until_readable(&existing, polling, &stop_requested));
        assert!(!wait_until_readable(
            &directory.path().join("missing.evtc"),
            polling,
            &stop_requested
        ));

        stop_requested.store(true, Ordering::SeqCst);
        assert!(!wait_until_readable(&existing, polling, &stop_requested));
    }

    #[test]
    fn missing_directory_fails_fast() {
        let directory = tempfile::tempdir().expect("tempdir");
        let result = LogWatcher::start(&directory.path().join("missing"), |_| {});
        assert!(matches!(result, Err(WatchError::MissingDirectory(_))));
    }

    #[test]
    fn reports_recordings_renamed_into_place() {
        let directory = tempfile::tempdir().expect("tempdir");
        let logs_directory = directory.path().join("arcdps.cbtlogs").join("Dhuum");
        std::fs::create_dir_all(&logs_directory).expect("create logs dir");

        let (recording_tx, recording_rx) = mpsc::channel();
        let mut watcher = LogWatcher::start(directory.path(), move |evtc_data| {
            let _ = recording_tx.send(evtc_data);
        })
        .expect("start watcher");

        let ignored = logs_directory.join("ignored.tmp");
        std::fs::write(&ignored, b"x").expect("write ignored");
        std::fs::rename(&ignored, logs_directory.join("ignored.txt")).expect("rename ignored");

        let no_encounter = logs_directory.join("0.tmp");
        write_zevtc(&no_encounter, 0);
        std::fs::rename(&no_encounter, logs_directory.join("0.zevtc")).expect("rename zero");

        let corrupt = logs_directory.join("corrupt.tmp");
        std::fs::write(&corrupt, b"PK\x03\x04 not a recording").expect("write corrupt");
        std::fs::rename(&corrupt, logs_directory.join("corrupt.zevtc")).expect("rename corrupt");

        let temporary = logs_directory.join("1.tmp");
        write_zevtc(&temporary, 19450);
        let recording = logs_directory.join("1.zevtc");
        std::fs::rename(&temporary, &recording).expect("rename recording");

        let evtc_data = recording_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("recording event");
        assert_eq!(evtc_data.trigger_id, 19450);
        assert_eq!(evtc_data.evtc_file_path.file_name(), recording.file_name());

        let started_at = Instant::now();
        watcher.stop();
        assert!(started_at.elapsed() < Duration::from_secs(5));
        assert!(recording_rx.try_recv().is_err());
    }
}
