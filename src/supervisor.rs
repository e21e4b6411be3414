//! Lifecycle of the single yt-dlp child process.
//!
//! `start` validates everything, spawns, and returns at once. Two reader
//! threads split the child's stdout and stderr into lines and send them over
//! one channel; a pump thread applies each line to the shared
//! [`ProgressState`] under the lock, in arrival order, and polls the child for
//! exit on its own schedule. Output still in flight is drained for a short
//! while after exit, so a helper that keeps the pipes open cannot hold the
//! attempt open. The child stays in the shared state until reaped.
//! Every attempt carries its own id so stragglers from an earlier child never
//! touch a later attempt's state.

use crate::log_sink::{redact_url_for_log, LogSink};
use crate::path_guard::{self, SandboxRoot};
use crate::progress::{self, ProgressState};
use crate::sites::SitePolicy;
use crate::{cmd, EngineError, Result};
use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::Child;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Filenames are the title cut to 200 bytes plus the extension.
pub const OUTPUT_TEMPLATE: &str = "%(title).200B.%(ext)s";

const EXIT_POLL_INTERVAL_MS: u64 = 200;
const CANCEL_POLL_INTERVAL_MS: u64 = 50;
#[cfg(unix)]
const CANCEL_GRACE: Duration = Duration::from_secs(2);
#[cfg(not(unix))]
const CANCEL_GRACE: Duration = Duration::ZERO;
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);
const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Default)]
struct Shared {
    progress: ProgressState,
    child: Option<Child>,
    attempt: Option<Uuid>,
    /// Set while `cancel` waits out the grace period.
    terminating: bool,
}

impl Shared {
    fn release_child(&mut self) -> Option<Child> {
        self.terminating = false;
        self.child.take()
    }
}

enum ExitPoll {
    Running,
    Exited(Option<i32>),
    Superseded,
}

#[derive(Debug)]
pub struct DownloadSupervisor {
    shared: Arc<Mutex<Shared>>,
    sink: LogSink,
}

/// The complete argument list. The URL is the only free-form value.
pub fn download_args(sandbox: &Path, url: &str) -> Vec<OsString> {
    vec![
        OsString::from("--restrict-filenames"),
        OsString::from("-o"),
        OsString::from(OUTPUT_TEMPLATE),
        OsString::from("-P"),
        sandbox.as_os_str().to_os_string(),
        OsString::from(url),
    ]
}

impl DownloadSupervisor {
    pub fn new(sink: LogSink) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            sink,
        }
    }

    pub fn progress(&self) -> ProgressState {
        lock(&self.shared).progress.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared).child.is_some()
    }

    /// Validates and spawns. Fails with no side effects while a child runs or
    /// when any check fails.
    pub fn start(
        &self,
        binary: &Path,
        url: &str,
        site: SitePolicy,
        sandbox: &SandboxRoot,
    ) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.child.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        path_guard::check_binary(binary)?;
        if !site.validate(url) {
            return Err(EngineError::InvalidUrl {
                site: site.name().to_string(),
                url: url.to_string(),
            });
        }
        recheck_sandbox(sandbox)?;

        let attempt = Uuid::new_v4();
        let mut command = cmd::command(binary);
        command.args(download_args(sandbox.path(), url));

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                let mut failed = ProgressState::resolving();
                failed.mark_failed(err.to_string());
                shared.progress = failed;
                shared.attempt = Some(attempt);
                drop(shared);
                tracing::warn!(binary = %binary.display(), %err, "yt-dlp spawn failed");
                self.sink.warn(
                    "download_failed",
                    serde_json::json!({
                        "download_id": attempt.to_string(),
                        "error": err.to_string(),
                    }),
                );
                return Err(EngineError::SpawnFailure(err));
            }
        };

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx.clone());
        }
        drop(tx);

        shared.progress = ProgressState::resolving();
        shared.child = Some(child);
        shared.attempt = Some(attempt);
        shared.terminating = false;
        drop(shared);

        tracing::info!(download_id = %attempt, "download started");
        self.sink.info(
            "download_started",
            serde_json::json!({
                "download_id": attempt.to_string(),
                "url": redact_url_for_log(url),
                "destination": sandbox.path().to_string_lossy(),
            }),
        );

        let shared = Arc::clone(&self.shared);
        let sink = self.sink.clone();
        thread::spawn(move || pump(shared, sink, attempt, rx));
        Ok(())
    }

    /// Terminates the running child, escalating to a kill after a short
    /// grace period. The child counts as running until it is reaped. Returns
    /// false (and does nothing) when idle or already being cancelled.
    pub fn cancel(&self) -> bool {
        let attempt = {
            let mut shared = lock(&self.shared);
            if shared.terminating {
                return false;
            }
            let Some(child) = shared.child.as_ref() else {
                return false;
            };
            cmd::request_terminate(child);
            shared.terminating = true;
            shared.progress.mark_cancelled();
            shared.attempt
        };

        let deadline = Instant::now() + CANCEL_GRACE;
        loop {
            {
                let mut shared = lock(&self.shared);
                if shared.attempt != attempt {
                    break;
                }
                let Some(child) = shared.child.as_mut() else {
                    break;
                };
                match child.try_wait() {
                    Ok(Some(_)) => {
                        shared.release_child();
                        break;
                    }
                    Ok(None) if Instant::now() < deadline => {}
                    _ => {
                        tracing::debug!("child ignored terminate; killing");
                        if let Some(mut child) = shared.release_child() {
                            cmd::kill_child_process_tree(&mut child);
                        }
                        break;
                    }
                }
            }
            thread::sleep(Duration::from_millis(CANCEL_POLL_INTERVAL_MS));
        }

        self.sink.info(
            "download_cancelled",
            serde_json::json!({ "download_id": attempt.map(|a| a.to_string()) }),
        );
        true
    }

    /// Back to `Idle`, unless a child is still running.
    pub fn reset(&self) -> bool {
        let mut shared = lock(&self.shared);
        if shared.child.is_some() {
            return false;
        }
        shared.progress = ProgressState::default();
        shared.attempt = None;
        true
    }

    /// Polls until the current attempt has finished or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> ProgressState {
        let started = Instant::now();
        loop {
            let state = self.progress();
            if state.phase.is_finished() || started.elapsed() >= timeout {
                return state;
            }
            thread::sleep(Duration::from_millis(CANCEL_POLL_INTERVAL_MS));
        }
    }
}

impl Drop for DownloadSupervisor {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|p| p.into_inner())
}

/// The root was vetted at startup; make sure nobody swapped it since.
fn recheck_sandbox(sandbox: &SandboxRoot) -> Result<()> {
    let root = sandbox.path();
    let is_symlink = std::fs::symlink_metadata(root)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if is_symlink {
        return Err(EngineError::SandboxEscape(format!(
            "sandbox directory became a symlink: {}",
            root.display()
        )));
    }
    let resolved = path_guard::canonicalize(root);
    if resolved != root || !path_guard::is_contained(root, &resolved) {
        return Err(EngineError::SandboxEscape(format!(
            "resolved path escapes sandbox: {}",
            resolved.display()
        )));
    }
    Ok(())
}

fn spawn_reader(mut reader: impl Read + Send + 'static, tx: Sender<String>) {
    thread::spawn(move || {
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0_u8; READ_CHUNK_BYTES];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            for &byte in &buf[..n] {
                if byte == b'\n' || byte == b'\r' {
                    if !pending.is_empty() {
                        let line = String::from_utf8_lossy(&pending).into_owned();
                        pending.clear();
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                } else {
                    pending.push(byte);
                }
            }
        }
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
        }
    });
}

fn pump(shared: Arc<Mutex<Shared>>, sink: LogSink, attempt: Uuid, rx: Receiver<String>) {
    let download_id = attempt.to_string();
    let poll_interval = Duration::from_millis(EXIT_POLL_INTERVAL_MS);
    let mut readers_done = false;
    let mut exited: Option<(Option<i32>, Instant)> = None;

    loop {
        if !readers_done {
            match rx.recv_timeout(poll_interval) {
                Ok(raw) => {
                    if !apply_output(&shared, &sink, attempt, &download_id, &raw) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => readers_done = true,
            }
        } else if exited.is_none() {
            thread::sleep(poll_interval);
        }

        if exited.is_none() {
            match poll_exit(&shared, &sink, attempt, &download_id) {
                ExitPoll::Running => {}
                ExitPoll::Exited(code) => exited = Some((code, Instant::now())),
                ExitPoll::Superseded => return,
            }
        }

        if let Some((code, at)) = exited {
            if readers_done || at.elapsed() >= OUTPUT_DRAIN {
                finish(&shared, &sink, attempt, &download_id, code);
                return;
            }
        }
    }
}

/// Applies one raw line; false once the attempt is no longer current.
fn apply_output(
    shared: &Mutex<Shared>,
    sink: &LogSink,
    attempt: Uuid,
    download_id: &str,
    raw: &str,
) -> bool {
    let cleaned = {
        let mut guard = lock(shared);
        if guard.attempt != Some(attempt) {
            return false;
        }
        progress::interpret_chunk(&mut guard.progress, raw)
    };
    for line in cleaned {
        tracing::debug!(download_id = %download_id, "{line}");
        sink.info(
            "child_output",
            serde_json::json!({ "download_id": download_id, "line": line }),
        );
    }
    true
}

/// Checks for exit without reaping from the shared state; `cancel` may be
/// waiting on the same child.
fn poll_exit(shared: &Mutex<Shared>, sink: &LogSink, attempt: Uuid, download_id: &str) -> ExitPoll {
    let mut guard = lock(shared);
    if guard.attempt != Some(attempt) {
        return ExitPoll::Superseded;
    }
    let Some(child) = guard.child.as_mut() else {
        return ExitPoll::Superseded;
    };
    match child.try_wait() {
        Ok(Some(status)) => ExitPoll::Exited(status.code()),
        Ok(None) => ExitPoll::Running,
        Err(err) => {
            if let Some(mut child) = guard.release_child() {
                cmd::kill_child_process_tree(&mut child);
            }
            guard.progress.mark_failed(err.to_string());
            drop(guard);
            sink.warn(
                "download_failed",
                serde_json::json!({ "download_id": download_id, "error": err.to_string() }),
            );
            ExitPoll::Superseded
        }
    }
}

fn finish(
    shared: &Mutex<Shared>,
    sink: &LogSink,
    attempt: Uuid,
    download_id: &str,
    code: Option<i32>,
) {
    let mut guard = lock(shared);
    if guard.attempt != Some(attempt) || guard.child.is_none() {
        return;
    }
    guard.release_child();
    guard.progress.mark_exited(code);
    drop(guard);
    tracing::info!(download_id = %download_id, ?code, "download finished");
    sink.info(
        "download_finished",
        serde_json::json!({ "download_id": download_id, "exit_code": code }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Phase;
    use crate::sites::Site;

    fn sandbox(dir: &Path) -> SandboxRoot {
        path_guard::init_sandbox(&dir.join("sandbox")).expect("sandbox")
    }

    #[test]
    fn argument_list_has_fixed_shape() {
        let args = download_args(Path::new("/home/u/Videos/yt-dlp-gui"), "https://youtu.be/x");
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--restrict-filenames",
                "-o",
                "%(title).200B.%(ext)s",
                "-P",
                "/home/u/Videos/yt-dlp-gui",
                "https://youtu.be/x",
            ]
        );
    }

    #[test]
    fn start_with_missing_binary_is_invalid_binary_and_leaves_idle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = sandbox(dir.path());
        let sup = DownloadSupervisor::new(LogSink::new(dir.path().join("log")));

        let err = sup
            .start(
                &dir.path().join("yt-dlp"),
                "https://youtu.be/x",
                SitePolicy::Site(Site::YouTube),
                &root,
            )
            .expect_err("must fail");
        assert!(matches!(err, EngineError::InvalidBinary { .. }));
        assert!(!sup.is_running());
        assert_eq!(sup.progress().phase, Phase::Idle);
    }

    #[test]
    fn cancel_and_reset_when_idle_are_no_ops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sup = DownloadSupervisor::new(LogSink::new(dir.path().join("log")));
        assert!(!sup.cancel());
        assert!(!sup.cancel());
        assert!(sup.reset());
        assert_eq!(sup.progress(), ProgressState::default());
    }

    /// Serves scripted reads, then EOF.
    struct ScriptedReader(std::collections::VecDeque<std::io::Result<Vec<u8>>>);

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(err)) => Err(err),
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
            }
        }
    }

    #[test]
    fn reader_retries_interrupted_reads() {
        use std::io::{Error, ErrorKind};
        let reads = vec![
            Ok(b"[download] Destination: a.mp4\n".to_vec()),
            Err(Error::from(ErrorKind::Interrupted)),
            Ok(b"[download]  50.0% of 2.00MiB\r".to_vec()),
            Err(Error::from(ErrorKind::Interrupted)),
            Ok(b"tail".to_vec()),
        ];
        let (tx, rx) = mpsc::channel();
        spawn_reader(ScriptedReader(reads.into_iter().collect()), tx);

        let lines: Vec<String> = rx.iter().collect();
        assert_eq!(
            lines,
            vec![
                "[download] Destination: a.mp4",
                "[download]  50.0% of 2.00MiB",
                "tail",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn swapped_sandbox_is_rejected_before_spawn() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = sandbox(dir.path());
        let elsewhere = dir.path().join("elsewhere");
        std::fs::create_dir(&elsewhere).expect("mkdir");
        std::fs::remove_dir(root.path()).expect("rmdir");
        std::os::unix::fs::symlink(&elsewhere, root.path()).expect("symlink");

        let err = recheck_sandbox(&root).expect_err("swapped root");
        assert!(matches!(err, EngineError::SandboxEscape(_)));
        assert!(err.is_security());
        assert!(!err.is_fatal());
    }
}
