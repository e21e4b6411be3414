use crate::progress::strip_control_sequences;
use crate::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const LOG_MAX_BACKUPS: usize = 3;

/// Append-only JSON-lines audit log. Every string written is stripped of
/// control sequences first.
#[derive(Debug, Clone)]
pub struct LogSink {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl LogSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logs and swallows any failure; logging never blocks the caller's action.
    pub fn log(&self, level: &str, event: &str, data: serde_json::Value) {
        if let Err(err) = self.try_log(level, event, data) {
            tracing::warn!(path = %self.path.display(), %err, event, "failed to write log line");
        }
    }

    pub fn info(&self, event: &str, data: serde_json::Value) {
        self.log("info", event, data);
    }

    pub fn warn(&self, event: &str, data: serde_json::Value) {
        self.log("warn", event, data);
    }

    pub fn try_log(&self, level: &str, event: &str, data: serde_json::Value) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "level": level,
            "event": strip_control_sequences(event),
            "data": scrub(data),
        })
        .to_string();

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rotate_log_if_needed(&self.path)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }
}

/// `scheme://host/...`; paths and query strings stay out of the log.
pub fn redact_url_for_log(value: &str) -> String {
    match Url::parse(value) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("unknown-host");
            match url.port() {
                Some(port) => format!("{}://{host}:{port}/...", url.scheme()),
                None => format!("{}://{host}/...", url.scheme()),
            }
        }
        Err(_) => "[invalid-url]".to_string(),
    }
}

fn scrub(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(strip_control_sequences(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(scrub).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (strip_control_sequences(&k), scrub(v)))
                .collect(),
        ),
        other => other,
    }
}

fn rotate_log_if_needed(path: &Path) -> std::io::Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };
    if len < LOG_ROTATE_BYTES {
        return Ok(());
    }
    rotate_file_backups(path, LOG_MAX_BACKUPS)
}

fn rotate_file_backups(path: &Path, max_backups: usize) -> std::io::Result<()> {
    for i in (1..=max_backups).rev() {
        let dst = path_with_suffix(path, &format!(".{i}"));
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            path_with_suffix(path, &format!(".{}", i - 1))
        };

        if !src.exists() {
            continue;
        }
        if dst.exists() {
            let _ = std::fs::remove_file(&dst);
        }
        std::fs::rename(src, dst)?;
    }
    Ok(())
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_string(),
        None => suffix.to_string(),
    };
    path.with_file_name(format!("{file_name}{suffix}"))
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
