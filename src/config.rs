use crate::log_sink::LogSink;
use crate::paths::AppPaths;
use crate::sites::SitePolicy;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Policy state persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    #[serde(default, alias = "sandbox_dir", skip_serializing_if = "Option::is_none")]
    pub sandbox_dir: Option<String>,
    #[serde(default = "default_selected_site", alias = "selected_site")]
    pub selected_site: String,
}

impl Default for PersistedConfig {
    fn default() -> Self {
        Self {
            binary: None,
            sandbox_dir: None,
            selected_site: default_selected_site(),
        }
    }
}

fn default_selected_site() -> String {
    SitePolicy::default().name().to_string()
}

impl PersistedConfig {
    /// Stored site, or the default site when the stored name is unknown.
    pub fn site_policy(&self) -> SitePolicy {
        SitePolicy::from_name(&self.selected_site).unwrap_or_default()
    }

    fn normalized(mut self) -> Self {
        self.binary = self.binary.filter(|b| !b.trim().is_empty());
        self.sandbox_dir = self.sandbox_dir.filter(|d| !d.trim().is_empty());
        if self.selected_site.trim().is_empty() {
            self.selected_site = default_selected_site();
        }
        self
    }
}

pub fn load_config(paths: &AppPaths) -> Result<PersistedConfig> {
    let path = paths.config_path();
    if !path.exists() {
        return Ok(PersistedConfig::default());
    }
    let bytes = std::fs::read(&path).map_err(|e| {
        EngineError::ConfigIo(format!("failed to read {}: {e}", path.to_string_lossy()))
    })?;
    let parsed: PersistedConfig = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::ConfigIo(format!("failed to parse {}: {e}", path.to_string_lossy()))
    })?;
    Ok(parsed.normalized())
}

/// Loads the config, falling back to defaults on any failure. The failure is
/// logged, never surfaced.
pub fn load_config_or_default(paths: &AppPaths, sink: &LogSink) -> PersistedConfig {
    match load_config(paths) {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!(%err, "using default config");
            sink.warn(
                "config_load_failed",
                serde_json::json!({ "error": err.to_string() }),
            );
            PersistedConfig::default()
        }
    }
}

pub fn save_config(paths: &AppPaths, config: &PersistedConfig) -> Result<()> {
    let path = paths.config_path();
    let io_err = |e: std::io::Error| {
        EngineError::ConfigIo(format!("failed to write {}: {e}", path.to_string_lossy()))
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let tmp_path = path.with_extension("json.part");
    std::fs::write(&tmp_path, format!("{json}\n")).map_err(io_err)?;
    std::fs::rename(&tmp_path, &path).map_err(io_err)?;
    Ok(())
}

/// Saves the config; a failure is logged and the calling action proceeds.
pub fn save_config_or_log(paths: &AppPaths, config: &PersistedConfig, sink: &LogSink) {
    if let Err(err) = save_config(paths, config) {
        tracing::warn!(%err, "config not saved");
        sink.warn(
            "config_save_failed",
            serde_json::json!({ "error": err.to_string() }),
        );
    }
}
