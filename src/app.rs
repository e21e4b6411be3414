//! Entry points for a presentation layer. Nothing here trusts earlier checks:
//! every call validates again.

use crate::config::{self, PersistedConfig};
use crate::log_sink::{redact_url_for_log, LogSink};
use crate::path_guard::{self, SandboxRoot};
use crate::paths::AppPaths;
use crate::progress::ProgressState;
use crate::sites::{self, SitePolicy};
use crate::supervisor::DownloadSupervisor;
use crate::{EngineError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ABOUT_TEXT: &str = "iSnick Downloader v0.0.1\n\n\
A program to download media for offline use.\n\n\
https://isnick.net\n";

pub const HELP_TEXT: &str = "1) Paste a media URL (http/https).\n\
2) Select a site (Bluesky, Facebook, Instagram, TikTok, YouTube) or Unlisted.\n\
3) Downloads go to the sandbox directory.\n\
4) Start the download. Cancel stops it.\n";

#[derive(Debug)]
pub struct DownloadApp {
    paths: AppPaths,
    config: PersistedConfig,
    site: SitePolicy,
    sandbox: SandboxRoot,
    supervisor: DownloadSupervisor,
    sink: LogSink,
}

impl DownloadApp {
    /// Loads config and prepares the sandbox. An error here is fatal: the
    /// caller must exit rather than carry on without a sandbox.
    pub fn open(paths: AppPaths) -> Result<Self> {
        if let Err(err) = paths.ensure_dirs() {
            tracing::warn!(base_dir = %paths.base_dir.display(), %err, "could not create app dirs");
        }
        let sink = LogSink::new(paths.log_path());
        let mut config = config::load_config_or_default(&paths, &sink);

        let sandbox_dir = paths.effective_sandbox_dir(config.sandbox_dir.as_deref());
        let sandbox = match path_guard::init_sandbox(&sandbox_dir) {
            Ok(root) => root,
            Err(err) => {
                sink.log(
                    "error",
                    "sandbox_failed",
                    serde_json::json!({ "error": err.to_string() }),
                );
                return Err(err);
            }
        };

        let site = config.site_policy();
        config.sandbox_dir = Some(sandbox.path().to_string_lossy().into_owned());
        config.selected_site = site.name().to_string();
        config::save_config_or_log(&paths, &config, &sink);

        tracing::info!(sandbox = %sandbox.path().display(), site = %site, "ready");
        sink.info(
            "sandbox_ready",
            serde_json::json!({ "sandbox": sandbox.path().to_string_lossy() }),
        );

        let supervisor = DownloadSupervisor::new(sink.clone());
        Ok(Self {
            paths,
            config,
            site,
            sandbox,
            supervisor,
            sink,
        })
    }

    pub fn list_sites(&self) -> Vec<&'static str> {
        sites::list_sites()
    }

    pub fn selected_site(&self) -> SitePolicy {
        self.site
    }

    pub fn select_site(&mut self, policy: SitePolicy) {
        self.site = policy;
        self.config.selected_site = policy.name().to_string();
        self.sink
            .info("site_selected", serde_json::json!({ "site": policy.name() }));
        config::save_config_or_log(&self.paths, &self.config, &self.sink);
    }

    pub fn select_site_by_name(&mut self, name: &str) -> Result<()> {
        let policy =
            SitePolicy::from_name(name).ok_or_else(|| EngineError::UnknownSite(name.to_string()))?;
        self.select_site(policy);
        Ok(())
    }

    pub fn binary(&self) -> Option<&str> {
        self.config.binary.as_deref()
    }

    /// Pins `path` as the binary once it passes validation.
    pub fn choose_binary(&mut self, path: &Path) -> Result<()> {
        path_guard::check_binary(path)?;
        self.config.binary = Some(path.to_string_lossy().into_owned());
        self.sink.info(
            "binary_selected",
            serde_json::json!({ "binary": path.to_string_lossy() }),
        );
        config::save_config_or_log(&self.paths, &self.config, &self.sink);
        Ok(())
    }

    pub fn start_download(&self, url: &str) -> Result<()> {
        let url = url.trim();
        let binary = self.config.binary.as_deref().map(PathBuf::from).ok_or_else(|| {
            EngineError::InvalidBinary {
                path: PathBuf::new(),
            }
        });
        let outcome =
            binary.and_then(|b| self.supervisor.start(&b, url, self.site, &self.sandbox));
        if let Err(err) = &outcome {
            self.sink.warn(
                "download_rejected",
                serde_json::json!({
                    "url": redact_url_for_log(url),
                    "site": self.site.name(),
                    "reason": err.to_string(),
                }),
            );
        }
        outcome
    }

    pub fn cancel_download(&self) -> bool {
        self.supervisor.cancel()
    }

    pub fn reset_state(&self) -> bool {
        let reset = self.supervisor.reset();
        if reset {
            self.sink.info("reset", serde_json::json!({}));
        }
        reset
    }

    pub fn current_progress(&self) -> ProgressState {
        self.supervisor.progress()
    }

    pub fn is_downloading(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn wait_for_download(&self, timeout: Duration) -> ProgressState {
        self.supervisor.wait(timeout)
    }

    pub fn sandbox_dir(&self) -> &Path {
        self.sandbox.path()
    }

    pub fn log_path(&self) -> &Path {
        self.sink.path()
    }

    pub fn config(&self) -> &PersistedConfig {
        &self.config
    }
}
