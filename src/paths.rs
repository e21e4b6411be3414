use std::path::PathBuf;

const ENV_BASE_DIR: &str = "ISNICK_BASE_DIR";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Resolves the base dir from an explicit override, `ISNICK_BASE_DIR`, or
    /// the platform config dir, in that order.
    pub fn resolve(explicit: Option<PathBuf>) -> Option<Self> {
        if let Some(dir) = explicit {
            return Some(Self::new(dir));
        }
        if let Ok(v) = std::env::var(ENV_BASE_DIR) {
            let t = v.trim();
            if !t.is_empty() {
                return Some(Self::new(PathBuf::from(t)));
            }
        }
        dirs::config_dir().map(|d| Self::new(d.join("isnick")))
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir().join("config.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir().join("download.log")
    }

    /// `~/Videos/yt-dlp-gui`, or a `downloads` dir under the base dir when no
    /// home directory is known.
    pub fn default_sandbox_dir(&self) -> PathBuf {
        match dirs::home_dir() {
            Some(home) => home.join("Videos").join("yt-dlp-gui"),
            None => self.base_dir.join("downloads"),
        }
    }

    pub fn effective_sandbox_dir(&self, configured: Option<&str>) -> PathBuf {
        match configured.map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => self.default_sandbox_dir(),
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
