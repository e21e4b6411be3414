pub mod app;
pub mod cmd;
pub mod config;
mod error;
pub mod log_sink;
pub mod path_guard;
pub mod paths;
pub mod progress;
pub mod sites;
pub mod supervisor;

pub use app::DownloadApp;
pub use error::{EngineError, Result};
