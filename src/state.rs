use std::path::PathBuf;

use crate::config::Config;
use crate::planner::MenuPlanner;

/// Read-only after startup; shared by every handler through an `Arc`.
pub struct AppState {
    pub config: Config,
    pub planner: MenuPlanner,
}

impl AppState {
    pub fn new(config: Config, planner: MenuPlanner) -> Self {
        Self { config, planner }
    }

    pub fn static_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.static_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.static_dir().join("index.html")
    }
}
