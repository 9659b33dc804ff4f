use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file, created on first open
    pub database: PathBuf,
    pub max_connections: u32,
    /// How long a transaction waits on another writer's lock before failing
    pub busy_timeout_ms: u64,
    /// Upper bound on a whole enroll/unenroll, unset means no deadline
    pub operation_deadline_ms: Option<u64>,
    /// Directory for daily rotated log files, stdout when unset
    pub log_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("database/ledger.db"),
            max_connections: 8,
            busy_timeout_ms: 5_000,
            operation_deadline_ms: None,
            log_dir: None,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply `LEDGER_*` environment
    /// overrides (a `.env` file is honored).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("Failed to read config {}: {}", path.display(), e)
                })?;
                toml::from_str(&content)?
            }
            None => Config::default(),
        };
        let _ = dotenvy::dotenv();
        if let Ok(database) = dotenvy::var("LEDGER_DATABASE") {
            config.database = PathBuf::from(database);
        }
        if let Ok(log_dir) = dotenvy::var("LEDGER_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(log_dir));
        }
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn operation_deadline(&self) -> Option<Duration> {
        self.operation_deadline_ms.map(Duration::from_millis)
    }
}
