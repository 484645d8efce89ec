use std::path::{Path, PathBuf};

use serde_derive::{Deserialize, Serialize};

pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Server settings, loadable from a config file. Command-line flags take
/// precedence over anything configured here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on when `-p` is not given.
    pub port: Option<u16>,

    /// Log level for the rolling log file.
    pub log_level: Option<String>,

    /// Directory for the rolling log file.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: None, log_level: None, log_dir: None }
    }
}

impl ServerConfig {
    /// Load settings from a config file; a missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<ServerConfig> {
        Ok(confy::load_path(path)?)
    }

    pub fn get_log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
    }

    pub fn get_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, None);
        assert_eq!(config.get_log_level(), "info");
        assert_eq!(config.get_log_dir(), PathBuf::from(DEFAULT_LOG_DIR));
    }
}
