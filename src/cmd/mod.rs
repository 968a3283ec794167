pub mod check;
pub mod config;
pub mod progress;

use crate::config::{ConfigManager, ValidatedConfig};
use crate::error::Result;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub no_interactive: bool,
}

impl GlobalOptions {
    pub fn config_manager(&self) -> Result<ConfigManager> {
        match &self.config_dir {
            Some(dir) => Ok(ConfigManager::with_dir(dir)),
            None => ConfigManager::new(),
        }
    }

    /// Load and validate configuration, applying command-line overrides.
    pub fn load_config(&self) -> Result<ValidatedConfig> {
        let mut config = self.config_manager()?.load()?;
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }

    /// Interactive sign-in needs a terminal to show the code on.
    pub fn interactive(&self) -> bool {
        !self.no_interactive && std::io::stdin().is_terminal()
    }
}
