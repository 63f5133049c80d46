//! CLI configuration file (TOML)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use redline_uds::SessionConfig;

/// Persistent CLI configuration, merged under command-line flags.
///
/// Looked up at `~/.config/redline/config.toml` unless `--config` points
/// elsewhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Transport selector (`sim` is the only in-tree adapter)
    #[serde(default)]
    pub transport: Option<String>,
    /// Where file-backed backups land (defaults to `./backups`)
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub session: SessionConfig,
}

impl CliConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Default location, falling back to defaults when absent
    pub fn load() -> Self {
        dirs::config_dir()
            .map(|dir| dir.join("redline").join("config.toml"))
            .filter(|path| path.exists())
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("backups"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml() {
        let toml = "transport = \"sim\"\n\n[session]\ntarget_id = 2016\n";
        let cfg: CliConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.transport.as_deref(), Some("sim"));
        assert_eq!(cfg.session.target_id, 0x7E0);
        assert_eq!(cfg.backup_dir(), PathBuf::from("backups"));
    }
}
