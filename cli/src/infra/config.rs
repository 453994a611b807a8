//! User configuration on disk (`~/.roost/config.yaml`).

use std::path::PathBuf;

use anyhow::{Context, Result};

use roost_common::RoostConfig;

pub struct YamlConfigStore;

impl YamlConfigStore {
    /// Load the configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or does not parse; there is
    /// no usable default configuration without credentials.
    pub fn load(&self) -> Result<RoostConfig> {
        let path = Self::path()?;
        if !path.exists() {
            anyhow::bail!(
                "no configuration found at {}; create it or set ROOST_CONFIG",
                path.display()
            );
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("cannot parse {}", path.display()))
    }

    /// Write the configuration document mode 600.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn save(&self, config: &RoostConfig) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let content = serde_yaml::to_string(config).context("cannot serialize config")?;
        std::fs::write(&path, content)
            .with_context(|| format!("cannot write {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("cannot set permissions on {}", path.display()))?;
        }
        Ok(())
    }

    /// Configuration path: `ROOST_CONFIG` when set, `~/.roost/config.yaml`
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn path() -> Result<PathBuf> {
        if let Ok(val) = std::env::var("ROOST_CONFIG") {
            return Ok(PathBuf::from(val));
        }
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(home.join(".roost").join("config.yaml"))
    }
}
