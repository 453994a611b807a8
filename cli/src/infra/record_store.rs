//! On-disk record store: one JSON file per host under `~/.roost/hosts/`.
//!
//! Writes are atomic (temp file then rename) and mode 600; blocking
//! filesystem work runs on the blocking pool.

use std::path::PathBuf;

use anyhow::{Context, Result};

use roost_common::{ProvisioningRecord, RecordPatch};

use crate::application::ports::RecordStore;
use crate::domain::host::validate_host_id;

pub struct JsonRecordStore {
    dir: PathBuf,
}

impl JsonRecordStore {
    /// Store under the default directory (`~/.roost/hosts`).
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_dir(home.join(".roost").join("hosts")))
    }

    #[must_use]
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn load_sync(&self, id: &str) -> Result<Option<ProvisioningRecord>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading record {}", path.display()))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("parsing record {}", path.display()))?;
        Ok(Some(record))
    }

    fn save_sync(&self, record: &ProvisioningRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating directory {}", self.dir.display()))?;
        let content = serde_json::to_string_pretty(record).context("serializing record")?;

        let path = self.record_path(&record.id);
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("setting permissions on {}", temp_path.display()))?;
        }

        std::fs::rename(&temp_path, &path)
            .with_context(|| format!("finalizing record {}", path.display()))?;
        Ok(())
    }
}

impl RecordStore for JsonRecordStore {
    async fn load(&self, id: &str) -> Result<Option<ProvisioningRecord>> {
        validate_host_id(id)?;
        let store = Self::with_dir(self.dir.clone());
        let id = id.to_owned();
        tokio::task::spawn_blocking(move || store.load_sync(&id))
            .await
            .context("record load task panicked")?
    }

    async fn upsert(&self, record: &ProvisioningRecord) -> Result<()> {
        validate_host_id(&record.id)?;
        let store = Self::with_dir(self.dir.clone());
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.save_sync(&record))
            .await
            .context("record save task panicked")?
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<ProvisioningRecord> {
        validate_host_id(id)?;
        let store = Self::with_dir(self.dir.clone());
        let id = id.to_owned();
        let patch = patch.clone();
        tokio::task::spawn_blocking(move || {
            let mut record = store
                .load_sync(&id)?
                .ok_or_else(|| anyhow::anyhow!("no record for host '{id}'"))?;
            patch.apply(&mut record);
            store.save_sync(&record)?;
            Ok(record)
        })
        .await
        .context("record update task panicked")?
    }

    async fn delete(&self, id: &str) -> Result<()> {
        validate_host_id(id)?;
        let path = self.record_path(id);
        tokio::task::spawn_blocking(move || {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("removing record {}", path.display()))?;
            }
            Ok(())
        })
        .await
        .context("record delete task panicked")?
    }
}
