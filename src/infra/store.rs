//! [`SshStore`] over the real ssh config, key file and backup directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument, warn};

use crate::core::backup::BackupManager;
use crate::core::backup_ops::apply_retention;
use crate::core::reconcile::SshStore;
use crate::infra::config::Config;
use crate::infra::io::{ensure_dir, read_to_string_or_empty, resolve_write_target, write_atomic};

const CONFIG_MODE: u32 = 0o644;
const KEY_MODE: u32 = 0o600;
const SSH_DIR_MODE: u32 = 0o700;

#[derive(Debug, Clone)]
pub struct FileSshStore {
    config_path: PathBuf,
    key_path: String,
    backup_dir: PathBuf,
    keep_latest: usize,
}

impl FileSshStore {
    pub fn new(config_path: impl Into<PathBuf>, key_path: impl Into<String>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            key_path: key_path.into(),
            backup_dir: backup_dir.into(),
            keep_latest: 10,
        }
    }

    /// Build from loaded configuration, expanding every path.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(cfg.ssh_config_file()?, cfg.private_key_file()?, cfg.backup_root()?)
            .with_keep_latest(cfg.backup.keep_latest))
    }

    pub fn with_keep_latest(mut self, keep: usize) -> Self {
        self.keep_latest = keep;
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }
}

impl SshStore for FileSshStore {
    fn read_config(&self) -> Result<String> {
        read_to_string_or_empty(&self.config_path)
    }

    fn write_config(&self, text: &str) -> Result<()> {
        let target = resolve_write_target(&self.config_path)?;
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            ensure_dir(parent, SSH_DIR_MODE)?;
        }
        write_atomic(&target, text.as_bytes(), Some(CONFIG_MODE))
            .with_context(|| format!("write ssh config {}", target.display()))?;
        debug!(path = %target.display(), bytes = text.len(), "ssh config written");
        Ok(())
    }

    #[instrument(skip_all, fields(dir = %self.backup_dir.display()))]
    fn create_backup(&self) -> Result<()> {
        let mut session = BackupManager::begin(&self.backup_dir, "sync")?;
        session.backup_file(&self.config_path)?;
        session.finalize(true)?;

        // Retention failures only warn
        match apply_retention(&self.backup_dir, self.keep_latest) {
            Ok(cleaned) if !cleaned.sessions_removed.is_empty() => {
                debug!(removed = cleaned.sessions_removed.len(), "pruned old backup sessions");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %format!("{e:#}"), "backup retention failed"),
        }
        Ok(())
    }

    fn write_private_key(&self, pem: &str) -> Result<()> {
        let path = Path::new(&self.key_path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            ensure_dir(parent, SSH_DIR_MODE)?;
        }
        // Existing key files are tightened to 0600 as well
        write_atomic(path, pem.as_bytes(), Some(KEY_MODE))
            .with_context(|| format!("write private key {}", path.display()))?;
        set_key_mode(path)
    }

    fn verify_private_key(&self) -> Result<()> {
        if !Path::new(&self.key_path).is_file() {
            bail!(
                "private key not found at {} (pass --key-file or --key-stdin)",
                self.key_path
            );
        }
        Ok(())
    }

    fn private_key_path(&self) -> String {
        self.key_path.clone()
    }
}

#[cfg(unix)]
fn set_key_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(KEY_MODE))
        .with_context(|| format!("chmod 600 {}", path.display()))
}

#[cfg(not(unix))]
fn set_key_mode(_path: &Path) -> Result<()> {
    Ok(())
}
