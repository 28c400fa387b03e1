//! Database snapshots. Backups go through SQLite's online mechanism
//! (`VACUUM INTO`), never a raw copy of the live file, so a snapshot can't
//! observe a torn write. Restores are staged and swapped in before the
//! pool opens at the next boot.

use crate::config::{AppConfig, ConfigListener};
use crate::error::AppError;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Name of the live database file inside the data directory.
pub const DATABASE_FILE: &str = "database.sqlite";
/// Staged restore snapshot, applied at boot.
pub const RESTORE_FILE: &str = "restore.sqlite";
const BACKUP_DIR: &str = "backup";

pub struct BackupService {
    pool: SqlitePool,
    data_dir: PathBuf,
}

impl BackupService {
    pub fn new(pool: SqlitePool, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            data_dir: data_dir.into(),
        }
    }

    fn backup_dir(&self) -> PathBuf {
        self.data_dir.join(BACKUP_DIR)
    }

    /// Snapshot the live database into a timestamp-named file. Returns the
    /// file name.
    pub async fn create(&self) -> Result<String, AppError> {
        let dir = self.backup_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| AppError::Internal(format!("create {}: {}", dir.display(), e)))?;

        let name = format!(
            "backup-{}.sqlite",
            chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let target = dir.join(&name);
        sqlx::query("VACUUM INTO ?")
            .bind(target.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::db("backup", DATABASE_FILE, e))?;
        tracing::info!(file = %name, "backup created");
        Ok(name)
    }

    /// Snapshot file names, newest first.
    pub fn list(&self) -> Result<Vec<String>, AppError> {
        let dir = self.backup_dir();
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(names),
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_backup_name(&name) {
                names.push(name);
            }
        }
        names.sort();
        names.reverse();
        Ok(names)
    }

    pub fn remove(&self, name: &str) -> Result<(), AppError> {
        check_backup_name(name)?;
        let path = self.backup_dir().join(name);
        std::fs::remove_file(&path)
            .map_err(|_| AppError::NotFound(format!("backup {}", name)))?;
        Ok(())
    }

    /// Stage a snapshot for restore. The snapshot file is cold, so a plain
    /// copy is safe; the swap against the live file happens at boot,
    /// before the pool opens.
    pub fn stage_restore(&self, name: &str) -> Result<(), AppError> {
        check_backup_name(name)?;
        let source = self.backup_dir().join(name);
        if !source.exists() {
            return Err(AppError::NotFound(format!("backup {}", name)));
        }
        std::fs::copy(&source, self.data_dir.join(RESTORE_FILE))
            .map_err(|e| AppError::Internal(format!("stage restore: {}", e)))?;
        tracing::info!(file = %name, "restore staged; takes effect at next start");
        Ok(())
    }
}

/// Swap a staged restore over the live database. Call before opening the
/// pool. Returns whether a restore was applied.
pub fn apply_staged_restore(data_dir: &Path) -> Result<bool, AppError> {
    let staged = data_dir.join(RESTORE_FILE);
    if !staged.exists() {
        return Ok(false);
    }
    std::fs::rename(&staged, data_dir.join(DATABASE_FILE))
        .map_err(|e| AppError::Internal(format!("apply restore: {}", e)))?;
    tracing::info!("staged restore applied");
    Ok(true)
}

fn is_backup_name(name: &str) -> bool {
    name.starts_with("backup-")
        && name.ends_with(".sqlite")
        && !name.contains('/')
        && !name.contains('\\')
}

fn check_backup_name(name: &str) -> Result<(), AppError> {
    if is_backup_name(name) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "invalid backup name: {:?}",
            name
        )))
    }
}

/// Periodic snapshot task. Runs off the request path; re-arms itself when
/// the configuration changes.
pub struct BackupScheduler {
    tx: watch::Sender<AppConfig>,
}

impl BackupScheduler {
    pub fn spawn(backup: Arc<BackupService>, initial: AppConfig) -> Self {
        let (tx, mut rx) = watch::channel(initial);
        tokio::spawn(async move {
            loop {
                let (enabled, interval_secs) = {
                    let config = rx.borrow();
                    (config.automated_backup, config.backup_interval_secs.max(60))
                };
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {
                        if enabled {
                            if let Err(e) = backup.create().await {
                                tracing::warn!(error = %e, "automated backup failed");
                            }
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self { tx }
    }
}

impl ConfigListener for BackupScheduler {
    fn on_config_changed(&self, config: &AppConfig) {
        let _ = self.tx.send(config.clone());
    }
}
