//! File-backed backup store.
//!
//! One `.bin` per backup, named `<ecu_type>__<id>__<millis>.bin`, so the
//! store needs no index file and `latest` is a directory scan.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use redline_flash::{BackupRef, BackupStore, FlashError};

pub struct FileBackupStore {
    dir: PathBuf,
}

impl FileBackupStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file_name(backup: &BackupRef) -> String {
        format!(
            "{}__{}__{}.bin",
            backup.ecu_type,
            backup.id,
            backup.created_at.timestamp_millis()
        )
    }

    fn parse_file_name(name: &str) -> Option<(String, String, i64)> {
        let stem = name.strip_suffix(".bin")?;
        let mut parts = stem.split("__");
        let ecu_type = parts.next()?.to_string();
        let id = parts.next()?.to_string();
        let millis = parts.next()?.parse().ok()?;
        Some((ecu_type, id, millis))
    }

    async fn scan(&self) -> Result<Vec<(BackupRef, PathBuf)>, FlashError> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            // No directory yet means no backups yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => {
                return Err(FlashError::Backup {
                    reason: format!("cannot read {}: {}", self.dir.display(), e),
                })
            }
        };

        loop {
            let entry = dir.next_entry().await.map_err(|e| FlashError::Backup {
                reason: e.to_string(),
            })?;
            let Some(entry) = entry else { break };
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((ecu_type, id, millis)) = Self::parse_file_name(&name) else {
                continue;
            };
            let Some(created_at) = Utc.timestamp_millis_opt(millis).single() else {
                continue;
            };
            let len = entry.metadata().await.map(|m| m.len() as usize).unwrap_or(0);
            entries.push((
                BackupRef {
                    id,
                    ecu_type,
                    created_at,
                    len,
                },
                entry.path(),
            ));
        }
        Ok(entries)
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn save(&self, ecu_type: &str, image: &[u8]) -> Result<BackupRef, FlashError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| FlashError::Backup {
                reason: format!("cannot create {}: {}", self.dir.display(), e),
            })?;

        let backup = BackupRef {
            id: Uuid::new_v4().to_string(),
            ecu_type: ecu_type.to_string(),
            created_at: Utc::now(),
            len: image.len(),
        };
        let path = self.dir.join(Self::file_name(&backup));
        tokio::fs::write(&path, image)
            .await
            .map_err(|e| FlashError::Backup {
                reason: format!("cannot write {}: {}", path.display(), e),
            })?;
        Ok(backup)
    }

    async fn load(&self, backup: &BackupRef) -> Result<Vec<u8>, FlashError> {
        let (_, path) = self
            .scan()
            .await?
            .into_iter()
            .find(|(r, _)| r.id == backup.id)
            .ok_or_else(|| FlashError::Backup {
                reason: format!("backup {} not found in {}", backup.id, self.dir.display()),
            })?;
        tokio::fs::read(&path).await.map_err(|e| FlashError::Backup {
            reason: format!("cannot read {}: {}", path.display(), e),
        })
    }

    async fn latest(&self, ecu_type: &str) -> Result<Option<BackupRef>, FlashError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter(|(r, _)| r.ecu_type == ecu_type)
            .max_by_key(|(r, _)| r.created_at)
            .map(|(r, _)| r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackupStore::new(dir.path().to_path_buf());

        assert!(store.latest("demo_ecm").await.unwrap().is_none());

        let first = store.save("demo_ecm", &[1, 2, 3]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.save("demo_ecm", &[4, 5, 6, 7]).await.unwrap();

        assert_eq!(store.load(&first).await.unwrap(), vec![1, 2, 3]);
        let latest = store.latest("demo_ecm").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.len, 4);
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let store = FileBackupStore::new(PathBuf::from("/nonexistent/redline-backups"));
        assert!(store.latest("demo_ecm").await.unwrap().is_none());
    }
}
