//! Backup persistence behind a trait.
//!
//! The flash pipeline only ever talks to `BackupStore`; the CLI provides
//! a file-backed implementation and tests use the in-memory one here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlashError;

/// Reference to a stored backup image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRef {
    pub id: String,
    pub ecu_type: String,
    pub created_at: DateTime<Utc>,
    pub len: usize,
}

#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Persist an image, returning a reference for later recovery
    async fn save(&self, ecu_type: &str, image: &[u8]) -> Result<BackupRef, FlashError>;

    async fn load(&self, backup: &BackupRef) -> Result<Vec<u8>, FlashError>;

    /// Most recent backup for an ECU type, if any
    async fn latest(&self, ecu_type: &str) -> Result<Option<BackupRef>, FlashError>;
}

/// In-memory store for tests and dry runs
#[derive(Default)]
pub struct MemoryBackupStore {
    entries: Mutex<Vec<(BackupRef, Vec<u8>)>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn save(&self, ecu_type: &str, image: &[u8]) -> Result<BackupRef, FlashError> {
        let backup = BackupRef {
            id: Uuid::new_v4().to_string(),
            ecu_type: ecu_type.to_string(),
            created_at: Utc::now(),
            len: image.len(),
        };
        self.entries.lock().push((backup.clone(), image.to_vec()));
        Ok(backup)
    }

    async fn load(&self, backup: &BackupRef) -> Result<Vec<u8>, FlashError> {
        self.entries
            .lock()
            .iter()
            .find(|(r, _)| r.id == backup.id)
            .map(|(_, image)| image.clone())
            .ok_or_else(|| FlashError::Backup {
                reason: format!("backup {} not found", backup.id),
            })
    }

    async fn latest(&self, ecu_type: &str) -> Result<Option<BackupRef>, FlashError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .rev()
            .find(|(r, _)| r.ecu_type == ecu_type)
            .map(|(r, _)| r.clone()))
    }
}
