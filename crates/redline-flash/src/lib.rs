//! Flash orchestration for ECU reflashing.
//!
//! `FlashManager` drives a complete run over a `DiagnosticSession`:
//! optional backup of the current image, the canonical programming entry
//! dance (Extended → unlock → Programming → unlock), block-wise
//! write+verify, whole-image checksum patching, and session exit.
//! Backups persist behind the `BackupStore` trait and the most recent
//! one doubles as the brick-recovery source.

pub mod backup;
pub mod error;
pub mod manager;
pub mod profile;
pub mod status;

pub use backup::{BackupRef, BackupStore, MemoryBackupStore};
pub use error::FlashError;
pub use manager::{FlashManager, FlashOptions};
pub use profile::{ChecksumSpec, EcuProfile};
pub use status::{FlashPhase, FlashProgress, FlashReport};
