//! Flash progress and the final report

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backup::BackupRef;
use crate::error::FlashError;

/// Phase of a flash run.
///
/// ```text
/// Idle → BackingUp → EnteringProgramming → Writing ⇄ Verifying
///            → PatchingChecksum → Exiting → Done
/// ```
/// Any phase can drop to `Failed`; `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashPhase {
    Idle,
    BackingUp,
    EnteringProgramming,
    Writing,
    Verifying,
    PatchingChecksum,
    Exiting,
    Done,
    Failed,
}

impl FlashPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlashPhase::Done | FlashPhase::Failed)
    }
}

impl std::fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlashPhase::Idle => "idle",
            FlashPhase::BackingUp => "backing_up",
            FlashPhase::EnteringProgramming => "entering_programming",
            FlashPhase::Writing => "writing",
            FlashPhase::Verifying => "verifying",
            FlashPhase::PatchingChecksum => "patching_checksum",
            FlashPhase::Exiting => "exiting",
            FlashPhase::Done => "done",
            FlashPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot the caller can poll while a flash runs
#[derive(Debug, Clone, Serialize)]
pub struct FlashProgress {
    pub phase: FlashPhase,
    pub blocks_written: usize,
    pub blocks_total: usize,
    /// ECU address the pipeline is currently touching
    pub current_address: u32,
}

impl FlashProgress {
    pub fn idle() -> Self {
        Self {
            phase: FlashPhase::Idle,
            blocks_written: 0,
            blocks_total: 0,
            current_address: 0,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.blocks_total == 0 {
            0.0
        } else {
            self.blocks_written as f64 / self.blocks_total as f64 * 100.0
        }
    }
}

/// Outcome of one flash run
#[derive(Debug, Clone, Serialize)]
pub struct FlashReport {
    pub run_id: String,
    pub phase: FlashPhase,
    pub blocks_written: usize,
    pub blocks_total: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Recovery source if a backup was taken (or replayed)
    pub backup: Option<BackupRef>,
    /// Failure cause when the terminal phase is `Failed`
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<FlashError>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<FlashError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl FlashReport {
    pub fn succeeded(&self) -> bool {
        self.phase == FlashPhase::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(FlashPhase::Done.is_terminal());
        assert!(FlashPhase::Failed.is_terminal());
        assert!(!FlashPhase::Writing.is_terminal());
        assert!(!FlashPhase::Idle.is_terminal());
    }

    #[test]
    fn test_progress_percent() {
        let mut p = FlashProgress::idle();
        assert_eq!(p.percent(), 0.0);
        p.blocks_total = 4;
        p.blocks_written = 3;
        assert_eq!(p.percent(), 75.0);
    }
}
