//! The flash pipeline: backup, programming entry, block-wise
//! write/verify, checksum patch, exit, and brick recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use redline_cal::ChecksumEngine;
use redline_security::SecurityAlgorithmRegistry;
use redline_uds::{DiagnosticSession, SessionKind, SessionState};

use crate::backup::{BackupRef, BackupStore};
use crate::error::FlashError;
use crate::profile::EcuProfile;
use crate::status::{FlashPhase, FlashProgress, FlashReport};

/// Per-run options
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Read and store the current image before writing
    pub backup: bool,
    /// Read back and checksum-compare every block after writing it
    pub verify: bool,
    /// Session to return to after a successful flash
    pub exit_to: SessionKind,
    /// VIN for levels whose algorithm requires it
    pub vin: Option<String>,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            backup: true,
            verify: true,
            exit_to: SessionKind::Default,
            vin: None,
        }
    }
}

/// Orchestrates a complete reflash over one `DiagnosticSession`.
///
/// Construction registers the profile's security levels into the
/// registry and validates the profile, so a constructed manager can
/// always at least attempt the entry dance.
pub struct FlashManager {
    session: DiagnosticSession,
    registry: SecurityAlgorithmRegistry,
    profile: EcuProfile,
    engine: ChecksumEngine,
    backups: Arc<dyn BackupStore>,
    progress: Arc<RwLock<FlashProgress>>,
    cancel: Arc<AtomicBool>,
}

impl FlashManager {
    pub fn new(
        session: DiagnosticSession,
        mut registry: SecurityAlgorithmRegistry,
        profile: EcuProfile,
        backups: Arc<dyn BackupStore>,
    ) -> Result<Self, FlashError> {
        profile.validate()?;
        for level in &profile.security_levels {
            registry.register_level(&profile.ecu_type, level.clone())?;
        }
        let engine = profile.checksum_engine();
        Ok(Self {
            session,
            registry,
            profile,
            engine,
            backups,
            progress: Arc::new(RwLock::new(FlashProgress::idle())),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Snapshot of the current run's progress
    pub fn progress(&self) -> FlashProgress {
        self.progress.read().clone()
    }

    /// Request cancellation. Honored only between blocks; the in-flight
    /// block always completes so nothing is left half-written.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Flash `image` to the ECU. The report is always returned; a failed
    /// run carries its cause and an accurate `blocks_written`.
    pub async fn flash(&self, image: &[u8], options: &FlashOptions) -> FlashReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        self.cancel.store(false, Ordering::SeqCst);
        self.reset_progress(image.len());

        info!(
            run_id = %run_id,
            ecu_type = %self.profile.ecu_type,
            image_len = image.len(),
            backup = options.backup,
            verify = options.verify,
            "Starting flash"
        );

        // Suspends realtime polling until the run reaches a terminal phase
        let _flash_guard = self.session.enter_flash_mode();

        let mut backup = None;
        let result = self.run(image, options, &mut backup).await;
        self.finish(run_id, started_at, start, backup, result)
    }

    /// Brick recovery: force a bootloader-mode entry and replay the most
    /// recent backup through the identical write+verify pipeline.
    pub async fn recover(&self, vin: Option<&str>) -> FlashReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        self.cancel.store(false, Ordering::SeqCst);
        self.reset_progress(0);

        info!(run_id = %run_id, ecu_type = %self.profile.ecu_type, "Starting brick recovery");

        let _flash_guard = self.session.enter_flash_mode();

        let mut backup = None;
        let result = self.run_recovery(vin, &mut backup).await;
        self.finish(run_id, started_at, start, backup, result)
    }

    async fn run(
        &self,
        image: &[u8],
        options: &FlashOptions,
        backup: &mut Option<BackupRef>,
    ) -> Result<(), FlashError> {
        if options.backup {
            self.set_phase(FlashPhase::BackingUp);
            let current = self.read_image(image.len()).await?;
            let saved = self.backups.save(&self.profile.ecu_type, &current).await?;
            info!(backup_id = %saved.id, len = saved.len, "Backup stored");
            *backup = Some(saved);
        }

        self.set_phase(FlashPhase::EnteringProgramming);
        self.enter_programming(options.vin.as_deref()).await?;

        self.write_blocks(image, options.verify).await?;

        self.set_phase(FlashPhase::PatchingChecksum);
        self.patch_checksum(image).await?;

        self.set_phase(FlashPhase::Exiting);
        self.run_self_check().await?;
        self.session.start_session(options.exit_to).await?;
        Ok(())
    }

    async fn run_recovery(
        &self,
        vin: Option<&str>,
        backup: &mut Option<BackupRef>,
    ) -> Result<(), FlashError> {
        let latest = self
            .backups
            .latest(&self.profile.ecu_type)
            .await?
            .ok_or_else(|| FlashError::NoBackup {
                ecu_type: self.profile.ecu_type.clone(),
            })?;
        let image = self.backups.load(&latest).await?;
        info!(backup_id = %latest.id, len = image.len(), "Replaying backup");
        *backup = Some(latest);
        self.reset_progress(image.len());

        // A bootloader's reset vector is unauthenticated, so this goes
        // out regardless of the local security gate.
        self.session
            .force_reset_routine(self.profile.reset_routine_id)
            .await?;
        tokio::time::sleep(Duration::from_millis(self.profile.bootloader_wait_ms)).await;
        self.session.mark_reset();

        self.set_phase(FlashPhase::EnteringProgramming);
        self.enter_programming(vin).await?;
        self.write_blocks(&image, true).await?;

        self.set_phase(FlashPhase::PatchingChecksum);
        self.patch_checksum(&image).await?;

        self.set_phase(FlashPhase::Exiting);
        self.session.start_session(SessionKind::Default).await?;
        Ok(())
    }

    /// The canonical programming entry dance. The second unlock is not
    /// redundant: the transition into Programming relocked security.
    async fn enter_programming(&self, vin: Option<&str>) -> Result<(), FlashError> {
        self.session.start_session(SessionKind::Extended).await?;
        self.unlock(vin).await?;
        self.session.start_session(SessionKind::Programming).await?;
        self.unlock(vin).await?;
        Ok(())
    }

    async fn unlock(&self, vin: Option<&str>) -> Result<(), FlashError> {
        let level = self.profile.flash_level;
        let handle = self.registry.resolve(&self.profile.ecu_type, level)?;

        let seed = self.session.request_seed(level).await?;
        if seed.is_empty() {
            return Ok(());
        }
        let key = handle.derive(&seed, vin)?;
        self.session.send_key(level, &key).await?;
        Ok(())
    }

    /// Chunked read of the full target range
    async fn read_image(&self, len: usize) -> Result<Vec<u8>, FlashError> {
        let mut image = Vec::with_capacity(len);
        let mut offset = 0usize;
        while offset < len {
            let chunk_len = (len - offset).min(self.profile.block_size);
            let address = self.profile.base_address + offset as u32;
            self.update(|p| p.current_address = address);
            let chunk = self.session.read_memory(address, chunk_len as u32).await?;
            image.extend_from_slice(&chunk);
            offset += chunk_len;
        }
        Ok(image)
    }

    async fn write_blocks(&self, image: &[u8], verify: bool) -> Result<(), FlashError> {
        let block_size = self.profile.block_size;

        for (index, chunk) in image.chunks(block_size).enumerate() {
            let blocks_written = self.progress.read().blocks_written;
            if self.cancel.load(Ordering::SeqCst) {
                return Err(FlashError::Cancelled { blocks_written });
            }
            // Keepalive exhaustion lands here between blocks (never
            // mid-block): abort instead of writing into a dead session
            if self.session.state() == SessionState::Disconnected {
                return Err(FlashError::SessionLost { blocks_written });
            }

            let address = self.profile.base_address + (index * block_size) as u32;
            self.update(|p| {
                p.phase = FlashPhase::Writing;
                p.current_address = address;
            });
            self.session.write_memory(address, chunk).await?;

            if verify {
                self.update(|p| p.phase = FlashPhase::Verifying);
                let readback = self
                    .session
                    .read_memory(address, chunk.len() as u32)
                    .await?;
                if readback != chunk
                    || self.engine.calculate(&readback) != self.engine.calculate(chunk)
                {
                    return Err(FlashError::VerifyMismatch {
                        block: index + 1,
                        address,
                    });
                }
            }

            self.update(|p| p.blocks_written += 1);
            debug!(block = index + 1, address = format!("0x{:08X}", address), "Block written");
        }
        Ok(())
    }

    /// Recompute the whole-image checksum and write the patched field to
    /// the ECU. Always read back: an unverified checksum field is how
    /// ECUs end up refusing to boot.
    async fn patch_checksum(&self, image: &[u8]) -> Result<(), FlashError> {
        let patched = self.engine.patch(image)?;
        let offset = self.engine.field_offset();
        let width = self.engine.algorithm().output_bytes();
        let field = &patched[offset..offset + width];
        let address = self.profile.base_address + offset as u32;

        self.update(|p| p.current_address = address);
        self.session.write_memory(address, field).await?;
        let readback = self.session.read_memory(address, width as u32).await?;
        if readback != field {
            return Err(FlashError::VerifyMismatch { block: 0, address });
        }
        info!(address = format!("0x{:08X}", address), "Checksum field patched");
        Ok(())
    }

    /// Post-flash self check, when the profile configures one. The
    /// routine's first output byte is its result code (0x00 = pass).
    async fn run_self_check(&self) -> Result<(), FlashError> {
        let Some(routine_id) = self.profile.self_check_routine_id else {
            return Ok(());
        };
        let out = self.session.start_routine(routine_id, &[]).await?;
        match out.first() {
            None | Some(0x00) => Ok(()),
            Some(code) => Err(FlashError::SelfCheckFailed {
                reason: format!("routine 0x{:04X} returned 0x{:02X}", routine_id, code),
            }),
        }
    }

    fn finish(
        &self,
        run_id: String,
        started_at: chrono::DateTime<Utc>,
        start: Instant,
        backup: Option<BackupRef>,
        result: Result<(), FlashError>,
    ) -> FlashReport {
        let error = match result {
            Ok(()) => {
                self.set_phase(FlashPhase::Done);
                None
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Flash failed");
                self.set_phase(FlashPhase::Failed);
                Some(e)
            }
        };

        let progress = self.progress.read().clone();
        let report = FlashReport {
            run_id,
            phase: progress.phase,
            blocks_written: progress.blocks_written,
            blocks_total: progress.blocks_total,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            backup,
            error,
        };
        info!(
            run_id = %report.run_id,
            phase = %report.phase,
            blocks = format!("{}/{}", report.blocks_written, report.blocks_total),
            duration_ms = report.duration_ms,
            "Flash finished"
        );
        report
    }

    fn reset_progress(&self, image_len: usize) {
        let blocks_total = image_len.div_ceil(self.profile.block_size);
        *self.progress.write() = FlashProgress {
            phase: FlashPhase::Idle,
            blocks_written: 0,
            blocks_total,
            current_address: self.profile.base_address,
        };
    }

    fn set_phase(&self, phase: FlashPhase) {
        self.update(|p| p.phase = phase);
        debug!(phase = %phase, "Flash phase");
    }

    fn update<F: FnOnce(&mut FlashProgress)>(&self, f: F) {
        f(&mut self.progress.write());
    }
}
