//! Flash command: full reflash with live progress, plus brick recovery

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;

use redline_flash::{FlashManager, FlashOptions, FlashReport};
use redline_security::SecurityAlgorithmRegistry;
use redline_uds::{DiagnosticSession, SessionKind};

use crate::output::OutputContext;
use crate::store::FileBackupStore;

#[derive(Tabled, Serialize)]
struct ReportRow {
    #[tabled(rename = "Run")]
    run_id: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Blocks")]
    blocks: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Backup")]
    backup: String,
}

impl From<&FlashReport> for ReportRow {
    fn from(report: &FlashReport) -> Self {
        Self {
            run_id: report.run_id.clone(),
            result: report.phase.to_string(),
            blocks: format!("{}/{}", report.blocks_written, report.blocks_total),
            duration: format!("{:.1}s", report.duration_ms as f64 / 1000.0),
            backup: report
                .backup
                .as_ref()
                .map(|b| b.id.clone())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn flash(
    session: DiagnosticSession,
    file: Option<&Path>,
    profile: &Path,
    backup_dir: &Path,
    backup: bool,
    verify: bool,
    vin: Option<&str>,
    recover: bool,
    ctx: &OutputContext,
) -> Result<()> {
    let profile_text = std::fs::read_to_string(profile)
        .with_context(|| format!("Failed to read {}", profile.display()))?;
    let profile = serde_yaml::from_str(&profile_text)
        .with_context(|| "Failed to parse ECU profile")?;

    let store = Arc::new(FileBackupStore::new(backup_dir.to_path_buf()));
    let manager = Arc::new(FlashManager::new(
        session,
        SecurityAlgorithmRegistry::new(),
        profile,
        store,
    )?);

    let vin = vin.map(str::to_string);
    let mut task = if recover {
        ctx.info("Recovering from the most recent backup");
        let manager = manager.clone();
        tokio::spawn(async move { manager.recover(vin.as_deref()).await })
    } else {
        let file = file.context("An image file is required unless --recover is set")?;
        let image = std::fs::read(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        ctx.info(&format!("Flashing {} ({} bytes)", file.display(), image.len()));
        let manager = manager.clone();
        let options = FlashOptions {
            backup,
            verify,
            exit_to: SessionKind::Default,
            vin,
        };
        tokio::spawn(async move { manager.flash(&image, &options).await })
    };

    let bar = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} blocks {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let report = loop {
        tokio::select! {
            joined = &mut task => {
                break joined.context("Flash task panicked")?;
            }
            _ = ticker.tick() => {
                let progress = manager.progress();
                if progress.blocks_total > 0 {
                    bar.set_length(progress.blocks_total as u64);
                }
                bar.set_position(progress.blocks_written as u64);
                bar.set_message(format!(
                    "{} 0x{:08X}",
                    progress.phase, progress.current_address
                ));
            }
            _ = tokio::signal::ctrl_c() => {
                // Honored between blocks; the in-flight block completes
                manager.cancel();
                bar.set_message("cancelling".to_string());
            }
        }
    };
    bar.finish_and_clear();

    ctx.print_one(&ReportRow::from(&report));
    match report.error {
        None => {
            ctx.success("Flash completed");
            Ok(())
        }
        Some(error) => {
            if let Some(backup) = &report.backup {
                ctx.warn(&format!(
                    "Backup {} is available for recovery (redline flash --recover)",
                    backup.id
                ));
            }
            bail!("Flash failed: {error}")
        }
    }
}
