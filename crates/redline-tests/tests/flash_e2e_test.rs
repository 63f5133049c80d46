//! Full reflash runs against the bench ECU

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use redline_flash::{
    BackupStore, FlashError, FlashManager, FlashOptions, FlashPhase, MemoryBackupStore,
};
use redline_security::SecurityAlgorithmRegistry;
use redline_sim::{SimEcu, SimEcuConfig, SimTransport};
use redline_tests::{bench, bench_profile, fast_config, test_image, Bench};
use redline_uds::DiagnosticSession;

fn manager_for(bench: &Bench) -> (Arc<FlashManager>, Arc<MemoryBackupStore>) {
    let store = Arc::new(MemoryBackupStore::new());
    let manager = FlashManager::new(
        bench.session.clone(),
        SecurityAlgorithmRegistry::new(),
        bench_profile(),
        store.clone(),
    )
    .unwrap();
    (Arc::new(manager), store)
}

/// Bench variant with per-frame latency so multi-block runs take long
/// enough to interrupt
fn slow_bench(latency_ms: u64) -> Bench {
    let ecu = Arc::new(SimEcu::new(SimEcuConfig::default()));
    let link = Arc::new(
        SimTransport::new(ecu.clone()).with_latency(Duration::from_millis(latency_ms)),
    );
    let session = DiagnosticSession::new(link.clone(), fast_config());
    Bench { ecu, link, session }
}

#[tokio::test]
async fn test_flash_happy_path() {
    let bench = bench();
    let (manager, store) = manager_for(&bench);
    let original = bench.ecu.memory();
    let image = test_image(256);

    let report = manager.flash(&image, &FlashOptions::default()).await;

    assert!(report.succeeded(), "flash failed: {:?}", report.error);
    assert_eq!(report.blocks_total, 4);
    assert_eq!(report.blocks_written, 4);

    // Backup captured the pre-flash content
    let backup = report.backup.expect("backup taken");
    assert_eq!(backup.len, 256);
    assert_eq!(store.load(&backup).await.unwrap(), original[..256].to_vec());

    // ECU holds the image with its checksum field patched
    let engine = bench_profile().checksum_engine();
    let expected = engine.patch(&image).unwrap();
    assert_eq!(bench.ecu.memory()[..256], expected[..]);
    assert!(engine.verify(&bench.ecu.memory()[..256]));

    // Exited to default, relocked
    assert_eq!(bench.ecu.active_session(), 0x01);
    assert!(!bench.ecu.is_unlocked());
}

#[tokio::test]
async fn test_corrupted_readback_fails_verification() {
    let bench = bench();
    let (manager, _) = manager_for(&bench);
    let image = test_image(256);

    // Third block (0x1080..0x10C0) reads back corrupted
    bench.ecu.corrupt_reads_at(0x1085);
    let report = manager.flash(&image, &FlashOptions::default()).await;

    assert_eq!(report.phase, FlashPhase::Failed);
    assert_eq!(report.blocks_written, 2);
    assert!(matches!(
        report.error,
        Some(FlashError::VerifyMismatch {
            block: 3,
            address: 0x1080
        })
    ));
    // The pre-flash backup is still on record as the recovery source
    assert!(report.backup.is_some());
}

#[tokio::test]
async fn test_keepalive_loss_aborts_between_blocks() {
    let bench = slow_bench(40);
    let (manager, _) = manager_for(&bench);
    let image = test_image(1024);

    let task = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let options = FlashOptions {
                backup: false,
                ..FlashOptions::default()
            };
            manager.flash(&image, &options).await
        })
    };

    // Let the entry dance finish, then kill the keepalive channel
    tokio::time::sleep(Duration::from_millis(400)).await;
    bench.ecu.swallow_tester_present(3);

    let report = task.await.unwrap();
    assert_eq!(report.phase, FlashPhase::Failed);
    assert!(report.blocks_written < report.blocks_total);
    assert!(
        matches!(
            report.error,
            Some(FlashError::SessionLost { .. })
                | Some(FlashError::Diag(redline_uds::DiagError::Disconnected))
        ),
        "unexpected error: {:?}",
        report.error
    );
}

#[tokio::test]
async fn test_cancel_between_blocks() {
    let bench = slow_bench(40);
    let (manager, _) = manager_for(&bench);
    let image = test_image(1024);

    let task = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let options = FlashOptions {
                backup: false,
                ..FlashOptions::default()
            };
            manager.flash(&image, &options).await
        })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    manager.cancel();

    let report = task.await.unwrap();
    assert_eq!(report.phase, FlashPhase::Failed);
    assert!(matches!(report.error, Some(FlashError::Cancelled { .. })));
    assert!(report.blocks_written < report.blocks_total);
}

#[tokio::test]
async fn test_brick_recovery_replays_latest_backup() {
    let bench = bench();
    let (manager, _) = manager_for(&bench);
    let original = bench.ecu.memory();

    // A successful run leaves a backup of the pre-flash content behind
    let report = manager.flash(&test_image(256), &FlashOptions::default()).await;
    assert!(report.succeeded());

    // Brick it: garbage memory, session control refused
    bench.ecu.load_memory(&[0xFF; 256]);
    bench.ecu.stick_in_bootloader();

    let report = manager.recover(None).await;
    assert!(report.succeeded(), "recovery failed: {:?}", report.error);
    assert!(!bench.ecu.is_bootloader_stuck());

    // The replayed image is the original content, checksum re-patched
    let engine = bench_profile().checksum_engine();
    let expected = engine.patch(&original[..256]).unwrap();
    assert_eq!(bench.ecu.memory()[..256], expected[..]);
    assert_eq!(bench.ecu.active_session(), 0x01);
}
