//! Integration tests for the redline stack.
//!
//! Everything runs in-process: a `DiagnosticSession` drives the bench
//! ECU through the `SimTransport` loopback, so the full wire contract is
//! exercised without hardware.
//!
//! ```bash
//! cargo test -p redline-tests
//! ```
//!
//! Test structure:
//! - `session_e2e_test.rs` - session control, security access, DTCs,
//!   keepalive loss and retry behavior over the loopback
//! - `tune_e2e_test.rs` - dump, decode, edit, write-back of a
//!   calibration map against live ECU memory
//! - `flash_e2e_test.rs` - full reflash runs: happy path, corrupted
//!   readback, session loss, cancellation, brick recovery

use std::sync::Arc;

use redline_cal::ChecksumAlgorithm;
use redline_flash::{ChecksumSpec, EcuProfile};
use redline_security::SecurityLevel;
use redline_sim::{SimEcu, SimEcuConfig, SimTransport};
use redline_uds::{
    DiagnosticSession, KeepaliveConfig, RetryConfig, SessionConfig, TimingConfig,
};

/// One bench ECU wired to a session, with handles kept for fault
/// injection and memory assertions.
pub struct Bench {
    pub ecu: Arc<SimEcu>,
    pub link: Arc<SimTransport>,
    pub session: DiagnosticSession,
}

/// Session config with timings tightened for tests
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        timing: TimingConfig {
            request_timeout_ms: 200,
            response_pending_timeout_ms: 2000,
        },
        retry: RetryConfig {
            max_attempts: 3,
            backoff_ms: 10,
        },
        keepalive: KeepaliveConfig {
            enabled: true,
            interval_ms: 50,
            suppress_response: false,
            max_failures: 3,
        },
        ..SessionConfig::default()
    }
}

pub fn bench() -> Bench {
    bench_with(fast_config())
}

pub fn bench_with(config: SessionConfig) -> Bench {
    let ecu = Arc::new(SimEcu::new(SimEcuConfig::default()));
    let link = Arc::new(SimTransport::new(ecu.clone()));
    let session = DiagnosticSession::new(link.clone(), config);
    Bench { ecu, link, session }
}

/// Profile matching the bench ECU's defaults, with a small block size so
/// a few hundred bytes span several blocks.
pub fn bench_profile() -> EcuProfile {
    EcuProfile {
        ecu_type: "demo_ecm".to_string(),
        base_address: 0x1000,
        security_levels: vec![SecurityLevel {
            level: 5,
            seed_len: 4,
            key_len: 4,
            algorithm: "ecu_access_27".to_string(),
            vin_required: false,
        }],
        flash_level: 5,
        checksum: ChecksumSpec {
            algorithm: ChecksumAlgorithm::Crc32,
            field_offset: 8,
        },
        block_size: 64,
        reset_routine_id: 0xFF00,
        self_check_routine_id: Some(0xFF01),
        bootloader_wait_ms: 10,
    }
}

/// Deterministic non-trivial image content
pub fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(7) % 251) as u8).collect()
}
