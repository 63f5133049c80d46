//! The diagnostic session: request pipeline, security handshake, memory
//! and parameter I/O, routine control, keepalive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{SecuritySubState, SessionState};
use crate::config::SessionConfig;
use crate::transport::{TransportError, TransportLink};
use crate::uds::{
    dtc, dtc_sub_function, routine_ctl, service_id, standard_did, DiagError, DiagnosticRequest,
    DiagnosticResponse, Dtc, Nrc, SessionKind, ADDR_FORMAT_4, ADDR_LEN_FORMAT_44,
};
use redline_security::{SecurityError, SecurityLevel};

/// Levels come in from config and YAML profiles, so the one-byte
/// sub-function space is enforced here rather than assumed.
fn check_security_level(level: u8) -> Result<(), DiagError> {
    if level == 0 || level > SecurityLevel::MAX_LEVEL {
        return Err(DiagError::Security(SecurityError::InvalidLevel { level }));
    }
    Ok(())
}

/// Security bookkeeping: pending seed, rejection counter, cooldown.
#[derive(Debug, Clone)]
struct SecurityAccess {
    sub_state: SecuritySubState,
    /// Seed waiting for its key, with the level it was requested for
    pending_seed: Option<(u8, Vec<u8>)>,
    failed_attempts: u32,
    cooldown_until: Option<Instant>,
}

impl Default for SecurityAccess {
    fn default() -> Self {
        Self {
            sub_state: SecuritySubState::Locked,
            pending_seed: None,
            failed_attempts: 0,
            cooldown_until: None,
        }
    }
}

struct SessionInner {
    link: Arc<dyn TransportLink>,
    config: SessionConfig,
    state: Arc<RwLock<SessionState>>,
    security: Arc<RwLock<SecurityAccess>>,
    /// Exclusive I/O lock: one request/response pair at a time. The
    /// keepalive task takes it only for its own single exchange.
    io: Arc<tokio::sync::Mutex<()>>,
    keepalive: parking_lot::Mutex<Option<JoinHandle<()>>>,
    flash_mode: Arc<AtomicBool>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.keepalive.get_mut().take() {
            handle.abort();
        }
    }
}

/// Releases the exclusive flash-mode claim on drop.
pub struct FlashModeGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for FlashModeGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Service-layer state machine over an exclusively-owned `TransportLink`.
///
/// Cloning is cheap and shares the same session; all clones serialize
/// their exchanges through one I/O lock.
#[derive(Clone)]
pub struct DiagnosticSession {
    inner: Arc<SessionInner>,
}

impl DiagnosticSession {
    pub fn new(link: Arc<dyn TransportLink>, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                link,
                config,
                state: Arc::new(RwLock::new(SessionState::Default)),
                security: Arc::new(RwLock::new(SecurityAccess::default())),
                io: Arc::new(tokio::sync::Mutex::new(())),
                keepalive: parking_lot::Mutex::new(None),
                flash_mode: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn security_sub_state(&self) -> SecuritySubState {
        self.inner.security.read().sub_state
    }

    /// Claim the exclusive flash-mode lock. While the guard lives,
    /// realtime polling is suspended.
    pub fn enter_flash_mode(&self) -> FlashModeGuard {
        self.inner.flash_mode.store(true, Ordering::SeqCst);
        FlashModeGuard {
            flag: self.inner.flash_mode.clone(),
        }
    }

    pub fn flash_mode_active(&self) -> bool {
        self.inner.flash_mode.load(Ordering::SeqCst)
    }

    /// Reset local bookkeeping to default-session/locked without sending
    /// anything, e.g. after an ECU reset or power cycle.
    pub fn mark_reset(&self) {
        self.stop_keepalive();
        *self.inner.state.write() = SessionState::Default;
        *self.inner.security.write() = SecurityAccess::default();
        info!("Session state reset to default (ECU reset)");
    }

    // =========================================================================
    // Request pipeline
    // =========================================================================

    /// One send + matching receive under the I/O lock, with
    /// ResponsePending (0x78) handled by extending the deadline.
    async fn exchange_once(
        &self,
        request: &DiagnosticRequest,
        allow_disconnected: bool,
    ) -> Result<DiagnosticResponse, DiagError> {
        if !allow_disconnected && self.state() == SessionState::Disconnected {
            return Err(DiagError::Disconnected);
        }

        let timing = &self.inner.config.timing;
        let _io = self.inner.io.lock().await;

        let bytes = request.encode();
        self.inner.link.send(request.target, &bytes).await?;

        let mut deadline = Instant::now() + Duration::from_millis(timing.request_timeout_ms);
        let pending_deadline =
            Instant::now() + Duration::from_millis(timing.response_pending_timeout_ms);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DiagError::Transport(TransportError::Timeout(
                    timing.request_timeout_ms,
                )));
            }

            let frame = self.inner.link.receive(remaining).await?;

            // ResponsePending is not an error: keep listening for the
            // final response under the longer deadline.
            if frame.payload.len() >= 3
                && frame.payload[0] == service_id::NEGATIVE_RESPONSE
                && frame.payload[1] == request.service
                && Nrc::from(frame.payload[2]) == Nrc::ResponsePending
            {
                debug!(service = format!("0x{:02X}", request.service), "Response pending");
                deadline = pending_deadline;
                continue;
            }

            return DiagnosticResponse::parse(
                request.service,
                frame.source,
                &frame.payload,
                frame.timestamp,
            );
        }
    }

    /// Full pipeline: retry retryable NRCs with backoff; optionally retry
    /// timeouts (reads only: a timed-out write may have executed).
    async fn exchange_with(
        &self,
        request: DiagnosticRequest,
        retry_on_timeout: bool,
        allow_disconnected: bool,
    ) -> Result<DiagnosticResponse, DiagError> {
        let retry = &self.inner.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = self.exchange_once(&request, allow_disconnected).await;

            let should_retry = match &result {
                Err(DiagError::NegativeResponse { nrc, .. }) => nrc.is_retryable(),
                Err(DiagError::Transport(TransportError::Timeout(_))) => retry_on_timeout,
                _ => false,
            };

            if should_retry && attempt < retry.max_attempts {
                let backoff = retry
                    .backoff_ms
                    .saturating_mul(1u64 << (attempt - 1).min(4));
                debug!(
                    service = format!("0x{:02X}", request.service),
                    attempt, backoff_ms = backoff, "Retrying request"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                continue;
            }

            return result;
        }
    }

    async fn exchange(&self, request: DiagnosticRequest) -> Result<DiagnosticResponse, DiagError> {
        self.exchange_with(request, false, false).await
    }

    fn request(&self, service: u8) -> DiagnosticRequest {
        DiagnosticRequest::new(service, self.inner.config.target_id)
    }

    // =========================================================================
    // Session control (0x10)
    // =========================================================================

    /// Transition the diagnostic session. Every transition relocks
    /// security; `Programming` is rejected locally unless the session is
    /// in `Extended` and unlocked at the configured flash level.
    pub async fn start_session(&self, kind: SessionKind) -> Result<(), DiagError> {
        if kind == SessionKind::Programming {
            let unlocked_for_flash = self.security_sub_state()
                == SecuritySubState::Unlocked(self.inner.config.flash_level);
            if self.state() != SessionState::Extended || !unlocked_for_flash {
                return Err(DiagError::TransitionRejected {
                    kind: "programming",
                    reason: "requires extended session unlocked at the flash level",
                });
            }
        }

        let request = self
            .request(service_id::DIAGNOSTIC_SESSION_CONTROL)
            .with_sub_function(kind.sub_function());
        let response = self.exchange_with(request, false, true).await?;

        let echo = response.data_after(0)?;
        if echo.first() != Some(&kind.sub_function()) {
            return Err(DiagError::MalformedResponse {
                service: service_id::DIAGNOSTIC_SESSION_CONTROL,
                detail: "session kind echo mismatch".to_string(),
            });
        }

        let new_state = SessionState::from_kind(kind);
        *self.inner.state.write() = new_state;

        // Security relocks on every session transition
        {
            let mut security = self.inner.security.write();
            security.sub_state = SecuritySubState::Locked;
            security.pending_seed = None;
        }

        if new_state.needs_keepalive() {
            self.start_keepalive();
        } else {
            self.stop_keepalive();
        }

        info!(session = %new_state, "Session changed (security re-locked)");
        Ok(())
    }

    // =========================================================================
    // Security access (0x27)
    // =========================================================================

    fn check_cooldown(&self) -> Result<(), SecurityError> {
        let security = self.inner.security.read();
        if let Some(until) = security.cooldown_until {
            let now = Instant::now();
            if now < until {
                return Err(SecurityError::LockoutActive {
                    attempts: security.failed_attempts,
                    remaining_secs: (until - now).as_secs().max(1),
                });
            }
        }
        Ok(())
    }

    /// Request the seed for a level (odd sub-function). An all-zero seed
    /// means the level is already unlocked.
    pub async fn request_seed(&self, level: u8) -> Result<Vec<u8>, DiagError> {
        check_security_level(level)?;
        self.check_cooldown()?;
        if !self.state().allows_security_access() {
            return Err(DiagError::TransitionRejected {
                kind: "security access",
                reason: "requires extended or programming session",
            });
        }

        let sub = level * 2 - 1;
        let request = self.request(service_id::SECURITY_ACCESS).with_sub_function(sub);
        let response = self.exchange(request).await?;

        let seed = response.data_after(1)?.to_vec();
        if seed.is_empty() || seed.iter().all(|&b| b == 0) {
            debug!(level, "Zero seed: level already unlocked");
            let mut security = self.inner.security.write();
            security.sub_state = SecuritySubState::Unlocked(level);
            security.pending_seed = None;
            return Ok(Vec::new());
        }

        let mut security = self.inner.security.write();
        security.pending_seed = Some((level, seed.clone()));
        info!(level, seed_len = seed.len(), "Security seed received");
        Ok(seed)
    }

    /// Submit the derived key (even sub-function). Three consecutive
    /// rejections engage the lockout cooldown.
    pub async fn send_key(&self, level: u8, key: &[u8]) -> Result<(), DiagError> {
        check_security_level(level)?;
        self.check_cooldown()?;
        {
            let security = self.inner.security.read();
            match &security.pending_seed {
                Some((l, _)) if *l == level => {}
                _ => return Err(DiagError::Security(SecurityError::NoPendingSeed { level })),
            }
        }

        let sub = level * 2;
        let request = self
            .request(service_id::SECURITY_ACCESS)
            .with_sub_function(sub)
            .with_payload(key.to_vec());

        match self.exchange(request).await {
            Ok(_) => {
                let mut security = self.inner.security.write();
                security.sub_state = SecuritySubState::Unlocked(level);
                security.pending_seed = None;
                security.failed_attempts = 0;
                security.cooldown_until = None;
                info!(level, "Security access granted");
                Ok(())
            }
            Err(DiagError::NegativeResponse { nrc, .. })
                if matches!(nrc, Nrc::InvalidKey | Nrc::SecurityAccessDenied) =>
            {
                let max = self.inner.config.security.max_key_attempts;
                let cooldown =
                    Duration::from_millis(self.inner.config.security.lockout_cooldown_ms);

                let mut security = self.inner.security.write();
                security.failed_attempts += 1;
                security.pending_seed = None;
                let attempts = security.failed_attempts;
                if attempts >= max {
                    security.cooldown_until = Some(Instant::now() + cooldown);
                    warn!(attempts, "Key rejected: lockout cooldown engaged");
                } else {
                    warn!(attempts, max_attempts = max, "Key rejected");
                }
                Err(DiagError::Security(SecurityError::KeyRejected {
                    attempts,
                    max_attempts: max,
                }))
            }
            Err(e) => Err(e),
        }
    }

    fn require_unlocked(&self, operation: &'static str) -> Result<(), DiagError> {
        if !self.security_sub_state().is_unlocked() {
            return Err(DiagError::Security(SecurityError::AccessLocked {
                operation,
            }));
        }
        Ok(())
    }

    // =========================================================================
    // Memory I/O (0x23 / 0x36)
    // =========================================================================

    /// ReadMemoryByAddress. Idempotent: retried on timeout.
    pub async fn read_memory(&self, address: u32, len: u32) -> Result<Vec<u8>, DiagError> {
        let mut payload = Vec::with_capacity(9);
        payload.push(ADDR_LEN_FORMAT_44);
        payload.extend_from_slice(&address.to_be_bytes());
        payload.extend_from_slice(&len.to_be_bytes());

        let request = self
            .request(service_id::READ_MEMORY_BY_ADDRESS)
            .with_payload(payload);
        let response = self.exchange_with(request, true, false).await?;

        if response.data.len() != len as usize {
            return Err(DiagError::MalformedResponse {
                service: service_id::READ_MEMORY_BY_ADDRESS,
                detail: format!("expected {} bytes, got {}", len, response.data.len()),
            });
        }
        Ok(response.data)
    }

    /// Address-keyed TransferData write. Rejected locally, with no frame
    /// sent, while security is locked. Never retried on timeout.
    pub async fn write_memory(&self, address: u32, data: &[u8]) -> Result<(), DiagError> {
        self.require_unlocked("write_memory")?;

        let mut payload = Vec::with_capacity(5 + data.len());
        payload.push(ADDR_FORMAT_4);
        payload.extend_from_slice(&address.to_be_bytes());
        payload.extend_from_slice(data);

        let request = self.request(service_id::TRANSFER_DATA).with_payload(payload);
        let response = self.exchange(request).await?;

        let echo = response.data_after(0)?;
        if echo.len() < 5 || echo[0] != ADDR_FORMAT_4 || echo[1..5] != address.to_be_bytes() {
            return Err(DiagError::MalformedResponse {
                service: service_id::TRANSFER_DATA,
                detail: "address echo mismatch".to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Parameter I/O (0x22 / 0x2E)
    // =========================================================================

    /// ReadDataByIdentifier. Idempotent: retried on timeout.
    pub async fn read_parameter(&self, did: u16) -> Result<Vec<u8>, DiagError> {
        let request = self
            .request(service_id::READ_DATA_BY_ID)
            .with_payload(did.to_be_bytes().to_vec());
        let response = self.exchange_with(request, true, false).await?;

        let echo = response.data_after(2)?;
        if response.data[0..2] != did.to_be_bytes() {
            return Err(DiagError::MalformedResponse {
                service: service_id::READ_DATA_BY_ID,
                detail: format!("DID echo mismatch for 0x{:04X}", did),
            });
        }
        Ok(echo.to_vec())
    }

    /// WriteDataByIdentifier, security-gated like `write_memory`.
    pub async fn write_parameter(&self, did: u16, data: &[u8]) -> Result<(), DiagError> {
        self.require_unlocked("write_parameter")?;

        let mut payload = did.to_be_bytes().to_vec();
        payload.extend_from_slice(data);
        let request = self.request(service_id::WRITE_DATA_BY_ID).with_payload(payload);
        let response = self.exchange(request).await?;

        response.data_after(2)?;
        Ok(())
    }

    /// Convenience read of the VIN (DID 0xF190)
    pub async fn read_vin(&self) -> Result<String, DiagError> {
        let data = self.read_parameter(standard_did::VIN).await?;
        Ok(String::from_utf8_lossy(&data).trim().to_string())
    }

    // =========================================================================
    // Routine control (0x31)
    // =========================================================================

    /// Start a routine and return its output bytes. Security-gated.
    pub async fn start_routine(&self, routine_id: u16, params: &[u8]) -> Result<Vec<u8>, DiagError> {
        self.require_unlocked("start_routine")?;
        self.routine_control(routine_id, params).await
    }

    /// Bootloader entry knob for brick recovery: a bootloader's reset
    /// vector is unauthenticated, so this variant bypasses the local
    /// security gate. Everything else goes through `start_routine`.
    pub async fn force_reset_routine(&self, routine_id: u16) -> Result<(), DiagError> {
        self.routine_control(routine_id, &[]).await?;
        Ok(())
    }

    async fn routine_control(&self, routine_id: u16, params: &[u8]) -> Result<Vec<u8>, DiagError> {
        let mut payload = routine_id.to_be_bytes().to_vec();
        payload.extend_from_slice(params);
        let request = self
            .request(service_id::ROUTINE_CONTROL)
            .with_sub_function(routine_ctl::START_ROUTINE)
            .with_payload(payload);
        let response = self.exchange(request).await?;

        let out = response.data_after(3)?;
        if response.data[0] != routine_ctl::START_ROUTINE
            || response.data[1..3] != routine_id.to_be_bytes()
        {
            return Err(DiagError::MalformedResponse {
                service: service_id::ROUTINE_CONTROL,
                detail: format!("routine 0x{:04X} echo mismatch", routine_id),
            });
        }
        Ok(out.to_vec())
    }

    // =========================================================================
    // DTC services (0x19 / 0x14)
    // =========================================================================

    /// Read DTCs matching a status mask (0x19 sub-function 0x02)
    pub async fn read_dtcs(&self, status_mask: u8) -> Result<Vec<Dtc>, DiagError> {
        let request = self
            .request(service_id::READ_DTC_INFO)
            .with_sub_function(dtc_sub_function::REPORT_DTC_BY_STATUS_MASK)
            .with_payload(vec![status_mask]);
        let response = self.exchange_with(request, true, false).await?;
        dtc::parse_dtc_by_status_mask(&response.data)
    }

    /// Clear diagnostic information for a DTC group (0x14)
    pub async fn clear_dtcs(&self, group: u32) -> Result<(), DiagError> {
        let bytes = group.to_be_bytes();
        let request = self
            .request(service_id::CLEAR_DIAGNOSTIC_INFO)
            .with_payload(vec![bytes[1], bytes[2], bytes[3]]);
        self.exchange(request).await?;
        Ok(())
    }

    // =========================================================================
    // Keepalive (0x3E)
    // =========================================================================

    /// Single tester-present exchange under the I/O lock
    pub async fn tester_present(&self) -> Result<(), DiagError> {
        if self.inner.config.keepalive.suppress_response {
            let _io = self.inner.io.lock().await;
            self.inner
                .link
                .send(self.inner.config.target_id, &[service_id::TESTER_PRESENT, 0x80])
                .await?;
            return Ok(());
        }

        let request = self
            .request(service_id::TESTER_PRESENT)
            .with_sub_function(0x00);
        self.exchange_with(request, false, false).await?;
        Ok(())
    }

    fn start_keepalive(&self) {
        let cfg = &self.inner.config.keepalive;
        if !cfg.enabled {
            return;
        }
        self.stop_keepalive();

        // The task clones only the pieces it needs so the session itself
        // can drop (and abort the task) without a reference cycle.
        let link = self.inner.link.clone();
        let state = self.inner.state.clone();
        let security = self.inner.security.clone();
        let io = self.inner.io.clone();
        let target = self.inner.config.target_id;
        let interval = Duration::from_millis(cfg.interval_ms);
        let timeout = Duration::from_millis(self.inner.config.timing.request_timeout_ms);
        let suppress = cfg.suppress_response;
        let max_failures = cfg.max_failures;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick, skip it

            let request: Vec<u8> = if suppress {
                vec![service_id::TESTER_PRESENT, 0x80]
            } else {
                vec![service_id::TESTER_PRESENT, 0x00]
            };
            let mut failures = 0u32;

            loop {
                ticker.tick().await;
                if !state.read().needs_keepalive() {
                    break;
                }

                let result: Result<(), TransportError> = async {
                    let _io = io.lock().await;
                    link.send(target, &request).await?;
                    if !suppress {
                        link.receive(timeout).await?;
                    }
                    Ok(())
                }
                .await;

                match result {
                    Ok(()) => {
                        failures = 0;
                        debug!("Tester present OK");
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(?e, failures, max_failures, "Tester present failed");
                        if failures >= max_failures {
                            *state.write() = SessionState::Disconnected;
                            *security.write() = SecurityAccess::default();
                            warn!("Keepalive exhausted: session disconnected");
                            break;
                        }
                    }
                }
            }
        });

        *self.inner.keepalive.lock() = Some(handle);
        debug!(interval_ms = cfg.interval_ms, "Keepalive started");
    }

    fn stop_keepalive(&self) {
        if let Some(handle) = self.inner.keepalive.lock().take() {
            handle.abort();
            debug!("Keepalive stopped");
        }
    }
}
