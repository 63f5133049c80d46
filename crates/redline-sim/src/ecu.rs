//! In-memory bench ECU.
//!
//! Implements the UDS wire contract the stack speaks, byte for byte,
//! with enough fault injection to exercise the unhappy paths: swallowed
//! tester-present responses, corrupted readbacks, busy storms, and a
//! bootloader-stuck mode for brick recovery drills.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use redline_security::{EcuAccess27, SeedKeyAlgorithm};
use redline_uds::uds::{
    dtc_group, dtc_sub_function, routine_ctl, service_id, session_kind, standard_did, Nrc,
    ADDR_FORMAT_4, ADDR_LEN_FORMAT_44,
};

/// Static bench ECU parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEcuConfig {
    #[serde(default = "default_base_address")]
    pub base_address: u32,
    #[serde(default = "default_memory_size")]
    pub memory_size: usize,
    /// Security level the flash pipeline unlocks
    #[serde(default = "default_flash_level")]
    pub flash_level: u8,
    /// Fixed seed handed out for the flash level
    #[serde(default = "default_seed")]
    pub seed: Vec<u8>,
    #[serde(default = "default_vin")]
    pub vin: String,
    #[serde(default = "default_reset_routine")]
    pub reset_routine_id: u16,
    #[serde(default = "default_self_check_routine")]
    pub self_check_routine_id: u16,
}

fn default_base_address() -> u32 {
    0x1000
}
fn default_memory_size() -> usize {
    1024
}
fn default_flash_level() -> u8 {
    0x05
}
fn default_seed() -> Vec<u8> {
    vec![0xA1, 0xB2, 0xC3, 0xD4]
}
fn default_vin() -> String {
    "1HGCM82633A123456".to_string()
}
fn default_reset_routine() -> u16 {
    0xFF00
}
fn default_self_check_routine() -> u16 {
    0xFF01
}

impl Default for SimEcuConfig {
    fn default() -> Self {
        Self {
            base_address: default_base_address(),
            memory_size: default_memory_size(),
            flash_level: default_flash_level(),
            seed: default_seed(),
            vin: default_vin(),
            reset_routine_id: default_reset_routine(),
            self_check_routine_id: default_self_check_routine(),
        }
    }
}

/// The simulated ECU. An empty response vector means "no frame sent"
/// (suppressed tester present, injected drops).
pub struct SimEcu {
    config: SimEcuConfig,
    memory: RwLock<Vec<u8>>,
    session: AtomicU8,
    unlocked_level: RwLock<Option<u8>>,
    pending_seed: RwLock<Option<Vec<u8>>>,
    parameters: RwLock<HashMap<u16, Vec<u8>>>,
    /// (high, mid, low, status) records
    dtcs: RwLock<Vec<[u8; 4]>>,

    // Fault injection
    swallow_tester_present: AtomicUsize,
    busy_next: AtomicUsize,
    corrupt_read_address: Mutex<Option<u32>>,
    bootloader_stuck: AtomicBool,
}

impl SimEcu {
    pub fn new(config: SimEcuConfig) -> Self {
        // Test-pattern memory so dumps are recognizable
        let memory: Vec<u8> = (0..config.memory_size).map(|i| (i % 256) as u8).collect();

        let mut parameters = HashMap::new();
        parameters.insert(standard_did::VIN, config.vin.as_bytes().to_vec());
        parameters.insert(
            standard_did::ECU_SOFTWARE_VERSION,
            b"RL-SIM 1.0".to_vec(),
        );
        parameters.insert(standard_did::ECU_HARDWARE_NUMBER, b"SIM-ECU-01".to_vec());
        // Coolant temperature, 0x1A40 raw
        parameters.insert(0xF40C, vec![0x1A, 0x40]);

        info!(
            base = format!("0x{:08X}", config.base_address),
            memory = config.memory_size,
            "Bench ECU created"
        );

        Self {
            config,
            memory: RwLock::new(memory),
            session: AtomicU8::new(session_kind::DEFAULT),
            unlocked_level: RwLock::new(None),
            pending_seed: RwLock::new(None),
            parameters: RwLock::new(parameters),
            dtcs: RwLock::new(vec![
                // P0301 cylinder 1 misfire, active
                [0x03, 0x01, 0x00, 0x09],
                // U0100 lost communication, pending
                [0xC1, 0x00, 0x00, 0x04],
            ]),
            swallow_tester_present: AtomicUsize::new(0),
            busy_next: AtomicUsize::new(0),
            corrupt_read_address: Mutex::new(None),
            bootloader_stuck: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SimEcuConfig {
        &self.config
    }

    /// Copy of the simulated flash memory (test assertions)
    pub fn memory(&self) -> Vec<u8> {
        self.memory.read().clone()
    }

    pub fn load_memory(&self, image: &[u8]) {
        let mut memory = self.memory.write();
        let len = image.len().min(memory.len());
        memory[..len].copy_from_slice(&image[..len]);
    }

    pub fn active_session(&self) -> u8 {
        self.session.load(Ordering::SeqCst)
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked_level.read().is_some()
    }

    pub fn set_parameter(&self, did: u16, data: Vec<u8>) {
        self.parameters.write().insert(did, data);
    }

    // -------------------------------------------------------------------------
    // Fault injection
    // -------------------------------------------------------------------------

    /// Swallow the next `count` tester-present requests (no response)
    pub fn swallow_tester_present(&self, count: usize) {
        self.swallow_tester_present.store(count, Ordering::SeqCst);
    }

    /// Answer the next `count` non-keepalive requests with BusyRepeatRequest
    pub fn respond_busy(&self, count: usize) {
        self.busy_next.store(count, Ordering::SeqCst);
    }

    /// Corrupt every memory read whose range covers `address`
    pub fn corrupt_reads_at(&self, address: u32) {
        *self.corrupt_read_address.lock() = Some(address);
    }

    pub fn clear_read_corruption(&self) {
        *self.corrupt_read_address.lock() = None;
    }

    /// Enter the bootloader-stuck state: every session-control request is
    /// refused until the reset routine runs
    pub fn stick_in_bootloader(&self) {
        self.bootloader_stuck.store(true, Ordering::SeqCst);
    }

    pub fn is_bootloader_stuck(&self) -> bool {
        self.bootloader_stuck.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Request processing
    // -------------------------------------------------------------------------

    /// Process one request frame; empty vec = no response frame
    pub fn process_request(&self, request: &[u8]) -> Vec<u8> {
        let Some(&sid) = request.first() else {
            return negative(0x00, Nrc::IncorrectMessageLengthOrFormat);
        };

        // Busy storms hit everything except keepalive
        if sid != service_id::TESTER_PRESENT && self.consume(&self.busy_next) {
            debug!(sid = format!("0x{:02X}", sid), "Injected busy response");
            return negative(sid, Nrc::BusyRepeatRequest);
        }

        match sid {
            service_id::DIAGNOSTIC_SESSION_CONTROL => self.handle_session_control(request),
            service_id::SECURITY_ACCESS => self.handle_security_access(request),
            service_id::READ_DATA_BY_ID => self.handle_read_parameter(request),
            service_id::WRITE_DATA_BY_ID => self.handle_write_parameter(request),
            service_id::READ_MEMORY_BY_ADDRESS => self.handle_read_memory(request),
            service_id::TRANSFER_DATA => self.handle_write_memory(request),
            service_id::ROUTINE_CONTROL => self.handle_routine_control(request),
            service_id::READ_DTC_INFO => self.handle_read_dtcs(request),
            service_id::CLEAR_DIAGNOSTIC_INFO => self.handle_clear_dtcs(request),
            service_id::TESTER_PRESENT => self.handle_tester_present(request),
            _ => negative(sid, Nrc::ServiceNotSupported),
        }
    }

    fn consume(&self, counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn handle_session_control(&self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::DIAGNOSTIC_SESSION_CONTROL;
        let Some(&kind) = request.get(1) else {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        };

        if self.bootloader_stuck.load(Ordering::SeqCst) {
            debug!("Bootloader stuck: refusing session control");
            return negative(sid, Nrc::ConditionsNotCorrect);
        }

        match kind {
            session_kind::DEFAULT | session_kind::EXTENDED => {}
            session_kind::PROGRAMMING => {
                // Programming entry requires an unlocked tester
                if !self.is_unlocked() {
                    return negative(sid, Nrc::SecurityAccessDenied);
                }
            }
            _ => return negative(sid, Nrc::SubFunctionNotSupported),
        }

        let previous = self.session.swap(kind, Ordering::SeqCst);
        if previous != kind {
            // ISO 14229: session change relocks security
            *self.unlocked_level.write() = None;
            *self.pending_seed.write() = None;
        }
        info!(session = format!("0x{:02X}", kind), "Session changed");
        // [kind, P2 = 25 ms, P2* = 500 ms]
        positive(sid, &[kind, 0x00, 0x19, 0x01, 0xF4])
    }

    fn handle_security_access(&self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::SECURITY_ACCESS;
        let Some(&sub) = request.get(1) else {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        };
        if self.active_session() == session_kind::DEFAULT {
            return negative(sid, Nrc::ServiceNotSupportedInActiveSession);
        }

        if sub % 2 == 1 {
            // Seed request
            let level = sub / 2 + 1;
            if level != self.config.flash_level {
                return negative(sid, Nrc::SubFunctionNotSupported);
            }
            if *self.unlocked_level.read() == Some(level) {
                // Already unlocked: all-zero seed
                let mut data = vec![sub];
                data.extend(std::iter::repeat(0).take(self.config.seed.len()));
                return positive(sid, &data);
            }
            *self.pending_seed.write() = Some(self.config.seed.clone());
            debug!(level, seed = %hex::encode(&self.config.seed), "Seed issued");
            let mut data = vec![sub];
            data.extend_from_slice(&self.config.seed);
            positive(sid, &data)
        } else {
            // Key submission
            let level = sub / 2;
            let Some(seed) = self.pending_seed.write().take() else {
                return negative(sid, Nrc::RequestSequenceError);
            };
            let expected = match EcuAccess27.derive(&seed, None) {
                Ok(key) => key,
                Err(_) => return negative(sid, Nrc::GeneralReject),
            };
            if request[2..] == expected[..] {
                *self.unlocked_level.write() = Some(level);
                info!(level, "Security access granted");
                positive(sid, &[sub])
            } else {
                debug!(level, "Invalid key");
                negative(sid, Nrc::InvalidKey)
            }
        }
    }

    fn handle_read_parameter(&self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::READ_DATA_BY_ID;
        if request.len() < 3 {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        }
        let did = u16::from_be_bytes([request[1], request[2]]);
        match self.parameters.read().get(&did) {
            Some(value) => {
                let mut data = vec![request[1], request[2]];
                data.extend_from_slice(value);
                positive(sid, &data)
            }
            None => negative(sid, Nrc::RequestOutOfRange),
        }
    }

    fn handle_write_parameter(&self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::WRITE_DATA_BY_ID;
        if request.len() < 4 {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        }
        if !self.is_unlocked() {
            return negative(sid, Nrc::SecurityAccessDenied);
        }
        let did = u16::from_be_bytes([request[1], request[2]]);
        self.parameters.write().insert(did, request[3..].to_vec());
        positive(sid, &[request[1], request[2]])
    }

    fn handle_read_memory(&self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::READ_MEMORY_BY_ADDRESS;
        if request.len() != 10 || request[1] != ADDR_LEN_FORMAT_44 {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        }
        let address = u32::from_be_bytes([request[2], request[3], request[4], request[5]]);
        let len = u32::from_be_bytes([request[6], request[7], request[8], request[9]]) as usize;

        let Some(offset) = self.offset_of(address, len) else {
            return negative(sid, Nrc::RequestOutOfRange);
        };

        let mut data = self.memory.read()[offset..offset + len].to_vec();
        if let Some(corrupt) = *self.corrupt_read_address.lock() {
            if corrupt >= address && (corrupt as u64) < address as u64 + len as u64 {
                let at = (corrupt - address) as usize;
                data[at] ^= 0x01;
                debug!(address = format!("0x{:08X}", corrupt), "Corrupted readback");
            }
        }

        positive(sid, &data)
    }

    fn handle_write_memory(&self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::TRANSFER_DATA;
        if request.len() < 7 || request[1] != ADDR_FORMAT_4 {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        }
        if !self.is_unlocked() {
            return negative(sid, Nrc::SecurityAccessDenied);
        }
        let address = u32::from_be_bytes([request[2], request[3], request[4], request[5]]);
        let data = &request[6..];

        let Some(offset) = self.offset_of(address, data.len()) else {
            return negative(sid, Nrc::RequestOutOfRange);
        };
        self.memory.write()[offset..offset + data.len()].copy_from_slice(data);
        positive(sid, &request[1..6])
    }

    fn handle_routine_control(&self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::ROUTINE_CONTROL;
        if request.len() < 4 {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        }
        if request[1] != routine_ctl::START_ROUTINE {
            return negative(sid, Nrc::SubFunctionNotSupported);
        }
        let routine_id = u16::from_be_bytes([request[2], request[3]]);

        if routine_id == self.config.reset_routine_id {
            // The reset vector is reachable even when locked or stuck
            self.bootloader_stuck.store(false, Ordering::SeqCst);
            self.session.store(session_kind::DEFAULT, Ordering::SeqCst);
            *self.unlocked_level.write() = None;
            *self.pending_seed.write() = None;
            info!("Bootloader reset routine executed");
            return positive(sid, &request[1..4]);
        }

        if !self.is_unlocked() {
            return negative(sid, Nrc::SecurityAccessDenied);
        }
        if routine_id == self.config.self_check_routine_id {
            // 0x00 = self check passed
            let mut data = request[1..4].to_vec();
            data.push(0x00);
            return positive(sid, &data);
        }
        negative(sid, Nrc::RequestOutOfRange)
    }

    fn handle_read_dtcs(&self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::READ_DTC_INFO;
        if request.len() < 3 || request[1] != dtc_sub_function::REPORT_DTC_BY_STATUS_MASK {
            return negative(sid, Nrc::SubFunctionNotSupported);
        }
        let mask = request[2];
        let mut data = vec![dtc_sub_function::REPORT_DTC_BY_STATUS_MASK, 0xFF];
        for record in self.dtcs.read().iter() {
            if record[3] & mask != 0 || mask == 0xFF {
                data.extend_from_slice(record);
            }
        }
        positive(sid, &data)
    }

    fn handle_clear_dtcs(&self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::CLEAR_DIAGNOSTIC_INFO;
        if request.len() != 4 {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        }
        let group = u32::from_be_bytes([0, request[1], request[2], request[3]]);
        let mut dtcs = self.dtcs.write();
        let before = dtcs.len();
        if group == dtc_group::ALL {
            dtcs.clear();
        } else {
            let category = ((group >> 22) & 0x03) as u8;
            dtcs.retain(|record| (record[0] >> 6) & 0x03 != category);
        }
        info!(cleared = before - dtcs.len(), "DTCs cleared");
        positive(sid, &[])
    }

    fn handle_tester_present(&self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::TESTER_PRESENT;
        if self.consume(&self.swallow_tester_present) {
            debug!("Swallowed tester present");
            return Vec::new();
        }
        let sub = request.get(1).copied().unwrap_or(0x00);
        if sub & 0x80 != 0 {
            return Vec::new();
        }
        positive(sid, &[sub & 0x7F])
    }

    fn offset_of(&self, address: u32, len: usize) -> Option<usize> {
        let offset = address.checked_sub(self.config.base_address)? as usize;
        let end = offset.checked_add(len)?;
        (end <= self.memory.read().len()).then_some(offset)
    }
}

fn positive(sid: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(service_id::positive(sid));
    response.extend_from_slice(data);
    response
}

fn negative(sid: u8, nrc: Nrc) -> Vec<u8> {
    vec![service_id::NEGATIVE_RESPONSE, sid, nrc.into()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unlocked_ecu() -> SimEcu {
        let ecu = SimEcu::new(SimEcuConfig::default());
        assert_eq!(
            ecu.process_request(&[0x10, 0x03])[0],
            0x50,
            "extended entry"
        );
        let seed_resp = ecu.process_request(&[0x27, 0x09]);
        assert_eq!(seed_resp[0], 0x67);
        let key = EcuAccess27.derive(&seed_resp[2..], None).unwrap();
        let mut key_req = vec![0x27, 0x0A];
        key_req.extend_from_slice(&key);
        assert_eq!(ecu.process_request(&key_req), vec![0x67, 0x0A]);
        ecu
    }

    #[test]
    fn test_seed_key_handshake() {
        let ecu = unlocked_ecu();
        assert!(ecu.is_unlocked());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let ecu = SimEcu::new(SimEcuConfig::default());
        ecu.process_request(&[0x10, 0x03]);
        ecu.process_request(&[0x27, 0x09]);
        let resp = ecu.process_request(&[0x27, 0x0A, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(resp, vec![0x7F, 0x27, 0x35]);
        assert!(!ecu.is_unlocked());
    }

    #[test]
    fn test_zero_seed_when_already_unlocked() {
        let ecu = unlocked_ecu();
        let resp = ecu.process_request(&[0x27, 0x09]);
        assert_eq!(resp, vec![0x67, 0x09, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_session_change_relocks() {
        let ecu = unlocked_ecu();
        ecu.process_request(&[0x10, 0x02]);
        assert!(!ecu.is_unlocked());
    }

    #[test]
    fn test_programming_requires_unlock() {
        let ecu = SimEcu::new(SimEcuConfig::default());
        ecu.process_request(&[0x10, 0x03]);
        let resp = ecu.process_request(&[0x10, 0x02]);
        assert_eq!(resp, vec![0x7F, 0x10, 0x33]);
    }

    #[test]
    fn test_memory_round_trip() {
        let ecu = unlocked_ecu();
        let mut write = vec![0x36, 0x04, 0x00, 0x00, 0x10, 0x08];
        write.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(
            ecu.process_request(&write),
            vec![0x76, 0x04, 0x00, 0x00, 0x10, 0x08]
        );

        let read = ecu.process_request(&[0x23, 0x44, 0, 0, 0x10, 0x08, 0, 0, 0, 4]);
        assert_eq!(read, vec![0x63, 0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_locked_write_denied() {
        let ecu = SimEcu::new(SimEcuConfig::default());
        let resp = ecu.process_request(&[0x36, 0x04, 0, 0, 0x10, 0, 0xAA]);
        assert_eq!(resp, vec![0x7F, 0x36, 0x33]);
    }

    #[test]
    fn test_read_out_of_range() {
        let ecu = SimEcu::new(SimEcuConfig::default());
        let resp = ecu.process_request(&[0x23, 0x44, 0, 0, 0x0F, 0, 0, 0, 0, 4]);
        assert_eq!(resp, vec![0x7F, 0x23, 0x31]);
    }

    #[test]
    fn test_corrupted_readback() {
        let ecu = unlocked_ecu();
        ecu.corrupt_reads_at(0x1002);
        let clean = ecu.memory()[2];
        let read = ecu.process_request(&[0x23, 0x44, 0, 0, 0x10, 0, 0, 0, 0, 4]);
        assert_eq!(read[3], clean ^ 0x01);
        // The stored memory itself is untouched
        assert_eq!(ecu.memory()[2], clean);
    }

    #[test]
    fn test_bootloader_stuck_and_reset() {
        let ecu = SimEcu::new(SimEcuConfig::default());
        ecu.stick_in_bootloader();
        assert_eq!(ecu.process_request(&[0x10, 0x03]), vec![0x7F, 0x10, 0x22]);

        // Reset routine works even while stuck and locked
        let resp = ecu.process_request(&[0x31, 0x01, 0xFF, 0x00]);
        assert_eq!(resp, vec![0x71, 0x01, 0xFF, 0x00]);
        assert!(!ecu.is_bootloader_stuck());
        assert_eq!(ecu.process_request(&[0x10, 0x03])[0], 0x50);
    }

    #[test]
    fn test_swallowed_tester_present() {
        let ecu = SimEcu::new(SimEcuConfig::default());
        ecu.swallow_tester_present(2);
        assert!(ecu.process_request(&[0x3E, 0x00]).is_empty());
        assert!(ecu.process_request(&[0x3E, 0x00]).is_empty());
        assert_eq!(ecu.process_request(&[0x3E, 0x00]), vec![0x7E, 0x00]);
    }

    #[test]
    fn test_busy_injection_spares_keepalive() {
        let ecu = SimEcu::new(SimEcuConfig::default());
        ecu.respond_busy(1);
        assert_eq!(ecu.process_request(&[0x3E, 0x00]), vec![0x7E, 0x00]);
        assert_eq!(
            ecu.process_request(&[0x22, 0xF1, 0x90]),
            vec![0x7F, 0x22, 0x21]
        );
        // Budget spent
        assert_eq!(ecu.process_request(&[0x22, 0xF1, 0x90])[0], 0x62);
    }

    #[test]
    fn test_dtc_mask_filter() {
        let ecu = SimEcu::new(SimEcuConfig::default());
        // Confirmed-only mask matches P0301 (status 0x09) but not U0100 (0x04)
        let resp = ecu.process_request(&[0x19, 0x02, 0x08]);
        assert_eq!(resp, vec![0x59, 0x02, 0xFF, 0x03, 0x01, 0x00, 0x09]);
    }

    #[test]
    fn test_clear_dtcs_by_group() {
        let ecu = SimEcu::new(SimEcuConfig::default());
        // Powertrain group: clears P0301, keeps U0100
        assert_eq!(ecu.process_request(&[0x14, 0x00, 0x00, 0x00]), vec![0x54]);
        let resp = ecu.process_request(&[0x19, 0x02, 0xFF]);
        assert_eq!(resp, vec![0x59, 0x02, 0xFF, 0xC1, 0x00, 0x00, 0x04]);
    }
}
