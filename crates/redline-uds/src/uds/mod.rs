//! UDS protocol layer: service ids, negative response codes, wire codec

pub mod dtc;
mod error;
mod nrc;
mod wire;

pub use dtc::{Dtc, DtcCategory, DtcStatus};
pub use error::DiagError;
pub use nrc::Nrc;
pub use wire::{DiagnosticRequest, DiagnosticResponse};

/// Standard UDS service id constants
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    pub const READ_DTC_INFO: u8 = 0x19;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const READ_MEMORY_BY_ADDRESS: u8 = 0x23;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const WRITE_DATA_BY_ID: u8 = 0x2E;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;

    /// Positive response id for a request service id
    pub const fn positive(sid: u8) -> u8 {
        sid.wrapping_add(0x40)
    }
}

/// DiagnosticSessionControl (0x10) sub-function values
pub mod session_kind {
    pub const DEFAULT: u8 = 0x01;
    pub const PROGRAMMING: u8 = 0x02;
    pub const EXTENDED: u8 = 0x03;
}

/// RoutineControl (0x31) sub-functions
pub mod routine_ctl {
    pub const START_ROUTINE: u8 = 0x01;
    pub const STOP_ROUTINE: u8 = 0x02;
    pub const REQUEST_ROUTINE_RESULTS: u8 = 0x03;
}

/// ReadDTCInformation (0x19) sub-functions
pub mod dtc_sub_function {
    pub const REPORT_DTC_BY_STATUS_MASK: u8 = 0x02;
}

/// DTC group addresses for ClearDiagnosticInformation (0x14)
pub mod dtc_group {
    pub const ALL: u32 = 0xFFFFFF;
    pub const POWERTRAIN: u32 = 0x000000;
    pub const CHASSIS: u32 = 0x400000;
    pub const BODY: u32 = 0x800000;
    pub const NETWORK: u32 = 0xC00000;
}

/// Standard UDS Data Identifiers (ISO 14229-1 Annex C subset)
pub mod standard_did {
    pub const ACTIVE_DIAGNOSTIC_SESSION: u16 = 0xF186;
    pub const VIN: u16 = 0xF190;
    pub const ECU_HARDWARE_NUMBER: u16 = 0xF191;
    pub const ECU_SOFTWARE_VERSION: u16 = 0xF195;
}

/// Address-and-length format byte used by 0x23 / 0x36: 4 address bytes,
/// 4 length bytes.
pub const ADDR_LEN_FORMAT_44: u8 = 0x44;
/// TransferData format byte for address-keyed blocks: 4 address bytes,
/// no length field.
pub const ADDR_FORMAT_4: u8 = 0x04;

/// Diagnostic session kinds the stack transitions between
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Default,
    Programming,
    Extended,
}

impl SessionKind {
    /// 0x10 sub-function byte for this session kind
    pub fn sub_function(&self) -> u8 {
        match self {
            SessionKind::Default => session_kind::DEFAULT,
            SessionKind::Programming => session_kind::PROGRAMMING,
            SessionKind::Extended => session_kind::EXTENDED,
        }
    }

    pub fn from_sub_function(value: u8) -> Option<Self> {
        match value {
            session_kind::DEFAULT => Some(SessionKind::Default),
            session_kind::PROGRAMMING => Some(SessionKind::Programming),
            session_kind::EXTENDED => Some(SessionKind::Extended),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionKind::Default => "default",
            SessionKind::Programming => "programming",
            SessionKind::Extended => "extended",
        };
        f.write_str(s)
    }
}
