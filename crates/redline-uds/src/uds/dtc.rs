//! DTC (Diagnostic Trouble Code) parsing for service 0x19

use serde::Serialize;

use super::{dtc_sub_function, DiagError};

/// DTC category from the high-byte group bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DtcCategory {
    /// P codes (engine, transmission)
    Powertrain,
    /// C codes (ABS, suspension)
    Chassis,
    /// B codes (airbags, climate)
    Body,
    /// U codes (communication)
    Network,
}

impl DtcCategory {
    pub fn from_high_byte(high: u8) -> Self {
        match (high >> 6) & 0x03 {
            0 => DtcCategory::Powertrain,
            1 => DtcCategory::Chassis,
            2 => DtcCategory::Body,
            _ => DtcCategory::Network,
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            DtcCategory::Powertrain => 'P',
            DtcCategory::Chassis => 'C',
            DtcCategory::Body => 'B',
            DtcCategory::Network => 'U',
        }
    }
}

/// Parsed DTC status byte (ISO 14229-1 bit layout)
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DtcStatus {
    pub test_failed: bool,
    pub pending: bool,
    pub confirmed: bool,
    pub warning_indicator: bool,
    pub raw: u8,
}

impl DtcStatus {
    pub fn from_byte(status: u8) -> Self {
        Self {
            test_failed: status & 0x01 != 0,
            pending: status & 0x04 != 0,
            confirmed: status & 0x08 != 0,
            warning_indicator: status & 0x80 != 0,
            raw: status,
        }
    }

    pub fn is_active(&self) -> bool {
        self.test_failed && self.confirmed
    }
}

/// One trouble code with its status
#[derive(Debug, Clone, Serialize)]
pub struct Dtc {
    /// 3-byte DTC number (high, mid, low)
    pub number: [u8; 3],
    pub status: DtcStatus,
}

impl Dtc {
    pub fn new(high: u8, mid: u8, low: u8, status: u8) -> Self {
        Self {
            number: [high, mid, low],
            status: DtcStatus::from_byte(status),
        }
    }

    pub fn category(&self) -> DtcCategory {
        DtcCategory::from_high_byte(self.number[0])
    }

    /// Standard code string, e.g. P0301, U0100
    pub fn code(&self) -> String {
        let second = (self.number[0] >> 4) & 0x03;
        let third = self.number[0] & 0x0F;
        let fourth = (self.number[1] >> 4) & 0x0F;
        let fifth = self.number[1] & 0x0F;
        format!(
            "{}{:01X}{:01X}{:01X}{:01X}",
            self.category().prefix(),
            second,
            third,
            fourth,
            fifth
        )
    }
}

/// Parse a `[0x59, 0x02, availability_mask, (hi mid lo status)*]` response
/// body (the data after the positive response id).
pub fn parse_dtc_by_status_mask(data: &[u8]) -> Result<Vec<Dtc>, DiagError> {
    if data.len() < 2 || data[0] != dtc_sub_function::REPORT_DTC_BY_STATUS_MASK {
        return Err(DiagError::MalformedResponse {
            service: 0x59,
            detail: "not a reportDTCByStatusMask response".to_string(),
        });
    }

    let records = &data[2..];
    if records.len() % 4 != 0 {
        return Err(DiagError::MalformedResponse {
            service: 0x59,
            detail: format!("DTC record area is {} bytes, not a multiple of 4", records.len()),
        });
    }

    Ok(records
        .chunks_exact(4)
        .map(|r| Dtc::new(r[0], r[1], r[2], r[3]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_code_string() {
        // 0x03 0x01 -> P0301 (cylinder 1 misfire)
        let dtc = Dtc::new(0x03, 0x01, 0x00, 0x09);
        assert_eq!(dtc.code(), "P0301");
        assert_eq!(dtc.category(), DtcCategory::Powertrain);

        // High bits 11 -> U codes
        let dtc = Dtc::new(0xC1, 0x00, 0x00, 0x00);
        assert_eq!(dtc.category(), DtcCategory::Network);
        assert_eq!(dtc.code(), "U0100");
    }

    #[test]
    fn test_status_bits() {
        let status = DtcStatus::from_byte(0x09);
        assert!(status.test_failed);
        assert!(status.confirmed);
        assert!(!status.pending);
        assert!(status.is_active());
    }

    #[test]
    fn test_parse_status_mask_response() {
        let data = vec![
            0x02, 0xFF, // sub-function echo + availability mask
            0x01, 0x23, 0x45, 0x09, // DTC 1
            0x06, 0x78, 0x90, 0x28, // DTC 2
        ];
        let dtcs = parse_dtc_by_status_mask(&data).unwrap();
        assert_eq!(dtcs.len(), 2);
        assert_eq!(dtcs[0].number, [0x01, 0x23, 0x45]);
        assert!(dtcs[0].status.is_active());
        assert!(!dtcs[1].status.test_failed);
    }

    #[test]
    fn test_parse_empty_list() {
        let dtcs = parse_dtc_by_status_mask(&[0x02, 0xFF]).unwrap();
        assert!(dtcs.is_empty());
    }

    #[test]
    fn test_parse_truncated_record() {
        assert!(parse_dtc_by_status_mask(&[0x02, 0xFF, 0x01, 0x23]).is_err());
    }
}
