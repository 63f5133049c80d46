//! Security level configuration

use serde::{Deserialize, Serialize};

use crate::error::SecurityError;

/// Static description of one security access level on an ECU.
///
/// The level id is the odd/even sub-function base: a seed request for
/// level `n` goes out as sub-function `2n - 1`, the key as `2n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLevel {
    /// Level identifier (1-based, level 1 = sub-functions 0x01/0x02)
    pub level: u8,
    /// Seed length in bytes the ECU is expected to return
    pub seed_len: usize,
    /// Key length in bytes the algorithm must produce
    pub key_len: usize,
    /// Registry id of the seed/key transform (e.g. "ecu_access_27")
    pub algorithm: String,
    /// Whether the transform mixes in the vehicle VIN
    #[serde(default)]
    pub vin_required: bool,
}

impl SecurityLevel {
    /// Highest addressable level: sub-functions are one byte and the key
    /// sub-function `2n` must stay below the suppress-response bit.
    pub const MAX_LEVEL: u8 = 0x3F;

    /// Check that the level id maps to valid sub-function bytes.
    ///
    /// Levels arrive from YAML profiles, so the registry calls this on
    /// registration rather than trusting the file.
    pub fn validate(&self) -> Result<(), SecurityError> {
        if self.level == 0 || self.level > Self::MAX_LEVEL {
            return Err(SecurityError::InvalidLevel { level: self.level });
        }
        Ok(())
    }

    /// Sub-function byte for the seed request (meaningful only for
    /// levels passing [`SecurityLevel::validate`])
    pub fn seed_sub_function(&self) -> u8 {
        (u16::from(self.level) * 2).saturating_sub(1) as u8
    }

    /// Sub-function byte for the key submission
    pub fn key_sub_function(&self) -> u8 {
        (u16::from(self.level) * 2) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(n: u8) -> SecurityLevel {
        SecurityLevel {
            level: n,
            seed_len: 4,
            key_len: 4,
            algorithm: "ecu_access_27".to_string(),
            vin_required: false,
        }
    }

    #[test]
    fn test_sub_function_arithmetic() {
        assert_eq!(level(1).seed_sub_function(), 0x01);
        assert_eq!(level(1).key_sub_function(), 0x02);
        assert_eq!(level(5).seed_sub_function(), 0x09);
        assert_eq!(level(5).key_sub_function(), 0x0A);
    }

    #[test]
    fn test_out_of_range_level_rejected() {
        assert_eq!(
            level(0).validate(),
            Err(SecurityError::InvalidLevel { level: 0 })
        );
        assert_eq!(
            level(0x40).validate(),
            Err(SecurityError::InvalidLevel { level: 0x40 })
        );
        assert!(level(1).validate().is_ok());
        assert!(level(0x3F).validate().is_ok());
    }

    #[test]
    fn test_sub_functions_never_panic() {
        // Unvalidated levels still yield a byte instead of panicking
        assert_eq!(level(0).seed_sub_function(), 0x00);
        assert_eq!(level(0x80).key_sub_function(), 0x00);
        assert_eq!(level(0x3F).seed_sub_function(), 0x7D);
        assert_eq!(level(0x3F).key_sub_function(), 0x7E);
    }

    #[test]
    fn test_deserialize_defaults_vin() {
        let yaml = "level: 3\nseed_len: 2\nkey_len: 2\nalgorithm: add_reflect\n";
        let lvl: SecurityLevel = serde_yaml::from_str(yaml).unwrap();
        assert!(!lvl.vin_required);
        assert_eq!(lvl.seed_sub_function(), 0x05);
    }
}
