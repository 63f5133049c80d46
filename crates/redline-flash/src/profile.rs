//! Per-ECU-family flash configuration

use serde::{Deserialize, Serialize};

use redline_cal::{ChecksumAlgorithm, ChecksumEngine};
use redline_security::{SecurityError, SecurityLevel};

use crate::error::FlashError;

pub const MIN_BLOCK_SIZE: usize = 16;
pub const MAX_BLOCK_SIZE: usize = 4096;

/// Which checksum an ECU family uses and where the field lives in the
/// image. Call sites never hard-code either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumSpec {
    pub algorithm: ChecksumAlgorithm,
    /// Offset of the stored checksum field, relative to the image start
    pub field_offset: usize,
}

/// Everything the flash pipeline needs to know about one ECU family.
///
/// Loaded from YAML alongside the calibration definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcuProfile {
    /// Registry key for security level resolution
    pub ecu_type: String,
    /// ECU address of the first image byte
    pub base_address: u32,
    /// Security levels this family exposes, registered into the
    /// algorithm registry at manager construction
    pub security_levels: Vec<SecurityLevel>,
    /// Level that must be unlocked for programming entry
    pub flash_level: u8,
    pub checksum: ChecksumSpec,
    /// Transfer block size in bytes
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Routine forcing a bootloader-mode reset (brick recovery)
    #[serde(default = "default_reset_routine")]
    pub reset_routine_id: u16,
    /// Optional post-flash self check routine
    #[serde(default)]
    pub self_check_routine_id: Option<u16>,
    /// Wait after a forced reset before the bootloader answers
    #[serde(default = "default_bootloader_wait")]
    pub bootloader_wait_ms: u64,
}

fn default_block_size() -> usize {
    256
}

fn default_reset_routine() -> u16 {
    0xFF00
}

fn default_bootloader_wait() -> u64 {
    2000
}

impl EcuProfile {
    pub fn validate(&self) -> Result<(), FlashError> {
        if self.block_size < MIN_BLOCK_SIZE || self.block_size > MAX_BLOCK_SIZE {
            return Err(FlashError::InvalidBlockSize {
                size: self.block_size,
                min: MIN_BLOCK_SIZE,
                max: MAX_BLOCK_SIZE,
            });
        }
        if self.flash_level == 0 || self.flash_level > SecurityLevel::MAX_LEVEL {
            return Err(SecurityError::InvalidLevel {
                level: self.flash_level,
            }
            .into());
        }
        for level in &self.security_levels {
            level.validate()?;
        }
        Ok(())
    }

    /// Checksum engine configured per this family's spec
    pub fn checksum_engine(&self) -> ChecksumEngine {
        ChecksumEngine::new(self.checksum.algorithm, self.checksum.field_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_yaml() {
        let yaml = r#"
ecu_type: demo_ecm
base_address: 0x1000
flash_level: 5
security_levels:
  - level: 5
    seed_len: 4
    key_len: 4
    algorithm: ecu_access_27
checksum:
  algorithm: crc32
  field_offset: 8
"#;
        let profile: EcuProfile = serde_yaml::from_str(yaml).unwrap();
        profile.validate().unwrap();
        assert_eq!(profile.block_size, 256);
        assert_eq!(profile.reset_routine_id, 0xFF00);
        assert_eq!(profile.self_check_routine_id, None);
        assert_eq!(profile.checksum.algorithm, ChecksumAlgorithm::Crc32);
    }

    #[test]
    fn test_block_size_bounds() {
        let mut profile: EcuProfile = serde_yaml::from_str(
            "ecu_type: x\nbase_address: 0\nflash_level: 1\nsecurity_levels: []\nchecksum:\n  algorithm: crc32\n  field_offset: 0\n",
        )
        .unwrap();
        profile.block_size = 8;
        assert!(matches!(
            profile.validate(),
            Err(FlashError::InvalidBlockSize { .. })
        ));
        profile.block_size = 4096;
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_flash_level_bounds() {
        let mut profile: EcuProfile = serde_yaml::from_str(
            "ecu_type: x\nbase_address: 0\nflash_level: 1\nsecurity_levels: []\nchecksum:\n  algorithm: crc32\n  field_offset: 0\n",
        )
        .unwrap();
        profile.flash_level = 0;
        assert!(matches!(
            profile.validate(),
            Err(FlashError::Security(SecurityError::InvalidLevel { level: 0 }))
        ));
        profile.flash_level = 0x40;
        assert!(profile.validate().is_err());

        profile.flash_level = 5;
        profile.security_levels.push(SecurityLevel {
            level: 0,
            seed_len: 4,
            key_len: 4,
            algorithm: "ecu_access_27".to_string(),
            vin_required: false,
        });
        assert!(matches!(
            profile.validate(),
            Err(FlashError::Security(SecurityError::InvalidLevel { level: 0 }))
        ));
    }
}
