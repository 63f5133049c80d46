//! Registry mapping (ECU type, level) pairs to seed/key transforms
//!
//! The registry is a constructed value injected into whatever needs it
//! (session, flash manager), never a process-wide singleton.

use std::collections::HashMap;
use std::sync::Arc;

use crate::algorithm::{AddReflect, EcuAccess27, MulShift16, SeedKeyAlgorithm, VinMix32};
use crate::error::SecurityError;
use crate::level::SecurityLevel;

/// A resolved (algorithm, level) pair ready to derive keys.
///
/// The handle validates seed length and VIN presence against the registered
/// `SecurityLevel` before the transform ever runs.
#[derive(Clone)]
pub struct AlgorithmHandle {
    level: SecurityLevel,
    algorithm: Arc<dyn SeedKeyAlgorithm>,
}

impl std::fmt::Debug for AlgorithmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmHandle")
            .field("level", &self.level)
            .field("algorithm", &self.algorithm.id())
            .finish()
    }
}

impl AlgorithmHandle {
    /// The security level this handle was resolved for
    pub fn level(&self) -> &SecurityLevel {
        &self.level
    }

    /// Derive the key for a seed.
    ///
    /// `vin` is required when the level's `vin_required` flag is set and
    /// ignored otherwise. Length mismatches are rejected before the
    /// algorithm is invoked.
    pub fn derive(&self, seed: &[u8], vin: Option<&str>) -> Result<Vec<u8>, SecurityError> {
        if seed.len() != self.level.seed_len {
            return Err(SecurityError::SeedLengthMismatch {
                expected: self.level.seed_len,
                actual: seed.len(),
            });
        }

        let vin = if self.level.vin_required {
            let vin = vin.ok_or(SecurityError::VinRequired)?;
            if vin.len() != 17 || !vin.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return Err(SecurityError::InvalidVin(vin.to_string()));
            }
            Some(vin)
        } else {
            None
        };

        let key = self.algorithm.derive(seed, vin)?;
        if key.len() != self.level.key_len {
            return Err(SecurityError::KeyLengthMismatch {
                expected: self.level.key_len,
                actual: key.len(),
            });
        }

        tracing::debug!(
            level = self.level.level,
            algorithm = self.algorithm.id(),
            seed = %hex::encode(seed),
            "Derived security key"
        );
        Ok(key)
    }
}

/// Registry of seed/key transforms keyed by (ECU type, access level).
pub struct SecurityAlgorithmRegistry {
    algorithms: HashMap<&'static str, Arc<dyn SeedKeyAlgorithm>>,
    levels: HashMap<(String, u8), SecurityLevel>,
}

impl SecurityAlgorithmRegistry {
    /// Empty registry with the built-in algorithm set available for
    /// level registration.
    pub fn new() -> Self {
        let mut algorithms: HashMap<&'static str, Arc<dyn SeedKeyAlgorithm>> = HashMap::new();
        for algo in [
            Arc::new(EcuAccess27) as Arc<dyn SeedKeyAlgorithm>,
            Arc::new(AddReflect),
            Arc::new(VinMix32),
            Arc::new(MulShift16),
        ] {
            algorithms.insert(algo.id(), algo);
        }
        Self {
            algorithms,
            levels: HashMap::new(),
        }
    }

    /// Register a custom transform alongside the built-ins
    pub fn register_algorithm(&mut self, algorithm: Arc<dyn SeedKeyAlgorithm>) {
        self.algorithms.insert(algorithm.id(), algorithm);
    }

    /// Register a security level for an ECU type.
    ///
    /// Fails if the level id is out of range or references an algorithm
    /// id that has not been registered.
    pub fn register_level(
        &mut self,
        ecu_type: &str,
        level: SecurityLevel,
    ) -> Result<(), SecurityError> {
        level.validate()?;
        if !self.algorithms.contains_key(level.algorithm.as_str()) {
            return Err(SecurityError::UnsupportedAlgorithm {
                ecu_type: ecu_type.to_string(),
                level: level.level,
            });
        }
        self.levels
            .insert((ecu_type.to_string(), level.level), level);
        Ok(())
    }

    /// Resolve the handle for an (ECU type, level) pair.
    pub fn resolve(&self, ecu_type: &str, level: u8) -> Result<AlgorithmHandle, SecurityError> {
        let level_cfg = self
            .levels
            .get(&(ecu_type.to_string(), level))
            .ok_or_else(|| SecurityError::UnsupportedAlgorithm {
                ecu_type: ecu_type.to_string(),
                level,
            })?;

        let algorithm = self
            .algorithms
            .get(level_cfg.algorithm.as_str())
            .cloned()
            .ok_or_else(|| SecurityError::UnsupportedAlgorithm {
                ecu_type: ecu_type.to_string(),
                level,
            })?;

        Ok(AlgorithmHandle {
            level: level_cfg.clone(),
            algorithm,
        })
    }

    /// Levels registered for an ECU type, ascending
    pub fn levels_for(&self, ecu_type: &str) -> Vec<&SecurityLevel> {
        let mut levels: Vec<&SecurityLevel> = self
            .levels
            .iter()
            .filter(|((t, _), _)| t == ecu_type)
            .map(|(_, l)| l)
            .collect();
        levels.sort_by_key(|l| l.level);
        levels
    }
}

impl Default for SecurityAlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry_with(ecu_type: &str, level: SecurityLevel) -> SecurityAlgorithmRegistry {
        let mut reg = SecurityAlgorithmRegistry::new();
        reg.register_level(ecu_type, level).unwrap();
        reg
    }

    fn level5() -> SecurityLevel {
        SecurityLevel {
            level: 5,
            seed_len: 4,
            key_len: 4,
            algorithm: "ecu_access_27".to_string(),
            vin_required: false,
        }
    }

    #[test]
    fn test_resolve_and_derive_deterministic() {
        let reg = registry_with("demo_ecm", level5());
        let handle = reg.resolve("demo_ecm", 5).unwrap();

        let seed = [0xA1, 0xB2, 0xC3, 0xD4];
        let k1 = handle.derive(&seed, None).unwrap();
        let k2 = handle.derive(&seed, None).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 4);
    }

    #[test]
    fn test_unknown_pair_fails_fast() {
        let reg = registry_with("demo_ecm", level5());
        let err = reg.resolve("demo_ecm", 3).unwrap_err();
        assert!(matches!(err, SecurityError::UnsupportedAlgorithm { level: 3, .. }));

        let err = reg.resolve("other_ecm", 5).unwrap_err();
        assert!(matches!(err, SecurityError::UnsupportedAlgorithm { .. }));
    }

    #[test]
    fn test_seed_length_rejected_before_invocation() {
        let reg = registry_with("demo_ecm", level5());
        let handle = reg.resolve("demo_ecm", 5).unwrap();
        let err = handle.derive(&[0x01, 0x02], None).unwrap_err();
        assert_eq!(
            err,
            SecurityError::SeedLengthMismatch {
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn test_vin_required_level() {
        let reg = registry_with(
            "demo_ecm",
            SecurityLevel {
                level: 7,
                seed_len: 4,
                key_len: 4,
                algorithm: "vin_mix_32".to_string(),
                vin_required: true,
            },
        );
        let handle = reg.resolve("demo_ecm", 7).unwrap();
        let seed = [0x01, 0x02, 0x03, 0x04];

        assert_eq!(handle.derive(&seed, None), Err(SecurityError::VinRequired));
        assert!(matches!(
            handle.derive(&seed, Some("short")),
            Err(SecurityError::InvalidVin(_))
        ));
        assert!(handle.derive(&seed, Some("1HGCM82633A123456")).is_ok());
    }

    #[test]
    fn test_register_level_out_of_range() {
        let mut reg = SecurityAlgorithmRegistry::new();
        let mut lvl = level5();
        lvl.level = 0;
        assert_eq!(
            reg.register_level("demo_ecm", lvl.clone()).unwrap_err(),
            SecurityError::InvalidLevel { level: 0 }
        );
        lvl.level = 0x40;
        assert_eq!(
            reg.register_level("demo_ecm", lvl).unwrap_err(),
            SecurityError::InvalidLevel { level: 0x40 }
        );
    }

    #[test]
    fn test_register_level_unknown_algorithm() {
        let mut reg = SecurityAlgorithmRegistry::new();
        let err = reg
            .register_level(
                "demo_ecm",
                SecurityLevel {
                    level: 1,
                    seed_len: 2,
                    key_len: 2,
                    algorithm: "does_not_exist".to_string(),
                    vin_required: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, SecurityError::UnsupportedAlgorithm { .. }));
    }
}
