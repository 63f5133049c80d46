//! Built-in seed/key transforms
//!
//! Each transform is a pure function of the seed (and optionally the VIN).
//! They emulate the obfuscation schemes found in production bootloaders;
//! none of them is a cryptographic primitive and none is meant to be.

use crate::error::SecurityError;

/// A vendor seed-to-key transform.
///
/// Implementations must be pure and deterministic: the same seed (and VIN,
/// when one is passed) always yields the same key. No I/O, no clock, no
/// randomness.
pub trait SeedKeyAlgorithm: Send + Sync {
    /// Registry id, referenced from `SecurityLevel::algorithm`
    fn id(&self) -> &'static str;

    /// Derive the key for a seed. `vin` is `Some` only for levels with
    /// `vin_required` set; length validation has already happened in the
    /// `AlgorithmHandle` by the time this is called.
    fn derive(&self, seed: &[u8], vin: Option<&str>) -> Result<Vec<u8>, SecurityError>;
}

/// Reflect the bits of a byte (MSB becomes LSB)
fn reflect8(mut b: u8) -> u8 {
    let mut out = 0u8;
    for _ in 0..8 {
        out = (out << 1) | (b & 1);
        b >>= 1;
    }
    out
}

/// `ecu_access_27`: rotate each seed byte left by 3 and XOR with a rolling
/// constant and the following seed byte. The most common scheme in the
/// supported ECU families.
pub struct EcuAccess27;

impl SeedKeyAlgorithm for EcuAccess27 {
    fn id(&self) -> &'static str {
        "ecu_access_27"
    }

    fn derive(&self, seed: &[u8], _vin: Option<&str>) -> Result<Vec<u8>, SecurityError> {
        let key = seed
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                let next = seed[(i + 1) % seed.len()];
                b.rotate_left(3) ^ 0x27 ^ next
            })
            .collect();
        Ok(key)
    }
}

/// `add_reflect`: add a constant to each seed byte, then reflect the bits.
pub struct AddReflect;

impl SeedKeyAlgorithm for AddReflect {
    fn id(&self) -> &'static str {
        "add_reflect"
    }

    fn derive(&self, seed: &[u8], _vin: Option<&str>) -> Result<Vec<u8>, SecurityError> {
        Ok(seed.iter().map(|&b| reflect8(b.wrapping_add(0x5A))).collect())
    }
}

/// `vin_mix_32`: fold the 17-byte VIN into a 32-bit word and mix it into
/// the seed with a multiply/XOR round. Used by families that tie security
/// access to the vehicle identity.
pub struct VinMix32;

impl SeedKeyAlgorithm for VinMix32 {
    fn id(&self) -> &'static str {
        "vin_mix_32"
    }

    fn derive(&self, seed: &[u8], vin: Option<&str>) -> Result<Vec<u8>, SecurityError> {
        let vin = vin.ok_or(SecurityError::VinRequired)?;
        let mut fold: u32 = 0x811C_9DC5;
        for b in vin.bytes() {
            fold = fold.wrapping_mul(0x0100_0193) ^ b as u32;
        }

        let mut word: u32 = 0;
        for &b in seed.iter().take(4) {
            word = (word << 8) | b as u32;
        }

        let mixed = word.wrapping_mul(0x0002_0825) ^ fold;
        Ok(mixed.to_be_bytes().to_vec())
    }
}

/// `mul_shift_16`: treat the seed as big-endian 16-bit words, multiply each
/// by an odd constant and fold the high half back in.
pub struct MulShift16;

impl SeedKeyAlgorithm for MulShift16 {
    fn id(&self) -> &'static str {
        "mul_shift_16"
    }

    fn derive(&self, seed: &[u8], _vin: Option<&str>) -> Result<Vec<u8>, SecurityError> {
        let mut key = Vec::with_capacity(seed.len());
        for pair in seed.chunks(2) {
            let word = if pair.len() == 2 {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                pair[0] as u16
            };
            let m = word.wrapping_mul(0x6121);
            let folded = m ^ (m >> 5) ^ 0x8DB5;
            if pair.len() == 2 {
                key.extend_from_slice(&folded.to_be_bytes());
            } else {
                key.push((folded & 0xFF) as u8);
            }
        }
        Ok(key)
    }
}
