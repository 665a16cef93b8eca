//! Short authentication strings
//!
//! Both parties of a greeting attempt derive the same pair of codes from the
//! shared secret key and the two nonces. Each human reads their code to the
//! other over an out-of-band channel; a man-in-the-middle ends up with a
//! different shared key and therefore different codes.

use crate::crypto::{CryptoError, SecretKey};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SAS_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SAS_CODE_LEN: usize = 4;
const SAS_CODE_BITS: u32 = 20;

/// Error returned when parsing an invalid SAS code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid SAS code")]
pub struct InvalidSasCode;

/// A 4-character code drawn from a 32-symbol alphabet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SasCode(String);

impl SasCode {
    /// Encode the 20 low bits of `value`
    pub fn from_int(value: u32) -> Self {
        let mut code = String::with_capacity(SAS_CODE_LEN);
        let mut remaining = value & ((1 << SAS_CODE_BITS) - 1);
        for _ in 0..SAS_CODE_LEN {
            code.push(SAS_ALPHABET[(remaining & 0x1f) as usize] as char);
            remaining >>= 5;
        }
        Self(code)
    }

    /// Derive `(claimer_sas, greeter_sas)` for a greeting attempt
    pub fn generate_sas_codes(
        claimer_nonce: &[u8],
        greeter_nonce: &[u8],
        shared_secret_key: &SecretKey,
    ) -> Result<(SasCode, SasCode), CryptoError> {
        let mut combined = Vec::with_capacity(claimer_nonce.len() + greeter_nonce.len());
        combined.extend_from_slice(claimer_nonce);
        combined.extend_from_slice(greeter_nonce);
        let digest = shared_secret_key.hmac(&combined, 5)?;
        let mut raw: u64 = 0;
        for byte in digest {
            raw = (raw << 8) | u64::from(byte);
        }
        let claimer = (raw & ((1 << SAS_CODE_BITS) - 1)) as u32;
        let greeter = ((raw >> SAS_CODE_BITS) & ((1 << SAS_CODE_BITS) - 1)) as u32;
        Ok((SasCode::from_int(claimer), SasCode::from_int(greeter)))
    }

    /// `size` distinct codes, in random order, one of which is `valid`
    pub fn generate_sas_code_candidates(valid: &SasCode, size: usize) -> Vec<SasCode> {
        let mut rng = rand::thread_rng();
        let mut candidates = vec![valid.clone()];
        while candidates.len() < size.max(1) {
            let candidate = SasCode::from_int(rng.gen::<u32>());
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        candidates.shuffle(&mut rng);
        candidates
    }

    /// Borrow the textual code
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SasCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SasCode {
    type Err = InvalidSasCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == SAS_CODE_LEN && s.bytes().all(|b| SAS_ALPHABET.contains(&b)) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidSasCode)
        }
    }
}

impl TryFrom<String> for SasCode {
    type Error = InvalidSasCode;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SasCode> for String {
    fn from(code: SasCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_the_same_codes() {
        let key = SecretKey::generate();
        let a = SasCode::generate_sas_codes(b"claimer", b"greeter", &key).unwrap();
        let b = SasCode::generate_sas_codes(b"claimer", b"greeter", &key).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.0.as_str().len(), 4);
        assert!(a.0.as_str().parse::<SasCode>().is_ok());
    }

    #[test]
    fn test_different_keys_give_different_codes() {
        let a = SasCode::generate_sas_codes(b"c", b"g", &SecretKey::generate()).unwrap();
        let b = SasCode::generate_sas_codes(b"c", b"g", &SecretKey::generate()).unwrap();
        // 40 bits of output, a collision here is astronomically unlikely
        assert_ne!(a, b);
    }

    #[test]
    fn test_candidates_contain_valid_code_once() {
        let valid = SasCode::from_int(42);
        let candidates = SasCode::generate_sas_code_candidates(&valid, 4);
        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates.iter().filter(|c| **c == valid).count(), 1);
    }

    #[test]
    fn test_parse() {
        assert!("ABCD".parse::<SasCode>().is_ok());
        assert!("ABC".parse::<SasCode>().is_err());
        assert!("ABC0".parse::<SasCode>().is_err());
    }
}
