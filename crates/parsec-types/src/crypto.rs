//! Cryptographic primitives
//!
//! - [`SecretKey`]: symmetric ChaCha20-Poly1305 key, ciphertexts are prefixed
//!   with their random nonce
//! - [`SigningKey`]/[`VerifyKey`]: Ed25519, signed payloads are
//!   `signature || data`
//! - [`PrivateKey`]/[`PublicKey`]: X25519 key exchange, used for sealed boxes
//!   and for deriving the shared key of a greeting attempt
//! - [`HashDigest`]: SHA-256

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use curve25519_dalek::montgomery::MontgomeryPoint;
use ed25519_dalek::{Signer, Verifier};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const NONCE_SIZE: usize = 12;
const SIGNATURE_SIZE: usize = 64;
const KEY_SIZE: usize = 32;

/// Error raised by cryptographic operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Ciphertext is truncated, tampered with, or encrypted with another key
    #[error("Decryption failed")]
    Decryption,
    /// Signature does not match the data or the verify key
    #[error("Signature verification failed")]
    Signature,
    /// Key material has an invalid size or encoding
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    /// Password-based key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Generate `size` random bytes
pub fn generate_nonce(size: usize) -> Vec<u8> {
    let mut nonce = vec![0u8; size];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn random_key_bytes() -> [u8; KEY_SIZE] {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Symmetric key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(****)")
    }
}

impl SecretKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        Self(random_key_bytes())
    }

    /// Build from raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from a byte slice, which must be exactly 32 bytes long
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {KEY_SIZE} bytes")))?;
        Ok(Self(bytes))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derive a key from a password with Argon2id
    pub fn from_password(password: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_SIZE];
        argon2::Argon2::default()
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Self(key))
    }

    /// Derive a sub-key bound to `context`
    pub fn derive(&self, context: &str) -> SecretKey {
        SecretKey(blake3::derive_key(context, &self.0))
    }

    /// Encrypt `data`, the random nonce is prepended to the ciphertext
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        let cipher = ChaCha20Poly1305::new((&self.0).into());
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);
        // Encryption of an in-memory buffer only fails on buffers larger than the AEAD limit
        let ciphertext = cipher.encrypt(&nonce, data).unwrap_or_default();
        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        result
    }

    /// Decrypt data produced by [`SecretKey::encrypt`]
    pub fn decrypt(&self, ciphered: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphered.len() < NONCE_SIZE {
            return Err(CryptoError::Decryption);
        }
        let (nonce_bytes, ciphertext) = ciphered.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new((&self.0).into());
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }

    /// HMAC-SHA256 of `data` keyed by this key, truncated to `size` bytes
    pub fn hmac(&self, data: &[u8], size: usize) -> Result<Vec<u8>, CryptoError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        mac.update(data);
        let mut digest = mac.finalize().into_bytes().to_vec();
        digest.truncate(size);
        Ok(digest)
    }

    /// Generate a new key along with the human-typable passphrase encoding it
    pub fn generate_recovery_passphrase() -> (String, SecretKey) {
        let key = SecretKey::generate();
        (recovery_passphrase::encode(&key.0), key)
    }

    /// Decode a passphrase produced by [`SecretKey::generate_recovery_passphrase`]
    pub fn from_recovery_passphrase(passphrase: &str) -> Result<SecretKey, CryptoError> {
        let bytes = recovery_passphrase::decode(passphrase)
            .ok_or_else(|| CryptoError::InvalidKey("invalid passphrase".to_string()))?;
        SecretKey::try_from_slice(&bytes)
    }
}

mod recovery_passphrase {
    const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    const GROUP_SIZE: usize = 4;

    pub(super) fn encode(bytes: &[u8]) -> String {
        let mut symbols = Vec::new();
        let mut buffer: u32 = 0;
        let mut bits = 0;
        for byte in bytes {
            buffer = (buffer << 8) | u32::from(*byte);
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                symbols.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
            }
        }
        if bits > 0 {
            symbols.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
        }
        symbols
            .chunks(GROUP_SIZE)
            .map(|group| group.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("-")
    }

    pub(super) fn decode(passphrase: &str) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut buffer: u32 = 0;
        let mut bits = 0;
        for c in passphrase.chars().filter(|c| *c != '-' && !c.is_whitespace()) {
            let c = c.to_ascii_uppercase() as u8;
            let value = ALPHABET.iter().position(|s| *s == c)? as u32;
            buffer = (buffer << 5) | value;
            bits += 5;
            if bits >= 8 {
                bits -= 8;
                bytes.push(((buffer >> bits) & 0xff) as u8);
            }
        }
        Some(bytes)
    }
}

/// Ed25519 signing key
#[derive(Clone, Serialize, Deserialize)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(****)")
    }
}

impl SigningKey {
    /// Generate a new random signing key
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    /// Matching verify key
    pub fn verify_key(&self) -> VerifyKey {
        VerifyKey(self.0.verifying_key())
    }

    /// Sign `data`, returning `signature || data`
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature = self.0.sign(data);
        let mut signed = Vec::with_capacity(SIGNATURE_SIZE + data.len());
        signed.extend_from_slice(&signature.to_bytes());
        signed.extend_from_slice(data);
        signed
    }
}

/// Ed25519 verify key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyKey(ed25519_dalek::VerifyingKey);

impl VerifyKey {
    /// Build from the 32-byte encoded key
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {KEY_SIZE} bytes")))?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// 32-byte encoded key
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Check `signed` (`signature || data`) and return the data part
    pub fn verify<'a>(&self, signed: &'a [u8]) -> Result<&'a [u8], CryptoError> {
        if signed.len() < SIGNATURE_SIZE {
            return Err(CryptoError::Signature);
        }
        let (raw_signature, data) = signed.split_at(SIGNATURE_SIZE);
        let raw_signature: [u8; SIGNATURE_SIZE] =
            raw_signature.try_into().map_err(|_| CryptoError::Signature)?;
        let signature = ed25519_dalek::Signature::from_bytes(&raw_signature);
        self.0
            .verify(data, &signature)
            .map_err(|_| CryptoError::Signature)?;
        Ok(data)
    }

    /// Return the data part of a signed payload without checking the signature
    pub fn unsecure_unwrap(signed: &[u8]) -> Option<&[u8]> {
        signed.get(SIGNATURE_SIZE..)
    }
}

/// X25519 private key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; KEY_SIZE]);

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(****)")
    }
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        Self(random_key_bytes())
    }

    /// Matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(MontgomeryPoint::mul_base_clamped(self.0).to_bytes())
    }

    /// Diffie-Hellman with `peer`, hashed into a symmetric key
    pub fn generate_shared_secret_key(&self, peer: &PublicKey) -> SecretKey {
        let shared = MontgomeryPoint(peer.0).mul_clamped(self.0);
        SecretKey(blake3::derive_key("parsec shared secret", shared.as_bytes()))
    }

    /// Open a sealed box produced by [`PublicKey::encrypt_for_self`]
    pub fn decrypt_from_self(&self, ciphered: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphered.len() < KEY_SIZE {
            return Err(CryptoError::Decryption);
        }
        let (ephemeral, ciphertext) = ciphered.split_at(KEY_SIZE);
        let ephemeral: [u8; KEY_SIZE] = ephemeral.try_into().map_err(|_| CryptoError::Decryption)?;
        let key = self.generate_shared_secret_key(&PublicKey(ephemeral));
        key.decrypt(ciphertext)
    }
}

/// X25519 public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Build from the 32-byte encoded key
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// 32-byte encoded key
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Seal `data` so only the owner of the matching private key can open it
    pub fn encrypt_for_self(&self, data: &[u8]) -> Vec<u8> {
        let ephemeral = PrivateKey::generate();
        let key = ephemeral.generate_shared_secret_key(self);
        let mut sealed = ephemeral.public_key().0.to_vec();
        sealed.extend_from_slice(&key.encrypt(data));
        sealed
    }
}

/// SHA-256 digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashDigest([u8; KEY_SIZE]);

impl HashDigest {
    /// Hash `data`
    pub fn from_data(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Hexadecimal representation
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_key_roundtrip_and_tamper() {
        let key = SecretKey::generate();
        let mut ciphered = key.encrypt(b"hello");
        assert_eq!(key.decrypt(&ciphered).unwrap(), b"hello");
        let last = ciphered.len() - 1;
        ciphered[last] ^= 0xff;
        assert_eq!(key.decrypt(&ciphered), Err(CryptoError::Decryption));
        assert_eq!(
            SecretKey::generate().decrypt(&key.encrypt(b"x")),
            Err(CryptoError::Decryption)
        );
    }

    #[test]
    fn test_password_derivation_is_deterministic() {
        let salt = b"0123456789abcdef";
        let a = SecretKey::from_password("P@ssw0rd.", salt).unwrap();
        let b = SecretKey::from_password("P@ssw0rd.", salt).unwrap();
        let c = SecretKey::from_password("other", salt).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_signature() {
        let signing_key = SigningKey::generate();
        let signed = signing_key.sign(b"payload");
        assert_eq!(signing_key.verify_key().verify(&signed).unwrap(), b"payload");
        assert_eq!(
            SigningKey::generate().verify_key().verify(&signed),
            Err(CryptoError::Signature)
        );
        assert_eq!(VerifyKey::unsecure_unwrap(&signed), Some(&b"payload"[..]));
    }

    #[test]
    fn test_shared_secret_agreement() {
        let alice = PrivateKey::generate();
        let bob = PrivateKey::generate();
        assert_eq!(
            alice.generate_shared_secret_key(&bob.public_key()),
            bob.generate_shared_secret_key(&alice.public_key())
        );
    }

    #[test]
    fn test_sealed_box() {
        let recipient = PrivateKey::generate();
        let sealed = recipient.public_key().encrypt_for_self(b"secret");
        assert_eq!(recipient.decrypt_from_self(&sealed).unwrap(), b"secret");
        assert!(PrivateKey::generate().decrypt_from_self(&sealed).is_err());
    }

    #[test]
    fn test_recovery_passphrase() {
        let (passphrase, key) = SecretKey::generate_recovery_passphrase();
        assert!(passphrase.split('-').all(|group| group.len() <= 4));
        assert_eq!(SecretKey::from_recovery_passphrase(&passphrase).unwrap(), key);
        assert_eq!(
            SecretKey::from_recovery_passphrase(&passphrase.to_lowercase()).unwrap(),
            key
        );
        assert!(SecretKey::from_recovery_passphrase("not a passphrase!").is_err());
    }
}
