//! Certificates
//!
//! Certificates are the organization's source of truth about users, devices,
//! realm roles and shamir recovery setups. Each one is serialized with
//! bincode and signed by its author device, or by the organization root key
//! for the certificates issued while bootstrapping.

use crate::crypto::{CryptoError, PublicKey, SigningKey, VerifyKey};
use crate::ids::{DeviceID, UserID, VlobID};
use crate::names::{DeviceLabel, HumanHandle};
use crate::roles::{DevicePurpose, RealmRole, UserProfile};
use crate::time::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Error raised while loading a certificate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertifError {
    /// The payload is not a valid certificate
    #[error("Invalid certificate data: {0}")]
    InvalidData(String),
    /// The signature does not match the claimed author
    #[error("Invalid certificate signature")]
    InvalidSignature,
}

impl From<CryptoError> for CertifError {
    fn from(_: CryptoError) -> Self {
        CertifError::InvalidSignature
    }
}

/// Author of a certificate: the organization root key, or a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateAuthor {
    /// Organization root key (bootstrap only)
    Root,
    /// A device of the organization
    Device(DeviceID),
}

/// Creation of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCertificate {
    pub author: CertificateAuthor,
    pub timestamp: DateTime,
    pub user_id: UserID,
    pub human_handle: HumanHandle,
    pub public_key: PublicKey,
    pub profile: UserProfile,
}

/// Creation of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCertificate {
    pub author: CertificateAuthor,
    pub timestamp: DateTime,
    pub user_id: UserID,
    pub device_id: DeviceID,
    pub device_label: DeviceLabel,
    pub verify_key: VerifyKey,
    pub purpose: DevicePurpose,
}

/// Revocation of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedUserCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,
    pub user_id: UserID,
}

/// Profile change of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdateCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,
    pub user_id: UserID,
    pub new_profile: UserProfile,
}

/// Role given to (or removed from, when `role` is `None`) a user in a realm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmRoleCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,
    pub realm_id: VlobID,
    pub user_id: UserID,
    pub role: Option<RealmRole>,
}

/// Name of a realm, encrypted with the realm key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmNameCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,
    pub realm_id: VlobID,
    pub key_index: u64,
    #[serde(with = "serde_bytes")]
    pub encrypted_name: Vec<u8>,
}

/// Public part of a shamir recovery setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirRecoveryBriefCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,
    pub user_id: UserID,
    pub threshold: u8,
    pub per_recipient_shares: BTreeMap<UserID, u8>,
}

/// Shares of a shamir recovery setup, sealed for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirRecoveryShareCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,
    pub user_id: UserID,
    pub recipient: UserID,
    #[serde(with = "serde_bytes")]
    pub ciphered_share: Vec<u8>,
}

/// Removal of a shamir recovery setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirRecoveryDeletionCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,
    pub setup_to_delete_timestamp: DateTime,
    pub setup_to_delete_user_id: UserID,
    pub share_recipients: BTreeSet<UserID>,
}

/// Any certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnyCertificate {
    User(UserCertificate),
    Device(DeviceCertificate),
    RevokedUser(RevokedUserCertificate),
    UserUpdate(UserUpdateCertificate),
    RealmRole(RealmRoleCertificate),
    RealmName(RealmNameCertificate),
    ShamirRecoveryBrief(ShamirRecoveryBriefCertificate),
    ShamirRecoveryShare(ShamirRecoveryShareCertificate),
    ShamirRecoveryDeletion(ShamirRecoveryDeletionCertificate),
}

impl AnyCertificate {
    /// Timestamp the certificate was issued at
    pub fn timestamp(&self) -> DateTime {
        match self {
            AnyCertificate::User(c) => c.timestamp,
            AnyCertificate::Device(c) => c.timestamp,
            AnyCertificate::RevokedUser(c) => c.timestamp,
            AnyCertificate::UserUpdate(c) => c.timestamp,
            AnyCertificate::RealmRole(c) => c.timestamp,
            AnyCertificate::RealmName(c) => c.timestamp,
            AnyCertificate::ShamirRecoveryBrief(c) => c.timestamp,
            AnyCertificate::ShamirRecoveryShare(c) => c.timestamp,
            AnyCertificate::ShamirRecoveryDeletion(c) => c.timestamp,
        }
    }

    /// Who signed the certificate
    pub fn author(&self) -> CertificateAuthor {
        match self {
            AnyCertificate::User(c) => c.author,
            AnyCertificate::Device(c) => c.author,
            AnyCertificate::RevokedUser(c) => CertificateAuthor::Device(c.author),
            AnyCertificate::UserUpdate(c) => CertificateAuthor::Device(c.author),
            AnyCertificate::RealmRole(c) => CertificateAuthor::Device(c.author),
            AnyCertificate::RealmName(c) => CertificateAuthor::Device(c.author),
            AnyCertificate::ShamirRecoveryBrief(c) => CertificateAuthor::Device(c.author),
            AnyCertificate::ShamirRecoveryShare(c) => CertificateAuthor::Device(c.author),
            AnyCertificate::ShamirRecoveryDeletion(c) => CertificateAuthor::Device(c.author),
        }
    }

    /// Serialize and sign
    pub fn dump_and_sign(&self, signing_key: &SigningKey) -> Vec<u8> {
        // bincode cannot fail on these plain data types
        let raw = bincode::serialize(self).unwrap_or_default();
        signing_key.sign(&raw)
    }

    /// Load without checking the signature, used to find out who the author is
    pub fn unsecure_load(signed: &[u8]) -> Result<AnyCertificate, CertifError> {
        let raw = VerifyKey::unsecure_unwrap(signed)
            .ok_or_else(|| CertifError::InvalidData("truncated".to_string()))?;
        bincode::deserialize(raw).map_err(|e| CertifError::InvalidData(e.to_string()))
    }

    /// Check the signature with the author's key then load
    pub fn verify_and_load(signed: &[u8], author_verify_key: &VerifyKey) -> Result<AnyCertificate, CertifError> {
        let raw = author_verify_key.verify(signed)?;
        bincode::deserialize(raw).map_err(|e| CertifError::InvalidData(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use assert_matches::assert_matches;

    fn user_certificate() -> AnyCertificate {
        AnyCertificate::User(UserCertificate {
            author: CertificateAuthor::Root,
            timestamp: chrono::Utc::now(),
            user_id: UserID::default_new(),
            human_handle: HumanHandle::from_raw("alice@example.com", "Alice").unwrap(),
            public_key: PrivateKey::generate().public_key(),
            profile: UserProfile::Admin,
        })
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::generate();
        let certif = user_certificate();
        let signed = certif.dump_and_sign(&key);
        assert_eq!(AnyCertificate::verify_and_load(&signed, &key.verify_key()).unwrap(), certif);
        assert_eq!(AnyCertificate::unsecure_load(&signed).unwrap(), certif);
        assert_eq!(certif.author(), CertificateAuthor::Root);
    }

    #[test]
    fn test_wrong_author_key() {
        let signed = user_certificate().dump_and_sign(&SigningKey::generate());
        assert_matches!(
            AnyCertificate::verify_and_load(&signed, &SigningKey::generate().verify_key()),
            Err(CertifError::InvalidSignature)
        );
    }

    #[test]
    fn test_garbage() {
        assert_matches!(AnyCertificate::unsecure_load(b"short"), Err(CertifError::InvalidData(_)));
    }
}
