//! Workspace manifests and realm keys
//!
//! Every entry of a workspace is a vlob whose content is a signed then
//! encrypted [`ChildManifest`]. The workspace root is the folder manifest
//! whose ID is the realm ID.

use crate::crypto::{CryptoError, HashDigest, PrivateKey, PublicKey, SecretKey, SigningKey, VerifyKey};
use crate::ids::{BlockID, DeviceID, VlobID};
use crate::names::EntryName;
use crate::time::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default size of the blocks a file is split into
pub const DEFAULT_BLOCK_SIZE: u64 = 512 * 1024;

/// Error raised while loading a manifest or a keys bundle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    /// Encrypted with another key, or tampered with
    #[error("Cannot decrypt data")]
    Decryption,
    /// Signature does not match the claimed author
    #[error("Invalid signature")]
    Signature,
    /// Decrypted data is not valid
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Data is valid but does not match what was expected
    #[error("Unexpected data: {0}")]
    Unexpected(String),
}

impl From<CryptoError> for DataError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Signature => DataError::Signature,
            _ => DataError::Decryption,
        }
    }
}

/// Location and key of an encrypted block of file data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAccess {
    pub id: BlockID,
    pub key: SecretKey,
    pub offset: u64,
    pub size: u64,
    pub digest: HashDigest,
}

/// Folder content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderManifest {
    pub author: DeviceID,
    pub timestamp: DateTime,
    pub id: VlobID,
    pub parent: VlobID,
    pub version: u32,
    pub created: DateTime,
    pub updated: DateTime,
    pub children: BTreeMap<EntryName, VlobID>,
}

/// File content, as a list of blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    pub author: DeviceID,
    pub timestamp: DateTime,
    pub id: VlobID,
    pub parent: VlobID,
    pub version: u32,
    pub created: DateTime,
    pub updated: DateTime,
    pub size: u64,
    pub blocksize: u64,
    pub blocks: Vec<BlockAccess>,
}

/// Any manifest stored in a vlob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildManifest {
    Folder(FolderManifest),
    File(FileManifest),
}

impl ChildManifest {
    pub fn id(&self) -> VlobID {
        match self {
            ChildManifest::Folder(m) => m.id,
            ChildManifest::File(m) => m.id,
        }
    }

    pub fn parent(&self) -> VlobID {
        match self {
            ChildManifest::Folder(m) => m.parent,
            ChildManifest::File(m) => m.parent,
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            ChildManifest::Folder(m) => m.version,
            ChildManifest::File(m) => m.version,
        }
    }

    pub fn author(&self) -> DeviceID {
        match self {
            ChildManifest::Folder(m) => m.author,
            ChildManifest::File(m) => m.author,
        }
    }

    /// Sign with the author's key then encrypt with the realm key
    pub fn dump_sign_and_encrypt(&self, signing_key: &SigningKey, realm_key: &SecretKey) -> Vec<u8> {
        // bincode cannot fail on these plain data types
        let raw = bincode::serialize(self).unwrap_or_default();
        realm_key.encrypt(&signing_key.sign(&raw))
    }

    /// Decrypt only, used to find out who the author is before verification
    pub fn decrypt_and_unsecure_load(encrypted: &[u8], realm_key: &SecretKey) -> Result<ChildManifest, DataError> {
        let signed = realm_key.decrypt(encrypted)?;
        let raw = VerifyKey::unsecure_unwrap(&signed).ok_or_else(|| DataError::InvalidData("truncated".into()))?;
        bincode::deserialize(raw).map_err(|e| DataError::InvalidData(e.to_string()))
    }

    /// Decrypt, verify the signature and check the manifest is the expected one
    pub fn decrypt_verify_and_load(
        encrypted: &[u8],
        realm_key: &SecretKey,
        author_verify_key: &VerifyKey,
        expected_author: DeviceID,
        expected_id: VlobID,
        expected_version: u32,
    ) -> Result<ChildManifest, DataError> {
        let signed = realm_key.decrypt(encrypted)?;
        let raw = author_verify_key.verify(&signed)?;
        let manifest: ChildManifest =
            bincode::deserialize(raw).map_err(|e| DataError::InvalidData(e.to_string()))?;
        if manifest.author() != expected_author {
            return Err(DataError::Unexpected(format!(
                "author {} instead of {}",
                manifest.author(),
                expected_author
            )));
        }
        if manifest.id() != expected_id {
            return Err(DataError::Unexpected(format!("ID {} instead of {}", manifest.id(), expected_id)));
        }
        if manifest.version() != expected_version {
            return Err(DataError::Unexpected(format!(
                "version {} instead of {}",
                manifest.version(),
                expected_version
            )));
        }
        Ok(manifest)
    }
}

/// Keys of a realm; the last one is the current key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmKeysBundle {
    pub realm_id: VlobID,
    pub keys: Vec<SecretKey>,
}

impl RealmKeysBundle {
    /// Bundle holding a single freshly generated key
    pub fn generate(realm_id: VlobID) -> Self {
        Self {
            realm_id,
            keys: vec![SecretKey::generate()],
        }
    }

    /// Index and value of the key new data must be encrypted with
    pub fn current_key(&self) -> Option<(u64, &SecretKey)> {
        let index = self.keys.len().checked_sub(1)?;
        Some((index as u64 + 1, &self.keys[index]))
    }

    /// Key by its 1-based index
    pub fn key(&self, key_index: u64) -> Option<&SecretKey> {
        let index = usize::try_from(key_index).ok()?.checked_sub(1)?;
        self.keys.get(index)
    }

    /// Seal the bundle for a user
    pub fn seal_for(&self, recipient: &PublicKey) -> Vec<u8> {
        // bincode cannot fail on these plain data types
        let raw = bincode::serialize(self).unwrap_or_default();
        recipient.encrypt_for_self(&raw)
    }

    /// Open a bundle sealed for us
    pub fn unseal(sealed: &[u8], private_key: &PrivateKey, expected_realm: VlobID) -> Result<Self, DataError> {
        let raw = private_key.decrypt_from_self(sealed)?;
        let bundle: RealmKeysBundle =
            bincode::deserialize(&raw).map_err(|e| DataError::InvalidData(e.to_string()))?;
        if bundle.realm_id != expected_realm || bundle.keys.is_empty() {
            return Err(DataError::Unexpected("keys bundle of another realm".into()));
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn folder(author: DeviceID) -> ChildManifest {
        let now = chrono::Utc::now();
        let id = VlobID::default_new();
        ChildManifest::Folder(FolderManifest {
            author,
            timestamp: now,
            id,
            parent: id,
            version: 1,
            created: now,
            updated: now,
            children: BTreeMap::new(),
        })
    }

    #[test]
    fn test_manifest_encryption() {
        let author = DeviceID::default_new();
        let signing_key = SigningKey::generate();
        let realm_key = SecretKey::generate();
        let manifest = folder(author);
        let encrypted = manifest.dump_sign_and_encrypt(&signing_key, &realm_key);

        let loaded = ChildManifest::decrypt_verify_and_load(
            &encrypted,
            &realm_key,
            &signing_key.verify_key(),
            author,
            manifest.id(),
            1,
        )
        .unwrap();
        assert_eq!(loaded, manifest);

        assert_matches!(
            ChildManifest::decrypt_verify_and_load(
                &encrypted,
                &realm_key,
                &signing_key.verify_key(),
                author,
                manifest.id(),
                2
            ),
            Err(DataError::Unexpected(_))
        );
        assert_matches!(
            ChildManifest::decrypt_verify_and_load(
                &encrypted,
                &SecretKey::generate(),
                &signing_key.verify_key(),
                author,
                manifest.id(),
                1
            ),
            Err(DataError::Decryption)
        );
        assert_matches!(
            ChildManifest::decrypt_verify_and_load(
                &encrypted,
                &realm_key,
                &SigningKey::generate().verify_key(),
                author,
                manifest.id(),
                1
            ),
            Err(DataError::Signature)
        );
    }

    #[test]
    fn test_keys_bundle_sealing() {
        let realm_id = VlobID::default_new();
        let bundle = RealmKeysBundle::generate(realm_id);
        let user_key = PrivateKey::generate();
        let sealed = bundle.seal_for(&user_key.public_key());
        assert_eq!(RealmKeysBundle::unseal(&sealed, &user_key, realm_id).unwrap(), bundle);
        assert_matches!(
            RealmKeysBundle::unseal(&sealed, &user_key, VlobID::default_new()),
            Err(DataError::Unexpected(_))
        );
        assert_eq!(bundle.current_key().map(|(index, _)| index), Some(1));
        assert!(bundle.key(0).is_none());
        assert!(bundle.key(1).is_some());
    }
}
