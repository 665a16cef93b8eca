//! How a key file is protected, and what can be learned about it unlocked

use parsec_types::{
    AccountVaultItemOpaqueKeyID, DateTime, DeviceID, DeviceLabel, HumanHandle, OrganizationID,
    SecretKey, UserID,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Credentials needed to unlock an existing key file
#[derive(Clone)]
pub enum DeviceAccessStrategy {
    Password {
        key_file: PathBuf,
        password: String,
    },
    Keyring {
        key_file: PathBuf,
    },
    AccountVault {
        key_file: PathBuf,
        ciphertext_key_id: AccountVaultItemOpaqueKeyID,
        ciphertext_key: SecretKey,
    },
    Smartcard {
        key_file: PathBuf,
    },
}

impl fmt::Debug for DeviceAccessStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { key_file, .. } => f
                .debug_struct("Password")
                .field("key_file", key_file)
                .finish_non_exhaustive(),
            Self::Keyring { key_file } => f.debug_struct("Keyring").field("key_file", key_file).finish(),
            Self::AccountVault {
                key_file,
                ciphertext_key_id,
                ..
            } => f
                .debug_struct("AccountVault")
                .field("key_file", key_file)
                .field("ciphertext_key_id", ciphertext_key_id)
                .finish_non_exhaustive(),
            Self::Smartcard { key_file } => f.debug_struct("Smartcard").field("key_file", key_file).finish(),
        }
    }
}

impl DeviceAccessStrategy {
    pub fn key_file(&self) -> &Path {
        match self {
            Self::Password { key_file, .. }
            | Self::Keyring { key_file }
            | Self::AccountVault { key_file, .. }
            | Self::Smartcard { key_file } => key_file,
        }
    }

    /// Protection to use when rewriting the file in place
    pub fn to_save_strategy(&self) -> DeviceSaveStrategy {
        match self {
            Self::Password { password, .. } => DeviceSaveStrategy::Password {
                password: password.clone(),
            },
            Self::Keyring { .. } => DeviceSaveStrategy::Keyring,
            Self::AccountVault {
                ciphertext_key_id,
                ciphertext_key,
                ..
            } => DeviceSaveStrategy::AccountVault {
                ciphertext_key_id: *ciphertext_key_id,
                ciphertext_key: ciphertext_key.clone(),
            },
            Self::Smartcard { .. } => DeviceSaveStrategy::Smartcard,
        }
    }
}

/// Protection to apply when writing a new key file
#[derive(Clone)]
pub enum DeviceSaveStrategy {
    Password {
        password: String,
    },
    Keyring,
    AccountVault {
        ciphertext_key_id: AccountVaultItemOpaqueKeyID,
        ciphertext_key: SecretKey,
    },
    Smartcard,
}

impl fmt::Debug for DeviceSaveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { .. } => f.debug_struct("Password").finish_non_exhaustive(),
            Self::Keyring => f.write_str("Keyring"),
            Self::AccountVault {
                ciphertext_key_id, ..
            } => f
                .debug_struct("AccountVault")
                .field("ciphertext_key_id", ciphertext_key_id)
                .finish_non_exhaustive(),
            Self::Smartcard => f.write_str("Smartcard"),
        }
    }
}

impl DeviceSaveStrategy {
    /// Credentials that will unlock the file once written to `key_file`
    pub fn into_access(self, key_file: PathBuf) -> DeviceAccessStrategy {
        match self {
            Self::Password { password } => DeviceAccessStrategy::Password { key_file, password },
            Self::Keyring => DeviceAccessStrategy::Keyring { key_file },
            Self::AccountVault {
                ciphertext_key_id,
                ciphertext_key,
            } => DeviceAccessStrategy::AccountVault {
                key_file,
                ciphertext_key_id,
                ciphertext_key,
            },
            Self::Smartcard => DeviceAccessStrategy::Smartcard { key_file },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvailableDeviceType {
    Password,
    Recovery,
    Keyring,
    Smartcard,
    AccountVault {
        ciphertext_key_id: AccountVaultItemOpaqueKeyID,
    },
}

/// Cleartext description of a key file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableDevice {
    pub key_file_path: PathBuf,
    pub created_on: DateTime,
    pub protected_on: DateTime,
    pub server_url: String,
    pub organization_id: OrganizationID,
    pub user_id: UserID,
    pub device_id: DeviceID,
    pub human_handle: HumanHandle,
    pub device_label: DeviceLabel,
    pub ty: AvailableDeviceType,
}
