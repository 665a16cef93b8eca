use crate::error::{ArchiveDeviceError, LoadDeviceError, SaveDeviceError, UpdateDeviceError};
use crate::keyring::{keyring_store, KeyringError};
use crate::strategy::{AvailableDevice, AvailableDeviceType, DeviceAccessStrategy, DeviceSaveStrategy};
use crate::{ARCHIVED_DEVICE_FILE_EXT, DEVICES_DIR, DEVICE_FILE_EXT};
use anyhow::{anyhow, Context};
use parsec_types::{
    AccountVaultItemOpaqueKeyID, DateTime, DeviceID, DeviceLabel, HumanHandle, LocalDevice,
    OrganizationID, ParsecAddr, ParsecOrganizationAddr, SecretKey, UserID,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const KEYRING_SERVICE: &str = "parsec";
const PASSWORD_SALT_SIZE: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum DeviceFileProtection {
    Password {
        #[serde(with = "serde_bytes")]
        salt: Vec<u8>,
    },
    Keyring {
        keyring_service: String,
        keyring_user: String,
    },
    AccountVault {
        ciphertext_key_id: AccountVaultItemOpaqueKeyID,
    },
    Smartcard,
    Recovery,
}

/// On-disk layout of a key file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DeviceFile {
    pub created_on: DateTime,
    pub protected_on: DateTime,
    pub server_url: String,
    pub organization_id: OrganizationID,
    pub user_id: UserID,
    pub device_id: DeviceID,
    pub human_handle: HumanHandle,
    pub device_label: DeviceLabel,
    pub protection: DeviceFileProtection,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

impl DeviceFile {
    pub(crate) fn new(
        device: &LocalDevice,
        created_on: DateTime,
        protection: DeviceFileProtection,
        ciphertext: Vec<u8>,
    ) -> Self {
        Self {
            created_on,
            protected_on: device.now(),
            server_url: device.organization_addr.server().to_http_url(None),
            organization_id: device.organization_id().clone(),
            user_id: device.user_id,
            device_id: device.device_id,
            human_handle: device.human_handle.clone(),
            device_label: device.device_label.clone(),
            protection,
            ciphertext,
        }
    }

    pub(crate) fn dump(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub(crate) fn load(raw: &[u8]) -> Result<Self, LoadDeviceError> {
        bincode::deserialize(raw).map_err(|_| LoadDeviceError::InvalidData)
    }

    fn into_available_device(self, key_file_path: PathBuf) -> AvailableDevice {
        let ty = match self.protection {
            DeviceFileProtection::Password { .. } => AvailableDeviceType::Password,
            DeviceFileProtection::Keyring { .. } => AvailableDeviceType::Keyring,
            DeviceFileProtection::AccountVault { ciphertext_key_id } => {
                AvailableDeviceType::AccountVault { ciphertext_key_id }
            }
            DeviceFileProtection::Smartcard => AvailableDeviceType::Smartcard,
            DeviceFileProtection::Recovery => AvailableDeviceType::Recovery,
        };
        AvailableDevice {
            key_file_path,
            created_on: self.created_on,
            protected_on: self.protected_on,
            server_url: self.server_url,
            organization_id: self.organization_id,
            user_id: self.user_id,
            device_id: self.device_id,
            human_handle: self.human_handle,
            device_label: self.device_label,
            ty,
        }
    }
}

/// `<config_dir>/devices/<device_id>.keys`
pub fn get_default_key_file(config_dir: &Path, device_id: DeviceID) -> PathBuf {
    config_dir
        .join(DEVICES_DIR)
        .join(format!("{}.{}", device_id.hex(), DEVICE_FILE_EXT))
}

async fn read_device_file(key_file: &Path) -> Result<DeviceFile, LoadDeviceError> {
    let raw = tokio::fs::read(key_file)
        .await
        .map_err(|e| LoadDeviceError::InvalidPath(anyhow::Error::new(e).context(key_file.display().to_string())))?;
    DeviceFile::load(&raw)
}

async fn write_device_file(key_file: &Path, file: &DeviceFile) -> Result<(), SaveDeviceError> {
    let raw = file.dump().map_err(|e| SaveDeviceError::Internal(e.into()))?;
    if let Some(parent) = key_file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SaveDeviceError::InvalidPath(e.into()))?;
    }
    // Write then rename so a crash never leaves a truncated key file behind
    let tmp = key_file.with_extension(format!("{DEVICE_FILE_EXT}.tmp"));
    tokio::fs::write(&tmp, raw)
        .await
        .map_err(|e| SaveDeviceError::InvalidPath(e.into()))?;
    tokio::fs::rename(&tmp, key_file)
        .await
        .map_err(|e| SaveDeviceError::InvalidPath(e.into()))?;
    Ok(())
}

fn keyring_error_to_save(err: KeyringError) -> SaveDeviceError {
    match err {
        KeyringError::Unavailable => SaveDeviceError::StorageNotAvailable,
        KeyringError::Backend(msg) => SaveDeviceError::Internal(anyhow!("keyring: {msg}")),
    }
}

/// Produce the protection header and the key encrypting the device
fn protect(
    strategy: &DeviceSaveStrategy,
    device: &LocalDevice,
) -> Result<(DeviceFileProtection, SecretKey), SaveDeviceError> {
    match strategy {
        DeviceSaveStrategy::Password { password } => {
            let salt = parsec_types::crypto::generate_nonce(PASSWORD_SALT_SIZE);
            let key = SecretKey::from_password(password, &salt)
                .map_err(|e| SaveDeviceError::Internal(e.into()))?;
            Ok((DeviceFileProtection::Password { salt }, key))
        }
        DeviceSaveStrategy::Keyring => {
            let store = keyring_store();
            if !store.is_available() {
                return Err(SaveDeviceError::StorageNotAvailable);
            }
            let keyring_user = device.device_id.hex();
            let key = SecretKey::generate();
            store
                .set_secret(KEYRING_SERVICE, &keyring_user, key.as_bytes())
                .map_err(keyring_error_to_save)?;
            Ok((
                DeviceFileProtection::Keyring {
                    keyring_service: KEYRING_SERVICE.to_owned(),
                    keyring_user,
                },
                key,
            ))
        }
        DeviceSaveStrategy::AccountVault {
            ciphertext_key_id,
            ciphertext_key,
        } => Ok((
            DeviceFileProtection::AccountVault {
                ciphertext_key_id: *ciphertext_key_id,
            },
            ciphertext_key.clone(),
        )),
        DeviceSaveStrategy::Smartcard => Err(SaveDeviceError::StorageNotAvailable),
    }
}

/// Retrieve the key encrypting the device, checking the credentials match the header
fn unprotect(access: &DeviceAccessStrategy, protection: &DeviceFileProtection) -> Result<SecretKey, LoadDeviceError> {
    match (access, protection) {
        (DeviceAccessStrategy::Password { password, .. }, DeviceFileProtection::Password { salt }) => {
            SecretKey::from_password(password, salt).map_err(|_| LoadDeviceError::DecryptionFailed)
        }
        (
            DeviceAccessStrategy::Keyring { .. },
            DeviceFileProtection::Keyring {
                keyring_service,
                keyring_user,
            },
        ) => {
            let store = keyring_store();
            if !store.is_available() {
                return Err(LoadDeviceError::StorageNotAvailable);
            }
            let raw = store
                .get_secret(keyring_service, keyring_user)
                .map_err(|e| match e {
                    KeyringError::Unavailable => LoadDeviceError::StorageNotAvailable,
                    KeyringError::Backend(msg) => LoadDeviceError::Internal(anyhow!("keyring: {msg}")),
                })?
                .ok_or(LoadDeviceError::DecryptionFailed)?;
            SecretKey::try_from_slice(&raw).map_err(|_| LoadDeviceError::DecryptionFailed)
        }
        (
            DeviceAccessStrategy::AccountVault {
                ciphertext_key_id,
                ciphertext_key,
                ..
            },
            DeviceFileProtection::AccountVault {
                ciphertext_key_id: expected_id,
            },
        ) => {
            if ciphertext_key_id != expected_id {
                return Err(LoadDeviceError::DecryptionFailed);
            }
            Ok(ciphertext_key.clone())
        }
        (DeviceAccessStrategy::Smartcard { .. }, _) => Err(LoadDeviceError::StorageNotAvailable),
        // Credentials of one kind cannot open a file protected by another
        _ => Err(LoadDeviceError::DecryptionFailed),
    }
}

async fn save_device_with_created_on(
    strategy: &DeviceSaveStrategy,
    device: &LocalDevice,
    created_on: DateTime,
    key_file: PathBuf,
) -> Result<AvailableDevice, SaveDeviceError> {
    let (protection, key) = protect(strategy, device)?;
    let file = DeviceFile::new(device, created_on, protection, key.encrypt(&device.dump()));
    write_device_file(&key_file, &file).await?;
    tracing::debug!(device_id = %device.device_id, key_file = %key_file.display(), "Device saved");
    Ok(file.into_available_device(key_file))
}

/// Encrypt `device` into `key_file` with the given protection
pub async fn save_device(
    strategy: &DeviceSaveStrategy,
    device: &LocalDevice,
    key_file: PathBuf,
) -> Result<AvailableDevice, SaveDeviceError> {
    save_device_with_created_on(strategy, device, device.now(), key_file).await
}

pub async fn load_device(access: &DeviceAccessStrategy) -> Result<Arc<LocalDevice>, LoadDeviceError> {
    let file = read_device_file(access.key_file()).await?;
    let key = unprotect(access, &file.protection)?;
    let cleartext = key
        .decrypt(&file.ciphertext)
        .map_err(|_| LoadDeviceError::DecryptionFailed)?;
    let device = LocalDevice::load(&cleartext).map_err(|_| LoadDeviceError::InvalidData)?;
    Ok(Arc::new(device))
}

/// Header of a key file, no credentials needed
pub async fn load_available_device(key_file: &Path) -> Result<AvailableDevice, LoadDeviceError> {
    let file = read_device_file(key_file).await?;
    Ok(file.into_available_device(key_file.to_path_buf()))
}

/// Every readable key file in `<config_dir>/devices`, invalid ones are skipped
pub async fn list_available_devices(config_dir: &Path) -> anyhow::Result<Vec<AvailableDevice>> {
    let devices_dir = config_dir.join(DEVICES_DIR);
    let mut entries = match tokio::fs::read_dir(&devices_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e).context("cannot list devices directory"),
    };

    let mut key_files = vec![];
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(DEVICE_FILE_EXT) {
            key_files.push(path);
        }
    }
    key_files.sort();

    let mut devices = Vec::with_capacity(key_files.len());
    for key_file in key_files {
        match load_available_device(&key_file).await {
            Ok(device) => devices.push(device),
            Err(err) => {
                tracing::warn!(key_file = %key_file.display(), error = %err, "Ignoring invalid key file");
            }
        }
    }
    Ok(devices)
}

/// Move a key file out of the way, it is no longer listed nor loadable from its path
pub async fn archive_device(key_file: &Path) -> Result<(), ArchiveDeviceError> {
    let archived = key_file.with_extension(ARCHIVED_DEVICE_FILE_EXT);
    tokio::fs::rename(key_file, &archived)
        .await
        .with_context(|| format!("cannot archive {}", key_file.display()))?;
    tracing::info!(key_file = %key_file.display(), "Device archived");
    Ok(())
}

/// Re-encrypt a key file in place with a new protection
pub async fn update_device_change_authentication(
    current_access: &DeviceAccessStrategy,
    new_strategy: &DeviceSaveStrategy,
) -> Result<AvailableDevice, UpdateDeviceError> {
    let file = read_device_file(current_access.key_file()).await?;
    let device = load_device(current_access).await?;
    let available = save_device_with_created_on(
        new_strategy,
        &device,
        file.created_on,
        current_access.key_file().to_path_buf(),
    )
    .await?;
    Ok(available)
}

/// Point a key file at another server, returning the previous one
pub async fn update_device_overwrite_server_addr(
    access: &DeviceAccessStrategy,
    new_server_addr: ParsecAddr,
) -> Result<ParsecAddr, UpdateDeviceError> {
    let file = read_device_file(access.key_file()).await?;
    let device = load_device(access).await?;
    let old_server_addr = device.organization_addr.server().clone();

    let mut device = (*device).clone();
    device.organization_addr = ParsecOrganizationAddr::new(
        new_server_addr,
        device.organization_id().clone(),
        device.organization_addr.root_verify_key().clone(),
    );
    save_device_with_created_on(
        &access.to_save_strategy(),
        &device,
        file.created_on,
        access.key_file().to_path_buf(),
    )
    .await?;
    Ok(old_server_addr)
}
