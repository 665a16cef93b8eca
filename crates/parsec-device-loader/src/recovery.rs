//! Recovery device files
//!
//! A recovery device is exported as a key file protected by a random
//! passphrase shown once to the user. Whoever holds both the file and the
//! passphrase can register a new device for the same user.

use crate::error::LoadRecoveryDeviceError;
use crate::file::{DeviceFile, DeviceFileProtection};
use parsec_types::{LocalDevice, SecretKey};

/// Encrypt `recovery_device` under a fresh passphrase, returns `(passphrase, file content)`
pub fn dump_recovery_device(recovery_device: &LocalDevice) -> anyhow::Result<(String, Vec<u8>)> {
    let (passphrase, key) = SecretKey::generate_recovery_passphrase();
    let file = DeviceFile::new(
        recovery_device,
        recovery_device.now(),
        DeviceFileProtection::Recovery,
        key.encrypt(&recovery_device.dump()),
    );
    Ok((passphrase, file.dump()?))
}

pub fn load_recovery_device(data: &[u8], passphrase: &str) -> Result<LocalDevice, LoadRecoveryDeviceError> {
    let file = DeviceFile::load(data).map_err(|_| LoadRecoveryDeviceError::InvalidData)?;
    if !matches!(file.protection, DeviceFileProtection::Recovery) {
        return Err(LoadRecoveryDeviceError::InvalidData);
    }
    let key = SecretKey::from_recovery_passphrase(passphrase)
        .map_err(|_| LoadRecoveryDeviceError::InvalidPassphrase)?;
    let cleartext = key
        .decrypt(&file.ciphertext)
        .map_err(|_| LoadRecoveryDeviceError::DecryptionFailed)?;
    LocalDevice::load(&cleartext).map_err(|_| LoadRecoveryDeviceError::InvalidData)
}
