//! Device key files, organization bootstrap and platform helpers
//!
//! Nothing in here needs a started client.

use parsec_client::ClientConfig;
use parsec_device_loader::{AvailableDevice, DeviceAccessStrategy, DeviceSaveStrategy, DEVICES_DIR};

pub use parsec_client::client::{BootstrapOrganizationError, ImportRecoveryDeviceError};
pub use parsec_device_loader::{ArchiveDeviceError, UpdateDeviceError};
use parsec_types::{DeviceLabel, HumanHandle, ParsecAddr, ParsecOrganizationBootstrapAddr};
use std::path::Path;
use std::sync::Arc;

pub use parsec_client::config::{
    get_default_config_dir, get_default_data_base_dir, get_default_mountpoint_base_dir, get_platform, Platform,
};
pub use parsec_device_loader::is_keyring_available;
pub use parsec_types::{build_parsec_organization_bootstrap_addr, parse_parsec_addr, ParseParsecAddrError, ParsedParsecAddr};

#[derive(Debug, thiserror::Error)]
pub enum ListAvailableDevicesError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Every key file under `config_dir`, unreadable ones are skipped
pub async fn list_available_devices(config_dir: &Path) -> Result<Vec<AvailableDevice>, ListAvailableDevicesError> {
    Ok(parsec_device_loader::list_available_devices(config_dir).await?)
}

/// Archive a key file, it must belong to `config_dir`
pub async fn archive_device(config_dir: &Path, device_path: &Path) -> Result<(), ArchiveDeviceError> {
    if !device_path.starts_with(config_dir.join(DEVICES_DIR)) {
        return Err(anyhow::anyhow!("{} is not a key file of {}", device_path.display(), config_dir.display()).into());
    }
    parsec_device_loader::archive_device(device_path).await
}

pub async fn update_device_change_authentication(
    current_auth: &DeviceAccessStrategy,
    new_auth: &DeviceSaveStrategy,
) -> Result<AvailableDevice, UpdateDeviceError> {
    parsec_device_loader::update_device_change_authentication(current_auth, new_auth).await
}

/// Returns the server the device used to point at
pub async fn update_device_overwrite_server_addr(
    access: &DeviceAccessStrategy,
    new_server_addr: ParsecAddr,
) -> Result<ParsecAddr, UpdateDeviceError> {
    parsec_device_loader::update_device_overwrite_server_addr(access, new_server_addr).await
}

/// Create an organization's first user and save its device
///
/// Sequestered organizations are not supported: passing a sequester
/// authority key fails without contacting the server.
pub async fn bootstrap_organization(
    config: Arc<ClientConfig>,
    bootstrap_organization_addr: ParsecOrganizationBootstrapAddr,
    save_strategy: DeviceSaveStrategy,
    human_handle: HumanHandle,
    device_label: DeviceLabel,
    sequester_authority_verify_key: Option<Vec<u8>>,
) -> Result<AvailableDevice, BootstrapOrganizationError> {
    if sequester_authority_verify_key.is_some() {
        return Err(anyhow::anyhow!("sequestered organizations are not supported").into());
    }
    let organization_id = bootstrap_organization_addr.organization_id().clone();
    let available = parsec_client::bootstrap_organization(
        config,
        bootstrap_organization_addr,
        &save_strategy,
        human_handle,
        device_label,
    )
    .await?;
    tracing::info!(%organization_id, device_id = %available.device_id, "Organization bootstrapped");
    Ok(available)
}

pub async fn import_recovery_device(
    config: Arc<ClientConfig>,
    recovery_device: Vec<u8>,
    passphrase: String,
    device_label: DeviceLabel,
    save_strategy: DeviceSaveStrategy,
) -> Result<AvailableDevice, ImportRecoveryDeviceError> {
    parsec_client::import_recovery_device(config, &recovery_device, &passphrase, device_label, &save_strategy).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_archive_outside_config_dir_is_rejected() {
        let config_dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let key_file = elsewhere.path().join("device.keys");
        std::fs::write(&key_file, b"").unwrap();

        let res = archive_device(config_dir.path(), &key_file).await;
        assert_matches!(res, Err(ArchiveDeviceError::Internal(_)));
        assert!(key_file.exists());
    }

    #[tokio::test]
    async fn test_list_empty_config_dir() {
        let config_dir = tempfile::tempdir().unwrap();
        let devices = list_available_devices(config_dir.path()).await.unwrap();
        assert!(devices.is_empty());
    }
}
