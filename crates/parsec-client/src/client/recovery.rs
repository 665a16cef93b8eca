use super::Client;
use crate::certif::{submit_certificates, SubmitError};
use crate::config::ClientConfig;
use crate::event_bus::EventBus;
use parsec_connection::authenticated_cmds;
use parsec_connection::protocol::CertificateRejection;
use parsec_device_loader::{
    dump_recovery_device, get_default_key_file, load_recovery_device, save_device, AvailableDevice,
    DeviceSaveStrategy, LoadRecoveryDeviceError, SaveDeviceError,
};
use parsec_types::{
    AnyCertificate, CertificateAuthor, DateTime, DeviceCertificate, DeviceLabel, DevicePurpose,
};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ClientExportRecoveryDeviceError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Client is stopped")]
    Stopped,
    #[error("Our clock ({client_timestamp}) and the server's one ({server_timestamp}) are too far apart")]
    TimestampOutOfBallpark {
        server_timestamp: DateTime,
        client_timestamp: DateTime,
        ballpark_client_early_offset: f64,
        ballpark_client_late_offset: f64,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ImportRecoveryDeviceError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Cannot deserialize recovery file content")]
    InvalidData,
    #[error("Invalid passphrase format")]
    InvalidPassphrase,
    #[error("Failed to decrypt recovery file content")]
    DecryptionFailed,
    #[error("The recovery device's user is revoked")]
    RecoveryDeviceRevoked,
    #[error("Device storage is not available")]
    StorageNotAvailable,
    #[error("Invalid key file path: {0}")]
    InvalidPath(anyhow::Error),
    #[error("Our clock ({client_timestamp}) and the server's one ({server_timestamp}) are too far apart")]
    TimestampOutOfBallpark {
        server_timestamp: DateTime,
        client_timestamp: DateTime,
        ballpark_client_early_offset: f64,
        ballpark_client_late_offset: f64,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<LoadRecoveryDeviceError> for ImportRecoveryDeviceError {
    fn from(err: LoadRecoveryDeviceError) -> Self {
        match err {
            LoadRecoveryDeviceError::InvalidData => Self::InvalidData,
            LoadRecoveryDeviceError::InvalidPassphrase => Self::InvalidPassphrase,
            LoadRecoveryDeviceError::DecryptionFailed => Self::DecryptionFailed,
        }
    }
}

impl From<SaveDeviceError> for ImportRecoveryDeviceError {
    fn from(err: SaveDeviceError) -> Self {
        match err {
            SaveDeviceError::StorageNotAvailable => Self::StorageNotAvailable,
            SaveDeviceError::InvalidPath(err) => Self::InvalidPath(err),
            SaveDeviceError::Internal(err) => Self::Internal(err),
        }
    }
}

impl From<SubmitError> for ImportRecoveryDeviceError {
    fn from(err: SubmitError) -> Self {
        submit_error_into!(ImportRecoveryDeviceError, err,
            CertificateRejection::AuthorNotAllowed => ImportRecoveryDeviceError::RecoveryDeviceRevoked,
        )
    }
}

impl Client {
    /// Register a recovery device and export it, returns `(passphrase, file content)`
    ///
    /// The passphrase is only ever available here, it must be shown to the user.
    pub async fn export_recovery_device(
        &self,
        device_label: DeviceLabel,
    ) -> Result<(String, Vec<u8>), ClientExportRecoveryDeviceError> {
        if self.is_stopped() {
            return Err(ClientExportRecoveryDeviceError::Stopped);
        }
        let recovery_device = self
            .register_self_device(device_label, DevicePurpose::PassphraseRecovery)
            .await
            .map_err(|err| submit_error_into!(ClientExportRecoveryDeviceError, err))?;
        Ok(dump_recovery_device(&recovery_device)?)
    }
}

/// Use a recovery file to register and save a new device of its user
pub async fn import_recovery_device(
    config: Arc<ClientConfig>,
    recovery_device_file: &[u8],
    passphrase: &str,
    device_label: DeviceLabel,
    save_strategy: &DeviceSaveStrategy,
) -> Result<AvailableDevice, ImportRecoveryDeviceError> {
    let recovery_device = load_recovery_device(recovery_device_file, passphrase)?;
    let new_device = recovery_device.new_device_for_same_user(device_label);
    let cmds = authenticated_cmds(
        recovery_device.organization_addr.server(),
        recovery_device.organization_id(),
        recovery_device.device_id,
    )
    .map_err(|_| ImportRecoveryDeviceError::Offline)?;
    submit_certificates(&recovery_device, &EventBus::new(), |timestamp| {
        let certificate = AnyCertificate::Device(DeviceCertificate {
            author: CertificateAuthor::Device(recovery_device.device_id),
            timestamp,
            user_id: new_device.user_id,
            device_id: new_device.device_id,
            device_label: new_device.device_label.clone(),
            verify_key: new_device.signing_key.verify_key(),
            purpose: DevicePurpose::Standard,
        })
        .dump_and_sign(&recovery_device.signing_key);
        let cmds = cmds.clone();
        async move { cmds.device_create(certificate).await }
    })
    .await?;

    let key_file = get_default_key_file(&config.config_dir, new_device.device_id);
    let available = save_device(save_strategy, &new_device, key_file).await?;
    tracing::info!(device_id = %new_device.device_id, "Device imported from recovery file");
    Ok(available)
}
