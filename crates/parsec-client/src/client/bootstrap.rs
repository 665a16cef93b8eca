use crate::certif::{submit_certificates, SubmitError};
use crate::config::ClientConfig;
use crate::event_bus::EventBus;
use parsec_connection::anonymous_cmds;
use parsec_connection::protocol::CertificateRejection;
use parsec_device_loader::{get_default_key_file, save_device, AvailableDevice, DeviceSaveStrategy, SaveDeviceError};
use parsec_types::{
    AnyCertificate, CertificateAuthor, DateTime, DeviceCertificate, DeviceLabel, DevicePurpose, HumanHandle,
    LocalDevice, ParsecOrganizationBootstrapAddr, SigningKey, UserCertificate, UserProfile,
};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapOrganizationError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Organization already bootstrapped")]
    AlreadyUsedToken,
    #[error("Invalid bootstrap token")]
    InvalidToken,
    #[error("Device storage is not available")]
    SaveDeviceStorageNotAvailable,
    #[error("Invalid key file path: {0}")]
    SaveDeviceInvalidPath(anyhow::Error),
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

impl From<SubmitError> for BootstrapOrganizationError {
    fn from(err: SubmitError) -> Self {
        submit_error_into!(BootstrapOrganizationError, err,
            CertificateRejection::OrganizationAlreadyBootstrapped => BootstrapOrganizationError::AlreadyUsedToken,
            CertificateRejection::InvalidBootstrapToken => BootstrapOrganizationError::InvalidToken,
        )
    }
}

impl From<SaveDeviceError> for BootstrapOrganizationError {
    fn from(err: SaveDeviceError) -> Self {
        match err {
            SaveDeviceError::StorageNotAvailable => Self::SaveDeviceStorageNotAvailable,
            SaveDeviceError::InvalidPath(err) => Self::SaveDeviceInvalidPath(err),
            SaveDeviceError::Internal(err) => Self::Internal(err),
        }
    }
}

/// Create the first user of an organization and save its device
///
/// The root key certifying this first user is only used here and is not kept.
pub async fn bootstrap_organization(
    config: Arc<ClientConfig>,
    addr: ParsecOrganizationBootstrapAddr,
    save_strategy: &DeviceSaveStrategy,
    human_handle: HumanHandle,
    device_label: DeviceLabel,
) -> Result<AvailableDevice, BootstrapOrganizationError> {
    let root_signing_key = SigningKey::generate();
    let root_verify_key = root_signing_key.verify_key();
    let organization_addr = addr.generate_organization_addr(root_verify_key.clone());
    let device = LocalDevice::generate_new_device(organization_addr, UserProfile::Admin, human_handle, device_label);

    let cmds = anonymous_cmds(addr.server(), addr.organization_id()).map_err(|_| BootstrapOrganizationError::Offline)?;
    let bootstrap_token = addr.token();
    submit_certificates(&device, &EventBus::new(), |timestamp| {
        let user_certificate = AnyCertificate::User(UserCertificate {
            author: CertificateAuthor::Root,
            timestamp,
            user_id: device.user_id,
            human_handle: device.human_handle.clone(),
            public_key: device.private_key.public_key(),
            profile: UserProfile::Admin,
        })
        .dump_and_sign(&root_signing_key);
        let device_certificate = AnyCertificate::Device(DeviceCertificate {
            author: CertificateAuthor::Root,
            timestamp,
            user_id: device.user_id,
            device_id: device.device_id,
            device_label: device.device_label.clone(),
            verify_key: device.signing_key.verify_key(),
            purpose: DevicePurpose::Standard,
        })
        .dump_and_sign(&root_signing_key);
        let cmds = cmds.clone();
        let root_verify_key = root_verify_key.clone();
        async move {
            cmds.organization_bootstrap(bootstrap_token, root_verify_key, user_certificate, device_certificate)
                .await
        }
    })
    .await?;
    tracing::info!(organization_id = %addr.organization_id(), "Organization bootstrapped");

    let key_file = get_default_key_file(&config.config_dir, device.device_id);
    Ok(save_device(save_strategy, &device, key_file).await?)
}
