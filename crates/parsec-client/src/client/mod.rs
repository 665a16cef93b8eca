//! Client session
//!
//! A [`Client`] runs as one device of an organization. It owns the local
//! caches of that device (certificates, realm keys, workspace stores) and
//! the workspaces and histories started from it: stopping the client stops
//! them all.
//!
//! A device can only be run by one client at a time, this is enforced by a
//! lock file in the device's data directory.

/// Map a [`SubmitError`](crate::certif::SubmitError) into an operation error
/// having `Offline`, `TimestampOutOfBallpark` and `Internal` variants, the
/// listed rejections mapping to their own variants
macro_rules! submit_error_into {
    ($error:ident, $err:expr $(, $rejection:pat => $variant:expr)* $(,)?) => {
        match $err {
            $crate::certif::SubmitError::Offline => $error::Offline,
            $crate::certif::SubmitError::TimestampOutOfBallpark {
                server_timestamp,
                client_timestamp,
                ballpark_client_early_offset,
                ballpark_client_late_offset,
            } => $error::TimestampOutOfBallpark {
                server_timestamp,
                client_timestamp,
                ballpark_client_early_offset,
                ballpark_client_late_offset,
            },
            $($crate::certif::SubmitError::Rejected($rejection) => $variant,)*
            $crate::certif::SubmitError::Rejected(rejection) => {
                $error::Internal(anyhow::anyhow!("certificate rejected: {rejection:?}"))
            }
            $crate::certif::SubmitError::Internal(err) => $error::Internal(err),
        }
    };
}

/// Implement `From<ConnectionError>` for errors having `Offline` and `Internal` variants
macro_rules! impl_from_connection_error {
    ($($error:ident),* $(,)?) => {
        $(
            impl From<::parsec_connection::ConnectionError> for $error {
                fn from(err: ::parsec_connection::ConnectionError) -> Self {
                    match err {
                        ::parsec_connection::ConnectionError::NoResponse => Self::Offline,
                        err => Self::Internal(err.into()),
                    }
                }
            }
        )*
    };
}

mod bootstrap;
mod invite;
mod organization;
mod recovery;
mod shamir;
mod user;
mod workspace;

pub use bootstrap::{bootstrap_organization, BootstrapOrganizationError};
pub use invite::{
    ClientCancelInvitationError, ClientNewDeviceInvitationError, ClientNewShamirRecoveryInvitationError,
    ClientNewUserInvitationError, ClientStartInvitationGreetError, NewInvitationInfo,
};
pub use organization::{
    ClientAcceptTosError, ClientGetOrganizationBootstrapDateError, ClientGetTosError,
    ClientOrganizationInfoError, OrganizationInfo,
};
pub use recovery::{import_recovery_device, ClientExportRecoveryDeviceError, ImportRecoveryDeviceError};
pub use shamir::{
    ClientDeleteShamirRecoveryError, ClientSetupShamirRecoveryError, OtherShamirRecoveryInfo,
    SelfShamirRecoveryInfo,
};
pub use user::{
    ClientGetUserDeviceError, ClientGetUserInfoError, ClientListFrozenUsersError, ClientRevokeUserError,
    ClientUserUpdateProfileError,
};
pub use workspace::{
    ClientCreateWorkspaceError, ClientListWorkspaceUsersError, ClientRenameWorkspaceError,
    ClientShareWorkspaceError, ClientStartWorkspaceError, ClientStartWorkspaceHistoryError,
    WorkspaceUserAccessInfo,
};

use crate::certif::{CertifPollError, CertificatesStore, SubmitError};
use crate::config::ClientConfig;
use crate::event_bus::{ClientEvent, EventBus};
use crate::monitors::{self, TaskRegistry};
use crate::realms::RealmsStore;
use crate::workspace::{WorkspaceHistoryOps, WorkspaceOps};
use anyhow::Context;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use parsec_connection::protocol::ServerConfig;
use parsec_connection::{authenticated_cmds, AuthenticatedCmds, ConnectionError};
use parsec_device_loader::{load_device, DeviceAccessStrategy, LoadDeviceError};
use parsec_types::{
    AnyCertificate, CertificateAuthor, DeviceCertificate, DeviceID, DeviceLabel, DevicePurpose, HumanHandle,
    LocalDevice, OrganizationID, ParsecOrganizationAddr, UserID, UserProfile,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const LOCK_FILE: &str = ".lock";

/// Devices run by a client of this process
static RUNNING_DEVICES: Lazy<Mutex<HashSet<DeviceID>>> = Lazy::new(|| Mutex::new(HashSet::new()));

#[derive(Debug, thiserror::Error)]
pub enum ClientStartError {
    #[error("Device is already in use by another client")]
    DeviceAlreadyRunning,
    #[error("Device storage is not available")]
    LoadDeviceStorageNotAvailable,
    #[error("Invalid key file path: {0}")]
    LoadDeviceInvalidPath(anyhow::Error),
    #[error("Cannot deserialize key file content")]
    LoadDeviceInvalidData,
    #[error("Failed to decrypt key file content")]
    LoadDeviceDecryptionFailed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<LoadDeviceError> for ClientStartError {
    fn from(err: LoadDeviceError) -> Self {
        match err {
            LoadDeviceError::StorageNotAvailable => Self::LoadDeviceStorageNotAvailable,
            LoadDeviceError::InvalidPath(err) => Self::LoadDeviceInvalidPath(err),
            LoadDeviceError::InvalidData => Self::LoadDeviceInvalidData,
            LoadDeviceError::DecryptionFailed => Self::LoadDeviceDecryptionFailed,
            LoadDeviceError::Internal(err) => Self::Internal(err),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientStopError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientInfoError {
    #[error("Client is stopped")]
    Stopped,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Point-in-time view of a client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub organization_addr: ParsecOrganizationAddr,
    pub organization_id: OrganizationID,
    pub device_id: DeviceID,
    pub user_id: UserID,
    pub device_label: DeviceLabel,
    pub human_handle: HumanHandle,
    pub current_profile: UserProfile,
    pub server_config: Option<ServerConfig>,
    pub is_server_online: bool,
    pub is_organization_expired: bool,
    pub must_accept_tos: bool,
}

/// What the client knows about its connection to the server
#[derive(Debug, Default)]
pub(crate) struct ConnectionStatus {
    pub online: bool,
    pub organization_expired: bool,
    pub must_accept_tos: bool,
    pub frozen: bool,
    pub server_config: Option<ServerConfig>,
}

pub struct Client {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) device: Arc<LocalDevice>,
    pub(crate) cmds: Arc<dyn AuthenticatedCmds>,
    pub(crate) certificates: Arc<CertificatesStore>,
    pub(crate) realms: Arc<RealmsStore>,
    pub(crate) event_bus: EventBus,
    pub(crate) status: Arc<Mutex<ConnectionStatus>>,
    data_dir: PathBuf,
    workspaces: Mutex<Vec<Arc<WorkspaceOps>>>,
    histories: Mutex<Vec<Arc<WorkspaceHistoryOps>>>,
    tasks: TaskRegistry,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("device_id", &self.device.device_id)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

/// Take the lock of a device, stale locks left by dead processes are taken over
async fn acquire_device_lock(data_dir: &Path, device_id: DeviceID) -> Result<(), ClientStartError> {
    if !RUNNING_DEVICES.lock().insert(device_id) {
        return Err(ClientStartError::DeviceAlreadyRunning);
    }
    let lock_path = data_dir.join(LOCK_FILE);
    let outcome = async {
        if let Ok(raw) = tokio::fs::read_to_string(&lock_path).await {
            if let Ok(pid) = raw.trim().parse::<u32>() {
                if pid != std::process::id() && process_is_alive(pid) {
                    return Err(ClientStartError::DeviceAlreadyRunning);
                }
            }
        }
        tokio::fs::create_dir_all(data_dir)
            .await
            .context("cannot create device data dir")?;
        tokio::fs::write(&lock_path, std::process::id().to_string())
            .await
            .context("cannot write device lock file")?;
        Ok(())
    }
    .await;
    if outcome.is_err() {
        RUNNING_DEVICES.lock().remove(&device_id);
    }
    outcome
}

async fn release_device_lock(data_dir: &Path, device_id: DeviceID) {
    if let Err(err) = tokio::fs::remove_file(data_dir.join(LOCK_FILE)).await {
        tracing::warn!(%device_id, error = %err, "Cannot remove device lock file");
    }
    RUNNING_DEVICES.lock().remove(&device_id);
}

#[cfg(target_os = "linux")]
fn process_is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_is_alive(_pid: u32) -> bool {
    true
}

impl Client {
    /// Unlock the device from its key file and start a client for it
    pub async fn start(config: Arc<ClientConfig>, access: &DeviceAccessStrategy) -> Result<Arc<Self>, ClientStartError> {
        let device = load_device(access).await?;
        Self::start_with_device(config, device).await
    }

    pub async fn start_with_device(config: Arc<ClientConfig>, device: Arc<LocalDevice>) -> Result<Arc<Self>, ClientStartError> {
        let data_dir = config.device_data_dir(device.device_id);
        acquire_device_lock(&data_dir, device.device_id).await?;
        match Self::load(config, device.clone(), data_dir.clone()).await {
            Ok(client) => Ok(client),
            Err(err) => {
                release_device_lock(&data_dir, device.device_id).await;
                Err(err)
            }
        }
    }

    async fn load(config: Arc<ClientConfig>, device: Arc<LocalDevice>, data_dir: PathBuf) -> Result<Arc<Self>, ClientStartError> {
        let cmds = authenticated_cmds(
            device.organization_addr.server(),
            device.organization_id(),
            device.device_id,
        )
        .with_context(|| format!("no known server at {}", device.organization_addr.server()))?;
        let event_bus = EventBus::new();
        let certificates =
            Arc::new(CertificatesStore::load(device.clone(), cmds.clone(), event_bus.clone(), &data_dir).await?);
        let realms = Arc::new(
            RealmsStore::load(
                device.clone(),
                cmds.clone(),
                certificates.clone(),
                event_bus.clone(),
                &data_dir,
            )
            .await?,
        );

        let client = Arc::new(Self {
            config,
            device,
            cmds,
            certificates,
            realms,
            event_bus,
            status: Arc::new(Mutex::new(ConnectionStatus::default())),
            data_dir,
            workspaces: Mutex::new(Vec::new()),
            histories: Mutex::new(Vec::new()),
            tasks: TaskRegistry::new(),
            stopped: AtomicBool::new(false),
        });
        if client.config.with_monitors {
            monitors::start_server_events_monitor(&client);
        }
        tracing::info!(device_id = %client.device.device_id, "Client started");
        client.event_bus.send(ClientEvent::ClientStarted {
            device_id: client.device.device_id,
        });
        Ok(client)
    }

    /// Stop every workspace and history, then the client itself
    ///
    /// A child failing to stop does not prevent the others from being
    /// stopped, the first failure is reported once everything is released.
    pub async fn stop(&self) -> Result<(), ClientStopError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tasks.shutdown();

        let mut first_error = None;
        let workspaces: Vec<_> = self.workspaces.lock().drain(..).collect();
        for workspace in workspaces {
            if let Err(err) = workspace.stop().await {
                tracing::error!(realm_id = %workspace.realm_id(), error = %err, "Cannot stop workspace");
                first_error.get_or_insert(err);
            }
        }
        for history in self.histories.lock().drain(..) {
            history.stop();
        }

        release_device_lock(&self.data_dir, self.device.device_id).await;
        tracing::info!(device_id = %self.device.device_id, "Client stopped");
        self.event_bus.send(ClientEvent::ClientStopped {
            device_id: self.device.device_id,
        });
        match first_error {
            Some(err) => Err(err.context("a workspace failed to stop").into()),
            None => Ok(()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn info(&self) -> Result<ClientInfo, ClientInfoError> {
        if self.is_stopped() {
            return Err(ClientInfoError::Stopped);
        }
        let status = self.status.lock();
        Ok(ClientInfo {
            organization_addr: self.device.organization_addr.clone(),
            organization_id: self.device.organization_id().clone(),
            device_id: self.device.device_id,
            user_id: self.device.user_id,
            device_label: self.device.device_label.clone(),
            human_handle: self.device.human_handle.clone(),
            current_profile: self.certificates.self_profile(),
            server_config: status.server_config.clone(),
            is_server_online: status.online,
            is_organization_expired: status.organization_expired,
            must_accept_tos: status.must_accept_tos,
        })
    }

    pub fn device(&self) -> &Arc<LocalDevice> {
        &self.device
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn certificates(&self) -> &Arc<CertificatesStore> {
        &self.certificates
    }

    pub(crate) fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub(crate) fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub(crate) fn started_workspaces(&self) -> Vec<Arc<WorkspaceOps>> {
        self.workspaces.lock().clone()
    }

    /// Fetch new certificates, being offline is not an error
    pub(crate) async fn refresh_certificates(&self) -> anyhow::Result<()> {
        match self.certificates.poll_server_for_new_certificates().await {
            Ok(_) | Err(CertifPollError::Offline) => Ok(()),
            Err(err) => Err(anyhow::Error::from(err).context("cannot fetch new certificates")),
        }
    }

    /// Register a new device of our own user, used for recovery devices
    pub(crate) async fn register_self_device(
        &self,
        device_label: DeviceLabel,
        purpose: DevicePurpose,
    ) -> Result<LocalDevice, SubmitError> {
        let new_device = self.device.new_device_for_same_user(device_label);
        let device = &self.device;
        let cmds = &self.cmds;
        self.certificates
            .submit(|timestamp| {
                let certificate = AnyCertificate::Device(DeviceCertificate {
                    author: CertificateAuthor::Device(device.device_id),
                    timestamp,
                    user_id: new_device.user_id,
                    device_id: new_device.device_id,
                    device_label: new_device.device_label.clone(),
                    verify_key: new_device.signing_key.verify_key(),
                    purpose,
                })
                .dump_and_sign(&device.signing_key);
                async move { cmds.device_create(certificate).await }
            })
            .await?;
        tracing::info!(device_id = %new_device.device_id, ?purpose, "Device registered");
        Ok(new_device)
    }

    pub(crate) fn note_connection_error(&self, err: &ConnectionError) {
        let event = {
            let mut status = self.status.lock();
            match err {
                ConnectionError::NoResponse if status.online => {
                    status.online = false;
                    Some(ClientEvent::Offline)
                }
                ConnectionError::ExpiredOrganization if !status.organization_expired => {
                    status.organization_expired = true;
                    Some(ClientEvent::ExpiredOrganization)
                }
                ConnectionError::UserMustAcceptTos if !status.must_accept_tos => {
                    status.must_accept_tos = true;
                    Some(ClientEvent::MustAcceptTos)
                }
                ConnectionError::FrozenUser if !status.frozen => {
                    status.frozen = true;
                    Some(ClientEvent::FrozenSelfUser)
                }
                _ => None,
            }
        };
        if let Some(event) = event {
            self.event_bus.send(event);
        }
    }
}
