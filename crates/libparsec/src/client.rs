//! Client sessions over handles
//!
//! A client handle owns the handles of the workspaces, histories and
//! mountpoints started from it: stopping the client releases them all.

use crate::events::spawn_events_forwarder;
use crate::handle::{
    borrow_from_handle, filter_map_handles, find_or_register, impl_from_handle_error, register_handle,
    release_handle, Handle, HandleError, HandleItem, HandleKind,
};
pub use parsec_client::client::{
    ClientAcceptTosError, ClientCancelInvitationError, ClientCreateWorkspaceError, ClientDeleteShamirRecoveryError,
    ClientExportRecoveryDeviceError, ClientGetOrganizationBootstrapDateError, ClientGetTosError,
    ClientGetUserDeviceError, ClientGetUserInfoError, ClientListFrozenUsersError, ClientListWorkspaceUsersError,
    ClientNewDeviceInvitationError, ClientNewShamirRecoveryInvitationError, ClientNewUserInvitationError,
    ClientOrganizationInfoError, ClientRenameWorkspaceError, ClientRevokeUserError,
    ClientSetupShamirRecoveryError, ClientShareWorkspaceError, ClientStartWorkspaceError,
    ClientStartWorkspaceHistoryError, ClientUserUpdateProfileError, NewInvitationInfo, OrganizationInfo,
    OtherShamirRecoveryInfo, SelfShamirRecoveryInfo, WorkspaceUserAccessInfo,
};
pub use parsec_client::{ClientInfo, ClientInfoError, ClientStartError, ClientStopError, DeviceInfo, UserInfo, WorkspaceInfo};
use parsec_client::{Client, ClientConfig};
use parsec_connection::protocol::{InviteListItem, Tos};
use parsec_connection::ConnectionError;
use parsec_device_loader::DeviceAccessStrategy;
use parsec_types::{DateTime, DeviceID, DeviceLabel, EmailAddress, EntryName, InvitationToken, RealmRole, UserID, UserProfile, VlobID};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// How long a stopping client gets to deliver its last events
const EVENTS_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Declare the error of a client operation that can only fail because the
/// client is gone or unexpectedly
macro_rules! client_error_enum {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(Debug, thiserror::Error)]
            pub enum $name {
                #[error("Client is stopped")]
                Stopped,
                #[error(transparent)]
                Internal(#[from] anyhow::Error),
            }
        )+
    };
}

client_error_enum!(
    ClientListUsersError,
    ClientListWorkspacesError,
    ClientGetSelfShamirRecoveryError,
    ClientListShamirRecoveriesForOthersError,
    ClientForgetAllCertificatesError,
);

#[derive(Debug, thiserror::Error)]
pub enum ClientListInvitationsError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Client is stopped")]
    Stopped,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ConnectionError> for ClientListInvitationsError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NoResponse => Self::Offline,
            err => Self::Internal(err.into()),
        }
    }
}

impl_from_handle_error!(Internal: ClientStopError);
impl_from_handle_error!(
    Stopped: ClientInfoError,
    ClientListUsersError,
    ClientListWorkspacesError,
    ClientGetSelfShamirRecoveryError,
    ClientListShamirRecoveriesForOthersError,
    ClientForgetAllCertificatesError,
    ClientListInvitationsError,
    ClientGetUserInfoError,
    ClientGetUserDeviceError,
    ClientListFrozenUsersError,
    ClientRevokeUserError,
    ClientUserUpdateProfileError,
    ClientCreateWorkspaceError,
    ClientListWorkspaceUsersError,
    ClientRenameWorkspaceError,
    ClientShareWorkspaceError,
    ClientStartWorkspaceError,
    ClientStartWorkspaceHistoryError,
    ClientNewUserInvitationError,
    ClientNewDeviceInvitationError,
    ClientNewShamirRecoveryInvitationError,
    ClientCancelInvitationError,
    ClientOrganizationInfoError,
    ClientGetOrganizationBootstrapDateError,
    ClientGetTosError,
    ClientAcceptTosError,
    ClientSetupShamirRecoveryError,
    ClientDeleteShamirRecoveryError,
    ClientExportRecoveryDeviceError,
);

pub(crate) fn borrow_client(client: Handle) -> Result<Arc<Client>, HandleError> {
    borrow_from_handle(client, HandleKind::Client, |item| match item {
        HandleItem::Client { client, .. } => Some(client.clone()),
        _ => None,
    })
}

pub async fn client_start(config: Arc<ClientConfig>, access: DeviceAccessStrategy) -> Result<Handle, ClientStartError> {
    let client = Client::start(config, &access).await?;
    Ok(register_client(client))
}

/// Start a client on an already loaded device
pub async fn client_start_with_device(
    config: Arc<ClientConfig>,
    device: Arc<parsec_types::LocalDevice>,
) -> Result<Handle, ClientStartError> {
    let client = Client::start_with_device(config, device).await?;
    Ok(register_client(client))
}

fn register_client(client: Arc<Client>) -> Handle {
    let (handle_tx, handle_rx) = oneshot::channel();
    let events_forwarder = spawn_events_forwarder(handle_rx, &client);
    let device_id = client.device().device_id;
    let handle = register_handle(HandleItem::Client {
        client,
        events_forwarder,
    });
    // The forwarder only goes away with its runtime
    let _ = handle_tx.send(handle);
    tracing::info!(client = %handle, %device_id, "Client registered");
    handle
}

/// Stop the client and everything started from it
///
/// Children are stopped first; one failing to stop does not keep the others,
/// nor the client, from being released. The first failure is returned.
pub async fn client_stop(client: Handle) -> Result<(), ClientStopError> {
    let client_ops = borrow_client(client)?;
    let mut first_error: Option<anyhow::Error> = None;

    let workspaces = filter_map_handles(|handle, item| match item {
        HandleItem::Workspace { client: owner, .. } if *owner == client => Some(handle),
        _ => None,
    });
    for workspace in workspaces {
        if let Err(err) = crate::workspace::workspace_stop(workspace).await {
            tracing::error!(client = %client, %workspace, error = %err, "Cannot stop workspace");
            first_error.get_or_insert_with(|| err.into());
        }
    }
    let histories = filter_map_handles(|handle, item| match item {
        HandleItem::WorkspaceHistory { client: owner, .. } if *owner == client => Some(handle),
        _ => None,
    });
    for history in histories {
        if let Err(err) = crate::workspace_history::workspace_history_stop(history).await {
            tracing::error!(client = %client, %history, error = %err, "Cannot stop workspace history");
            first_error.get_or_insert_with(|| err.into());
        }
    }

    if let Err(err) = client_ops.stop().await {
        first_error.get_or_insert_with(|| err.into());
    }
    if let Ok(HandleItem::Client { events_forwarder, .. }) = release_handle(client) {
        let abort = events_forwarder.abort_handle();
        if tokio::time::timeout(EVENTS_FLUSH_TIMEOUT, events_forwarder).await.is_err() {
            tracing::warn!(client = %client, "Events forwarder did not finish in time");
            abort.abort();
        }
    }
    tracing::info!(client = %client, "Client released");
    match first_error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

pub fn client_info(client: Handle) -> Result<ClientInfo, ClientInfoError> {
    borrow_client(client)?.info()
}

/// Every running client along with its device
pub fn list_started_clients() -> Vec<(Handle, DeviceID)> {
    filter_map_handles(|handle, item| match item {
        HandleItem::Client { client, .. } => Some((handle, client.device().device_id)),
        _ => None,
    })
}

/*
 * Users & devices
 */

pub async fn client_list_users(client: Handle, skip_revoked: bool) -> Result<Vec<UserInfo>, ClientListUsersError> {
    let client = borrow_client(client)?;
    if client.is_stopped() {
        return Err(ClientListUsersError::Stopped);
    }
    Ok(client.list_users(skip_revoked).await?)
}

pub async fn client_list_user_devices(client: Handle, user: UserID) -> Result<Vec<DeviceInfo>, ClientGetUserInfoError> {
    borrow_client(client)?.list_user_devices(user).await
}

pub async fn client_get_user_info(client: Handle, user: UserID) -> Result<UserInfo, ClientGetUserInfoError> {
    borrow_client(client)?.get_user_info(user).await
}

pub async fn client_get_user_device(
    client: Handle,
    device: DeviceID,
) -> Result<(UserInfo, DeviceInfo), ClientGetUserDeviceError> {
    borrow_client(client)?.get_user_device(device).await
}

pub async fn client_list_frozen_users(client: Handle) -> Result<Vec<UserID>, ClientListFrozenUsersError> {
    borrow_client(client)?.list_frozen_users().await
}

pub async fn client_revoke_user(client: Handle, user: UserID) -> Result<(), ClientRevokeUserError> {
    borrow_client(client)?.revoke_user(user).await
}

pub async fn client_update_user_profile(
    client: Handle,
    user: UserID,
    new_profile: UserProfile,
) -> Result<(), ClientUserUpdateProfileError> {
    borrow_client(client)?.update_user_profile(user, new_profile).await
}

/*
 * Workspaces
 */

pub async fn client_list_workspaces(client: Handle) -> Result<Vec<WorkspaceInfo>, ClientListWorkspacesError> {
    let client = borrow_client(client)?;
    if client.is_stopped() {
        return Err(ClientListWorkspacesError::Stopped);
    }
    Ok(client.list_workspaces().await)
}

pub async fn client_list_workspace_users(
    client: Handle,
    realm_id: VlobID,
) -> Result<Vec<WorkspaceUserAccessInfo>, ClientListWorkspaceUsersError> {
    borrow_client(client)?.list_workspace_users(realm_id).await
}

/// Create a workspace locally, it reaches the server on its first share, rename or sync
pub async fn client_create_workspace(client: Handle, name: EntryName) -> Result<VlobID, ClientCreateWorkspaceError> {
    borrow_client(client)?.create_workspace(name).await
}

pub async fn client_rename_workspace(
    client: Handle,
    realm_id: VlobID,
    new_name: EntryName,
) -> Result<(), ClientRenameWorkspaceError> {
    borrow_client(client)?.rename_workspace(realm_id, new_name).await
}

/// Give `recipient` a role in the workspace, `None` unshares it
pub async fn client_share_workspace(
    client: Handle,
    realm_id: VlobID,
    recipient: UserID,
    role: Option<RealmRole>,
) -> Result<(), ClientShareWorkspaceError> {
    borrow_client(client)?.share_workspace(realm_id, recipient, role).await
}

/// Start a workspace, a workspace already started by this client keeps its handle
pub async fn client_start_workspace(client: Handle, realm_id: VlobID) -> Result<Handle, ClientStartWorkspaceError> {
    let client_ops = borrow_client(client)?;
    let ops = client_ops.start_workspace(realm_id).await?;
    let handle = find_or_register(
        |item| matches!(item, HandleItem::Workspace { ops: started, .. } if Arc::ptr_eq(started, &ops)),
        || HandleItem::Workspace {
            client,
            ops: ops.clone(),
        },
    );
    tracing::debug!(%client, workspace = %handle, %realm_id, "Workspace handle");
    Ok(handle)
}

pub async fn client_start_workspace_history(
    client: Handle,
    realm_id: VlobID,
) -> Result<Handle, ClientStartWorkspaceHistoryError> {
    let ops = borrow_client(client)?.start_workspace_history(realm_id).await?;
    Ok(register_handle(HandleItem::WorkspaceHistory { client, ops }))
}

/*
 * Invitations
 */

pub async fn client_new_user_invitation(
    client: Handle,
    claimer_email: EmailAddress,
    send_email: bool,
) -> Result<NewInvitationInfo, ClientNewUserInvitationError> {
    borrow_client(client)?.new_user_invitation(claimer_email, send_email).await
}

pub async fn client_new_device_invitation(
    client: Handle,
    send_email: bool,
) -> Result<NewInvitationInfo, ClientNewDeviceInvitationError> {
    borrow_client(client)?.new_device_invitation(send_email).await
}

pub async fn client_new_shamir_recovery_invitation(
    client: Handle,
    claimer_user_id: UserID,
    send_email: bool,
) -> Result<NewInvitationInfo, ClientNewShamirRecoveryInvitationError> {
    borrow_client(client)?
        .new_shamir_recovery_invitation(claimer_user_id, send_email)
        .await
}

pub async fn client_list_invitations(client: Handle) -> Result<Vec<InviteListItem>, ClientListInvitationsError> {
    let client = borrow_client(client)?;
    if client.is_stopped() {
        return Err(ClientListInvitationsError::Stopped);
    }
    Ok(client.list_invitations().await?)
}

pub async fn client_cancel_invitation(client: Handle, token: InvitationToken) -> Result<(), ClientCancelInvitationError> {
    borrow_client(client)?.cancel_invitation(token).await
}

/*
 * Organization
 */

pub async fn client_organization_info(client: Handle) -> Result<OrganizationInfo, ClientOrganizationInfoError> {
    borrow_client(client)?.organization_info().await
}

pub async fn client_get_organization_bootstrap_date(
    client: Handle,
) -> Result<DateTime, ClientGetOrganizationBootstrapDateError> {
    borrow_client(client)?.get_organization_bootstrap_date().await
}

pub async fn client_get_tos(client: Handle) -> Result<Tos, ClientGetTosError> {
    borrow_client(client)?.get_tos().await
}

pub async fn client_accept_tos(client: Handle, tos_updated_on: DateTime) -> Result<(), ClientAcceptTosError> {
    borrow_client(client)?.accept_tos(tos_updated_on).await
}

/// Drop the local certificates cache, it is fetched again from the server
pub async fn client_forget_all_certificates(client: Handle) -> Result<(), ClientForgetAllCertificatesError> {
    let client = borrow_client(client)?;
    if client.is_stopped() {
        return Err(ClientForgetAllCertificatesError::Stopped);
    }
    Ok(client.forget_all_certificates().await?)
}

/*
 * Shamir recovery
 */

pub async fn client_setup_shamir_recovery(
    client: Handle,
    per_recipient_shares: BTreeMap<UserID, u8>,
    threshold: u8,
) -> Result<(), ClientSetupShamirRecoveryError> {
    borrow_client(client)?
        .setup_shamir_recovery(per_recipient_shares, threshold)
        .await
}

pub async fn client_delete_shamir_recovery(client: Handle) -> Result<(), ClientDeleteShamirRecoveryError> {
    borrow_client(client)?.delete_shamir_recovery().await
}

pub async fn client_get_self_shamir_recovery(
    client: Handle,
) -> Result<SelfShamirRecoveryInfo, ClientGetSelfShamirRecoveryError> {
    let client = borrow_client(client)?;
    if client.is_stopped() {
        return Err(ClientGetSelfShamirRecoveryError::Stopped);
    }
    Ok(client.get_self_shamir_recovery().await?)
}

pub async fn client_list_shamir_recoveries_for_others(
    client: Handle,
) -> Result<Vec<OtherShamirRecoveryInfo>, ClientListShamirRecoveriesForOthersError> {
    let client = borrow_client(client)?;
    if client.is_stopped() {
        return Err(ClientListShamirRecoveriesForOthersError::Stopped);
    }
    Ok(client.list_shamir_recoveries_for_others().await?)
}

/*
 * Recovery device
 */

/// Returns `(passphrase, recovery file content)`
pub async fn client_export_recovery_device(
    client: Handle,
    device_label: DeviceLabel,
) -> Result<(String, Vec<u8>), ClientExportRecoveryDeviceError> {
    borrow_client(client)?.export_recovery_device(device_label).await
}
