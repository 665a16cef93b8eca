use super::Client;
use crate::realms::{RealmError, WorkspaceInfo};
use crate::workspace::{WorkspaceContext, WorkspaceHistoryError, WorkspaceHistoryOps, WorkspaceOps};
use parsec_connection::protocol::CertificateRejection;
use parsec_types::{
    AnyCertificate, DateTime, EntryName, HumanHandle, RealmRole, RealmRoleCertificate, UserID, UserProfile, VlobID,
};
use std::sync::Arc;

/// Declare an error enum carrying the variants every realm operation can fail with
macro_rules! realm_error_enum {
    ($name:ident { $($(#[$meta:meta])* $variant:ident,)* }) => {
        #[derive(Debug, thiserror::Error)]
        pub enum $name {
            #[error("Cannot reach the server")]
            Offline,
            #[error("Client is stopped")]
            Stopped,
            #[error("Workspace not found")]
            WorkspaceNotFound,
            #[error("Not allowed")]
            AuthorNotAllowed,
            #[error("Invalid keys bundle: {0}")]
            InvalidKeysBundle(String),
            #[error("Our clock ({client_timestamp}) and the server's one ({server_timestamp}) are too far apart")]
            TimestampOutOfBallpark {
                server_timestamp: DateTime,
                client_timestamp: DateTime,
                ballpark_client_early_offset: f64,
                ballpark_client_late_offset: f64,
            },
            $($(#[$meta])* $variant,)*
            #[error(transparent)]
            Internal(#[from] anyhow::Error),
        }

        impl From<RealmError> for $name {
            fn from(err: RealmError) -> Self {
                match err {
                    RealmError::Offline => Self::Offline,
                    RealmError::NoRealmAccess => Self::WorkspaceNotFound,
                    RealmError::AuthorNotAllowed => Self::AuthorNotAllowed,
                    RealmError::InvalidKeysBundle(reason) => Self::InvalidKeysBundle(reason),
                    RealmError::TimestampOutOfBallpark {
                        server_timestamp,
                        client_timestamp,
                        ballpark_client_early_offset,
                        ballpark_client_late_offset,
                    } => Self::TimestampOutOfBallpark {
                        server_timestamp,
                        client_timestamp,
                        ballpark_client_early_offset,
                        ballpark_client_late_offset,
                    },
                    RealmError::Internal(err) => Self::Internal(err),
                }
            }
        }
    };
}

realm_error_enum!(ClientRenameWorkspaceError {});

realm_error_enum!(ClientShareWorkspaceError {
    #[error("Cannot change our own role")]
    RecipientIsSelf,
    #[error("Recipient not found")]
    RecipientNotFound,
    #[error("Recipient is revoked")]
    RecipientRevoked,
    #[error("Outsiders cannot be given this role")]
    RoleIncompatibleWithOutsider,
});

#[derive(Debug, thiserror::Error)]
pub enum ClientCreateWorkspaceError {
    #[error("Client is stopped")]
    Stopped,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientListWorkspaceUsersError {
    #[error("Client is stopped")]
    Stopped,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientStartWorkspaceError {
    #[error("Workspace not found")]
    WorkspaceNotFound,
    #[error("Client is stopped")]
    Stopped,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientStartWorkspaceHistoryError {
    #[error("Workspace not found")]
    WorkspaceNotFound,
    #[error("Client is stopped")]
    Stopped,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// A user having access to a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceUserAccessInfo {
    pub user_id: UserID,
    pub human_handle: HumanHandle,
    pub current_profile: UserProfile,
    pub current_role: RealmRole,
}

impl Client {
    pub async fn list_workspaces(&self) -> Vec<WorkspaceInfo> {
        self.realms.list().await
    }

    /// Users having a role in the workspace, ourselves included
    pub async fn list_workspace_users(&self, realm_id: VlobID) -> Result<Vec<WorkspaceUserAccessInfo>, ClientListWorkspaceUsersError> {
        if self.is_stopped() {
            return Err(ClientListWorkspaceUsersError::Stopped);
        }
        if self.realms.is_local(realm_id) && !self.realms.is_bootstrapped(realm_id) {
            let user = self
                .certificates
                .get_user_info(self.device.user_id)
                .ok_or_else(|| anyhow::anyhow!("our own user is not certified"))?;
            return Ok(vec![WorkspaceUserAccessInfo {
                user_id: user.id,
                human_handle: user.human_handle,
                current_profile: user.current_profile,
                current_role: RealmRole::Owner,
            }]);
        }
        let users = self
            .certificates
            .realm_roles(realm_id)
            .into_iter()
            .filter_map(|(user_id, current_role)| {
                let user = self.certificates.get_user_info(user_id)?;
                Some(WorkspaceUserAccessInfo {
                    user_id,
                    human_handle: user.human_handle,
                    current_profile: user.current_profile,
                    current_role,
                })
            })
            .collect();
        Ok(users)
    }

    /// Create a workspace, it stays local until first shared, renamed or synced
    pub async fn create_workspace(&self, name: EntryName) -> Result<VlobID, ClientCreateWorkspaceError> {
        if self.is_stopped() {
            return Err(ClientCreateWorkspaceError::Stopped);
        }
        Ok(self.realms.create_local(name).await?)
    }

    pub async fn rename_workspace(&self, realm_id: VlobID, new_name: EntryName) -> Result<(), ClientRenameWorkspaceError> {
        if self.is_stopped() {
            return Err(ClientRenameWorkspaceError::Stopped);
        }
        self.realms.rename(realm_id, new_name).await?;
        Ok(())
    }

    /// Give `recipient` a role in the workspace, `None` removes its access
    ///
    /// Granting a role the recipient already has is a no-op.
    pub async fn share_workspace(
        &self,
        realm_id: VlobID,
        recipient: UserID,
        role: Option<RealmRole>,
    ) -> Result<(), ClientShareWorkspaceError> {
        if self.is_stopped() {
            return Err(ClientShareWorkspaceError::Stopped);
        }
        if recipient == self.device.user_id {
            return Err(ClientShareWorkspaceError::RecipientIsSelf);
        }
        self.refresh_certificates().await?;
        let recipient_info = self
            .certificates
            .get_user_info(recipient)
            .ok_or(ClientShareWorkspaceError::RecipientNotFound)?;
        if recipient_info.is_revoked() {
            return Err(ClientShareWorkspaceError::RecipientRevoked);
        }
        if recipient_info.current_profile == UserProfile::Outsider
            && matches!(role, Some(RealmRole::Owner | RealmRole::Manager))
        {
            return Err(ClientShareWorkspaceError::RoleIncompatibleWithOutsider);
        }

        self.realms.ensure_bootstrapped(realm_id).await?;
        let device = &self.device;
        let cmds = &self.cmds;
        let build_certificate = |timestamp: DateTime| {
            AnyCertificate::RealmRole(RealmRoleCertificate {
                author: device.device_id,
                timestamp,
                realm_id,
                user_id: recipient,
                role,
            })
            .dump_and_sign(&device.signing_key)
        };
        let outcome = match role {
            Some(_) => {
                let public_key = self
                    .certificates
                    .user_public_key(recipient)
                    .ok_or(ClientShareWorkspaceError::RecipientNotFound)?;
                let access = self.realms.keys_bundle(realm_id).await?.seal_for(&public_key);
                self.certificates
                    .submit(|timestamp| {
                        let certificate = build_certificate(timestamp);
                        let access = access.clone();
                        async move { cmds.realm_share(certificate, access).await }
                    })
                    .await
            }
            None => {
                self.certificates
                    .submit(|timestamp| {
                        let certificate = build_certificate(timestamp);
                        async move { cmds.realm_unshare(certificate).await }
                    })
                    .await
            }
        };
        match outcome {
            Ok(_) | Err(crate::certif::SubmitError::Rejected(CertificateRejection::RoleAlreadyGranted)) => (),
            Err(err) => {
                return Err(submit_error_into!(ClientShareWorkspaceError, err,
                    CertificateRejection::AuthorNotAllowed => ClientShareWorkspaceError::AuthorNotAllowed,
                    CertificateRejection::RealmNotFound => ClientShareWorkspaceError::WorkspaceNotFound,
                    CertificateRejection::UserNotFound => ClientShareWorkspaceError::RecipientNotFound,
                    CertificateRejection::RecipientRevoked => ClientShareWorkspaceError::RecipientRevoked,
                    CertificateRejection::RoleIncompatibleWithOutsider => {
                        ClientShareWorkspaceError::RoleIncompatibleWithOutsider
                    }
                ))
            }
        }
        tracing::info!(%realm_id, %recipient, ?role, "Workspace sharing updated");
        Ok(())
    }

    fn workspace_context(&self, realm_id: VlobID) -> WorkspaceContext {
        WorkspaceContext {
            realm_id,
            device: self.device.clone(),
            cmds: self.cmds.clone(),
            certificates: self.certificates.clone(),
            realms: self.realms.clone(),
            event_bus: self.event_bus.clone(),
            prevent_sync_pattern: self.config.prevent_sync_pattern.clone(),
        }
    }

    /// Start the workspace, or return it if already started
    pub async fn start_workspace(&self, realm_id: VlobID) -> Result<Arc<WorkspaceOps>, ClientStartWorkspaceError> {
        if self.is_stopped() {
            return Err(ClientStartWorkspaceError::Stopped);
        }
        if let Some(started) = self.find_started_workspace(realm_id) {
            return Ok(started);
        }
        if self.realms.self_role(realm_id).is_none() {
            return Err(ClientStartWorkspaceError::WorkspaceNotFound);
        }

        let ops = Arc::new(
            WorkspaceOps::start(
                self.workspace_context(realm_id),
                self.data_dir(),
                self.config.workspace_storage_cache_size.bytes(),
            )
            .await?,
        );
        // Another caller may have started it while we were loading
        let ops = {
            let mut workspaces = self.workspaces.lock();
            match workspaces.iter().find(|w| w.realm_id() == realm_id && !w.is_stopped()) {
                Some(started) => started.clone(),
                None => {
                    workspaces.push(ops.clone());
                    ops
                }
            }
        };
        if self.config.with_monitors {
            crate::monitors::start_workspace_outbound_sync_monitor(self, &ops);
        }
        Ok(ops)
    }

    fn find_started_workspace(&self, realm_id: VlobID) -> Option<Arc<WorkspaceOps>> {
        self.workspaces
            .lock()
            .iter()
            .find(|w| w.realm_id() == realm_id && !w.is_stopped())
            .cloned()
    }

    pub async fn start_workspace_history(&self, realm_id: VlobID) -> Result<Arc<WorkspaceHistoryOps>, ClientStartWorkspaceHistoryError> {
        if self.is_stopped() {
            return Err(ClientStartWorkspaceHistoryError::Stopped);
        }
        let history = WorkspaceHistoryOps::start(
            self.workspace_context(realm_id),
            self.config.workspace_storage_cache_size.bytes(),
        )
        .map_err(|err| match err {
            WorkspaceHistoryError::NoRealmAccess => ClientStartWorkspaceHistoryError::WorkspaceNotFound,
            err => ClientStartWorkspaceHistoryError::Internal(err.into()),
        })?;
        let history = Arc::new(history);
        self.histories.lock().push(history.clone());
        Ok(history)
    }
}
