use super::Client;
use crate::certif::{DeviceInfo, UserInfo};
use parsec_connection::protocol::{CertificateRejection, UserListFrozenRep};
use parsec_types::{
    AnyCertificate, DateTime, DeviceID, RevokedUserCertificate, UserID, UserProfile, UserUpdateCertificate,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientGetUserInfoError {
    #[error("Client is stopped")]
    Stopped,
    #[error("User not found")]
    NonExisting,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientGetUserDeviceError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Device not found")]
    NonExisting,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientListFrozenUsersError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Cannot reach the server")]
    Offline,
    #[error("Only administrators can list frozen users")]
    AuthorNotAllowed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_connection_error!(ClientListFrozenUsersError);

#[derive(Debug, thiserror::Error)]
pub enum ClientRevokeUserError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Client is stopped")]
    Stopped,
    #[error("A user cannot revoke itself")]
    UserIsSelf,
    #[error("User not found")]
    UserNotFound,
    #[error("Only administrators can revoke users")]
    AuthorNotAllowed,
    #[error("User already revoked")]
    UserAlreadyRevoked,
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
pub enum ClientUserUpdateProfileError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Client is stopped")]
    Stopped,
    #[error("A user cannot change its own profile")]
    UserIsSelf,
    #[error("User not found")]
    UserNotFound,
    #[error("Only administrators can change profiles")]
    AuthorNotAllowed,
    #[error("User is revoked")]
    UserRevoked,
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

impl Client {
    /// Users of the organization, certificates are refreshed first when online
    pub async fn list_users(&self, skip_revoked: bool) -> anyhow::Result<Vec<UserInfo>> {
        self.refresh_certificates().await?;
        Ok(self.certificates.list_users(skip_revoked))
    }

    pub async fn list_user_devices(&self, user_id: UserID) -> Result<Vec<DeviceInfo>, ClientGetUserInfoError> {
        if self.is_stopped() {
            return Err(ClientGetUserInfoError::Stopped);
        }
        self.certificates
            .list_user_devices(user_id)
            .ok_or(ClientGetUserInfoError::NonExisting)
    }

    pub async fn get_user_info(&self, user_id: UserID) -> Result<UserInfo, ClientGetUserInfoError> {
        if self.is_stopped() {
            return Err(ClientGetUserInfoError::Stopped);
        }
        self.certificates
            .get_user_info(user_id)
            .ok_or(ClientGetUserInfoError::NonExisting)
    }

    pub async fn get_user_device(&self, device_id: DeviceID) -> Result<(UserInfo, DeviceInfo), ClientGetUserDeviceError> {
        if self.is_stopped() {
            return Err(ClientGetUserDeviceError::Stopped);
        }
        self.certificates
            .get_device_info(device_id)
            .ok_or(ClientGetUserDeviceError::NonExisting)
    }

    pub async fn list_frozen_users(&self) -> Result<Vec<UserID>, ClientListFrozenUsersError> {
        if self.is_stopped() {
            return Err(ClientListFrozenUsersError::Stopped);
        }
        match self.cmds.user_list_frozen().await? {
            UserListFrozenRep::Ok { frozen_users } => Ok(frozen_users),
            UserListFrozenRep::AuthorNotAllowed => Err(ClientListFrozenUsersError::AuthorNotAllowed),
        }
    }

    pub async fn revoke_user(&self, user_id: UserID) -> Result<(), ClientRevokeUserError> {
        if self.is_stopped() {
            return Err(ClientRevokeUserError::Stopped);
        }
        if user_id == self.device.user_id {
            return Err(ClientRevokeUserError::UserIsSelf);
        }
        let device = &self.device;
        let cmds = &self.cmds;
        self.certificates
            .submit(|timestamp| {
                let certificate = AnyCertificate::RevokedUser(RevokedUserCertificate {
                    author: device.device_id,
                    timestamp,
                    user_id,
                })
                .dump_and_sign(&device.signing_key);
                async move { cmds.user_revoke(certificate).await }
            })
            .await
            .map_err(|err| {
                submit_error_into!(ClientRevokeUserError, err,
                    CertificateRejection::UserNotFound => ClientRevokeUserError::UserNotFound,
                    CertificateRejection::AuthorNotAllowed => ClientRevokeUserError::AuthorNotAllowed,
                    CertificateRejection::UserAlreadyRevoked => ClientRevokeUserError::UserAlreadyRevoked,
                )
            })?;
        tracing::info!(%user_id, "User revoked");
        Ok(())
    }

    pub async fn update_user_profile(&self, user_id: UserID, new_profile: UserProfile) -> Result<(), ClientUserUpdateProfileError> {
        if self.is_stopped() {
            return Err(ClientUserUpdateProfileError::Stopped);
        }
        if user_id == self.device.user_id {
            return Err(ClientUserUpdateProfileError::UserIsSelf);
        }
        let device = &self.device;
        let cmds = &self.cmds;
        self.certificates
            .submit(|timestamp| {
                let certificate = AnyCertificate::UserUpdate(UserUpdateCertificate {
                    author: device.device_id,
                    timestamp,
                    user_id,
                    new_profile,
                })
                .dump_and_sign(&device.signing_key);
                async move { cmds.user_update(certificate).await }
            })
            .await
            .map_err(|err| {
                submit_error_into!(ClientUserUpdateProfileError, err,
                    CertificateRejection::UserNotFound => ClientUserUpdateProfileError::UserNotFound,
                    CertificateRejection::AuthorNotAllowed => ClientUserUpdateProfileError::AuthorNotAllowed,
                    CertificateRejection::UserAlreadyRevoked => ClientUserUpdateProfileError::UserRevoked,
                )
            })?;
        tracing::info!(%user_id, ?new_profile, "User profile updated");
        Ok(())
    }
}
