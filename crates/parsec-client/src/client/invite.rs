use super::Client;
use crate::invite::greeter::GreeterContext;
use crate::invite::{DeviceGreet, GreetInitialCtx, ShamirRecoveryGreet, UserGreet};
use parsec_connection::protocol::{InviteCancelRep, InviteListItem, InviteNewRep};
use parsec_connection::ConnectionError;
use parsec_types::{
    EmailAddress, InvitationEmailSentStatus, InvitationToken, InvitationType, ParsecInvitationAddr, UserID,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientNewUserInvitationError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Cannot reach the server")]
    Offline,
    #[error("Only administrators can invite users")]
    AuthorNotAllowed,
    #[error("A user with this email is already a member")]
    AlreadyMember,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientNewDeviceInvitationError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Cannot reach the server")]
    Offline,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientNewShamirRecoveryInvitationError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Cannot reach the server")]
    Offline,
    #[error("Not a recipient of this user's shamir recovery")]
    AuthorNotAllowed,
    #[error("User not found")]
    UserNotFound,
    #[error("User is revoked")]
    UserRevoked,
    #[error("User has no shamir recovery setup")]
    ShamirRecoveryNotSetup,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientCancelInvitationError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Cannot reach the server")]
    Offline,
    #[error("Not allowed to cancel this invitation")]
    AuthorNotAllowed,
    #[error("Invitation not found")]
    InvitationNotFound,
    #[error("Invitation already cancelled")]
    InvitationAlreadyCancelled,
    #[error("Invitation already completed")]
    InvitationCompleted,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientStartInvitationGreetError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Cannot reach the server")]
    Offline,
    #[error("Invitation not found")]
    InvitationNotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_connection_error!(
    ClientNewUserInvitationError,
    ClientNewDeviceInvitationError,
    ClientNewShamirRecoveryInvitationError,
    ClientCancelInvitationError,
    ClientStartInvitationGreetError,
);

/// Outcome of an invitation creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvitationInfo {
    pub addr: ParsecInvitationAddr,
    pub token: InvitationToken,
    pub email_sent_status: InvitationEmailSentStatus,
}

impl Client {
    fn invitation_info(&self, invitation_type: InvitationType, rep: InviteNewRep) -> Option<NewInvitationInfo> {
        match rep {
            InviteNewRep::Ok { token, email_sent } => {
                tracing::info!(%token, ?invitation_type, ?email_sent, "Invitation created");
                Some(NewInvitationInfo {
                    addr: ParsecInvitationAddr::new(
                        self.device.organization_addr.server().clone(),
                        self.device.organization_id().clone(),
                        invitation_type,
                        token,
                    ),
                    token,
                    email_sent_status: email_sent,
                })
            }
            _ => None,
        }
    }

    pub async fn new_user_invitation(
        &self,
        claimer_email: EmailAddress,
        send_email: bool,
    ) -> Result<NewInvitationInfo, ClientNewUserInvitationError> {
        if self.is_stopped() {
            return Err(ClientNewUserInvitationError::Stopped);
        }
        let rep = self.cmds.invite_new_user(claimer_email, send_email).await?;
        match rep {
            InviteNewRep::AuthorNotAllowed => Err(ClientNewUserInvitationError::AuthorNotAllowed),
            InviteNewRep::ClaimerEmailAlreadyEnrolled => Err(ClientNewUserInvitationError::AlreadyMember),
            rep => self
                .invitation_info(InvitationType::User, rep.clone())
                .ok_or_else(|| anyhow::anyhow!("unexpected response: {rep:?}").into()),
        }
    }

    pub async fn new_device_invitation(&self, send_email: bool) -> Result<NewInvitationInfo, ClientNewDeviceInvitationError> {
        if self.is_stopped() {
            return Err(ClientNewDeviceInvitationError::Stopped);
        }
        let rep = self.cmds.invite_new_device(send_email).await?;
        self.invitation_info(InvitationType::Device, rep.clone())
            .ok_or_else(|| anyhow::anyhow!("unexpected response: {rep:?}").into())
    }

    /// Invite `claimer_user_id` to recover its account, we must be one of its recipients
    pub async fn new_shamir_recovery_invitation(
        &self,
        claimer_user_id: UserID,
        send_email: bool,
    ) -> Result<NewInvitationInfo, ClientNewShamirRecoveryInvitationError> {
        if self.is_stopped() {
            return Err(ClientNewShamirRecoveryInvitationError::Stopped);
        }
        let rep = self.cmds.invite_new_shamir_recovery(claimer_user_id, send_email).await?;
        match rep {
            InviteNewRep::AuthorNotAllowed => Err(ClientNewShamirRecoveryInvitationError::AuthorNotAllowed),
            InviteNewRep::UserNotFound => Err(ClientNewShamirRecoveryInvitationError::UserNotFound),
            InviteNewRep::UserRevoked => Err(ClientNewShamirRecoveryInvitationError::UserRevoked),
            InviteNewRep::ShamirRecoveryNotSetup => Err(ClientNewShamirRecoveryInvitationError::ShamirRecoveryNotSetup),
            rep => self
                .invitation_info(InvitationType::ShamirRecovery, rep.clone())
                .ok_or_else(|| anyhow::anyhow!("unexpected response: {rep:?}").into()),
        }
    }

    /// Pending invitations we can greet
    pub async fn list_invitations(&self) -> Result<Vec<InviteListItem>, ConnectionError> {
        self.cmds.invite_list().await
    }

    pub async fn cancel_invitation(&self, token: InvitationToken) -> Result<(), ClientCancelInvitationError> {
        if self.is_stopped() {
            return Err(ClientCancelInvitationError::Stopped);
        }
        match self.cmds.invite_cancel(token).await? {
            InviteCancelRep::Ok => {
                tracing::info!(%token, "Invitation cancelled");
                Ok(())
            }
            InviteCancelRep::AuthorNotAllowed => Err(ClientCancelInvitationError::AuthorNotAllowed),
            InviteCancelRep::InvitationNotFound => Err(ClientCancelInvitationError::InvitationNotFound),
            InviteCancelRep::InvitationAlreadyCancelled => Err(ClientCancelInvitationError::InvitationAlreadyCancelled),
            InviteCancelRep::InvitationCompleted => Err(ClientCancelInvitationError::InvitationCompleted),
        }
    }

    fn greeter_context(&self, token: InvitationToken) -> GreeterContext {
        GreeterContext {
            device: self.device.clone(),
            cmds: self.cmds.clone(),
            certificates: self.certificates.clone(),
            token,
        }
    }

    pub fn start_user_invitation_greet(&self, token: InvitationToken) -> GreetInitialCtx<UserGreet> {
        GreetInitialCtx::new(self.greeter_context(token), UserGreet)
    }

    pub fn start_device_invitation_greet(&self, token: InvitationToken) -> GreetInitialCtx<DeviceGreet> {
        GreetInitialCtx::new(self.greeter_context(token), DeviceGreet)
    }

    /// Greet a shamir recovery invitation, the claimer is looked up among our invitations
    pub async fn start_shamir_recovery_invitation_greet(
        &self,
        token: InvitationToken,
    ) -> Result<GreetInitialCtx<ShamirRecoveryGreet>, ClientStartInvitationGreetError> {
        if self.is_stopped() {
            return Err(ClientStartInvitationGreetError::Stopped);
        }
        let claimer_user_id = self
            .cmds
            .invite_list()
            .await?
            .into_iter()
            .find_map(|item| match item {
                InviteListItem::ShamirRecovery {
                    token: candidate,
                    claimer_user_id,
                    ..
                } if candidate == token => Some(claimer_user_id),
                _ => None,
            })
            .ok_or(ClientStartInvitationGreetError::InvitationNotFound)?;
        // Our share must be known to hand it over
        self.refresh_certificates().await?;
        Ok(GreetInitialCtx::new(
            self.greeter_context(token),
            ShamirRecoveryGreet { claimer_user_id },
        ))
    }
}
