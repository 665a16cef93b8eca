//! Claimer side of the invitation protocols

use super::{
    ClaimInProgressError, DeviceClaimPayload, DeviceConfirmation, SharedSecret, ShamirRecoverySecret,
    ShamirRecoveryShareData, StepFailure, UserClaimPayload, UserConfirmation, NONCE_SIZE,
};
use crate::certif::{submit_certificates, SubmitError};
use crate::config::ClientConfig;
use crate::event_bus::EventBus;
use futures::future::select_ok;
use parsec_connection::protocol::{
    CancelGreetingAttemptRep, InviteCompleteRep, InviteInfoRep, RevealRep, ShamirRecoveryRecipient,
    StartGreetingAttemptRep, UserGreetingAdministrator,
};
use parsec_connection::{authenticated_cmds, invited_cmds, ClaimerStep, ConnectionError, GreeterStep, InvitedCmds};
use parsec_device_loader::{get_default_key_file, save_device, AvailableDevice, DeviceSaveStrategy, SaveDeviceError};
use parsec_types::crypto::generate_nonce;
use parsec_types::shamir::recover_secret;
use parsec_types::{
    AnyCertificate, CancelledGreetingAttemptReason, CertificateAuthor, DateTime, DeviceCertificate,
    DeviceID, DeviceLabel, DevicePurpose, EmailAddress, GreeterOrClaimer, GreetingAttemptID, HashDigest,
    HumanHandle, LocalDevice, ParsecInvitationAddr, ParsecOrganizationAddr, PrivateKey, SasCode,
    SecretKey, ShamirShare, SigningKey, TimeProvider, UserID,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ClaimerRetrieveInfoError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Invitation not found")]
    NotFound,
    #[error("Invitation already used or deleted")]
    AlreadyUsedOrDeleted,
    #[error("Organization has expired")]
    OrganizationExpired,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ConnectionError> for ClaimerRetrieveInfoError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NoResponse => Self::Offline,
            ConnectionError::ExpiredOrganization => Self::OrganizationExpired,
            ConnectionError::InvitationNotFound => Self::NotFound,
            ConnectionError::InvitationAlreadyUsedOrDeleted => Self::AlreadyUsedOrDeleted,
            err => Self::Internal(err.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimerShamirRecoveryPickRecipientError {
    #[error("This user is not a recipient of the shamir recovery")]
    RecipientNotFound,
    #[error("A share was already obtained from this recipient")]
    RecipientAlreadyPicked,
    #[error("This recipient has been revoked")]
    RecipientRevoked,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimerShamirRecoveryAddShareError {
    #[error("This user is not a recipient of the shamir recovery")]
    RecipientNotFound,
    #[error("The shares do not combine into a valid secret")]
    CorruptedSecret,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimerShamirRecoveryRecoverDeviceError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Organization has expired")]
    OrganizationExpired,
    #[error("Invitation already used or deleted")]
    AlreadyUsedOrDeleted,
    #[error("The server no longer holds the recovery data")]
    CipheredDataNotFound,
    #[error("The recovery data cannot be decrypted with the recovered secret")]
    CorruptedCipheredData,
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

impl From<ConnectionError> for ClaimerShamirRecoveryRecoverDeviceError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NoResponse => Self::Offline,
            ConnectionError::ExpiredOrganization => Self::OrganizationExpired,
            ConnectionError::InvitationNotFound | ConnectionError::InvitationAlreadyUsedOrDeleted => {
                Self::AlreadyUsedOrDeleted
            }
            err => Self::Internal(err.into()),
        }
    }
}

impl From<SubmitError> for ClaimerShamirRecoveryRecoverDeviceError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Offline => Self::Offline,
            SubmitError::TimestampOutOfBallpark {
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
            SubmitError::Rejected(rejection) => {
                Self::Internal(anyhow::anyhow!("recovery device certificate rejected: {rejection:?}"))
            }
            SubmitError::Internal(err) => Self::Internal(err),
        }
    }
}

#[derive(Clone)]
struct ClaimerContext {
    config: Arc<ClientConfig>,
    cmds: Arc<dyn InvitedCmds>,
    addr: ParsecInvitationAddr,
    time_provider: TimeProvider,
}

/// Ask the server what the invitation is about
pub async fn claimer_retrieve_info(
    config: Arc<ClientConfig>,
    addr: ParsecInvitationAddr,
    time_provider: Option<TimeProvider>,
) -> Result<AnyClaimRetrievedInfoCtx, ClaimerRetrieveInfoError> {
    let cmds = invited_cmds(addr.server(), addr.organization_id(), addr.token())?;
    let info = cmds.invite_info().await?;
    tracing::debug!(token = %addr.token(), invitation_type = ?addr.invitation_type(), "Invitation info retrieved");
    let ctx = ClaimerContext {
        config,
        cmds,
        addr,
        time_provider: time_provider.unwrap_or_default(),
    };
    Ok(match info {
        InviteInfoRep::User {
            claimer_email,
            administrators,
            ..
        } => AnyClaimRetrievedInfoCtx::User(UserClaimListAdministratorsCtx {
            ctx,
            claimer_email,
            administrators,
        }),
        InviteInfoRep::Device {
            claimer_user_id,
            claimer_human_handle,
            ..
        } => AnyClaimRetrievedInfoCtx::Device(ClaimInitialCtx {
            ctx,
            greeter_user_id: claimer_user_id,
            greeter_human_handle: claimer_human_handle.clone(),
            kind: DeviceClaim {
                claimer_user_id,
                claimer_human_handle,
            },
        }),
        InviteInfoRep::ShamirRecovery {
            claimer_user_id,
            claimer_human_handle,
            shamir_recovery_created_on,
            threshold,
            recipients,
            ..
        } => AnyClaimRetrievedInfoCtx::ShamirRecovery(ShamirRecoveryClaimPickRecipientCtx {
            ctx,
            claimer_user_id,
            claimer_human_handle,
            shamir_recovery_created_on,
            threshold,
            recipients,
            shares: HashMap::new(),
        }),
    })
}

pub enum AnyClaimRetrievedInfoCtx {
    User(UserClaimListAdministratorsCtx),
    Device(DeviceClaimInitialCtx),
    ShamirRecovery(ShamirRecoveryClaimPickRecipientCtx),
}

impl std::fmt::Debug for AnyClaimRetrievedInfoCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(_) => f.write_str("User(..)"),
            Self::Device(_) => f.write_str("Device(..)"),
            Self::ShamirRecovery(_) => f.write_str("ShamirRecovery(..)"),
        }
    }
}

/// Claiming a new user
#[derive(Debug, Clone)]
pub struct UserClaim {
    pub claimer_email: EmailAddress,
}

/// Claiming a new device for an existing user
#[derive(Debug, Clone)]
pub struct DeviceClaim {
    pub claimer_user_id: UserID,
    pub claimer_human_handle: HumanHandle,
}

/// Collecting one share of a shamir recovery
#[derive(Debug, Clone)]
pub struct ShamirRecoveryClaim {
    pub claimer_user_id: UserID,
}

pub type UserClaimInitialCtx = ClaimInitialCtx<UserClaim>;
pub type DeviceClaimInitialCtx = ClaimInitialCtx<DeviceClaim>;
pub type ShamirRecoveryClaimInitialCtx = ClaimInitialCtx<ShamirRecoveryClaim>;

/// A user invitation may be greeted by any administrator
#[derive(Clone)]
pub struct UserClaimListAdministratorsCtx {
    ctx: ClaimerContext,
    claimer_email: EmailAddress,
    administrators: Vec<UserGreetingAdministrator>,
}

impl UserClaimListAdministratorsCtx {
    pub fn claimer_email(&self) -> &EmailAddress {
        &self.claimer_email
    }

    pub fn administrators(&self) -> &[UserGreetingAdministrator] {
        &self.administrators
    }

    /// One context per administrator
    pub fn list_initial_ctxs(self) -> Vec<UserClaimInitialCtx> {
        let Self {
            ctx,
            claimer_email,
            administrators,
        } = self;
        administrators
            .into_iter()
            .map(|admin| ClaimInitialCtx {
                ctx: ctx.clone(),
                greeter_user_id: admin.user_id,
                greeter_human_handle: admin.human_handle,
                kind: UserClaim {
                    claimer_email: claimer_email.clone(),
                },
            })
            .collect()
    }

    /// Wait on every administrator at once, the first one to show up wins
    pub async fn wait_all_peers(self) -> Result<ClaimInProgress1Ctx<UserClaim>, ClaimInProgressError> {
        let attempts: Vec<_> = self
            .list_initial_ctxs()
            .into_iter()
            .map(|ctx| Box::pin(ctx.do_wait_peer()))
            .collect();
        if attempts.is_empty() {
            return Err(ClaimInProgressError::GreeterNotAllowed);
        }
        let (in_progress, _others) = select_ok(attempts).await?;
        Ok(in_progress)
    }
}

/// A greeting attempt we joined
struct ClaimerAttempt {
    ctx: ClaimerContext,
    id: GreetingAttemptID,
    greeter_user_id: UserID,
    greeter_human_handle: HumanHandle,
}

fn unexpected_step(step: GreeterStep) -> ClaimInProgressError {
    anyhow::anyhow!("unexpected greeter step {}", step.index()).into()
}

impl ClaimerAttempt {
    async fn step(&self, step: ClaimerStep) -> Result<GreeterStep, ClaimInProgressError> {
        let index = step.index();
        let rep = self.ctx.cmds.invite_claimer_step(self.id, step).await?;
        let peer_step = StepFailure::from_rep(rep, GreeterOrClaimer::Claimer)?;
        tracing::trace!(greeting_attempt = %self.id, step = index, "Greeting step done");
        Ok(peer_step)
    }

    async fn cancel(&self, reason: CancelledGreetingAttemptReason) -> Result<(), ClaimInProgressError> {
        match self.ctx.cmds.invite_claimer_cancel_greeting_attempt(self.id, reason).await? {
            CancelGreetingAttemptRep::Ok
            | CancelGreetingAttemptRep::GreetingAttemptAlreadyCancelled { .. }
            | CancelGreetingAttemptRep::GreetingAttemptNotFound
            | CancelGreetingAttemptRep::GreetingAttemptNotJoined => (),
            CancelGreetingAttemptRep::AuthorNotAllowed => return Err(ClaimInProgressError::NotFound),
            CancelGreetingAttemptRep::InvitationCancelled | CancelGreetingAttemptRep::InvitationCompleted => {
                return Err(ClaimInProgressError::AlreadyUsedOrDeleted)
            }
        }
        tracing::info!(greeting_attempt = %self.id, ?reason, "Greeting attempt cancelled");
        Ok(())
    }

    /// Steps 6 to 8: send our request, get and acknowledge the greeter's answer
    async fn exchange_payloads<T: serde::de::DeserializeOwned>(
        &self,
        secret: &SharedSecret,
        claimer_payload: Vec<u8>,
    ) -> Result<T, ClaimInProgressError> {
        match self.step(ClaimerStep::Number6SendPayload { claimer_payload }).await? {
            GreeterStep::Number6GetPayload => (),
            step => return Err(unexpected_step(step)),
        }
        let ciphered = match self.step(ClaimerStep::Number7GetPayload).await? {
            GreeterStep::Number7SendPayload { greeter_payload } => greeter_payload,
            step => return Err(unexpected_step(step)),
        };
        let answer = match secret.open(&ciphered) {
            Ok(answer) => answer,
            Err(reason) => {
                self.cancel(reason).await?;
                return Err(ClaimInProgressError::CorruptedConfirmation);
            }
        };
        match self.step(ClaimerStep::Number8Acknowledge).await? {
            GreeterStep::Number8WaitPeerAcknowledgment => Ok(answer),
            step => Err(unexpected_step(step)),
        }
    }
}

pub struct ClaimInitialCtx<K> {
    ctx: ClaimerContext,
    greeter_user_id: UserID,
    greeter_human_handle: HumanHandle,
    kind: K,
}

impl<K> ClaimInitialCtx<K> {
    pub fn greeter_user_id(&self) -> UserID {
        self.greeter_user_id
    }

    pub fn greeter_human_handle(&self) -> &HumanHandle {
        &self.greeter_human_handle
    }

    /// Join a greeting attempt with our greeter and wait for it, up to the SAS codes
    pub async fn do_wait_peer(self) -> Result<ClaimInProgress1Ctx<K>, ClaimInProgressError> {
        let id = match self
            .ctx
            .cmds
            .invite_claimer_start_greeting_attempt(self.greeter_user_id)
            .await?
        {
            StartGreetingAttemptRep::Ok { greeting_attempt } => greeting_attempt,
            StartGreetingAttemptRep::AuthorNotAllowed
            | StartGreetingAttemptRep::GreeterNotAllowed
            | StartGreetingAttemptRep::GreeterNotFound
            | StartGreetingAttemptRep::GreeterRevoked => return Err(ClaimInProgressError::GreeterNotAllowed),
            StartGreetingAttemptRep::InvitationNotFound => return Err(ClaimInProgressError::NotFound),
            StartGreetingAttemptRep::InvitationCancelled | StartGreetingAttemptRep::InvitationCompleted => {
                return Err(ClaimInProgressError::AlreadyUsedOrDeleted)
            }
        };
        tracing::info!(token = %self.ctx.addr.token(), greeting_attempt = %id, "Greeting attempt joined");
        let attempt = ClaimerAttempt {
            ctx: self.ctx,
            id,
            greeter_user_id: self.greeter_user_id,
            greeter_human_handle: self.greeter_human_handle,
        };

        let private_key = PrivateKey::generate();
        let greeter_public_key = match attempt
            .step(ClaimerStep::Number0WaitPeer {
                public_key: private_key.public_key(),
            })
            .await?
        {
            GreeterStep::Number0WaitPeer { public_key } => public_key,
            step => return Err(unexpected_step(step)),
        };
        let claimer_nonce = generate_nonce(NONCE_SIZE);
        match attempt
            .step(ClaimerStep::Number1SendHashedNonce {
                hashed_nonce: HashDigest::from_data(&claimer_nonce).as_bytes().to_vec(),
            })
            .await?
        {
            GreeterStep::Number1GetHashedNonce => (),
            step => return Err(unexpected_step(step)),
        }
        let greeter_nonce = match attempt.step(ClaimerStep::Number2GetNonce).await? {
            GreeterStep::Number2SendNonce { greeter_nonce } => greeter_nonce,
            step => return Err(unexpected_step(step)),
        };
        match attempt
            .step(ClaimerStep::Number3SendNonce {
                claimer_nonce: claimer_nonce.clone(),
            })
            .await?
        {
            GreeterStep::Number3GetNonce => (),
            step => return Err(unexpected_step(step)),
        }

        let secret = SharedSecret::new(&private_key, &greeter_public_key, claimer_nonce, greeter_nonce);
        let (claimer_sas, greeter_sas) =
            SasCode::generate_sas_codes(&secret.claimer_nonce, &secret.greeter_nonce, &secret.key)
                .map_err(anyhow::Error::from)?;
        Ok(ClaimInProgress1Ctx {
            attempt,
            kind: self.kind,
            secret,
            greeter_sas,
            claimer_sas,
        })
    }
}

pub struct ClaimInProgress1Ctx<K> {
    attempt: ClaimerAttempt,
    kind: K,
    secret: SharedSecret,
    greeter_sas: SasCode,
    claimer_sas: SasCode,
}

impl<K> ClaimInProgress1Ctx<K> {
    pub fn greeter_user_id(&self) -> UserID {
        self.attempt.greeter_user_id
    }

    pub fn greeter_human_handle(&self) -> &HumanHandle {
        &self.attempt.greeter_human_handle
    }

    pub fn greeter_sas(&self) -> &SasCode {
        &self.greeter_sas
    }

    /// `size` candidates among which the code read by the greeter must be picked
    pub fn generate_greeter_sas_choices(&self, size: usize) -> Vec<SasCode> {
        SasCode::generate_sas_code_candidates(&self.greeter_sas, size)
    }

    pub async fn do_signify_trust(self) -> Result<ClaimInProgress2Ctx<K>, ClaimInProgressError> {
        match self.attempt.step(ClaimerStep::Number4SignifyTrust).await? {
            GreeterStep::Number4WaitPeerTrust => (),
            step => return Err(unexpected_step(step)),
        }
        Ok(ClaimInProgress2Ctx {
            attempt: self.attempt,
            kind: self.kind,
            secret: self.secret,
            claimer_sas: self.claimer_sas,
        })
    }

    /// The code read by the greeter is wrong, end the attempt for both sides
    pub async fn do_deny_trust(self) -> Result<(), ClaimInProgressError> {
        self.attempt.cancel(CancelledGreetingAttemptReason::InvalidSasCode).await
    }

    /// Trust the greeter only if `picked` is its actual code
    pub async fn do_pick_greeter_sas(self, picked: &SasCode) -> Result<ClaimInProgress2Ctx<K>, ClaimInProgressError> {
        if *picked == self.greeter_sas {
            return self.do_signify_trust().await;
        }
        let timestamp = self.attempt.ctx.time_provider.now();
        self.do_deny_trust().await?;
        Err(ClaimInProgressError::GreetingAttemptCancelled {
            origin: GreeterOrClaimer::Claimer,
            reason: CancelledGreetingAttemptReason::InvalidSasCode,
            timestamp,
        })
    }
}

pub struct ClaimInProgress2Ctx<K> {
    attempt: ClaimerAttempt,
    kind: K,
    secret: SharedSecret,
    claimer_sas: SasCode,
}

impl<K> std::fmt::Debug for ClaimInProgress2Ctx<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimInProgress2Ctx").finish_non_exhaustive()
    }
}

impl<K> ClaimInProgress2Ctx<K> {
    /// Code to read to the greeter
    pub fn claimer_sas(&self) -> &SasCode {
        &self.claimer_sas
    }

    pub async fn do_wait_peer_trust(self) -> Result<ClaimInProgress3Ctx<K>, ClaimInProgressError> {
        match self.attempt.step(ClaimerStep::Number5WaitPeerTrust).await? {
            GreeterStep::Number5SignifyTrust => (),
            step => return Err(unexpected_step(step)),
        }
        Ok(ClaimInProgress3Ctx {
            attempt: self.attempt,
            kind: self.kind,
            secret: self.secret,
        })
    }

    pub async fn do_deny_trust(self) -> Result<(), ClaimInProgressError> {
        self.attempt.cancel(CancelledGreetingAttemptReason::InvalidSasCode).await
    }
}

pub struct ClaimInProgress3Ctx<K> {
    attempt: ClaimerAttempt,
    kind: K,
    secret: SharedSecret,
}

impl<K> ClaimInProgress3Ctx<K> {
    fn organization_addr(&self, root_verify_key: parsec_types::VerifyKey) -> ParsecOrganizationAddr {
        let addr = &self.attempt.ctx.addr;
        ParsecOrganizationAddr::new(addr.server().clone(), addr.organization_id().clone(), root_verify_key)
    }
}

impl ClaimInProgress3Ctx<UserClaim> {
    pub fn claimer_email(&self) -> &EmailAddress {
        &self.kind.claimer_email
    }

    /// Ask for a user, the greeter has the final say on what is created
    pub async fn do_claim(
        self,
        requested_device_label: DeviceLabel,
        requested_human_handle: HumanHandle,
    ) -> Result<ClaimFinalizeCtx, ClaimInProgressError> {
        let private_key = PrivateKey::generate();
        let signing_key = SigningKey::generate();
        let request = UserClaimPayload {
            public_key: private_key.public_key(),
            verify_key: signing_key.verify_key(),
            requested_device_label,
            requested_human_handle,
        };
        let confirmation: UserConfirmation = self
            .attempt
            .exchange_payloads(&self.secret, self.secret.seal(&request)?)
            .await?;

        let new_local_device = LocalDevice {
            organization_addr: self.organization_addr(confirmation.root_verify_key),
            user_id: confirmation.user_id,
            device_id: confirmation.device_id,
            device_label: confirmation.device_label,
            human_handle: confirmation.human_handle,
            initial_profile: confirmation.profile,
            private_key,
            signing_key,
            local_symkey: SecretKey::generate(),
            time_provider: self.attempt.ctx.time_provider.clone(),
        };
        tracing::info!(user_id = %new_local_device.user_id, device_id = %new_local_device.device_id, "User claimed");
        Ok(ClaimFinalizeCtx {
            config: self.attempt.ctx.config.clone(),
            new_local_device: Arc::new(new_local_device),
        })
    }
}

impl ClaimInProgress3Ctx<DeviceClaim> {
    pub async fn do_claim(self, requested_device_label: DeviceLabel) -> Result<ClaimFinalizeCtx, ClaimInProgressError> {
        let signing_key = SigningKey::generate();
        let request = DeviceClaimPayload {
            verify_key: signing_key.verify_key(),
            requested_device_label,
        };
        let confirmation: DeviceConfirmation = self
            .attempt
            .exchange_payloads(&self.secret, self.secret.seal(&request)?)
            .await?;
        if confirmation.user_id != self.kind.claimer_user_id {
            return Err(ClaimInProgressError::CorruptedConfirmation);
        }

        let new_local_device = LocalDevice {
            organization_addr: self.organization_addr(confirmation.root_verify_key),
            user_id: confirmation.user_id,
            device_id: confirmation.device_id,
            device_label: confirmation.device_label,
            human_handle: confirmation.human_handle,
            initial_profile: confirmation.profile,
            private_key: confirmation.private_key,
            signing_key,
            local_symkey: SecretKey::generate(),
            time_provider: self.attempt.ctx.time_provider.clone(),
        };
        tracing::info!(device_id = %new_local_device.device_id, "Device claimed");
        Ok(ClaimFinalizeCtx {
            config: self.attempt.ctx.config.clone(),
            new_local_device: Arc::new(new_local_device),
        })
    }
}

impl ClaimInProgress3Ctx<ShamirRecoveryClaim> {
    /// Get the greeter's share of our recovery secret
    pub async fn do_recover_share(self) -> Result<ShamirRecoveryClaimShare, ClaimInProgressError> {
        let share_data: ShamirRecoveryShareData = self
            .attempt
            .exchange_payloads(&self.secret, self.secret.seal(&())?)
            .await?;
        tracing::info!(recipient = %self.attempt.greeter_user_id, shares = share_data.weighted_share.len(), "Shamir share recovered");
        Ok(ShamirRecoveryClaimShare {
            recipient: self.attempt.greeter_user_id,
            weighted_share: share_data.weighted_share,
        })
    }
}

/// Shares handed over by one recipient
#[derive(Debug, Clone)]
pub struct ShamirRecoveryClaimShare {
    recipient: UserID,
    weighted_share: Vec<ShamirShare>,
}

impl ShamirRecoveryClaimShare {
    pub fn recipient(&self) -> UserID {
        self.recipient
    }
}

/// Shares are collected one recipient at a time until the threshold is met
pub struct ShamirRecoveryClaimPickRecipientCtx {
    ctx: ClaimerContext,
    claimer_user_id: UserID,
    claimer_human_handle: HumanHandle,
    shamir_recovery_created_on: DateTime,
    threshold: u8,
    recipients: Vec<ShamirRecoveryRecipient>,
    shares: HashMap<UserID, Vec<ShamirShare>>,
}

pub enum ShamirRecoveryClaimMaybeRecoverDeviceCtx {
    PickRecipient(ShamirRecoveryClaimPickRecipientCtx),
    RecoverDevice(ShamirRecoveryClaimRecoverDeviceCtx),
}

impl ShamirRecoveryClaimPickRecipientCtx {
    pub fn claimer_user_id(&self) -> UserID {
        self.claimer_user_id
    }

    pub fn claimer_human_handle(&self) -> &HumanHandle {
        &self.claimer_human_handle
    }

    pub fn shamir_recovery_created_on(&self) -> DateTime {
        self.shamir_recovery_created_on
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn recipients(&self) -> &[ShamirRecoveryRecipient] {
        &self.recipients
    }

    /// Active recipients we have no share from yet
    pub fn recipients_without_a_share(&self) -> Vec<&ShamirRecoveryRecipient> {
        self.recipients
            .iter()
            .filter(|recipient| recipient.revoked_on.is_none())
            .filter(|recipient| !self.shares.contains_key(&recipient.user_id))
            .collect()
    }

    fn collected_shares(&self) -> usize {
        self.shares.values().map(Vec::len).sum()
    }

    pub fn pick_recipient(
        &self,
        recipient_user_id: UserID,
    ) -> Result<ShamirRecoveryClaimInitialCtx, ClaimerShamirRecoveryPickRecipientError> {
        let recipient = self
            .recipients
            .iter()
            .find(|recipient| recipient.user_id == recipient_user_id)
            .ok_or(ClaimerShamirRecoveryPickRecipientError::RecipientNotFound)?;
        if recipient.revoked_on.is_some() {
            return Err(ClaimerShamirRecoveryPickRecipientError::RecipientRevoked);
        }
        if self.shares.contains_key(&recipient_user_id) {
            return Err(ClaimerShamirRecoveryPickRecipientError::RecipientAlreadyPicked);
        }
        Ok(ClaimInitialCtx {
            ctx: self.ctx.clone(),
            greeter_user_id: recipient.user_id,
            greeter_human_handle: recipient.human_handle.clone(),
            kind: ShamirRecoveryClaim {
                claimer_user_id: self.claimer_user_id,
            },
        })
    }

    /// Keep a recipient's shares, recovering the secret once enough are collected
    pub fn add_share(
        mut self,
        share: ShamirRecoveryClaimShare,
    ) -> Result<ShamirRecoveryClaimMaybeRecoverDeviceCtx, ClaimerShamirRecoveryAddShareError> {
        let recipient = self
            .recipients
            .iter()
            .find(|recipient| recipient.user_id == share.recipient)
            .ok_or(ClaimerShamirRecoveryAddShareError::RecipientNotFound)?;
        if usize::from(recipient.shares) != share.weighted_share.len() {
            return Err(ClaimerShamirRecoveryAddShareError::CorruptedSecret);
        }
        self.shares.insert(share.recipient, share.weighted_share);

        let threshold = usize::from(self.threshold);
        if self.collected_shares() < threshold {
            return Ok(ShamirRecoveryClaimMaybeRecoverDeviceCtx::PickRecipient(self));
        }
        let all_shares: Vec<ShamirShare> = self.shares.values().flatten().cloned().collect();
        let secret: ShamirRecoverySecret = recover_secret(threshold, &all_shares)
            .ok()
            .and_then(|raw| bincode::deserialize(&raw).ok())
            .ok_or(ClaimerShamirRecoveryAddShareError::CorruptedSecret)?;
        tracing::info!(claimer_user_id = %self.claimer_user_id, "Shamir recovery secret recovered");
        Ok(ShamirRecoveryClaimMaybeRecoverDeviceCtx::RecoverDevice(
            ShamirRecoveryClaimRecoverDeviceCtx {
                ctx: self.ctx,
                claimer_user_id: self.claimer_user_id,
                secret,
            },
        ))
    }
}

pub struct ShamirRecoveryClaimRecoverDeviceCtx {
    ctx: ClaimerContext,
    claimer_user_id: UserID,
    secret: ShamirRecoverySecret,
}

impl ShamirRecoveryClaimRecoverDeviceCtx {
    /// Register a new device using the recovery device kept by the server
    ///
    /// The context is kept on failure, the recovery can be retried.
    pub async fn recover_device(
        &self,
        requested_device_label: DeviceLabel,
    ) -> Result<ClaimFinalizeCtx, ClaimerShamirRecoveryRecoverDeviceError> {
        let ciphered_data = match self
            .ctx
            .cmds
            .invite_shamir_recovery_reveal(self.secret.reveal_token)
            .await?
        {
            RevealRep::Ok { ciphered_data } => ciphered_data,
            RevealRep::NotFound => return Err(ClaimerShamirRecoveryRecoverDeviceError::CipheredDataNotFound),
        };
        let mut recovery_device = self
            .secret
            .data_key
            .decrypt(&ciphered_data)
            .ok()
            .and_then(|raw| LocalDevice::load(&raw).ok())
            .ok_or(ClaimerShamirRecoveryRecoverDeviceError::CorruptedCipheredData)?;
        if recovery_device.user_id != self.claimer_user_id {
            return Err(ClaimerShamirRecoveryRecoverDeviceError::CorruptedCipheredData);
        }
        recovery_device.time_provider = self.ctx.time_provider.clone();

        let new_local_device = recovery_device.new_device_for_same_user(requested_device_label);
        let cmds = authenticated_cmds(
            recovery_device.organization_addr.server(),
            recovery_device.organization_id(),
            recovery_device.device_id,
        )?;
        submit_certificates(&recovery_device, &EventBus::new(), |timestamp| {
            let device_certificate = AnyCertificate::Device(DeviceCertificate {
                author: CertificateAuthor::Device(recovery_device.device_id),
                timestamp,
                user_id: new_local_device.user_id,
                device_id: new_local_device.device_id,
                device_label: new_local_device.device_label.clone(),
                verify_key: new_local_device.signing_key.verify_key(),
                purpose: DevicePurpose::Standard,
            })
            .dump_and_sign(&recovery_device.signing_key);
            let cmds = cmds.clone();
            async move { cmds.device_create(device_certificate).await }
        })
        .await?;

        match cmds.invite_complete(self.ctx.addr.token()).await? {
            InviteCompleteRep::Ok | InviteCompleteRep::InvitationAlreadyCompleted => (),
            InviteCompleteRep::InvitationNotFound | InviteCompleteRep::InvitationCancelled => {
                return Err(ClaimerShamirRecoveryRecoverDeviceError::AlreadyUsedOrDeleted)
            }
            InviteCompleteRep::AuthorNotAllowed => {
                return Err(anyhow::anyhow!("recovery device not allowed to complete the invitation").into())
            }
        }
        tracing::info!(device_id = %new_local_device.device_id, "Device recovered from shamir shares");
        Ok(ClaimFinalizeCtx {
            config: self.ctx.config.clone(),
            new_local_device: Arc::new(new_local_device),
        })
    }
}

/// The new device exists server-side, what is left is to store it locally
pub struct ClaimFinalizeCtx {
    config: Arc<ClientConfig>,
    new_local_device: Arc<LocalDevice>,
}

impl ClaimFinalizeCtx {
    pub fn new_local_device(&self) -> &Arc<LocalDevice> {
        &self.new_local_device
    }

    pub fn device_id(&self) -> DeviceID {
        self.new_local_device.device_id
    }

    pub fn get_default_key_file(&self) -> PathBuf {
        get_default_key_file(&self.config.config_dir, self.new_local_device.device_id)
    }

    pub async fn save_local_device(
        self,
        strategy: &DeviceSaveStrategy,
        key_file: &Path,
    ) -> Result<AvailableDevice, SaveDeviceError> {
        save_device(strategy, &self.new_local_device, key_file.to_owned()).await
    }
}
