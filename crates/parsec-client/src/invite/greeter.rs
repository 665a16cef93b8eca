//! Greeter side of the invitation protocols

use super::{
    DeviceClaimPayload, DeviceConfirmation, GreetInProgressError, SharedSecret, ShamirRecoveryShareData,
    StepFailure, UserClaimPayload, UserConfirmation, NONCE_SIZE,
};
use crate::certif::CertificatesStore;
use parsec_connection::protocol::{CancelGreetingAttemptRep, InviteCompleteRep, StartGreetingAttemptRep};
use parsec_connection::{AuthenticatedCmds, ClaimerStep, GreeterStep};
use parsec_types::crypto::generate_nonce;
use parsec_types::{
    AnyCertificate, CancelledGreetingAttemptReason, CertificateAuthor, DeviceCertificate, DeviceID,
    DeviceLabel, DevicePurpose, GreeterOrClaimer, GreetingAttemptID, HashDigest, HumanHandle,
    InvitationToken, LocalDevice, PrivateKey, SasCode, UserCertificate, UserID, UserProfile,
};
use std::sync::Arc;

/// Greeting a new user
#[derive(Debug)]
pub struct UserGreet;

/// Greeting a new device of our own user
#[derive(Debug)]
pub struct DeviceGreet;

/// Handing our share of a shamir recovery setup to its owner
#[derive(Debug)]
pub struct ShamirRecoveryGreet {
    pub claimer_user_id: UserID,
}

pub(crate) struct GreeterContext {
    pub device: Arc<LocalDevice>,
    pub cmds: Arc<dyn AuthenticatedCmds>,
    pub certificates: Arc<CertificatesStore>,
    pub token: InvitationToken,
}

/// A greeting attempt we joined
struct GreeterAttempt {
    ctx: GreeterContext,
    id: GreetingAttemptID,
}

fn unexpected_step(step: ClaimerStep) -> GreetInProgressError {
    anyhow::anyhow!("unexpected claimer step {}", step.index()).into()
}

impl GreeterAttempt {
    async fn step(&self, step: GreeterStep) -> Result<ClaimerStep, GreetInProgressError> {
        let index = step.index();
        let rep = self.ctx.cmds.invite_greeter_step(self.id, step).await?;
        let peer_step = StepFailure::from_rep(rep, GreeterOrClaimer::Greeter)?;
        tracing::trace!(greeting_attempt = %self.id, step = index, "Greeting step done");
        Ok(peer_step)
    }

    async fn cancel(&self, reason: CancelledGreetingAttemptReason) -> Result<(), GreetInProgressError> {
        match self.ctx.cmds.invite_greeter_cancel_greeting_attempt(self.id, reason).await? {
            CancelGreetingAttemptRep::Ok
            | CancelGreetingAttemptRep::GreetingAttemptAlreadyCancelled { .. }
            | CancelGreetingAttemptRep::GreetingAttemptNotFound
            | CancelGreetingAttemptRep::GreetingAttemptNotJoined => (),
            CancelGreetingAttemptRep::AuthorNotAllowed => return Err(GreetInProgressError::GreeterNotAllowed),
            CancelGreetingAttemptRep::InvitationCancelled | CancelGreetingAttemptRep::InvitationCompleted => {
                return Err(GreetInProgressError::AlreadyDeleted)
            }
        }
        tracing::info!(greeting_attempt = %self.id, ?reason, "Greeting attempt cancelled");
        Ok(())
    }

    async fn complete(&self) -> Result<(), GreetInProgressError> {
        match self.ctx.cmds.invite_complete(self.ctx.token).await? {
            InviteCompleteRep::Ok | InviteCompleteRep::InvitationAlreadyCompleted => Ok(()),
            InviteCompleteRep::AuthorNotAllowed => Err(GreetInProgressError::GreeterNotAllowed),
            InviteCompleteRep::InvitationNotFound => Err(GreetInProgressError::NotFound),
            InviteCompleteRep::InvitationCancelled => Err(GreetInProgressError::AlreadyDeleted),
        }
    }

    /// Steps 7 and 8: hand the result to the claimer and wait for its acknowledgement
    async fn send_result(&self, greeter_payload: Vec<u8>) -> Result<(), GreetInProgressError> {
        match self.step(GreeterStep::Number7SendPayload { greeter_payload }).await? {
            ClaimerStep::Number7GetPayload => (),
            step => return Err(unexpected_step(step)),
        }
        match self.step(GreeterStep::Number8WaitPeerAcknowledgment).await? {
            ClaimerStep::Number8Acknowledge => Ok(()),
            step => Err(unexpected_step(step)),
        }
    }
}

pub struct GreetInitialCtx<K> {
    ctx: GreeterContext,
    kind: K,
}

impl<K> GreetInitialCtx<K> {
    pub(crate) fn new(ctx: GreeterContext, kind: K) -> Self {
        Self { ctx, kind }
    }

    pub fn token(&self) -> InvitationToken {
        self.ctx.token
    }

    /// Join a greeting attempt and wait for the claimer, up to the SAS codes
    pub async fn do_wait_peer(self) -> Result<GreetInProgress1Ctx<K>, GreetInProgressError> {
        let id = match self.ctx.cmds.invite_greeter_start_greeting_attempt(self.ctx.token).await? {
            StartGreetingAttemptRep::Ok { greeting_attempt } => greeting_attempt,
            StartGreetingAttemptRep::AuthorNotAllowed
            | StartGreetingAttemptRep::GreeterNotAllowed
            | StartGreetingAttemptRep::GreeterNotFound
            | StartGreetingAttemptRep::GreeterRevoked => return Err(GreetInProgressError::GreeterNotAllowed),
            StartGreetingAttemptRep::InvitationNotFound => return Err(GreetInProgressError::NotFound),
            StartGreetingAttemptRep::InvitationCancelled | StartGreetingAttemptRep::InvitationCompleted => {
                return Err(GreetInProgressError::AlreadyDeleted)
            }
        };
        tracing::info!(token = %self.ctx.token, greeting_attempt = %id, "Greeting attempt joined");
        let attempt = GreeterAttempt { ctx: self.ctx, id };

        let private_key = PrivateKey::generate();
        let claimer_public_key = match attempt
            .step(GreeterStep::Number0WaitPeer {
                public_key: private_key.public_key(),
            })
            .await?
        {
            ClaimerStep::Number0WaitPeer { public_key } => public_key,
            step => return Err(unexpected_step(step)),
        };
        let hashed_nonce = match attempt.step(GreeterStep::Number1GetHashedNonce).await? {
            ClaimerStep::Number1SendHashedNonce { hashed_nonce } => hashed_nonce,
            step => return Err(unexpected_step(step)),
        };
        let greeter_nonce = generate_nonce(NONCE_SIZE);
        match attempt
            .step(GreeterStep::Number2SendNonce {
                greeter_nonce: greeter_nonce.clone(),
            })
            .await?
        {
            ClaimerStep::Number2GetNonce => (),
            step => return Err(unexpected_step(step)),
        }
        let claimer_nonce = match attempt.step(GreeterStep::Number3GetNonce).await? {
            ClaimerStep::Number3SendNonce { claimer_nonce } => claimer_nonce,
            step => return Err(unexpected_step(step)),
        };
        if HashDigest::from_data(&claimer_nonce).as_bytes()[..] != hashed_nonce[..] {
            attempt.cancel(CancelledGreetingAttemptReason::InvalidNonceHash).await?;
            return Err(GreetInProgressError::NonceMismatch);
        }

        let secret = SharedSecret::new(&private_key, &claimer_public_key, claimer_nonce, greeter_nonce);
        let (claimer_sas, greeter_sas) =
            SasCode::generate_sas_codes(&secret.claimer_nonce, &secret.greeter_nonce, &secret.key)
                .map_err(anyhow::Error::from)?;
        Ok(GreetInProgress1Ctx {
            attempt,
            kind: self.kind,
            secret,
            greeter_sas,
            claimer_sas,
        })
    }
}

pub struct GreetInProgress1Ctx<K> {
    attempt: GreeterAttempt,
    kind: K,
    secret: SharedSecret,
    greeter_sas: SasCode,
    claimer_sas: SasCode,
}

impl<K> GreetInProgress1Ctx<K> {
    /// Code to read to the claimer
    pub fn greeter_sas(&self) -> &SasCode {
        &self.greeter_sas
    }

    pub fn greeting_attempt(&self) -> GreetingAttemptID {
        self.attempt.id
    }

    /// Wait for the claimer to confirm our SAS code
    pub async fn do_wait_peer_trust(self) -> Result<GreetInProgress2Ctx<K>, GreetInProgressError> {
        match self.attempt.step(GreeterStep::Number4WaitPeerTrust).await? {
            ClaimerStep::Number4SignifyTrust => (),
            step => return Err(unexpected_step(step)),
        }
        Ok(GreetInProgress2Ctx {
            attempt: self.attempt,
            kind: self.kind,
            secret: self.secret,
            greeter_sas: self.greeter_sas,
            claimer_sas: self.claimer_sas,
        })
    }
}

pub struct GreetInProgress2Ctx<K> {
    attempt: GreeterAttempt,
    kind: K,
    secret: SharedSecret,
    greeter_sas: SasCode,
    claimer_sas: SasCode,
}

impl<K> std::fmt::Debug for GreetInProgress2Ctx<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GreetInProgress2Ctx").finish_non_exhaustive()
    }
}

impl<K> GreetInProgress2Ctx<K> {
    /// Code the claimer reads to us
    pub fn claimer_sas(&self) -> &SasCode {
        &self.claimer_sas
    }

    pub fn greeter_sas(&self) -> &SasCode {
        &self.greeter_sas
    }

    /// `size` candidates among which the real claimer code must be picked
    pub fn generate_claimer_sas_choices(&self, size: usize) -> Vec<SasCode> {
        SasCode::generate_sas_code_candidates(&self.claimer_sas, size)
    }

    pub async fn do_signify_trust(self) -> Result<GreetInProgress3Ctx<K>, GreetInProgressError> {
        match self.attempt.step(GreeterStep::Number5SignifyTrust).await? {
            ClaimerStep::Number5WaitPeerTrust => (),
            step => return Err(unexpected_step(step)),
        }
        Ok(GreetInProgress3Ctx {
            attempt: self.attempt,
            kind: self.kind,
            secret: self.secret,
        })
    }

    /// The code read by the claimer is wrong, end the attempt for both sides
    pub async fn do_deny_trust(self) -> Result<(), GreetInProgressError> {
        self.attempt.cancel(CancelledGreetingAttemptReason::InvalidSasCode).await
    }
}

pub struct GreetInProgress3Ctx<K> {
    attempt: GreeterAttempt,
    kind: K,
    secret: SharedSecret,
}

impl<K> GreetInProgress3Ctx<K> {
    /// Step 6: what the claimer asks for
    async fn get_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, GreetInProgressError> {
        let ciphered = match self.attempt.step(GreeterStep::Number6GetPayload).await? {
            ClaimerStep::Number6SendPayload { claimer_payload } => claimer_payload,
            step => return Err(unexpected_step(step)),
        };
        match self.secret.open(&ciphered) {
            Ok(payload) => Ok(payload),
            Err(reason) => {
                self.attempt.cancel(reason).await?;
                Err(GreetInProgressError::CorruptedInviteUserData)
            }
        }
    }
}

impl GreetInProgress3Ctx<UserGreet> {
    pub async fn do_get_claim_requests(self) -> Result<UserGreetInProgress4Ctx, GreetInProgressError> {
        let payload: UserClaimPayload = self.get_payload().await?;
        Ok(UserGreetInProgress4Ctx {
            attempt: self.attempt,
            secret: self.secret,
            payload,
        })
    }
}

impl GreetInProgress3Ctx<DeviceGreet> {
    pub async fn do_get_claim_requests(self) -> Result<DeviceGreetInProgress4Ctx, GreetInProgressError> {
        let payload: DeviceClaimPayload = self.get_payload().await?;
        Ok(DeviceGreetInProgress4Ctx {
            attempt: self.attempt,
            secret: self.secret,
            payload,
        })
    }
}

impl GreetInProgress3Ctx<ShamirRecoveryGreet> {
    /// Hand our share to the claimer, this ends the greeting
    pub async fn do_get_claim_requests(self) -> Result<(), GreetInProgressError> {
        let () = self.get_payload().await?;
        let ctx = &self.attempt.ctx;
        let claimer_user_id = self.kind.claimer_user_id;
        let share = ctx
            .certificates
            .shamir_setup(claimer_user_id)
            .filter(|setup| setup.deletion.is_none())
            .and_then(|setup| setup.shares.get(&ctx.device.user_id).cloned())
            .ok_or(GreetInProgressError::AlreadyDeleted)?;
        let share_data: ShamirRecoveryShareData = ctx
            .device
            .private_key
            .decrypt_from_self(&share.ciphered_share)
            .map_err(anyhow::Error::from)
            .and_then(|raw| bincode::deserialize(&raw).map_err(anyhow::Error::from))
            .map_err(|err| anyhow::anyhow!("cannot read our shamir share for {claimer_user_id}: {err}"))?;
        let greeter_payload = self.secret.seal(&share_data)?;
        self.attempt.send_result(greeter_payload).await?;
        tracing::info!(token = %ctx.token, %claimer_user_id, "Shamir recovery share handed over");
        Ok(())
    }
}

pub struct UserGreetInProgress4Ctx {
    attempt: GreeterAttempt,
    secret: SharedSecret,
    payload: UserClaimPayload,
}

impl UserGreetInProgress4Ctx {
    pub fn requested_human_handle(&self) -> &HumanHandle {
        &self.payload.requested_human_handle
    }

    pub fn requested_device_label(&self) -> &DeviceLabel {
        &self.payload.requested_device_label
    }

    /// Create the user, possibly with a human handle, label or profile
    /// other than requested
    pub async fn do_create(
        self,
        human_handle: HumanHandle,
        device_label: DeviceLabel,
        profile: UserProfile,
    ) -> Result<(), GreetInProgressError> {
        let ctx = &self.attempt.ctx;
        let author = ctx.device.clone();
        let user_id = UserID::default_new();
        let device_id = DeviceID::default_new();
        let cmds = ctx.cmds.clone();
        ctx.certificates
            .submit(|timestamp| {
                let user_certificate = AnyCertificate::User(UserCertificate {
                    author: CertificateAuthor::Device(author.device_id),
                    timestamp,
                    user_id,
                    human_handle: human_handle.clone(),
                    public_key: self.payload.public_key.clone(),
                    profile,
                })
                .dump_and_sign(&author.signing_key);
                let device_certificate = AnyCertificate::Device(DeviceCertificate {
                    author: CertificateAuthor::Device(author.device_id),
                    timestamp,
                    user_id,
                    device_id,
                    device_label: device_label.clone(),
                    verify_key: self.payload.verify_key.clone(),
                    purpose: DevicePurpose::Standard,
                })
                .dump_and_sign(&author.signing_key);
                let cmds = cmds.clone();
                async move { cmds.user_create(user_certificate, device_certificate).await }
            })
            .await?;
        tracing::info!(token = %ctx.token, %user_id, "User created");

        let confirmation = UserConfirmation {
            user_id,
            device_id,
            device_label,
            human_handle,
            profile,
            root_verify_key: author.organization_addr.root_verify_key().clone(),
        };
        self.attempt.send_result(self.secret.seal(&confirmation)?).await?;
        self.attempt.complete().await
    }
}

pub struct DeviceGreetInProgress4Ctx {
    attempt: GreeterAttempt,
    secret: SharedSecret,
    payload: DeviceClaimPayload,
}

impl DeviceGreetInProgress4Ctx {
    pub fn requested_device_label(&self) -> &DeviceLabel {
        &self.payload.requested_device_label
    }

    pub async fn do_create(self, device_label: DeviceLabel) -> Result<(), GreetInProgressError> {
        let ctx = &self.attempt.ctx;
        let author = ctx.device.clone();
        let device_id = DeviceID::default_new();
        let cmds = ctx.cmds.clone();
        ctx.certificates
            .submit(|timestamp| {
                let device_certificate = AnyCertificate::Device(DeviceCertificate {
                    author: CertificateAuthor::Device(author.device_id),
                    timestamp,
                    user_id: author.user_id,
                    device_id,
                    device_label: device_label.clone(),
                    verify_key: self.payload.verify_key.clone(),
                    purpose: DevicePurpose::Standard,
                })
                .dump_and_sign(&author.signing_key);
                let cmds = cmds.clone();
                async move { cmds.device_create(device_certificate).await }
            })
            .await?;
        tracing::info!(token = %ctx.token, %device_id, "Device created");

        let confirmation = DeviceConfirmation {
            user_id: author.user_id,
            device_id,
            device_label,
            human_handle: author.human_handle.clone(),
            profile: ctx.certificates.self_profile(),
            private_key: author.private_key.clone(),
            root_verify_key: author.organization_addr.root_verify_key().clone(),
        };
        self.attempt.send_result(self.secret.seal(&confirmation)?).await?;
        self.attempt.complete().await
    }
}
