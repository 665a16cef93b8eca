//! Invitation protocols
//!
//! A greeting attempt pairs an existing member (the greeter) with a newcomer
//! (the claimer). Both run the same numbered steps through the server:
//!
//! 1. exchange of public keys, then of nonces (the claimer commits to its
//!    nonce by sending its hash first)
//! 2. each human checks the SAS code displayed by the other side, the
//!    claimer first
//! 3. the claimer sends what it wants to be created, the greeter creates it
//!    and sends back what the claimer needs to build its device
//!
//! Each stage is a context consumed by the step that leads to the next one,
//! so a step cannot be run twice or out of order.

pub mod claimer;
pub mod greeter;

use crate::certif::SubmitError;
use parsec_connection::{ConnectionError, GreetingStepRep};
use parsec_connection::protocol::CertificateRejection;
use parsec_types::{
    CancelledGreetingAttemptReason, DateTime, DeviceID, DeviceLabel, GreeterOrClaimer, HumanHandle,
    PrivateKey, PublicKey, SecretKey, ShamirRevealToken, ShamirShare, UserID, UserProfile, VerifyKey,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub use claimer::{
    claimer_retrieve_info, AnyClaimRetrievedInfoCtx, ClaimFinalizeCtx, ClaimInProgress1Ctx,
    ClaimInProgress2Ctx, ClaimInProgress3Ctx, ClaimInitialCtx, ClaimerRetrieveInfoError,
    ClaimerShamirRecoveryAddShareError, ClaimerShamirRecoveryPickRecipientError,
    ClaimerShamirRecoveryRecoverDeviceError, DeviceClaim, DeviceClaimInitialCtx,
    ShamirRecoveryClaim, ShamirRecoveryClaimInitialCtx, ShamirRecoveryClaimMaybeRecoverDeviceCtx,
    ShamirRecoveryClaimPickRecipientCtx, ShamirRecoveryClaimRecoverDeviceCtx, ShamirRecoveryClaimShare,
    UserClaim, UserClaimInitialCtx, UserClaimListAdministratorsCtx,
};
pub use greeter::{
    DeviceGreet, DeviceGreetInProgress4Ctx, GreetInProgress1Ctx, GreetInProgress2Ctx, GreetInProgress3Ctx,
    GreetInitialCtx, ShamirRecoveryGreet, UserGreet, UserGreetInProgress4Ctx,
};

/// Size of the nonces exchanged to derive the SAS codes
const NONCE_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum GreetInProgressError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Invitation not found")]
    NotFound,
    #[error("Invitation already used or deleted")]
    AlreadyDeleted,
    #[error("Organization has expired")]
    OrganizationExpired,
    #[error("The claimer has left the greeting attempt")]
    PeerReset,
    #[error("Not allowed to greet this invitation")]
    GreeterNotAllowed,
    #[error("The claimer's nonce does not match its hash")]
    NonceMismatch,
    #[error("The claimer sent invalid data")]
    CorruptedInviteUserData,
    #[error("Active users limit reached")]
    ActiveUsersLimitReached,
    #[error("User already exists")]
    UserAlreadyExists,
    #[error("Human handle already taken")]
    HumanHandleAlreadyTaken,
    #[error("Device already exists")]
    DeviceAlreadyExists,
    #[error("Not allowed to create this user")]
    UserCreateNotAllowed,
    #[error("Greeting attempt cancelled by the {origin:?} ({reason:?})")]
    GreetingAttemptCancelled {
        origin: GreeterOrClaimer,
        reason: CancelledGreetingAttemptReason,
        timestamp: DateTime,
    },
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

impl From<ConnectionError> for GreetInProgressError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NoResponse => Self::Offline,
            ConnectionError::ExpiredOrganization => Self::OrganizationExpired,
            ConnectionError::InvitationNotFound => Self::NotFound,
            ConnectionError::InvitationAlreadyUsedOrDeleted => Self::AlreadyDeleted,
            err => Self::Internal(err.into()),
        }
    }
}

impl From<SubmitError> for GreetInProgressError {
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
            SubmitError::Rejected(rejection) => match rejection {
                CertificateRejection::ActiveUsersLimitReached => Self::ActiveUsersLimitReached,
                CertificateRejection::UserAlreadyExists => Self::UserAlreadyExists,
                CertificateRejection::HumanHandleAlreadyTaken => Self::HumanHandleAlreadyTaken,
                CertificateRejection::DeviceAlreadyExists => Self::DeviceAlreadyExists,
                CertificateRejection::AuthorNotAllowed => Self::UserCreateNotAllowed,
                rejection => Self::Internal(anyhow::anyhow!("certificate rejected: {rejection:?}")),
            },
            SubmitError::Internal(err) => Self::Internal(err),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimInProgressError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Invitation not found")]
    NotFound,
    #[error("Invitation already used or deleted")]
    AlreadyUsedOrDeleted,
    #[error("Organization has expired")]
    OrganizationExpired,
    #[error("The greeter has left the greeting attempt")]
    PeerReset,
    #[error("This user cannot greet the invitation")]
    GreeterNotAllowed,
    #[error("Active users limit reached")]
    ActiveUsersLimitReached,
    #[error("The greeter sent invalid data")]
    CorruptedConfirmation,
    #[error("Greeting attempt cancelled by the {origin:?} ({reason:?})")]
    GreetingAttemptCancelled {
        origin: GreeterOrClaimer,
        reason: CancelledGreetingAttemptReason,
        timestamp: DateTime,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ConnectionError> for ClaimInProgressError {
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

/// Failure of a greeting step, common to both sides
#[derive(Debug)]
pub(crate) enum StepFailure {
    NotAllowed,
    InvitationGone,
    PeerReset,
    Cancelled {
        origin: GreeterOrClaimer,
        reason: CancelledGreetingAttemptReason,
        timestamp: DateTime,
    },
    Desync,
}

impl StepFailure {
    /// Why the peer's step is not available, `side` being ours
    pub(crate) fn from_rep<T>(rep: GreetingStepRep<T>, side: GreeterOrClaimer) -> Result<T, StepFailure> {
        match rep {
            GreetingStepRep::Ok(peer_step) => Ok(peer_step),
            GreetingStepRep::AuthorNotAllowed => Err(StepFailure::NotAllowed),
            GreetingStepRep::InvitationCancelled | GreetingStepRep::InvitationCompleted => Err(StepFailure::InvitationGone),
            GreetingStepRep::GreetingAttemptNotFound | GreetingStepRep::GreetingAttemptNotJoined => Err(StepFailure::PeerReset),
            // The peer joined a new attempt, dropping the one we are in
            GreetingStepRep::GreetingAttemptCancelled {
                origin,
                reason: CancelledGreetingAttemptReason::AutomaticallyCancelled,
                ..
            } if origin == side.peer() => Err(StepFailure::PeerReset),
            GreetingStepRep::GreetingAttemptCancelled {
                origin,
                reason,
                timestamp,
            } => Err(StepFailure::Cancelled {
                origin,
                reason,
                timestamp,
            }),
            GreetingStepRep::StepMismatch | GreetingStepRep::StepTooAdvanced => Err(StepFailure::Desync),
        }
    }
}

impl From<StepFailure> for GreetInProgressError {
    fn from(failure: StepFailure) -> Self {
        match failure {
            StepFailure::NotAllowed => Self::GreeterNotAllowed,
            StepFailure::InvitationGone => Self::AlreadyDeleted,
            StepFailure::PeerReset => Self::PeerReset,
            StepFailure::Cancelled {
                origin,
                reason,
                timestamp,
            } => Self::GreetingAttemptCancelled {
                origin,
                reason,
                timestamp,
            },
            StepFailure::Desync => Self::Internal(anyhow::anyhow!("greeting steps out of sync with the claimer")),
        }
    }
}

impl From<StepFailure> for ClaimInProgressError {
    fn from(failure: StepFailure) -> Self {
        match failure {
            StepFailure::NotAllowed => Self::NotFound,
            StepFailure::InvitationGone => Self::AlreadyUsedOrDeleted,
            StepFailure::PeerReset => Self::PeerReset,
            StepFailure::Cancelled {
                origin,
                reason,
                timestamp,
            } => Self::GreetingAttemptCancelled {
                origin,
                reason,
                timestamp,
            },
            StepFailure::Desync => Self::Internal(anyhow::anyhow!("greeting steps out of sync with the greeter")),
        }
    }
}

/// Keys negotiated during the first steps of an attempt
#[derive(Debug)]
pub(crate) struct SharedSecret {
    pub key: SecretKey,
    pub claimer_nonce: Vec<u8>,
    pub greeter_nonce: Vec<u8>,
}

impl SharedSecret {
    pub(crate) fn new(own: &PrivateKey, peer: &PublicKey, claimer_nonce: Vec<u8>, greeter_nonce: Vec<u8>) -> Self {
        Self {
            key: own.generate_shared_secret_key(peer),
            claimer_nonce,
            greeter_nonce,
        }
    }

    pub(crate) fn seal<T: Serialize>(&self, payload: &T) -> anyhow::Result<Vec<u8>> {
        Ok(self.key.encrypt(&bincode::serialize(payload)?))
    }

    pub(crate) fn open<T: DeserializeOwned>(&self, ciphered: &[u8]) -> Result<T, CancelledGreetingAttemptReason> {
        let cleartext = self
            .key
            .decrypt(ciphered)
            .map_err(|_| CancelledGreetingAttemptReason::UndecipherablePayload)?;
        bincode::deserialize(&cleartext).map_err(|_| CancelledGreetingAttemptReason::UndeserializablePayload)
    }
}

/// What a claimer of a new user asks for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UserClaimPayload {
    pub public_key: PublicKey,
    pub verify_key: VerifyKey,
    pub requested_device_label: DeviceLabel,
    pub requested_human_handle: HumanHandle,
}

/// What a claimer of a new device asks for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DeviceClaimPayload {
    pub verify_key: VerifyKey,
    pub requested_device_label: DeviceLabel,
}

/// What the greeter actually created for a new user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UserConfirmation {
    pub user_id: UserID,
    pub device_id: DeviceID,
    pub device_label: DeviceLabel,
    pub human_handle: HumanHandle,
    pub profile: UserProfile,
    pub root_verify_key: VerifyKey,
}

/// What the greeter created for a new device, with the user's keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DeviceConfirmation {
    pub user_id: UserID,
    pub device_id: DeviceID,
    pub device_label: DeviceLabel,
    pub human_handle: HumanHandle,
    pub profile: UserProfile,
    pub private_key: PrivateKey,
    pub root_verify_key: VerifyKey,
}

/// Shares a recipient holds for a shamir recovery setup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ShamirRecoveryShareData {
    pub weighted_share: Vec<ShamirShare>,
}

/// The secret split among the recipients of a shamir recovery setup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ShamirRecoverySecret {
    /// Key of the ciphered recovery device kept by the server
    pub data_key: SecretKey,
    pub reveal_token: ShamirRevealToken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_payload_sealed_with_another_key() {
        let greeter = PrivateKey::generate();
        let claimer = PrivateKey::generate();
        let mallory = PrivateKey::generate();
        let ours = SharedSecret::new(&claimer, &greeter.public_key(), vec![1], vec![2]);
        let theirs = SharedSecret::new(&greeter, &claimer.public_key(), vec![1], vec![2]);
        let tampered = SharedSecret::new(&mallory, &greeter.public_key(), vec![1], vec![2]);

        let sealed = ours.seal(&"hello".to_string()).unwrap();
        assert_eq!(theirs.open::<String>(&sealed).unwrap(), "hello");
        assert_matches!(
            tampered.open::<String>(&sealed),
            Err(CancelledGreetingAttemptReason::UndecipherablePayload)
        );

        let garbage = ours.key.encrypt(b"\x01");
        assert_matches!(
            theirs.open::<UserConfirmation>(&garbage),
            Err(CancelledGreetingAttemptReason::UndeserializablePayload)
        );
    }

    #[test]
    fn test_peer_reset_is_told_apart_from_cancellation() {
        let now = chrono::Utc::now();
        let reset = GreetingStepRep::<()>::GreetingAttemptCancelled {
            origin: GreeterOrClaimer::Claimer,
            reason: CancelledGreetingAttemptReason::AutomaticallyCancelled,
            timestamp: now,
        };
        assert_matches!(StepFailure::from_rep(reset, GreeterOrClaimer::Greeter), Err(StepFailure::PeerReset));

        let denied = GreetingStepRep::<()>::GreetingAttemptCancelled {
            origin: GreeterOrClaimer::Claimer,
            reason: CancelledGreetingAttemptReason::InvalidSasCode,
            timestamp: now,
        };
        assert_matches!(
            StepFailure::from_rep(denied, GreeterOrClaimer::Greeter),
            Err(StepFailure::Cancelled {
                origin: GreeterOrClaimer::Claimer,
                reason: CancelledGreetingAttemptReason::InvalidSasCode,
                ..
            })
        );
    }
}
