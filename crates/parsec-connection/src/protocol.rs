//! Request and response types of the server commands

use parsec_types::{
    CancelledGreetingAttemptReason, DateTime, DeviceID, EmailAddress, GreeterOrClaimer,
    GreetingAttemptID, HumanHandle, InvitationEmailSentStatus, InvitationStatus, InvitationToken,
    UserID, UserOnlineStatus, VlobID,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signed certificate, as stored by the server
pub type Bytes = Vec<u8>;

/// Maximum number of non-revoked users allowed in the organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActiveUsersLimit {
    LimitedTo(u64),
    NoLimit,
}

/// Organization-wide server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub user_profile_outsider_allowed: bool,
    pub active_users_limit: ActiveUsersLimit,
}

/// Terms of Service of the organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tos {
    pub updated_on: DateTime,
    pub per_locale_urls: BTreeMap<String, String>,
}

/// Storage usage of the organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationStats {
    pub total_block_bytes: u64,
    pub total_metadata_bytes: u64,
    pub bootstrapped_on: Option<DateTime>,
}

/// Why the server refused a certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateRejection {
    AuthorNotAllowed,
    InvalidCertificate(String),
    UserAlreadyExists,
    HumanHandleAlreadyTaken,
    DeviceAlreadyExists,
    ActiveUsersLimitReached,
    UserNotFound,
    UserAlreadyRevoked,
    RecipientRevoked,
    RealmNotFound,
    RealmAlreadyExists,
    RoleIncompatibleWithOutsider,
    RoleAlreadyGranted,
    ShamirRecoveryAlreadyExists,
    ShamirRecoveryNotFound,
    InvalidBootstrapToken,
    OrganizationAlreadyBootstrapped,
}

/// Outcome of any command submitting certificates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CertificateRep {
    Ok,
    /// Another certificate was issued concurrently with a timestamp not older than ours
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
    /// Client and server clocks disagree too much
    TimestampOutOfBallpark {
        server_timestamp: DateTime,
        client_timestamp: DateTime,
        ballpark_client_early_offset: f64,
        ballpark_client_late_offset: f64,
    },
    Rejected(CertificateRejection),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserListFrozenRep {
    Ok { frozen_users: Vec<UserID> },
    AuthorNotAllowed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealmGetKeysBundleRep {
    Ok {
        #[serde(with = "serde_bytes")]
        keys_bundle_access: Bytes,
    },
    AuthorNotAllowed,
    RealmNotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VlobWriteRep {
    Ok,
    AuthorNotAllowed,
    RealmNotFound,
    VlobAlreadyExists,
    VlobNotFound,
    BadVlobVersion,
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
    TimestampOutOfBallpark {
        server_timestamp: DateTime,
        client_timestamp: DateTime,
        ballpark_client_early_offset: f64,
        ballpark_client_late_offset: f64,
    },
}

/// A version of a vlob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlobItem {
    pub vlob_id: VlobID,
    pub key_index: u64,
    pub author: DeviceID,
    pub version: u32,
    pub created_on: DateTime,
    #[serde(with = "serde_bytes")]
    pub blob: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VlobReadRep {
    Ok { items: Vec<VlobItem> },
    AuthorNotAllowed,
    RealmNotFound,
}

/// A change in a realm, in the order the server recorded it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlobChange {
    pub vlob_id: VlobID,
    pub version: u32,
    pub timestamp: DateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VlobPollChangesRep {
    Ok {
        current_checkpoint: u64,
        changes: Vec<VlobChange>,
    },
    AuthorNotAllowed,
    RealmNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockCreateRep {
    Ok,
    AuthorNotAllowed,
    RealmNotFound,
    BlockAlreadyExists,
    StoreUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReadRep {
    Ok {
        #[serde(with = "serde_bytes")]
        data: Bytes,
    },
    AuthorNotAllowed,
    BlockNotFound,
    StoreUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InviteNewRep {
    Ok {
        token: InvitationToken,
        email_sent: InvitationEmailSentStatus,
    },
    AuthorNotAllowed,
    ClaimerEmailAlreadyEnrolled,
    UserNotFound,
    UserRevoked,
    ShamirRecoveryNotSetup,
}

/// Who created an invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationCreatedBy {
    User {
        user_id: UserID,
        human_handle: HumanHandle,
    },
    ExternalService {
        service_label: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InviteListItem {
    User {
        token: InvitationToken,
        created_on: DateTime,
        created_by: InvitationCreatedBy,
        claimer_email: EmailAddress,
        status: InvitationStatus,
    },
    Device {
        token: InvitationToken,
        created_on: DateTime,
        created_by: InvitationCreatedBy,
        status: InvitationStatus,
    },
    ShamirRecovery {
        token: InvitationToken,
        created_on: DateTime,
        created_by: InvitationCreatedBy,
        claimer_user_id: UserID,
        shamir_recovery_created_on: DateTime,
        status: InvitationStatus,
    },
}

impl InviteListItem {
    pub fn token(&self) -> InvitationToken {
        match self {
            InviteListItem::User { token, .. }
            | InviteListItem::Device { token, .. }
            | InviteListItem::ShamirRecovery { token, .. } => *token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InviteCancelRep {
    Ok,
    AuthorNotAllowed,
    InvitationNotFound,
    InvitationAlreadyCancelled,
    InvitationCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InviteCompleteRep {
    Ok,
    AuthorNotAllowed,
    InvitationNotFound,
    InvitationCancelled,
    InvitationAlreadyCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TosGetRep {
    Ok(Tos),
    NoTos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TosAcceptRep {
    Ok,
    NoTos,
    TosMismatch,
}

/// Administrator who may greet a user invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGreetingAdministrator {
    pub user_id: UserID,
    pub human_handle: HumanHandle,
    pub online_status: UserOnlineStatus,
    pub last_greeting_attempt_joined_on: Option<DateTime>,
}

/// Recipient of a shamir recovery setup, as seen by the claimer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirRecoveryRecipient {
    pub user_id: UserID,
    pub human_handle: HumanHandle,
    pub shares: u8,
    pub revoked_on: Option<DateTime>,
    pub online_status: UserOnlineStatus,
}

/// What the claimer learns about its invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InviteInfoRep {
    User {
        claimer_email: EmailAddress,
        created_by: InvitationCreatedBy,
        administrators: Vec<UserGreetingAdministrator>,
    },
    Device {
        claimer_user_id: UserID,
        claimer_human_handle: HumanHandle,
        created_by: InvitationCreatedBy,
    },
    ShamirRecovery {
        claimer_user_id: UserID,
        claimer_human_handle: HumanHandle,
        created_by: InvitationCreatedBy,
        shamir_recovery_created_on: DateTime,
        threshold: u8,
        recipients: Vec<ShamirRecoveryRecipient>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartGreetingAttemptRep {
    Ok { greeting_attempt: GreetingAttemptID },
    AuthorNotAllowed,
    InvitationNotFound,
    InvitationCancelled,
    InvitationCompleted,
    GreeterNotFound,
    GreeterNotAllowed,
    GreeterRevoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelGreetingAttemptRep {
    Ok,
    AuthorNotAllowed,
    InvitationCancelled,
    InvitationCompleted,
    GreetingAttemptNotFound,
    GreetingAttemptNotJoined,
    GreetingAttemptAlreadyCancelled {
        origin: GreeterOrClaimer,
        reason: CancelledGreetingAttemptReason,
        timestamp: DateTime,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevealRep {
    Ok {
        #[serde(with = "serde_bytes")]
        ciphered_data: Bytes,
    },
    NotFound,
}
