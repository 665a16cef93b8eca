//! Invitation related enums

use serde::{Deserialize, Serialize};

/// Kind of invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvitationType {
    /// Invite a new user to the organization
    User,
    /// Invite a new device for the author's own user
    Device,
    /// Let a user recover their account through shamir recipients
    ShamirRecovery,
}

/// Lifecycle status of an invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvitationStatus {
    /// Can still be claimed
    Pending,
    /// Has been claimed
    Finished,
    /// Has been cancelled by an administrator
    Cancelled,
}

/// Whether the server managed to send the invitation email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvitationEmailSentStatus {
    /// Email sent (or not requested)
    Success,
    /// The server has no SMTP configured
    ServerUnavailable,
    /// The recipient address was rejected
    RecipientRefused,
}

/// Side of a greeting attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GreeterOrClaimer {
    /// Existing member admitting the claimer
    Greeter,
    /// Prospective member being admitted
    Claimer,
}

impl GreeterOrClaimer {
    /// The other side
    pub fn peer(self) -> Self {
        match self {
            GreeterOrClaimer::Greeter => GreeterOrClaimer::Claimer,
            GreeterOrClaimer::Claimer => GreeterOrClaimer::Greeter,
        }
    }
}

/// Why a greeting attempt was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancelledGreetingAttemptReason {
    /// The user decided to stop
    ManuallyCancelled,
    /// The peer selected or reported a SAS code that does not match
    InvalidSasCode,
    /// The revealed nonce does not match its previously sent hash
    InvalidNonceHash,
    /// A payload could not be decrypted with the shared key
    UndecipherablePayload,
    /// A payload was decrypted but is not valid data
    UndeserializablePayload,
    /// A payload is valid data but inconsistent with the exchange
    InconsistentPayload,
    /// Superseded by a newer attempt or the invitation went away
    AutomaticallyCancelled,
}

/// Whether a user is currently connected to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserOnlineStatus {
    /// Connected
    Online,
    /// Not connected
    Offline,
    /// Status not known
    Unknown,
}
