//! Connection-level errors
//!
//! These are the failures any command can hit regardless of what it does:
//! the server is unreachable, or the server refuses to talk to us at all.
//! Command-specific outcomes are part of each command's response type.

/// Failure to get a response to a command
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The server could not be reached
    #[error("Cannot reach the server")]
    NoResponse,
    /// No organization with this ID on the server
    #[error("Organization not found")]
    OrganizationNotFound,
    /// The organization has expired
    #[error("Organization has expired")]
    ExpiredOrganization,
    /// The authenticating device is unknown or its signature is wrong
    #[error("Bad authentication")]
    BadAuthentication,
    /// The authenticating user has been revoked
    #[error("User has been revoked")]
    RevokedUser,
    /// The authenticating user has been frozen by an administrator
    #[error("User has been frozen")]
    FrozenUser,
    /// The authenticating user must accept the Terms of Service first
    #[error("User must accept the Terms of Service")]
    UserMustAcceptTos,
    /// The invitation used to authenticate does not exist
    #[error("Invitation not found")]
    InvitationNotFound,
    /// The invitation used to authenticate is completed or cancelled
    #[error("Invitation already used or deleted")]
    InvitationAlreadyUsedOrDeleted,
    /// The server answered something we cannot make sense of
    #[error("Invalid response from the server: {0}")]
    InvalidResponse(String),
}

impl ConnectionError {
    /// Whether retrying later may succeed
    pub fn is_offline(&self) -> bool {
        matches!(self, ConnectionError::NoResponse)
    }
}
