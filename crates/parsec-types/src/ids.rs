//! Identifier types used across the client engine
//!
//! Every identifier is a random UUID displayed in its compact hexadecimal
//! form, which is also the form accepted by `FromStr`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when an identifier cannot be parsed from its textual form
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid identifier: {0}")]
pub struct InvalidId(pub String);

macro_rules! new_uuid_type {
    ($(#[$meta:meta])* pub $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn default_new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from raw bytes
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Get the inner UUID
            pub fn uuid(&self) -> Uuid {
                self.0
            }

            /// Get the raw bytes
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Compact hexadecimal representation
            pub fn hex(&self) -> String {
                self.0.as_simple().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.as_simple())
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| InvalidId(s.to_string()))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

new_uuid_type!(
    /// Identifier of a vlob: a workspace (realm) or any of its entries
    pub VlobID
);
new_uuid_type!(
    /// Identifier of a user within an organization
    pub UserID
);
new_uuid_type!(
    /// Identifier of a device; devices always belong to exactly one user
    pub DeviceID
);
new_uuid_type!(
    /// Identifier of an encrypted data block stored in the server blockstore
    pub BlockID
);
new_uuid_type!(
    /// Identifier of a locally stored, not yet uploaded chunk of file data
    pub ChunkID
);
new_uuid_type!(
    /// Token identifying an invitation
    pub InvitationToken
);
new_uuid_type!(
    /// Identifier of a single greeting attempt within an invitation
    pub GreetingAttemptID
);
new_uuid_type!(
    /// Token allowing to bootstrap an organization
    pub BootstrapToken
);
new_uuid_type!(
    /// Token revealing the ciphered data of a shamir recovery setup
    pub ShamirRevealToken
);
new_uuid_type!(
    /// Identifier of an opaque key stored in an account vault
    pub AccountVaultItemOpaqueKeyID
);

/// Realm identifiers are vlob identifiers: the root folder of a workspace
/// is the vlob whose ID is the realm ID.
pub type RealmID = VlobID;

/// Entry identifier within a workspace
pub type EntryID = VlobID;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_compact_hex() {
        let id = UserID::default_new();
        let display = id.to_string();
        assert_eq!(display.len(), 32);
        assert_eq!(display, id.hex());
        assert_eq!(display.parse::<UserID>().unwrap(), id);
    }

    #[test]
    fn test_parse_accepts_hyphenated_form() {
        let id = VlobID::default_new();
        let hyphenated = id.uuid().hyphenated().to_string();
        assert_eq!(hyphenated.parse::<VlobID>().unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-an-id".parse::<InvitationToken>().is_err());
    }
}
