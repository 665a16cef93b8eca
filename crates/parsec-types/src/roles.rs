//! User profiles, realm roles and device purposes

use serde::{Deserialize, Serialize};

/// Organization-wide profile of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserProfile {
    /// Can manage users and invitations
    Admin,
    /// Regular member
    Standard,
    /// Restricted member, cannot own or manage workspaces
    Outsider,
}

/// Role of a user within a realm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RealmRole {
    /// Read-only access
    Reader,
    /// Read and write access
    Contributor,
    /// Can additionally share with readers and contributors
    Manager,
    /// Full control, can share with any role
    Owner,
}

impl RealmRole {
    /// Whether this role may modify workspace content
    pub fn can_write(self) -> bool {
        !matches!(self, RealmRole::Reader)
    }

    /// Whether a user with this role may grant `granted` to someone else
    pub fn can_grant(self, granted: Option<RealmRole>) -> bool {
        match self {
            RealmRole::Owner => true,
            RealmRole::Manager => matches!(
                granted,
                None | Some(RealmRole::Reader) | Some(RealmRole::Contributor)
            ),
            _ => false,
        }
    }
}

/// Why a device exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DevicePurpose {
    /// Regular device used by a human
    Standard,
    /// Device stored in a recovery file protected by a passphrase
    PassphraseRecovery,
    /// Device whose keys are protected by a shamir recovery setup
    ShamirRecovery,
    /// Device created by a registration flow (enrollment)
    Registration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_write_access() {
        assert!(!RealmRole::Reader.can_write());
        assert!(RealmRole::Contributor.can_write());
        assert!(RealmRole::Owner.can_write());
    }

    #[test]
    fn test_role_grant_rules() {
        assert!(RealmRole::Owner.can_grant(Some(RealmRole::Owner)));
        assert!(RealmRole::Manager.can_grant(Some(RealmRole::Contributor)));
        assert!(RealmRole::Manager.can_grant(None));
        assert!(!RealmRole::Manager.can_grant(Some(RealmRole::Manager)));
        assert!(!RealmRole::Contributor.can_grant(Some(RealmRole::Reader)));
    }
}
