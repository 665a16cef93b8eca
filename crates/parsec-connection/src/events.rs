//! Events pushed by the server to authenticated listeners

use crate::protocol::ServerConfig;
use parsec_types::{DateTime, DeviceID, GreetingAttemptID, InvitationStatus, InvitationToken, VlobID};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    Pinged {
        ping: String,
    },
    /// Sent right after the subscription, then whenever it changes
    ServerConfig(ServerConfig),
    /// New certificates are available
    CertificatesUpdated {
        timestamp: DateTime,
    },
    Invitation {
        token: InvitationToken,
        status: InvitationStatus,
    },
    GreetingAttemptReady {
        token: InvitationToken,
        greeting_attempt: GreetingAttemptID,
    },
    GreetingAttemptCancelled {
        token: InvitationToken,
        greeting_attempt: GreetingAttemptID,
    },
    GreetingAttemptJoined {
        token: InvitationToken,
        greeting_attempt: GreetingAttemptID,
    },
    /// A vlob of a realm we have access to has been created or updated
    RealmVlob {
        realm_id: VlobID,
        vlob_id: VlobID,
        author: DeviceID,
        version: u32,
        checkpoint: u64,
    },
    OrganizationExpired,
    UserRevoked,
    UserFrozen,
    TosUpdated,
}
