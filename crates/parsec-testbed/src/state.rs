//! Server-side data of the hosted organizations

use parsec_connection::protocol::{
    ActiveUsersLimit, Bytes, CertificateRejection, CertificateRep, InvitationCreatedBy,
    ServerConfig, Tos, VlobChange, VlobItem,
};
use parsec_connection::{ClaimerStep, GreeterStep, ServerEvent};
use parsec_types::{
    timestamps_in_the_ballpark, AnyCertificate, BlockID, BootstrapToken,
    CancelledGreetingAttemptReason, CertificateAuthor, DateTime, DeviceCertificate, DeviceID,
    EmailAddress, GreeterOrClaimer, GreetingAttemptID, InvitationStatus, InvitationToken,
    InvitationType, OrganizationID, RealmRole, ShamirRecoveryBriefCertificate, ShamirRevealToken,
    UserCertificate, UserID, UserProfile, VerifyKey, VlobID, BALLPARK_CLIENT_EARLY_OFFSET,
    BALLPARK_CLIENT_LATE_OFFSET,
};
use std::collections::HashMap;
use tokio::sync::mpsc;

#[derive(Default)]
pub(crate) struct ServerState {
    pub organizations: HashMap<OrganizationID, Organization>,
}

pub(crate) struct UserState {
    pub certificate: UserCertificate,
    pub current_profile: UserProfile,
    pub revoked_on: Option<DateTime>,
    pub frozen: bool,
    pub tos_accepted_on: Option<DateTime>,
}

impl UserState {
    pub fn is_active(&self) -> bool {
        self.revoked_on.is_none()
    }
}

#[derive(Default)]
pub(crate) struct Realm {
    pub roles: HashMap<UserID, RealmRole>,
    pub keys_bundle_accesses: HashMap<UserID, Bytes>,
    pub key_index: u64,
    /// Vlob writes must be strictly newer than the realm's last certificate
    pub last_certificate_timestamp: Option<DateTime>,
    pub vlobs: HashMap<VlobID, Vec<VlobItem>>,
    pub changes: Vec<VlobChange>,
    pub blocks: HashMap<BlockID, Bytes>,
}

#[derive(Debug, Clone)]
pub(crate) enum InvitationDetails {
    User { claimer_email: EmailAddress },
    Device { claimer_user_id: UserID },
    ShamirRecovery { claimer_user_id: UserID },
}

#[derive(Debug, Clone)]
pub(crate) struct Invitation {
    pub token: InvitationToken,
    pub details: InvitationDetails,
    pub created_by: InvitationCreatedBy,
    pub created_on: DateTime,
    pub status: InvitationStatus,
}

impl Invitation {
    pub fn ty(&self) -> InvitationType {
        match self.details {
            InvitationDetails::User { .. } => InvitationType::User,
            InvitationDetails::Device { .. } => InvitationType::Device,
            InvitationDetails::ShamirRecovery { .. } => InvitationType::ShamirRecovery,
        }
    }
}

pub(crate) struct GreetingAttempt {
    pub id: GreetingAttemptID,
    pub token: InvitationToken,
    pub greeter: UserID,
    pub greeter_joined: Option<DateTime>,
    pub claimer_joined: Option<DateTime>,
    pub cancelled: Option<(GreeterOrClaimer, CancelledGreetingAttemptReason, DateTime)>,
    pub greeter_steps: Vec<GreeterStep>,
    pub claimer_steps: Vec<ClaimerStep>,
}

impl GreetingAttempt {
    pub fn new(token: InvitationToken, greeter: UserID) -> Self {
        Self {
            id: GreetingAttemptID::default_new(),
            token,
            greeter,
            greeter_joined: None,
            claimer_joined: None,
            cancelled: None,
            greeter_steps: vec![],
            claimer_steps: vec![],
        }
    }

    pub fn joined(&self, side: GreeterOrClaimer) -> bool {
        match side {
            GreeterOrClaimer::Greeter => self.greeter_joined.is_some(),
            GreeterOrClaimer::Claimer => self.claimer_joined.is_some(),
        }
    }
}

pub(crate) struct ShamirSetup {
    pub brief: ShamirRecoveryBriefCertificate,
    pub reveal_token: ShamirRevealToken,
    pub ciphered_data: Bytes,
}

pub(crate) struct Listener {
    pub user_id: UserID,
    pub sender: mpsc::UnboundedSender<ServerEvent>,
}

pub(crate) struct Organization {
    pub bootstrap_token: Option<BootstrapToken>,
    pub root_verify_key: Option<VerifyKey>,
    pub bootstrapped_on: Option<DateTime>,
    pub is_expired: bool,
    pub server_config: ServerConfig,
    pub tos: Option<Tos>,
    pub block_store_available: bool,
    /// Signed certificates in issuing order
    pub certificates: Vec<(DateTime, Bytes)>,
    pub users: HashMap<UserID, UserState>,
    pub devices: HashMap<DeviceID, DeviceCertificate>,
    pub realms: HashMap<VlobID, Realm>,
    pub invitations: HashMap<InvitationToken, Invitation>,
    pub greeting_attempts: HashMap<GreetingAttemptID, GreetingAttempt>,
    pub shamir_setups: HashMap<UserID, ShamirSetup>,
    pub listeners: Vec<Listener>,
}

impl Organization {
    pub fn new(bootstrap_token: Option<BootstrapToken>) -> Self {
        Self {
            bootstrap_token,
            root_verify_key: None,
            bootstrapped_on: None,
            is_expired: false,
            server_config: ServerConfig {
                user_profile_outsider_allowed: true,
                active_users_limit: ActiveUsersLimit::NoLimit,
            },
            tos: None,
            block_store_available: true,
            certificates: vec![],
            users: HashMap::new(),
            devices: HashMap::new(),
            realms: HashMap::new(),
            invitations: HashMap::new(),
            greeting_attempts: HashMap::new(),
            shamir_setups: HashMap::new(),
            listeners: vec![],
        }
    }

    pub fn last_certificate_timestamp(&self) -> Option<DateTime> {
        self.certificates.last().map(|(timestamp, _)| *timestamp)
    }

    pub fn add_certificate(&mut self, timestamp: DateTime, signed: Bytes) {
        self.certificates.push((timestamp, signed));
        self.notify_all(ServerEvent::CertificatesUpdated { timestamp });
    }

    pub fn author_user(&self, device_id: DeviceID) -> Option<&UserState> {
        let device = self.devices.get(&device_id)?;
        self.users.get(&device.user_id)
    }

    pub fn active_users_count(&self) -> usize {
        self.users.values().filter(|u| u.is_active()).count()
    }

    pub fn realm_role(&self, realm_id: VlobID, user_id: UserID) -> Option<RealmRole> {
        self.realms.get(&realm_id)?.roles.get(&user_id).copied()
    }

    /// Users allowed to greet `invitation`
    pub fn greeters(&self, invitation: &Invitation) -> Vec<UserID> {
        match &invitation.details {
            InvitationDetails::User { .. } => self
                .users
                .iter()
                .filter(|(_, u)| u.is_active() && u.current_profile == UserProfile::Admin)
                .map(|(id, _)| *id)
                .collect(),
            InvitationDetails::Device { claimer_user_id } => vec![*claimer_user_id],
            InvitationDetails::ShamirRecovery { claimer_user_id } => self
                .shamir_setups
                .get(claimer_user_id)
                .map(|setup| {
                    setup
                        .brief
                        .per_recipient_shares
                        .keys()
                        .filter(|id| self.users.get(id).map(UserState::is_active).unwrap_or(false))
                        .copied()
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn notify_user(&mut self, user_id: UserID, event: ServerEvent) {
        self.listeners
            .retain(|l| l.user_id != user_id || l.sender.send(event.clone()).is_ok());
    }

    pub fn notify_users(&mut self, users: &[UserID], event: ServerEvent) {
        self.listeners
            .retain(|l| !users.contains(&l.user_id) || l.sender.send(event.clone()).is_ok());
    }

    pub fn notify_all(&mut self, event: ServerEvent) {
        self.listeners.retain(|l| l.sender.send(event.clone()).is_ok());
    }

    /// Signature, ballpark and ordering checks shared by every certificate command
    pub fn check_certificate(
        &self,
        author: DeviceID,
        signed: &[u8],
        now: DateTime,
    ) -> Result<AnyCertificate, CertificateRep> {
        let device = self.devices.get(&author).ok_or_else(|| {
            CertificateRep::Rejected(CertificateRejection::InvalidCertificate("unknown author".into()))
        })?;
        let certificate = AnyCertificate::verify_and_load(signed, &device.verify_key)
            .map_err(|e| CertificateRep::Rejected(CertificateRejection::InvalidCertificate(e.to_string())))?;
        if certificate.author() != CertificateAuthor::Device(author) {
            return Err(CertificateRep::Rejected(CertificateRejection::InvalidCertificate(
                "author mismatch".into(),
            )));
        }
        self.check_timestamp(certificate.timestamp(), now)?;
        Ok(certificate)
    }

    pub fn check_timestamp(&self, timestamp: DateTime, now: DateTime) -> Result<(), CertificateRep> {
        if !timestamps_in_the_ballpark(timestamp, now) {
            return Err(CertificateRep::TimestampOutOfBallpark {
                server_timestamp: now,
                client_timestamp: timestamp,
                ballpark_client_early_offset: BALLPARK_CLIENT_EARLY_OFFSET,
                ballpark_client_late_offset: BALLPARK_CLIENT_LATE_OFFSET,
            });
        }
        if let Some(last) = self.last_certificate_timestamp() {
            if timestamp <= last {
                return Err(CertificateRep::RequireGreaterTimestamp {
                    strictly_greater_than: last,
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn rejected(reason: CertificateRejection) -> CertificateRep {
    CertificateRep::Rejected(reason)
}

pub(crate) fn invalid(message: &str) -> CertificateRep {
    CertificateRep::Rejected(CertificateRejection::InvalidCertificate(message.to_owned()))
}
