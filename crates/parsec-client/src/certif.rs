//! Certificates known to the client
//!
//! The server is the only source of certificates, but nothing it sends is
//! trusted as is: every certificate is checked against the organization root
//! key or the device certificate of its author before being applied. The
//! signed certificates are kept on disk so a restarted client knows the
//! organization without asking the server.

use crate::event_bus::{ClientEvent, EventBus};
use anyhow::{anyhow, Context};
use parking_lot::RwLock;
use parsec_connection::protocol::{CertificateRejection, CertificateRep};
use parsec_connection::{AuthenticatedCmds, ConnectionError};
use parsec_types::{
    AnyCertificate, CertificateAuthor, DateTime, DeviceCertificate, DeviceID, DeviceLabel,
    DevicePurpose, HumanHandle, LocalDevice, PublicKey, RealmNameCertificate, RealmRole,
    RevokedUserCertificate, ShamirRecoveryBriefCertificate, ShamirRecoveryDeletionCertificate,
    ShamirRecoveryShareCertificate, UserCertificate, UserID, UserProfile, VerifyKey, VlobID,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CERTIFICATES_FILE: &str = "certificates.bin";
const MAX_TIMESTAMP_RETRIES: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum CertifPollError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ConnectionError> for CertifPollError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NoResponse => Self::Offline,
            err => Self::Internal(err.into()),
        }
    }
}

/// Failure to get a certificate accepted by the server
#[derive(Debug, thiserror::Error)]
pub(crate) enum SubmitError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Our clock ({client_timestamp}) and the server's one ({server_timestamp}) are too far apart")]
    TimestampOutOfBallpark {
        server_timestamp: DateTime,
        client_timestamp: DateTime,
        ballpark_client_early_offset: f64,
        ballpark_client_late_offset: f64,
    },
    #[error("Certificate rejected: {0:?}")]
    Rejected(CertificateRejection),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ConnectionError> for SubmitError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NoResponse => Self::Offline,
            err => Self::Internal(err.into()),
        }
    }
}

/// Send certificates built for a timestamp
///
/// The timestamp starts at the device's clock and is bumped whenever the
/// server requires a greater one. A clock out of the server's ballpark is
/// reported on `event_bus` and returned as is.
pub(crate) async fn submit_certificates<F, Fut>(
    device: &LocalDevice,
    event_bus: &EventBus,
    mut build_and_send: F,
) -> Result<DateTime, SubmitError>
where
    F: FnMut(DateTime) -> Fut,
    Fut: Future<Output = Result<CertificateRep, ConnectionError>>,
{
    let mut timestamp = device.now();
    for _ in 0..MAX_TIMESTAMP_RETRIES {
        match build_and_send(timestamp).await? {
            CertificateRep::Ok => return Ok(timestamp),
            CertificateRep::RequireGreaterTimestamp { strictly_greater_than } => {
                tracing::debug!(%timestamp, %strictly_greater_than, "Server requires a greater timestamp");
                timestamp = device
                    .now()
                    .max(strictly_greater_than + chrono::Duration::microseconds(1));
            }
            CertificateRep::TimestampOutOfBallpark {
                server_timestamp,
                client_timestamp,
                ballpark_client_early_offset,
                ballpark_client_late_offset,
            } => {
                tracing::warn!(%server_timestamp, %client_timestamp, "Clock drift with the server");
                event_bus.send(ClientEvent::TooMuchDriftWithServerClock {
                    server_timestamp,
                    client_timestamp,
                    ballpark_client_early_offset,
                    ballpark_client_late_offset,
                });
                return Err(SubmitError::TimestampOutOfBallpark {
                    server_timestamp,
                    client_timestamp,
                    ballpark_client_early_offset,
                    ballpark_client_late_offset,
                });
            }
            CertificateRep::Rejected(rejection) => return Err(SubmitError::Rejected(rejection)),
        }
    }
    Err(anyhow!("Server keeps requiring a greater timestamp").into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: UserID,
    pub human_handle: HumanHandle,
    pub current_profile: UserProfile,
    pub created_on: DateTime,
    /// `None` for the user created while bootstrapping the organization
    pub created_by: Option<DeviceID>,
    pub revoked_on: Option<DateTime>,
    pub revoked_by: Option<DeviceID>,
}

impl UserInfo {
    pub fn is_revoked(&self) -> bool {
        self.revoked_on.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceID,
    pub device_label: DeviceLabel,
    pub purpose: DevicePurpose,
    pub created_on: DateTime,
    pub created_by: Option<DeviceID>,
}

/// Shamir recovery setup of a user, as certified
#[derive(Debug, Clone)]
pub(crate) struct ShamirSetup {
    pub brief: ShamirRecoveryBriefCertificate,
    pub shares: HashMap<UserID, ShamirRecoveryShareCertificate>,
    pub deletion: Option<ShamirRecoveryDeletionCertificate>,
}

#[derive(Debug)]
struct UserState {
    certificate: UserCertificate,
    current_profile: UserProfile,
    revoked: Option<RevokedUserCertificate>,
    devices: Vec<DeviceID>,
}

#[derive(Debug, Default)]
struct RealmState {
    created_on: Option<DateTime>,
    roles: BTreeMap<UserID, RealmRole>,
    names: Vec<RealmNameCertificate>,
}

#[derive(Debug, Default)]
struct CertifState {
    signed: Vec<Vec<u8>>,
    last_timestamp: Option<DateTime>,
    bootstrapped_on: Option<DateTime>,
    users: HashMap<UserID, UserState>,
    users_order: Vec<UserID>,
    devices: HashMap<DeviceID, DeviceCertificate>,
    realms: HashMap<VlobID, RealmState>,
    shamir: HashMap<UserID, ShamirSetup>,
}

fn author_name(author: &CertificateAuthor) -> Option<DeviceID> {
    match author {
        CertificateAuthor::Root => None,
        CertificateAuthor::Device(device_id) => Some(*device_id),
    }
}

impl CertifState {
    fn verify_key_of(&self, root_verify_key: &VerifyKey, author: CertificateAuthor) -> Result<VerifyKey, String> {
        match author {
            CertificateAuthor::Root => Ok(root_verify_key.clone()),
            CertificateAuthor::Device(device_id) => self
                .devices
                .get(&device_id)
                .map(|device| device.verify_key.clone())
                .ok_or_else(|| format!("unknown author {device_id}")),
        }
    }

    /// Check then apply a signed certificate, nothing changes on error
    fn apply(&mut self, root_verify_key: &VerifyKey, signed: Vec<u8>) -> Result<(), String> {
        let unsecure = AnyCertificate::unsecure_load(&signed).map_err(|e| e.to_string())?;
        let verify_key = self.verify_key_of(root_verify_key, unsecure.author())?;
        let certificate = AnyCertificate::verify_and_load(&signed, &verify_key).map_err(|e| e.to_string())?;
        let timestamp = certificate.timestamp();
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Err(format!("timestamp {timestamp} is older than the previous certificate's"));
            }
        }

        match certificate {
            AnyCertificate::User(user) => {
                if self.users.contains_key(&user.user_id) {
                    return Err(format!("user {} already exists", user.user_id));
                }
                if user.author == CertificateAuthor::Root {
                    self.bootstrapped_on.get_or_insert(user.timestamp);
                }
                self.users_order.push(user.user_id);
                self.users.insert(
                    user.user_id,
                    UserState {
                        current_profile: user.profile,
                        certificate: user,
                        revoked: None,
                        devices: vec![],
                    },
                );
            }
            AnyCertificate::Device(device) => {
                let user = self
                    .users
                    .get_mut(&device.user_id)
                    .ok_or_else(|| format!("device of unknown user {}", device.user_id))?;
                if self.devices.contains_key(&device.device_id) {
                    return Err(format!("device {} already exists", device.device_id));
                }
                user.devices.push(device.device_id);
                self.devices.insert(device.device_id, device);
            }
            AnyCertificate::RevokedUser(revoked) => {
                let user = self
                    .users
                    .get_mut(&revoked.user_id)
                    .ok_or_else(|| format!("revocation of unknown user {}", revoked.user_id))?;
                user.revoked.get_or_insert(revoked);
            }
            AnyCertificate::UserUpdate(update) => {
                let user = self
                    .users
                    .get_mut(&update.user_id)
                    .ok_or_else(|| format!("update of unknown user {}", update.user_id))?;
                user.current_profile = update.new_profile;
            }
            AnyCertificate::RealmRole(role) => {
                let realm = self.realms.entry(role.realm_id).or_default();
                realm.created_on.get_or_insert(role.timestamp);
                match role.role {
                    Some(new_role) => realm.roles.insert(role.user_id, new_role),
                    None => realm.roles.remove(&role.user_id),
                };
            }
            AnyCertificate::RealmName(name) => {
                let realm = self
                    .realms
                    .get_mut(&name.realm_id)
                    .ok_or_else(|| format!("name of unknown realm {}", name.realm_id))?;
                realm.names.push(name);
            }
            AnyCertificate::ShamirRecoveryBrief(brief) => {
                self.shamir.insert(
                    brief.user_id,
                    ShamirSetup {
                        brief,
                        shares: HashMap::new(),
                        deletion: None,
                    },
                );
            }
            AnyCertificate::ShamirRecoveryShare(share) => {
                let setup = self
                    .shamir
                    .get_mut(&share.user_id)
                    .filter(|setup| setup.brief.timestamp == share.timestamp)
                    .ok_or_else(|| "shamir share without brief".to_owned())?;
                setup.shares.insert(share.recipient, share);
            }
            AnyCertificate::ShamirRecoveryDeletion(deletion) => {
                if let Some(setup) = self.shamir.get_mut(&deletion.setup_to_delete_user_id) {
                    if setup.brief.timestamp == deletion.setup_to_delete_timestamp {
                        setup.deletion = Some(deletion);
                    }
                }
            }
        }
        self.last_timestamp = Some(timestamp);
        self.signed.push(signed);
        Ok(())
    }

    fn user_info(&self, user: &UserState) -> UserInfo {
        UserInfo {
            id: user.certificate.user_id,
            human_handle: user.certificate.human_handle.clone(),
            current_profile: user.current_profile,
            created_on: user.certificate.timestamp,
            created_by: author_name(&user.certificate.author),
            revoked_on: user.revoked.as_ref().map(|r| r.timestamp),
            revoked_by: user.revoked.as_ref().map(|r| r.author),
        }
    }
}

fn device_info(device: &DeviceCertificate) -> DeviceInfo {
    DeviceInfo {
        id: device.device_id,
        device_label: device.device_label.clone(),
        purpose: device.purpose,
        created_on: device.timestamp,
        created_by: author_name(&device.author),
    }
}

pub struct CertificatesStore {
    device: Arc<LocalDevice>,
    cmds: Arc<dyn AuthenticatedCmds>,
    event_bus: EventBus,
    path: PathBuf,
    state: RwLock<CertifState>,
    /// Serializes polls so certificates are applied in server order
    poll_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for CertificatesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificatesStore")
            .field("device_id", &self.device.device_id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CertificatesStore {
    /// Load the certificates stored in `data_dir`
    pub(crate) async fn load(
        device: Arc<LocalDevice>,
        cmds: Arc<dyn AuthenticatedCmds>,
        event_bus: EventBus,
        data_dir: &Path,
    ) -> anyhow::Result<Self> {
        let path = data_dir.join(CERTIFICATES_FILE);
        let mut state = CertifState::default();
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let signed: Vec<Vec<u8>> = bincode::deserialize(&raw).context("corrupted certificates cache")?;
                let root_verify_key = device.organization_addr.root_verify_key();
                for item in signed {
                    state
                        .apply(root_verify_key, item)
                        .map_err(|reason| anyhow!("invalid cached certificate: {reason}"))?;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
            Err(err) => return Err(err).context("cannot read certificates cache"),
        }
        tracing::debug!(
            device_id = %device.device_id,
            certificates = state.signed.len(),
            "Certificates store loaded"
        );
        Ok(Self {
            device,
            cmds,
            event_bus,
            path,
            state: RwLock::new(state),
            poll_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let raw = bincode::serialize(&self.state.read().signed)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Fetch and apply the certificates issued since the last known one
    ///
    /// Returns how many new certificates were applied.
    pub async fn poll_server_for_new_certificates(&self) -> Result<usize, CertifPollError> {
        let _guard = self.poll_lock.lock().await;
        let after = self.state.read().last_timestamp;
        let new = self.cmds.certificate_get(after).await?;
        if new.is_empty() {
            return Ok(0);
        }

        let count = new.len();
        let was_revoked = self.is_self_revoked();
        let realms_before = self.self_realms();
        {
            let root_verify_key = self.device.organization_addr.root_verify_key();
            let mut state = self.state.write();
            for signed in new {
                state
                    .apply(root_verify_key, signed)
                    .map_err(CertifPollError::InvalidCertificate)?;
            }
        }
        self.persist().await?;
        tracing::debug!(device_id = %self.device.device_id, count, "New certificates applied");

        if !was_revoked && self.is_self_revoked() {
            self.event_bus.send(ClientEvent::RevokedSelfUser);
        }
        if realms_before != self.self_realms() {
            self.event_bus.send(ClientEvent::WorkspacesSelfListChanged);
        }
        Ok(count)
    }

    /// Drop every certificate, locally stored ones included
    pub async fn forget_all_certificates(&self) -> anyhow::Result<()> {
        let _guard = self.poll_lock.lock().await;
        *self.state.write() = CertifState::default();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("cannot remove certificates cache"),
        }
    }

    /// Submit certificates, then fetch them back so the store knows them
    pub(crate) async fn submit<F, Fut>(&self, build_and_send: F) -> Result<DateTime, SubmitError>
    where
        F: FnMut(DateTime) -> Fut,
        Fut: Future<Output = Result<CertificateRep, ConnectionError>>,
    {
        let timestamp = submit_certificates(&self.device, &self.event_bus, build_and_send).await?;
        if let Err(err) = self.poll_server_for_new_certificates().await {
            tracing::warn!(error = %err, "Cannot fetch back submitted certificates");
        }
        Ok(timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime> {
        self.state.read().last_timestamp
    }

    pub fn bootstrapped_on(&self) -> Option<DateTime> {
        self.state.read().bootstrapped_on
    }

    pub fn list_users(&self, skip_revoked: bool) -> Vec<UserInfo> {
        let state = self.state.read();
        state
            .users_order
            .iter()
            .filter_map(|user_id| state.users.get(user_id))
            .filter(|user| !skip_revoked || user.revoked.is_none())
            .map(|user| state.user_info(user))
            .collect()
    }

    pub fn get_user_info(&self, user_id: UserID) -> Option<UserInfo> {
        let state = self.state.read();
        state.users.get(&user_id).map(|user| state.user_info(user))
    }

    pub fn list_user_devices(&self, user_id: UserID) -> Option<Vec<DeviceInfo>> {
        let state = self.state.read();
        let user = state.users.get(&user_id)?;
        Some(
            user.devices
                .iter()
                .filter_map(|device_id| state.devices.get(device_id))
                .map(device_info)
                .collect(),
        )
    }

    pub fn get_device_info(&self, device_id: DeviceID) -> Option<(UserInfo, DeviceInfo)> {
        let state = self.state.read();
        let device = state.devices.get(&device_id)?;
        let user = state.users.get(&device.user_id)?;
        Some((state.user_info(user), device_info(device)))
    }

    pub(crate) fn device_verify_key(&self, device_id: DeviceID) -> Option<VerifyKey> {
        self.state
            .read()
            .devices
            .get(&device_id)
            .map(|device| device.verify_key.clone())
    }

    pub(crate) fn user_public_key(&self, user_id: UserID) -> Option<PublicKey> {
        self.state
            .read()
            .users
            .get(&user_id)
            .map(|user| user.certificate.public_key.clone())
    }

    pub fn self_profile(&self) -> UserProfile {
        self.state
            .read()
            .users
            .get(&self.device.user_id)
            .map(|user| user.current_profile)
            .unwrap_or(self.device.initial_profile)
    }

    pub fn is_self_revoked(&self) -> bool {
        self.state
            .read()
            .users
            .get(&self.device.user_id)
            .map(|user| user.revoked.is_some())
            .unwrap_or(false)
    }

    pub fn realm_exists(&self, realm_id: VlobID) -> bool {
        self.state.read().realms.contains_key(&realm_id)
    }

    pub fn realm_created_on(&self, realm_id: VlobID) -> Option<DateTime> {
        self.state.read().realms.get(&realm_id).and_then(|realm| realm.created_on)
    }

    pub fn realm_role(&self, realm_id: VlobID, user_id: UserID) -> Option<RealmRole> {
        self.state
            .read()
            .realms
            .get(&realm_id)
            .and_then(|realm| realm.roles.get(&user_id).copied())
    }

    pub fn realm_roles(&self, realm_id: VlobID) -> Vec<(UserID, RealmRole)> {
        self.state
            .read()
            .realms
            .get(&realm_id)
            .map(|realm| realm.roles.iter().map(|(user, role)| (*user, *role)).collect())
            .unwrap_or_default()
    }

    /// Realms we currently have a role in
    pub fn self_realms(&self) -> BTreeMap<VlobID, RealmRole> {
        let user_id = self.device.user_id;
        self.state
            .read()
            .realms
            .iter()
            .filter_map(|(realm_id, realm)| realm.roles.get(&user_id).map(|role| (*realm_id, *role)))
            .collect()
    }

    pub(crate) fn realm_last_name(&self, realm_id: VlobID) -> Option<RealmNameCertificate> {
        self.state
            .read()
            .realms
            .get(&realm_id)
            .and_then(|realm| realm.names.last().cloned())
    }

    pub(crate) fn shamir_setup(&self, user_id: UserID) -> Option<ShamirSetup> {
        self.state.read().shamir.get(&user_id).cloned()
    }

    /// Setups in which we are a recipient
    pub(crate) fn shamir_setups_for_others(&self) -> Vec<ShamirSetup> {
        let self_user = self.device.user_id;
        let state = self.state.read();
        let mut setups: Vec<ShamirSetup> = state
            .shamir
            .values()
            .filter(|setup| setup.brief.user_id != self_user)
            .filter(|setup| setup.brief.per_recipient_shares.contains_key(&self_user))
            .cloned()
            .collect();
        setups.sort_by_key(|setup| setup.brief.timestamp);
        setups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_types::{ParsecAddr, ParsecOrganizationAddr, SigningKey};

    fn bootstrap_certificates(root: &SigningKey) -> (LocalDevice, Vec<u8>, Vec<u8>) {
        let addr = ParsecOrganizationAddr::new(
            ParsecAddr::new("test.invalid", None, false),
            "CoolOrg".parse().unwrap(),
            root.verify_key(),
        );
        let device = LocalDevice::generate_new_device(
            addr,
            UserProfile::Admin,
            HumanHandle::from_raw("alice@example.com", "Alice").unwrap(),
            "dev1".parse().unwrap(),
        );
        let timestamp = device.now();
        let user = AnyCertificate::User(UserCertificate {
            author: CertificateAuthor::Root,
            timestamp,
            user_id: device.user_id,
            human_handle: device.human_handle.clone(),
            public_key: device.private_key.public_key(),
            profile: UserProfile::Admin,
        })
        .dump_and_sign(root);
        let device_certificate = AnyCertificate::Device(DeviceCertificate {
            author: CertificateAuthor::Root,
            timestamp,
            user_id: device.user_id,
            device_id: device.device_id,
            device_label: device.device_label.clone(),
            verify_key: device.signing_key.verify_key(),
            purpose: DevicePurpose::Standard,
        })
        .dump_and_sign(root);
        (device, user, device_certificate)
    }

    #[test]
    fn test_apply_checks_signatures() {
        let root = SigningKey::generate();
        let (device, user, device_certificate) = bootstrap_certificates(&root);
        let root_verify_key = root.verify_key();

        let mut state = CertifState::default();
        state.apply(&root_verify_key, user).unwrap();
        state.apply(&root_verify_key, device_certificate).unwrap();
        assert_eq!(state.users_order, vec![device.user_id]);
        assert!(state.devices.contains_key(&device.device_id));
        assert!(state.bootstrapped_on.is_some());

        // Signed by a key that is not the one of the claimed author
        let forged = AnyCertificate::RevokedUser(RevokedUserCertificate {
            author: device.device_id,
            timestamp: device.now(),
            user_id: device.user_id,
        })
        .dump_and_sign(&SigningKey::generate());
        assert!(state.apply(&root_verify_key, forged).is_err());
        assert_eq!(state.signed.len(), 2);
    }

    #[test]
    fn test_apply_rejects_unknown_author() {
        let root = SigningKey::generate();
        let (device, user, _) = bootstrap_certificates(&root);
        let mut state = CertifState::default();
        state.apply(&root.verify_key(), user).unwrap();

        let role = AnyCertificate::RealmRole(parsec_types::RealmRoleCertificate {
            author: device.device_id,
            timestamp: device.now(),
            realm_id: VlobID::default_new(),
            user_id: device.user_id,
            role: Some(RealmRole::Owner),
        })
        .dump_and_sign(&device.signing_key);
        let err = state.apply(&root.verify_key(), role).unwrap_err();
        assert!(err.contains("unknown author"));
    }
}
