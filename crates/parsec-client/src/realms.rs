//! Realm keys and names
//!
//! A workspace created by the client starts local-only: its ID, name and
//! keys bundle live on disk (encrypted with the device's local key) until
//! the realm is bootstrapped on the server, which happens the first time
//! the workspace is shared, renamed or synchronized.

use crate::certif::{CertificatesStore, SubmitError};
use crate::event_bus::{ClientEvent, EventBus};
use anyhow::Context;
use parking_lot::Mutex;
use parsec_connection::protocol::{CertificateRejection, RealmGetKeysBundleRep};
use parsec_connection::{AuthenticatedCmds, ConnectionError};
use parsec_types::{
    AnyCertificate, DateTime, EntryName, LocalDevice, RealmKeysBundle, RealmNameCertificate,
    RealmRole, RealmRoleCertificate, VlobID,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const REALMS_FILE: &str = "realms.bin";

#[derive(Debug, thiserror::Error)]
pub(crate) enum RealmError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Not allowed")]
    AuthorNotAllowed,
    #[error("Invalid keys bundle: {0}")]
    InvalidKeysBundle(String),
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

impl From<ConnectionError> for RealmError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NoResponse => Self::Offline,
            err => Self::Internal(err.into()),
        }
    }
}

impl From<SubmitError> for RealmError {
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
            SubmitError::Rejected(CertificateRejection::AuthorNotAllowed) => Self::AuthorNotAllowed,
            SubmitError::Rejected(rejection) => Self::Internal(anyhow::anyhow!("Unexpected rejection: {rejection:?}")),
            SubmitError::Internal(err) => Self::Internal(err),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalRealm {
    name: EntryName,
    keys_bundle: RealmKeysBundle,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RealmsState {
    /// Realms created here, bootstrapped or not
    local: BTreeMap<VlobID, LocalRealm>,
    /// Keys bundles fetched from the server
    fetched: BTreeMap<VlobID, RealmKeysBundle>,
    /// Last name we could decrypt, used while offline
    names: BTreeMap<VlobID, EntryName>,
}

/// Workspace as listed by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub id: VlobID,
    pub current_name: EntryName,
    pub current_self_role: RealmRole,
    pub is_bootstrapped: bool,
}

pub(crate) struct RealmsStore {
    device: Arc<LocalDevice>,
    cmds: Arc<dyn AuthenticatedCmds>,
    certificates: Arc<CertificatesStore>,
    event_bus: EventBus,
    path: PathBuf,
    state: Mutex<RealmsState>,
    bootstrap_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for RealmsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealmsStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl RealmsStore {
    pub async fn load(
        device: Arc<LocalDevice>,
        cmds: Arc<dyn AuthenticatedCmds>,
        certificates: Arc<CertificatesStore>,
        event_bus: EventBus,
        data_dir: &Path,
    ) -> anyhow::Result<Self> {
        let path = data_dir.join(REALMS_FILE);
        let state = match tokio::fs::read(&path).await {
            Ok(encrypted) => {
                let raw = device
                    .local_symkey
                    .decrypt(&encrypted)
                    .context("cannot decrypt realms cache")?;
                bincode::deserialize(&raw).context("corrupted realms cache")?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => RealmsState::default(),
            Err(err) => return Err(err).context("cannot read realms cache"),
        };
        Ok(Self {
            device,
            cmds,
            certificates,
            event_bus,
            path,
            state: Mutex::new(state),
            bootstrap_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let raw = bincode::serialize(&*self.state.lock())?;
        let encrypted = self.device.local_symkey.encrypt(&raw);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, encrypted).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// New workspace, only known locally until bootstrapped
    pub async fn create_local(&self, name: EntryName) -> anyhow::Result<VlobID> {
        let realm_id = VlobID::default_new();
        self.state.lock().local.insert(
            realm_id,
            LocalRealm {
                name,
                keys_bundle: RealmKeysBundle::generate(realm_id),
            },
        );
        self.persist().await?;
        tracing::info!(%realm_id, "Workspace created locally");
        self.event_bus.send(ClientEvent::WorkspaceLocallyCreated { realm_id });
        Ok(realm_id)
    }

    pub fn is_bootstrapped(&self, realm_id: VlobID) -> bool {
        self.certificates.realm_exists(realm_id)
    }

    pub fn is_local(&self, realm_id: VlobID) -> bool {
        self.state.lock().local.contains_key(&realm_id)
    }

    /// Role we have in the realm, local-only realms are ours
    pub fn self_role(&self, realm_id: VlobID) -> Option<RealmRole> {
        if self.is_bootstrapped(realm_id) {
            self.certificates.realm_role(realm_id, self.device.user_id)
        } else if self.is_local(realm_id) {
            Some(RealmRole::Owner)
        } else {
            None
        }
    }

    /// Create the realm on the server if not done yet
    pub async fn ensure_bootstrapped(&self, realm_id: VlobID) -> Result<(), RealmError> {
        let _guard = self.bootstrap_lock.lock().await;
        if self.is_bootstrapped(realm_id) {
            return Ok(());
        }
        let local = self
            .state
            .lock()
            .local
            .get(&realm_id)
            .cloned()
            .ok_or(RealmError::NoRealmAccess)?;

        let device = &self.device;
        let cmds = &self.cmds;
        let access = local.keys_bundle.seal_for(&device.private_key.public_key());
        let outcome = self
            .certificates
            .submit(|timestamp| {
                let certificate = AnyCertificate::RealmRole(RealmRoleCertificate {
                    author: device.device_id,
                    timestamp,
                    realm_id,
                    user_id: device.user_id,
                    role: Some(RealmRole::Owner),
                })
                .dump_and_sign(&device.signing_key);
                let access = access.clone();
                async move { cmds.realm_create(certificate, access).await }
            })
            .await;
        match outcome {
            Ok(_) | Err(SubmitError::Rejected(CertificateRejection::RealmAlreadyExists)) => (),
            Err(err) => return Err(err.into()),
        }
        tracing::info!(%realm_id, "Realm bootstrapped");
        self.submit_name(realm_id, &local.keys_bundle, &local.name).await
    }

    async fn submit_name(&self, realm_id: VlobID, keys_bundle: &RealmKeysBundle, name: &EntryName) -> Result<(), RealmError> {
        let (key_index, key) = keys_bundle
            .current_key()
            .ok_or_else(|| RealmError::InvalidKeysBundle("no key".into()))?;
        let encrypted_name = key.encrypt(name.as_str().as_bytes());
        let device = &self.device;
        let cmds = &self.cmds;
        self.certificates
            .submit(|timestamp| {
                let certificate = AnyCertificate::RealmName(RealmNameCertificate {
                    author: device.device_id,
                    timestamp,
                    realm_id,
                    key_index,
                    encrypted_name: encrypted_name.clone(),
                })
                .dump_and_sign(&device.signing_key);
                async move { cmds.realm_rename(certificate).await }
            })
            .await?;
        self.state.lock().names.insert(realm_id, name.clone());
        self.persist().await?;
        Ok(())
    }

    pub async fn rename(&self, realm_id: VlobID, new_name: EntryName) -> Result<(), RealmError> {
        if !self.is_bootstrapped(realm_id) {
            if let Some(local) = self.state.lock().local.get_mut(&realm_id) {
                local.name = new_name.clone();
            }
        }
        self.ensure_bootstrapped(realm_id).await?;
        let keys_bundle = self.keys_bundle(realm_id).await?;
        self.submit_name(realm_id, &keys_bundle, &new_name).await
    }

    /// Keys of the realm, fetched from the server when not known locally
    pub async fn keys_bundle(&self, realm_id: VlobID) -> Result<RealmKeysBundle, RealmError> {
        {
            let state = self.state.lock();
            if let Some(local) = state.local.get(&realm_id) {
                return Ok(local.keys_bundle.clone());
            }
            if let Some(bundle) = state.fetched.get(&realm_id) {
                return Ok(bundle.clone());
            }
        }
        let access = match self.cmds.realm_get_keys_bundle(realm_id).await? {
            RealmGetKeysBundleRep::Ok { keys_bundle_access } => keys_bundle_access,
            RealmGetKeysBundleRep::AuthorNotAllowed | RealmGetKeysBundleRep::RealmNotFound => {
                return Err(RealmError::NoRealmAccess)
            }
        };
        let bundle = RealmKeysBundle::unseal(&access, &self.device.private_key, realm_id)
            .map_err(|err| RealmError::InvalidKeysBundle(err.to_string()))?;
        self.state.lock().fetched.insert(realm_id, bundle.clone());
        self.persist().await?;
        Ok(bundle)
    }

    /// Current name of the workspace
    ///
    /// Falls back to the last known name when the name certificate cannot
    /// be decrypted (typically while offline).
    pub async fn name(&self, realm_id: VlobID) -> Option<EntryName> {
        if let Some(certificate) = self.certificates.realm_last_name(realm_id) {
            match self.decrypt_name(&certificate).await {
                Ok(name) => {
                    let changed = self.state.lock().names.insert(realm_id, name.clone()).as_ref() != Some(&name);
                    if changed {
                        if let Err(err) = self.persist().await {
                            tracing::warn!(%realm_id, error = %err, "Cannot save workspace name");
                        }
                    }
                    return Some(name);
                }
                Err(err) => tracing::debug!(%realm_id, error = %err, "Cannot decrypt workspace name"),
            }
        }
        let state = self.state.lock();
        state
            .names
            .get(&realm_id)
            .or_else(|| state.local.get(&realm_id).map(|local| &local.name))
            .cloned()
    }

    async fn decrypt_name(&self, certificate: &RealmNameCertificate) -> Result<EntryName, RealmError> {
        let bundle = self.keys_bundle(certificate.realm_id).await?;
        let key = bundle
            .key(certificate.key_index)
            .ok_or_else(|| RealmError::InvalidKeysBundle(format!("no key {}", certificate.key_index)))?;
        let raw = key
            .decrypt(&certificate.encrypted_name)
            .map_err(|err| RealmError::InvalidKeysBundle(err.to_string()))?;
        let name = String::from_utf8(raw).context("name is not UTF-8")?;
        Ok(name.parse::<EntryName>().context("invalid workspace name")?)
    }

    /// Workspaces we have access to, local-only ones included
    pub async fn list(&self) -> Vec<WorkspaceInfo> {
        let mut realms: BTreeMap<VlobID, (RealmRole, bool)> = self
            .certificates
            .self_realms()
            .into_iter()
            .map(|(realm_id, role)| (realm_id, (role, true)))
            .collect();
        let local: Vec<VlobID> = self.state.lock().local.keys().copied().collect();
        for realm_id in local {
            if !self.is_bootstrapped(realm_id) {
                realms.insert(realm_id, (RealmRole::Owner, false));
            }
        }

        let mut workspaces = Vec::with_capacity(realms.len());
        for (realm_id, (role, is_bootstrapped)) in realms {
            let current_name = match self.name(realm_id).await {
                Some(name) => name,
                None => match realm_id.hex().parse::<EntryName>() {
                    Ok(name) => name,
                    Err(_) => continue,
                },
            };
            workspaces.push(WorkspaceInfo {
                id: realm_id,
                current_name,
                current_self_role: role,
                is_bootstrapped,
            });
        }
        workspaces.sort_by(|a, b| a.current_name.cmp(&b.current_name));
        workspaces
    }
}
