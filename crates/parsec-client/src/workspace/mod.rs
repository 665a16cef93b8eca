//! Workspace operations
//!
//! A [`WorkspaceOps`] gives filesystem-like access to one realm. Every
//! entry (file or folder) is a vlob holding an encrypted manifest; the
//! workspace root is the folder whose ID is the realm ID.
//!
//! Changes are applied locally first and marked as needing sync, then
//! uploaded by [`WorkspaceOps::outbound_sync`]. Remote changes are brought
//! in by [`WorkspaceOps::inbound_sync`], or lazily when an entry we never
//! saw is accessed.
//!
//! All operations of a workspace are serialized. An operation first gets
//! everything it needs from the server, then mutates the local state in
//! one go: an operation aborted while waiting on the network leaves the
//! workspace untouched.

mod entries;
mod fd;
pub mod history;
mod path_addr;
mod remote;
mod store;
mod sync;

use crate::certif::CertificatesStore;
use crate::config::PreventSyncPattern;
use crate::event_bus::EventBus;
use crate::realms::{RealmError, RealmsStore};
use parsec_connection::{AuthenticatedCmds, ConnectionError};
use parsec_types::{DateTime, EntryName, LocalDevice, RealmRole, VlobID};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store::WorkspaceStore;

pub use store::MAX_FILE_SIZE;

pub use history::{
    WorkspaceHistoryEntryStat, WorkspaceHistoryError, WorkspaceHistoryFileStat, WorkspaceHistoryOps,
    WorkspaceHistorySetTimestampOfInterestError,
};

/// Handle on a file opened in a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileDescriptor(pub u32);

impl std::fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fd#{}", self.0)
    }
}

/// How a file is opened, with the usual open(2) semantics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub truncate: bool,
    pub create: bool,
    pub create_new: bool,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Read-write, creating the file if needed
    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Default::default()
        }
    }
}

/// What to do when the destination of a move already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveEntryMode {
    NoReplace,
    CanReplace,
    CanReplaceFileOnly,
    Exchange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStat {
    File {
        /// Folder under which the entry is kept local-only, if any
        confinement_point: Option<VlobID>,
        id: VlobID,
        parent: VlobID,
        created: DateTime,
        updated: DateTime,
        base_version: u32,
        is_placeholder: bool,
        need_sync: bool,
        size: u64,
    },
    Folder {
        confinement_point: Option<VlobID>,
        id: VlobID,
        parent: VlobID,
        created: DateTime,
        updated: DateTime,
        base_version: u32,
        is_placeholder: bool,
        need_sync: bool,
    },
}

impl EntryStat {
    pub fn id(&self) -> VlobID {
        match self {
            EntryStat::File { id, .. } | EntryStat::Folder { id, .. } => *id,
        }
    }

    pub fn confinement_point(&self) -> Option<VlobID> {
        match self {
            EntryStat::File { confinement_point, .. } | EntryStat::Folder { confinement_point, .. } => *confinement_point,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub id: VlobID,
    pub created: DateTime,
    pub updated: DateTime,
    pub base_version: u32,
    pub is_placeholder: bool,
    pub need_sync: bool,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceInfoSnapshot {
    pub id: VlobID,
    pub current_name: EntryName,
    pub current_self_role: RealmRole,
    pub is_bootstrapped: bool,
}

/// Every failure a workspace operation may hit
///
/// Each public operation exposes the subset that makes sense for it, see
/// [`impl_from_fs_operation_error`].
#[derive(Debug, thiserror::Error)]
pub(crate) enum FsOperationError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Realm is read-only for us")]
    ReadOnlyRealm,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },
    #[error("Entry not found")]
    EntryNotFound,
    #[error("Parent not found")]
    ParentNotFound,
    #[error("Parent is not a folder")]
    ParentNotAFolder,
    #[error("Entry is a file")]
    EntryIsFile,
    #[error("Entry is a folder")]
    EntryIsFolder,
    #[error("Entry already exists")]
    EntryExists,
    #[error("Entry already exists (create new mode)")]
    EntryExistsInCreateNewMode,
    #[error("Folder is not empty")]
    EntryIsNonEmptyFolder,
    #[error("Cannot remove the workspace root")]
    CannotRemoveRoot,
    #[error("Cannot move the workspace root")]
    CannotMoveRoot,
    #[error("Cannot move an entry into itself")]
    CannotMoveIntoItself,
    #[error("Source not found")]
    SourceNotFound,
    #[error("Destination already exists")]
    DestinationExists,
    #[error("Destination not found")]
    DestinationNotFound,
    #[error("Server block store is unavailable")]
    ServerBlockstoreUnavailable,
    #[error("Invalid block access")]
    InvalidBlockAccess,
    #[error("Bad file descriptor")]
    BadFileDescriptor,
    #[error("File not opened in read mode")]
    NotInReadMode,
    #[error("File not opened in write mode")]
    NotInWriteMode,
    #[error("File would grow past {max} bytes")]
    FileTooLarge { max: u64 },
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

impl From<ConnectionError> for FsOperationError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NoResponse => Self::Offline,
            err => Self::Internal(err.into()),
        }
    }
}

impl From<RealmError> for FsOperationError {
    fn from(err: RealmError) -> Self {
        match err {
            RealmError::Offline => Self::Offline,
            RealmError::NoRealmAccess | RealmError::AuthorNotAllowed => Self::NoRealmAccess,
            RealmError::InvalidKeysBundle(reason) => Self::InvalidKeysBundle { reason },
            RealmError::TimestampOutOfBallpark {
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
            RealmError::Internal(err) => Self::Internal(err),
        }
    }
}

/// Map [`FsOperationError`] into an operation's error, variants not listed
/// become `Internal`
macro_rules! impl_from_fs_operation_error {
    ($error:ident: $($variant:ident $({ $($field:ident),+ })?),+ $(,)?) => {
        impl From<FsOperationError> for $error {
            fn from(err: FsOperationError) -> Self {
                match err {
                    $(FsOperationError::$variant $({ $($field),+ })? => Self::$variant $({ $($field),+ })?,)+
                    FsOperationError::Internal(err) => Self::Internal(err),
                    err => Self::Internal(anyhow::Error::new(err)),
                }
            }
        }
    };
}
pub(crate) use impl_from_fs_operation_error;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceStatEntryError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Entry not found")]
    EntryNotFound,
    #[error("Entry is a file")]
    EntryIsFile,
    #[error("Entry is a folder")]
    EntryIsFolder,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceStatEntryError:
    Offline, Stopped, EntryNotFound, EntryIsFile, EntryIsFolder, NoRealmAccess,
    InvalidKeysBundle { reason }, InvalidCertificate { reason }, InvalidManifest { reason },
);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceCreateEntryError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Parent not found")]
    ParentNotFound,
    #[error("Parent is not a folder")]
    ParentNotAFolder,
    #[error("Entry already exists")]
    EntryExists,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Realm is read-only for us")]
    ReadOnlyRealm,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceCreateEntryError:
    Offline, Stopped, ParentNotFound, ParentNotAFolder, EntryExists, NoRealmAccess, ReadOnlyRealm,
    InvalidKeysBundle { reason }, InvalidCertificate { reason }, InvalidManifest { reason },
);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceMoveEntryError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Cannot move the workspace root")]
    CannotMoveRoot,
    #[error("Cannot move an entry into itself")]
    CannotMoveIntoItself,
    #[error("Source not found")]
    SourceNotFound,
    #[error("Destination already exists")]
    DestinationExists,
    #[error("Destination not found")]
    DestinationNotFound,
    #[error("Parent not found")]
    ParentNotFound,
    #[error("Parent is not a folder")]
    ParentNotAFolder,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Realm is read-only for us")]
    ReadOnlyRealm,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceMoveEntryError:
    Offline, Stopped, CannotMoveRoot, CannotMoveIntoItself, SourceNotFound, DestinationExists,
    DestinationNotFound, ParentNotFound, ParentNotAFolder, NoRealmAccess, ReadOnlyRealm,
    InvalidKeysBundle { reason }, InvalidCertificate { reason }, InvalidManifest { reason },
);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceRemoveEntryError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Cannot remove the workspace root")]
    CannotRemoveRoot,
    #[error("Entry not found")]
    EntryNotFound,
    #[error("Entry is a file")]
    EntryIsFile,
    #[error("Entry is a folder")]
    EntryIsFolder,
    #[error("Folder is not empty")]
    EntryIsNonEmptyFolder,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Realm is read-only for us")]
    ReadOnlyRealm,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceRemoveEntryError:
    Offline, Stopped, CannotRemoveRoot, EntryNotFound, EntryIsFile, EntryIsFolder,
    EntryIsNonEmptyFolder, NoRealmAccess, ReadOnlyRealm,
    InvalidKeysBundle { reason }, InvalidCertificate { reason }, InvalidManifest { reason },
);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceOpenFileError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Entry not found")]
    EntryNotFound,
    #[error("Parent not found")]
    ParentNotFound,
    #[error("Parent is not a folder")]
    ParentNotAFolder,
    #[error("Entry is a folder")]
    EntryIsFolder,
    #[error("Entry already exists (create new mode)")]
    EntryExistsInCreateNewMode,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Realm is read-only for us")]
    ReadOnlyRealm,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceOpenFileError:
    Offline, Stopped, EntryNotFound, ParentNotFound, ParentNotAFolder, EntryIsFolder,
    EntryExistsInCreateNewMode, NoRealmAccess, ReadOnlyRealm,
    InvalidKeysBundle { reason }, InvalidCertificate { reason }, InvalidManifest { reason },
);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceFdReadError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Bad file descriptor")]
    BadFileDescriptor,
    #[error("File not opened in read mode")]
    NotInReadMode,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Server block store is unavailable")]
    ServerBlockstoreUnavailable,
    #[error("Invalid block access")]
    InvalidBlockAccess,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceFdReadError:
    Offline, Stopped, BadFileDescriptor, NotInReadMode, NoRealmAccess, ServerBlockstoreUnavailable,
    InvalidBlockAccess, InvalidKeysBundle { reason }, InvalidCertificate { reason },
);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceFdWriteError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Bad file descriptor")]
    BadFileDescriptor,
    #[error("File not opened in write mode")]
    NotInWriteMode,
    #[error("File would grow past {max} bytes")]
    FileTooLarge { max: u64 },
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Realm is read-only for us")]
    ReadOnlyRealm,
    #[error("Server block store is unavailable")]
    ServerBlockstoreUnavailable,
    #[error("Invalid block access")]
    InvalidBlockAccess,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceFdWriteError:
    Offline, Stopped, BadFileDescriptor, NotInWriteMode, FileTooLarge { max }, NoRealmAccess, ReadOnlyRealm,
    ServerBlockstoreUnavailable, InvalidBlockAccess, InvalidKeysBundle { reason },
    InvalidCertificate { reason },
);

pub type WorkspaceFdResizeError = WorkspaceFdWriteError;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceFdCloseError {
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Bad file descriptor")]
    BadFileDescriptor,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceFdCloseError: Stopped, BadFileDescriptor);

pub type WorkspaceFdFlushError = WorkspaceFdCloseError;
pub type WorkspaceFdStatError = WorkspaceFdCloseError;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceSyncError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Server block store is unavailable")]
    ServerBlockstoreUnavailable,
    #[error("Invalid block access")]
    InvalidBlockAccess,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },
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

impl_from_fs_operation_error!(WorkspaceSyncError:
    Offline, Stopped, NoRealmAccess, ServerBlockstoreUnavailable, InvalidBlockAccess,
    InvalidKeysBundle { reason }, InvalidCertificate { reason }, InvalidManifest { reason },
    TimestampOutOfBallpark { server_timestamp, client_timestamp, ballpark_client_early_offset, ballpark_client_late_offset },
);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceWatchError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Entry not found")]
    EntryNotFound,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceWatchError:
    Offline, Stopped, EntryNotFound, NoRealmAccess,
    InvalidKeysBundle { reason }, InvalidCertificate { reason }, InvalidManifest { reason },
);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceGeneratePathAddrError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceGeneratePathAddrError:
    Offline, Stopped, NoRealmAccess, InvalidKeysBundle { reason },
);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceDecryptPathAddrError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace has been stopped")]
    Stopped,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Address points to another workspace")]
    NotThisWorkspace,
    #[error("No key with index {key_index}")]
    KeyNotFound { key_index: u64 },
    #[error("Cannot decrypt the path")]
    CorruptedData,
    #[error("Invalid keys bundle: {reason}")]
    InvalidKeysBundle { reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceDecryptPathAddrError:
    Offline, Stopped, NoRealmAccess, InvalidKeysBundle { reason },
);

/// What workspace operations need from the client
pub(crate) struct WorkspaceContext {
    pub realm_id: VlobID,
    pub device: Arc<LocalDevice>,
    pub cmds: Arc<dyn AuthenticatedCmds>,
    pub certificates: Arc<CertificatesStore>,
    pub realms: Arc<RealmsStore>,
    pub event_bus: EventBus,
    pub prevent_sync_pattern: PreventSyncPattern,
}

impl WorkspaceContext {
    pub fn is_confined_name(&self, name: &EntryName) -> bool {
        self.prevent_sync_pattern.is_match(name.as_str())
    }

    pub fn self_role(&self) -> Result<RealmRole, FsOperationError> {
        self.realms
            .self_role(self.realm_id)
            .ok_or(FsOperationError::NoRealmAccess)
    }

    pub fn check_write(&self) -> Result<(), FsOperationError> {
        if self.self_role()?.can_write() {
            Ok(())
        } else {
            Err(FsOperationError::ReadOnlyRealm)
        }
    }
}

pub struct WorkspaceOps {
    pub(crate) ctx: WorkspaceContext,
    pub(crate) store: tokio::sync::Mutex<WorkspaceStore>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for WorkspaceOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceOps")
            .field("realm_id", &self.ctx.realm_id)
            .finish_non_exhaustive()
    }
}

impl WorkspaceOps {
    pub(crate) async fn start(ctx: WorkspaceContext, data_dir: &Path, cache_size: u64) -> anyhow::Result<Self> {
        let path = data_dir.join("workspaces").join(format!("{}.bin", ctx.realm_id.hex()));
        let store = WorkspaceStore::load(path, &ctx.device.local_symkey, cache_size).await?;
        tracing::info!(realm_id = %ctx.realm_id, "Workspace started");
        Ok(Self {
            ctx,
            store: tokio::sync::Mutex::new(store),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn realm_id(&self) -> VlobID {
        self.ctx.realm_id
    }

    pub(crate) async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, WorkspaceStore>, FsOperationError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(FsOperationError::Stopped);
        }
        Ok(self.store.lock().await)
    }

    /// Save pending changes and close every file, further operations fail with `Stopped`
    pub async fn stop(&self) -> anyhow::Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut store = self.store.lock().await;
        store.close_all();
        store.persist(&self.ctx.device.local_symkey).await?;
        tracing::info!(realm_id = %self.ctx.realm_id, "Workspace stopped");
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub async fn info(&self) -> Result<WorkspaceInfoSnapshot, WorkspaceStatEntryError> {
        if self.is_stopped() {
            return Err(WorkspaceStatEntryError::Stopped);
        }
        let realm_id = self.ctx.realm_id;
        let current_self_role = self.ctx.self_role()?;
        let current_name = match self.ctx.realms.name(realm_id).await {
            Some(name) => name,
            None => realm_id
                .hex()
                .parse()
                .map_err(|err| anyhow::anyhow!("cannot name workspace: {err}"))?,
        };
        Ok(WorkspaceInfoSnapshot {
            id: realm_id,
            current_name,
            current_self_role,
            is_bootstrapped: self.ctx.realms.is_bootstrapped(realm_id),
        })
    }
}
