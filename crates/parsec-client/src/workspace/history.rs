//! Read-only view of a workspace as it was at a given time
//!
//! Every read is done against the "timestamp of interest", which must stay
//! between the realm creation and the moment the history was started.
//! Nothing is kept locally besides a cache of what was already fetched for
//! the current timestamp of interest.

use super::remote;
use super::store::BlockCache;
use super::{impl_from_fs_operation_error, FileDescriptor, FsOperationError, WorkspaceContext};
use parsec_types::{ChildManifest, DateTime, EntryName, FileManifest, FolderManifest, FsPath, VlobID};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceHistoryError {
    #[error("Cannot reach the server")]
    Offline,
    #[error("Workspace history has been stopped")]
    Stopped,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Not allowed to access this realm")]
    NoRealmAccess,
    #[error("Entry not found")]
    EntryNotFound,
    #[error("Entry is a file")]
    EntryIsFile,
    #[error("Entry is a folder")]
    EntryIsFolder,
    #[error("Bad file descriptor")]
    BadFileDescriptor,
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
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_fs_operation_error!(WorkspaceHistoryError:
    Offline, Stopped, NoRealmAccess, EntryNotFound, EntryIsFile, EntryIsFolder, BadFileDescriptor,
    ServerBlockstoreUnavailable, InvalidBlockAccess,
    InvalidKeysBundle { reason }, InvalidCertificate { reason }, InvalidManifest { reason },
);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceHistorySetTimestampOfInterestError {
    #[error("Workspace history has been stopped")]
    Stopped,
    #[error("Timestamp is older than the workspace ({timestamp_lower_bound})")]
    OlderThanLowerBound { timestamp_lower_bound: DateTime },
    #[error("Timestamp is newer than the history itself ({timestamp_higher_bound})")]
    NewerThanHigherBound { timestamp_higher_bound: DateTime },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceHistoryEntryStat {
    File {
        id: VlobID,
        parent: VlobID,
        created: DateTime,
        updated: DateTime,
        version: u32,
        size: u64,
    },
    Folder {
        id: VlobID,
        parent: VlobID,
        created: DateTime,
        updated: DateTime,
        version: u32,
    },
}

impl WorkspaceHistoryEntryStat {
    pub fn id(&self) -> VlobID {
        match self {
            Self::File { id, .. } | Self::Folder { id, .. } => *id,
        }
    }
}

impl From<&ChildManifest> for WorkspaceHistoryEntryStat {
    fn from(manifest: &ChildManifest) -> Self {
        match manifest {
            ChildManifest::File(file) => Self::File {
                id: file.id,
                parent: file.parent,
                created: file.created,
                updated: file.updated,
                version: file.version,
                size: file.size,
            },
            ChildManifest::Folder(folder) => Self::Folder {
                id: folder.id,
                parent: folder.parent,
                created: folder.created,
                updated: folder.updated,
                version: folder.version,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceHistoryFileStat {
    pub id: VlobID,
    pub created: DateTime,
    pub updated: DateTime,
    pub version: u32,
    pub size: u64,
}

#[derive(Debug)]
struct HistoryState {
    timestamp_of_interest: DateTime,
    /// `None` for an entry that did not exist at the timestamp of interest
    manifests: HashMap<VlobID, Option<ChildManifest>>,
    blocks: BlockCache,
    fds: HashMap<FileDescriptor, VlobID>,
    next_fd: u32,
}

pub struct WorkspaceHistoryOps {
    ctx: WorkspaceContext,
    timestamp_lower_bound: DateTime,
    timestamp_higher_bound: DateTime,
    state: tokio::sync::Mutex<HistoryState>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for WorkspaceHistoryOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceHistoryOps")
            .field("realm_id", &self.ctx.realm_id)
            .field("timestamp_lower_bound", &self.timestamp_lower_bound)
            .field("timestamp_higher_bound", &self.timestamp_higher_bound)
            .finish_non_exhaustive()
    }
}

impl WorkspaceHistoryOps {
    pub(crate) fn start(ctx: WorkspaceContext, cache_size: u64) -> Result<Self, WorkspaceHistoryError> {
        ctx.self_role()?;
        let timestamp_higher_bound = ctx.device.now();
        // A realm never synced has no history
        let timestamp_lower_bound = ctx
            .certificates
            .realm_created_on(ctx.realm_id)
            .unwrap_or(timestamp_higher_bound);
        tracing::info!(realm_id = %ctx.realm_id, %timestamp_lower_bound, %timestamp_higher_bound, "Workspace history started");
        Ok(Self {
            ctx,
            timestamp_lower_bound,
            timestamp_higher_bound,
            state: tokio::sync::Mutex::new(HistoryState {
                timestamp_of_interest: timestamp_higher_bound,
                manifests: HashMap::new(),
                blocks: BlockCache::new(cache_size),
                fds: HashMap::new(),
                next_fd: 1,
            }),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn realm_id(&self) -> VlobID {
        self.ctx.realm_id
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::info!(realm_id = %self.ctx.realm_id, "Workspace history stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, HistoryState>, FsOperationError> {
        if self.is_stopped() {
            return Err(FsOperationError::Stopped);
        }
        Ok(self.state.lock().await)
    }

    pub fn get_timestamp_lower_bound(&self) -> DateTime {
        self.timestamp_lower_bound
    }

    pub fn get_timestamp_higher_bound(&self) -> DateTime {
        self.timestamp_higher_bound
    }

    pub async fn get_timestamp_of_interest(&self) -> DateTime {
        self.state.lock().await.timestamp_of_interest
    }

    /// Move the view to another point in time
    ///
    /// Opened files keep their descriptor but are read at the new time.
    pub async fn set_timestamp_of_interest(&self, toi: DateTime) -> Result<(), WorkspaceHistorySetTimestampOfInterestError> {
        if toi < self.timestamp_lower_bound {
            return Err(WorkspaceHistorySetTimestampOfInterestError::OlderThanLowerBound {
                timestamp_lower_bound: self.timestamp_lower_bound,
            });
        }
        if toi > self.timestamp_higher_bound {
            return Err(WorkspaceHistorySetTimestampOfInterestError::NewerThanHigherBound {
                timestamp_higher_bound: self.timestamp_higher_bound,
            });
        }
        let mut state = self
            .lock()
            .await
            .map_err(|_| WorkspaceHistorySetTimestampOfInterestError::Stopped)?;
        if state.timestamp_of_interest != toi {
            state.timestamp_of_interest = toi;
            state.manifests.clear();
        }
        Ok(())
    }

    pub async fn stat_entry(&self, path: &FsPath) -> Result<WorkspaceHistoryEntryStat, WorkspaceHistoryError> {
        let mut state = self.lock().await?;
        let manifest = self.resolve_path(&mut state, path).await?;
        Ok((&manifest).into())
    }

    pub async fn stat_entry_by_id(&self, entry_id: VlobID) -> Result<WorkspaceHistoryEntryStat, WorkspaceHistoryError> {
        let mut state = self.lock().await?;
        let manifest = self.manifest(&mut state, entry_id).await?;
        Ok((&manifest).into())
    }

    pub async fn stat_folder_children(
        &self,
        path: &FsPath,
    ) -> Result<Vec<(EntryName, WorkspaceHistoryEntryStat)>, WorkspaceHistoryError> {
        let mut state = self.lock().await?;
        let manifest = self.resolve_path(&mut state, path).await?;
        self.folder_children(&mut state, manifest).await
    }

    pub async fn stat_folder_children_by_id(
        &self,
        entry_id: VlobID,
    ) -> Result<Vec<(EntryName, WorkspaceHistoryEntryStat)>, WorkspaceHistoryError> {
        let mut state = self.lock().await?;
        let manifest = self.manifest(&mut state, entry_id).await?;
        self.folder_children(&mut state, manifest).await
    }

    pub async fn open_file(&self, path: &FsPath) -> Result<FileDescriptor, WorkspaceHistoryError> {
        self.open_file_and_get_id(path).await.map(|(fd, _)| fd)
    }

    pub async fn open_file_and_get_id(&self, path: &FsPath) -> Result<(FileDescriptor, VlobID), WorkspaceHistoryError> {
        let mut state = self.lock().await?;
        let manifest = self.resolve_path(&mut state, path).await?;
        let entry_id = manifest.id();
        Ok((open(&mut state, &manifest)?, entry_id))
    }

    pub async fn open_file_by_id(&self, entry_id: VlobID) -> Result<FileDescriptor, WorkspaceHistoryError> {
        let mut state = self.lock().await?;
        let manifest = self.manifest(&mut state, entry_id).await?;
        Ok(open(&mut state, &manifest)?)
    }

    pub async fn fd_close(&self, fd: FileDescriptor) -> Result<(), WorkspaceHistoryError> {
        let mut state = self.lock().await?;
        state.fds.remove(&fd).ok_or(WorkspaceHistoryError::BadFileDescriptor)?;
        Ok(())
    }

    pub async fn fd_stat(&self, fd: FileDescriptor) -> Result<WorkspaceHistoryFileStat, WorkspaceHistoryError> {
        let mut state = self.lock().await?;
        let file = self.opened_file(&mut state, fd).await?;
        Ok(WorkspaceHistoryFileStat {
            id: file.id,
            created: file.created,
            updated: file.updated,
            version: file.version,
            size: file.size,
        })
    }

    pub async fn fd_read(&self, fd: FileDescriptor, offset: u64, size: u64) -> Result<Vec<u8>, WorkspaceHistoryError> {
        let mut state = self.lock().await?;
        let file = self.opened_file(&mut state, fd).await?;
        let end = file.size.min(offset.saturating_add(size));
        if offset >= end {
            return Ok(vec![]);
        }
        let mut data = vec![0u8; (end - offset) as usize];
        for access in &file.blocks {
            let (block_start, block_end) = (access.offset, access.offset.saturating_add(access.size));
            if block_end <= offset || block_start >= end {
                continue;
            }
            let block = match state.blocks.get(&access.id) {
                Some(block) => block.clone(),
                None => {
                    let block = remote::fetch_block(&self.ctx, access).await?;
                    state.blocks.insert(access.id, block.clone());
                    block
                }
            };
            let from = block_start.max(offset);
            let to = block_end.min(end);
            let src = block_range(&block, block_start, from, to)?;
            data[(from - offset) as usize..(to - offset) as usize].copy_from_slice(src);
        }
        Ok(data)
    }

    async fn opened_file(&self, state: &mut HistoryState, fd: FileDescriptor) -> Result<FileManifest, FsOperationError> {
        let entry_id = *state.fds.get(&fd).ok_or(FsOperationError::BadFileDescriptor)?;
        match self.manifest(state, entry_id).await {
            Ok(ChildManifest::File(file)) => Ok(file),
            // The file did not exist yet at the new timestamp of interest
            Ok(ChildManifest::Folder(_)) | Err(FsOperationError::EntryNotFound) => Ok(FileManifest {
                author: self.ctx.device.device_id,
                timestamp: state.timestamp_of_interest,
                id: entry_id,
                parent: self.ctx.realm_id,
                version: 0,
                created: state.timestamp_of_interest,
                updated: state.timestamp_of_interest,
                size: 0,
                blocksize: parsec_types::DEFAULT_BLOCK_SIZE,
                blocks: vec![],
            }),
            Err(err) => Err(err),
        }
    }

    async fn manifest(&self, state: &mut HistoryState, entry_id: VlobID) -> Result<ChildManifest, FsOperationError> {
        if let Some(cached) = state.manifests.get(&entry_id) {
            return cached.clone().ok_or(FsOperationError::EntryNotFound);
        }
        let fetched = remote::fetch_manifests(&self.ctx, vec![entry_id], Some(state.timestamp_of_interest))
            .await?
            .into_iter()
            .next();
        let fetched = match fetched {
            None if entry_id == self.ctx.realm_id => Some(ChildManifest::Folder(FolderManifest {
                author: self.ctx.device.device_id,
                timestamp: self.timestamp_lower_bound,
                id: entry_id,
                parent: entry_id,
                version: 0,
                created: self.timestamp_lower_bound,
                updated: self.timestamp_lower_bound,
                children: Default::default(),
            })),
            fetched => fetched,
        };
        state.manifests.insert(entry_id, fetched.clone());
        fetched.ok_or(FsOperationError::EntryNotFound)
    }

    async fn resolve_path(&self, state: &mut HistoryState, path: &FsPath) -> Result<ChildManifest, FsOperationError> {
        let mut manifest = self.manifest(state, self.ctx.realm_id).await?;
        for name in path.parts() {
            let child = match &manifest {
                ChildManifest::Folder(folder) => folder.children.get(name).copied(),
                ChildManifest::File(_) => None,
            }
            .ok_or(FsOperationError::EntryNotFound)?;
            manifest = self.manifest(state, child).await?;
        }
        Ok(manifest)
    }

    async fn folder_children(
        &self,
        state: &mut HistoryState,
        manifest: ChildManifest,
    ) -> Result<Vec<(EntryName, WorkspaceHistoryEntryStat)>, WorkspaceHistoryError> {
        let ChildManifest::Folder(folder) = manifest else {
            return Err(WorkspaceHistoryError::EntryIsFile);
        };
        let missing: Vec<VlobID> = folder
            .children
            .values()
            .filter(|id| !state.manifests.contains_key(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            let fetched = remote::fetch_manifests(&self.ctx, missing.clone(), Some(state.timestamp_of_interest)).await?;
            for id in missing {
                state.manifests.insert(id, None);
            }
            for child in fetched {
                state.manifests.insert(child.id(), Some(child));
            }
        }
        Ok(folder
            .children
            .iter()
            .filter_map(|(name, id)| {
                let child = state.manifests.get(id)?.as_ref()?;
                Some((name.clone(), child.into()))
            })
            .collect())
    }
}

fn open(state: &mut HistoryState, manifest: &ChildManifest) -> Result<FileDescriptor, FsOperationError> {
    if matches!(manifest, ChildManifest::Folder(_)) {
        return Err(FsOperationError::EntryIsFolder);
    }
    let fd = FileDescriptor(state.next_fd);
    state.next_fd += 1;
    state.fds.insert(fd, manifest.id());
    Ok(fd)
}

/// Bytes `[from, to)` of a block starting at `block_start`
///
/// A block shorter than what its manifest claims is an invalid access.
fn block_range(block: &[u8], block_start: u64, from: u64, to: u64) -> Result<&[u8], FsOperationError> {
    block
        .get((from - block_start) as usize..(to - block_start) as usize)
        .ok_or(FsOperationError::InvalidBlockAccess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_block_range() {
        let block = b"0123456789";
        assert_eq!(block_range(block, 100, 102, 105).unwrap(), b"234");
        assert_eq!(block_range(block, 100, 100, 110).unwrap(), block);
        // Manifest says the block goes up to 112
        assert_matches!(block_range(block, 100, 105, 112), Err(FsOperationError::InvalidBlockAccess));
    }
}
