//! Workspaces and their mountpoints over handles

use crate::handle::{
    borrow_from_handle, filter_map_handles, impl_from_handle_error, register_handle, release_handle_of_kind,
    release_handle_if, Handle, HandleError, HandleItem, HandleKind,
};
pub use parsec_client::workspace::{
    EntryStat, FileDescriptor, FileStat, MoveEntryMode, OpenOptions, WorkspaceCreateEntryError,
    WorkspaceDecryptPathAddrError, WorkspaceFdCloseError, WorkspaceFdReadError, WorkspaceFdResizeError,
    WorkspaceFdStatError, WorkspaceFdWriteError, WorkspaceGeneratePathAddrError, WorkspaceMoveEntryError,
    WorkspaceOpenFileError, WorkspaceRemoveEntryError, WorkspaceStatEntryError, WorkspaceSyncError,
    WorkspaceWatchError,
};
use parsec_client::WorkspaceOps;
use parsec_types::{EntryName, FsPath, ParsecWorkspacePathAddr, RealmRole, VlobID};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceStopError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceMountError {
    #[error("Workspace is stopped")]
    Stopped,
    #[error("Mountpoints are disabled by the configuration")]
    Disabled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MountpointToOsPathError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MountpointUnmountError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_handle_error!(Internal: WorkspaceStopError, MountpointToOsPathError, MountpointUnmountError);
impl_from_handle_error!(
    Stopped: WorkspaceMountError,
    WorkspaceStatEntryError,
    WorkspaceCreateEntryError,
    WorkspaceMoveEntryError,
    WorkspaceRemoveEntryError,
    WorkspaceOpenFileError,
    WorkspaceFdReadError,
    WorkspaceFdWriteError,
    WorkspaceFdCloseError,
    WorkspaceSyncError,
    WorkspaceWatchError,
    WorkspaceGeneratePathAddrError,
    WorkspaceDecryptPathAddrError,
);

/// A started workspace as seen from the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedWorkspaceInfo {
    pub client: Handle,
    pub id: VlobID,
    pub current_name: EntryName,
    pub current_self_role: RealmRole,
    pub mountpoints: Vec<(Handle, PathBuf)>,
}

fn borrow_workspace(workspace: Handle) -> Result<(Handle, Arc<WorkspaceOps>), HandleError> {
    borrow_from_handle(workspace, HandleKind::Workspace, |item| match item {
        HandleItem::Workspace { client, ops } => Some((*client, ops.clone())),
        _ => None,
    })
}

fn ops(workspace: Handle) -> Result<Arc<WorkspaceOps>, HandleError> {
    borrow_workspace(workspace).map(|(_, ops)| ops)
}

fn mountpoints_of(workspace: Handle) -> Vec<(Handle, PathBuf)> {
    filter_map_handles(|handle, item| match item {
        HandleItem::Mountpoint { workspace: owner, path } if *owner == workspace => Some((handle, path.clone())),
        _ => None,
    })
}

/// Stop the workspace, its mountpoints are unmounted first
pub async fn workspace_stop(workspace: Handle) -> Result<(), WorkspaceStopError> {
    let ops = ops(workspace)?;
    for (mountpoint, _) in mountpoints_of(workspace) {
        if let Err(err) = mountpoint_unmount(mountpoint).await {
            tracing::warn!(%workspace, %mountpoint, error = %err, "Cannot unmount");
        }
    }
    release_handle_of_kind(workspace, HandleKind::Workspace)?;
    ops.stop().await?;
    tracing::debug!(%workspace, realm_id = %ops.realm_id(), "Workspace handle released");
    Ok(())
}

pub async fn workspace_info(workspace: Handle) -> Result<StartedWorkspaceInfo, WorkspaceStatEntryError> {
    let (client, ops) = borrow_workspace(workspace)?;
    let info = ops.info().await?;
    Ok(StartedWorkspaceInfo {
        client,
        id: info.id,
        current_name: info.current_name,
        current_self_role: info.current_self_role,
        mountpoints: mountpoints_of(workspace),
    })
}

/*
 * Entries
 */

pub async fn workspace_stat_entry(workspace: Handle, path: &FsPath) -> Result<EntryStat, WorkspaceStatEntryError> {
    ops(workspace)?.stat_entry(path).await
}

pub async fn workspace_stat_entry_by_id(workspace: Handle, entry_id: VlobID) -> Result<EntryStat, WorkspaceStatEntryError> {
    ops(workspace)?.stat_entry_by_id(entry_id).await
}

pub async fn workspace_stat_folder_children(
    workspace: Handle,
    path: &FsPath,
) -> Result<Vec<(EntryName, EntryStat)>, WorkspaceStatEntryError> {
    ops(workspace)?.stat_folder_children(path).await
}

pub async fn workspace_stat_folder_children_by_id(
    workspace: Handle,
    entry_id: VlobID,
) -> Result<Vec<(EntryName, EntryStat)>, WorkspaceStatEntryError> {
    ops(workspace)?.stat_folder_children_by_id(entry_id).await
}

pub async fn workspace_create_folder(workspace: Handle, path: &FsPath) -> Result<VlobID, WorkspaceCreateEntryError> {
    ops(workspace)?.create_folder(path).await
}

/// Create a folder along with its missing parents
pub async fn workspace_create_folder_all(workspace: Handle, path: &FsPath) -> Result<VlobID, WorkspaceCreateEntryError> {
    ops(workspace)?.create_folder_all(path).await
}

pub async fn workspace_create_file(workspace: Handle, path: &FsPath) -> Result<VlobID, WorkspaceCreateEntryError> {
    ops(workspace)?.create_file(path).await
}

pub async fn workspace_move_entry(
    workspace: Handle,
    src: &FsPath,
    dst: &FsPath,
    mode: MoveEntryMode,
) -> Result<(), WorkspaceMoveEntryError> {
    ops(workspace)?.move_entry(src, dst, mode).await
}

pub async fn workspace_rename_entry_by_id(
    workspace: Handle,
    src_parent_id: VlobID,
    src_name: EntryName,
    dst_name: EntryName,
    mode: MoveEntryMode,
) -> Result<(), WorkspaceMoveEntryError> {
    ops(workspace)?
        .rename_entry_by_id(src_parent_id, &src_name, dst_name, mode)
        .await
}

pub async fn workspace_remove_entry(workspace: Handle, path: &FsPath) -> Result<(), WorkspaceRemoveEntryError> {
    ops(workspace)?.remove_entry(path).await
}

pub async fn workspace_remove_file(workspace: Handle, path: &FsPath) -> Result<(), WorkspaceRemoveEntryError> {
    ops(workspace)?.remove_file(path).await
}

/// Remove an empty folder
pub async fn workspace_remove_folder(workspace: Handle, path: &FsPath) -> Result<(), WorkspaceRemoveEntryError> {
    ops(workspace)?.remove_folder(path).await
}

pub async fn workspace_remove_folder_all(workspace: Handle, path: &FsPath) -> Result<(), WorkspaceRemoveEntryError> {
    ops(workspace)?.remove_folder_all(path).await
}

/// Resolves with the entry's ID the next time it changes
pub async fn workspace_watch_entry_oneshot(workspace: Handle, path: &FsPath) -> Result<VlobID, WorkspaceWatchError> {
    ops(workspace)?.watch_entry_oneshot(path).await
}

/*
 * Files
 */

pub async fn workspace_open_file(
    workspace: Handle,
    path: &FsPath,
    options: OpenOptions,
) -> Result<FileDescriptor, WorkspaceOpenFileError> {
    ops(workspace)?.open_file(path, options).await
}

pub async fn workspace_open_file_by_id(
    workspace: Handle,
    entry_id: VlobID,
    options: OpenOptions,
) -> Result<FileDescriptor, WorkspaceOpenFileError> {
    ops(workspace)?.open_file_by_id(entry_id, options).await
}

pub async fn workspace_open_file_and_get_id(
    workspace: Handle,
    path: &FsPath,
    options: OpenOptions,
) -> Result<(FileDescriptor, VlobID), WorkspaceOpenFileError> {
    ops(workspace)?.open_file_and_get_id(path, options).await
}

pub async fn workspace_fd_close(workspace: Handle, fd: FileDescriptor) -> Result<(), WorkspaceFdCloseError> {
    ops(workspace)?.fd_close(fd).await
}

pub async fn workspace_fd_flush(workspace: Handle, fd: FileDescriptor) -> Result<(), WorkspaceFdCloseError> {
    ops(workspace)?.fd_flush(fd).await
}

pub async fn workspace_fd_stat(workspace: Handle, fd: FileDescriptor) -> Result<FileStat, WorkspaceFdStatError> {
    ops(workspace)?.fd_stat(fd).await
}

pub async fn workspace_fd_read(
    workspace: Handle,
    fd: FileDescriptor,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>, WorkspaceFdReadError> {
    ops(workspace)?.fd_read(fd, offset, size).await
}

pub async fn workspace_fd_write(
    workspace: Handle,
    fd: FileDescriptor,
    offset: u64,
    data: &[u8],
) -> Result<u64, WorkspaceFdWriteError> {
    ops(workspace)?.fd_write(fd, offset, data).await
}

/// Write without growing the file, bytes past its end are dropped
pub async fn workspace_fd_write_constrained_io(
    workspace: Handle,
    fd: FileDescriptor,
    offset: u64,
    data: &[u8],
) -> Result<u64, WorkspaceFdWriteError> {
    ops(workspace)?.fd_write_constrained_io(fd, offset, data).await
}

/// Append at the current end of the file
pub async fn workspace_fd_write_start_eof(
    workspace: Handle,
    fd: FileDescriptor,
    data: &[u8],
) -> Result<u64, WorkspaceFdWriteError> {
    ops(workspace)?.fd_write_start_eof(fd, data).await
}

pub async fn workspace_fd_resize(
    workspace: Handle,
    fd: FileDescriptor,
    length: u64,
    truncate_only: bool,
) -> Result<(), WorkspaceFdResizeError> {
    ops(workspace)?.fd_resize(fd, length, truncate_only).await
}

pub async fn workspace_is_file_content_local(workspace: Handle, path: &FsPath) -> Result<bool, WorkspaceStatEntryError> {
    ops(workspace)?.is_file_content_local(path).await
}

/*
 * Path addresses
 */

pub async fn workspace_generate_path_addr(
    workspace: Handle,
    path: &FsPath,
) -> Result<ParsecWorkspacePathAddr, WorkspaceGeneratePathAddrError> {
    ops(workspace)?.generate_path_addr(path).await
}

pub async fn workspace_decrypt_path_addr(
    workspace: Handle,
    link: &ParsecWorkspacePathAddr,
) -> Result<FsPath, WorkspaceDecryptPathAddrError> {
    ops(workspace)?.decrypt_path_addr(link).await
}

/*
 * Sync
 */

pub async fn workspace_get_need_outbound_sync(workspace: Handle) -> Result<Vec<VlobID>, WorkspaceSyncError> {
    ops(workspace)?.get_need_outbound_sync().await
}

pub async fn workspace_outbound_sync(workspace: Handle, entry_id: VlobID) -> Result<(), WorkspaceSyncError> {
    ops(workspace)?.outbound_sync(entry_id).await
}

pub async fn workspace_inbound_sync(workspace: Handle) -> Result<(), WorkspaceSyncError> {
    ops(workspace)?.inbound_sync().await
}

/// Inbound then outbound sync of the whole workspace
pub async fn workspace_sync(workspace: Handle) -> Result<(), WorkspaceSyncError> {
    ops(workspace)?.sync().await
}

/*
 * Mountpoints
 */

/// Expose the workspace under the configured mountpoint base dir
///
/// Only the directory is created, the content is reached through
/// [`mountpoint_to_os_path`] and the workspace operations.
pub async fn workspace_mount(workspace: Handle) -> Result<(Handle, PathBuf), WorkspaceMountError> {
    let (client, ops) = borrow_workspace(workspace)?;
    let client = crate::client::borrow_client(client)?;
    let base_dir = client
        .config()
        .mountpoint_base_dir()
        .ok_or(WorkspaceMountError::Disabled)?
        .to_path_buf();
    let info = ops.info().await.map_err(|err| match err {
        WorkspaceStatEntryError::Stopped => WorkspaceMountError::Stopped,
        err => WorkspaceMountError::Internal(err.into()),
    })?;

    let path = base_dir.join(info.current_name.as_str());
    tokio::fs::create_dir_all(&path)
        .await
        .map_err(|err| anyhow::anyhow!("cannot create mountpoint {}: {err}", path.display()))?;
    let mountpoint = register_handle(HandleItem::Mountpoint {
        workspace,
        path: path.clone(),
    });
    tracing::info!(%workspace, %mountpoint, path = %path.display(), "Workspace mounted");
    Ok((mountpoint, path))
}

/// Where `path` of the mounted workspace lives on the local filesystem
pub fn mountpoint_to_os_path(mountpoint: Handle, path: &FsPath) -> Result<PathBuf, MountpointToOsPathError> {
    let base = borrow_from_handle(mountpoint, HandleKind::Mountpoint, |item| match item {
        HandleItem::Mountpoint { path, .. } => Some(path.clone()),
        _ => None,
    })?;
    Ok(path.parts().iter().fold(base, |os_path, part| os_path.join(part.as_str())))
}

/// Release the mountpoint, its directory is removed if left empty
pub async fn mountpoint_unmount(mountpoint: Handle) -> Result<(), MountpointUnmountError> {
    let path = match release_handle_if(mountpoint, |item| matches!(item, HandleItem::Mountpoint { .. })) {
        Some(HandleItem::Mountpoint { path, .. }) => path,
        _ => return Err(HandleError::NotFound { handle: mountpoint }.into()),
    };
    // Fails if anything was put in there, which is left as is
    if let Err(err) = tokio::fs::remove_dir(&path).await {
        tracing::debug!(%mountpoint, path = %path.display(), error = %err, "Mountpoint directory kept");
    }
    tracing::info!(%mountpoint, "Workspace unmounted");
    Ok(())
}
