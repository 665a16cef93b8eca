//! Read-only, time-indexed view of a workspace over handles

use crate::handle::{borrow_from_handle, impl_from_handle_error, release_handle_of_kind, Handle, HandleError, HandleItem, HandleKind};
pub use parsec_client::workspace::{
    FileDescriptor, WorkspaceHistoryEntryStat, WorkspaceHistoryError, WorkspaceHistoryFileStat,
    WorkspaceHistorySetTimestampOfInterestError,
};
use parsec_client::WorkspaceHistoryOps;
use parsec_types::{DateTime, EntryName, FsPath, VlobID};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceHistoryStopError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceHistoryGetTimestampError {
    #[error("Workspace history has been stopped")]
    Stopped,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_handle_error!(Internal: WorkspaceHistoryStopError);
impl_from_handle_error!(
    Stopped: WorkspaceHistoryError,
    WorkspaceHistorySetTimestampOfInterestError,
    WorkspaceHistoryGetTimestampError,
);

fn ops(history: Handle) -> Result<Arc<WorkspaceHistoryOps>, HandleError> {
    borrow_from_handle(history, HandleKind::WorkspaceHistory, |item| match item {
        HandleItem::WorkspaceHistory { ops, .. } => Some(ops.clone()),
        _ => None,
    })
}

fn running_ops(history: Handle) -> Result<Arc<WorkspaceHistoryOps>, WorkspaceHistoryGetTimestampError> {
    let ops = ops(history)?;
    if ops.is_stopped() {
        return Err(WorkspaceHistoryGetTimestampError::Stopped);
    }
    Ok(ops)
}

pub async fn workspace_history_stop(history: Handle) -> Result<(), WorkspaceHistoryStopError> {
    match release_handle_of_kind(history, HandleKind::WorkspaceHistory)? {
        HandleItem::WorkspaceHistory { ops, .. } => {
            ops.stop();
            tracing::debug!(%history, realm_id = %ops.realm_id(), "Workspace history handle released");
            Ok(())
        }
        _ => Err(anyhow::anyhow!("handle {history} is not a workspace history").into()),
    }
}

/// Realm creation, nothing can be read before it
pub fn workspace_history_get_timestamp_lower_bound(history: Handle) -> Result<DateTime, WorkspaceHistoryGetTimestampError> {
    Ok(running_ops(history)?.get_timestamp_lower_bound())
}

/// When the history was started, nothing can be read after it
pub fn workspace_history_get_timestamp_higher_bound(history: Handle) -> Result<DateTime, WorkspaceHistoryGetTimestampError> {
    Ok(running_ops(history)?.get_timestamp_higher_bound())
}

pub async fn workspace_history_get_timestamp_of_interest(
    history: Handle,
) -> Result<DateTime, WorkspaceHistoryGetTimestampError> {
    Ok(running_ops(history)?.get_timestamp_of_interest().await)
}

/// Move the view to `toi`, every read from now on sees the workspace as it was then
pub async fn workspace_history_set_timestamp_of_interest(
    history: Handle,
    toi: DateTime,
) -> Result<(), WorkspaceHistorySetTimestampOfInterestError> {
    ops(history)?.set_timestamp_of_interest(toi).await
}

pub async fn workspace_history_stat_entry(
    history: Handle,
    path: &FsPath,
) -> Result<WorkspaceHistoryEntryStat, WorkspaceHistoryError> {
    ops(history)?.stat_entry(path).await
}

pub async fn workspace_history_stat_entry_by_id(
    history: Handle,
    entry_id: VlobID,
) -> Result<WorkspaceHistoryEntryStat, WorkspaceHistoryError> {
    ops(history)?.stat_entry_by_id(entry_id).await
}

pub async fn workspace_history_stat_folder_children(
    history: Handle,
    path: &FsPath,
) -> Result<Vec<(EntryName, WorkspaceHistoryEntryStat)>, WorkspaceHistoryError> {
    ops(history)?.stat_folder_children(path).await
}

pub async fn workspace_history_stat_folder_children_by_id(
    history: Handle,
    entry_id: VlobID,
) -> Result<Vec<(EntryName, WorkspaceHistoryEntryStat)>, WorkspaceHistoryError> {
    ops(history)?.stat_folder_children_by_id(entry_id).await
}

pub async fn workspace_history_open_file(history: Handle, path: &FsPath) -> Result<FileDescriptor, WorkspaceHistoryError> {
    ops(history)?.open_file(path).await
}

pub async fn workspace_history_open_file_by_id(
    history: Handle,
    entry_id: VlobID,
) -> Result<FileDescriptor, WorkspaceHistoryError> {
    ops(history)?.open_file_by_id(entry_id).await
}

pub async fn workspace_history_open_file_and_get_id(
    history: Handle,
    path: &FsPath,
) -> Result<(FileDescriptor, VlobID), WorkspaceHistoryError> {
    ops(history)?.open_file_and_get_id(path).await
}

pub async fn workspace_history_fd_close(history: Handle, fd: FileDescriptor) -> Result<(), WorkspaceHistoryError> {
    ops(history)?.fd_close(fd).await
}

pub async fn workspace_history_fd_stat(
    history: Handle,
    fd: FileDescriptor,
) -> Result<WorkspaceHistoryFileStat, WorkspaceHistoryError> {
    ops(history)?.fd_stat(fd).await
}

pub async fn workspace_history_fd_read(
    history: Handle,
    fd: FileDescriptor,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>, WorkspaceHistoryError> {
    ops(history)?.fd_read(fd, offset, size).await
}
