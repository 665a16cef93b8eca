mod common;

use assert_matches::assert_matches;
use common::{name, path, start_client};
use libparsec::{
    client_create_workspace, client_start_workspace, client_start_workspace_history, client_stop,
    workspace_create_file, workspace_create_folder, workspace_create_folder_all, workspace_fd_close,
    workspace_fd_read, workspace_fd_stat, workspace_fd_write, workspace_history_fd_read,
    workspace_history_get_timestamp_higher_bound, workspace_history_get_timestamp_lower_bound,
    workspace_history_open_file, workspace_history_stop, workspace_move_entry, workspace_open_file,
    workspace_remove_entry, workspace_remove_folder_all, workspace_stat_entry, workspace_stat_folder_children,
    workspace_stop, WorkspaceHistoryGetTimestampError,
};
use parsec_client::workspace::{
    EntryStat, MoveEntryMode, OpenOptions, WorkspaceFdReadError, WorkspaceHistoryError, WorkspaceMoveEntryError,
    WorkspaceRemoveEntryError, WorkspaceStatEntryError,
};
use parsec_testbed::TestbedEnv;

#[tokio::test]
async fn test_non_empty_folder_removal() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let realm_id = client_create_workspace(client, name("Docs")).await.unwrap();
    let workspace = client_start_workspace(client, realm_id).await.unwrap();

    workspace_create_folder(workspace, &path("/folder")).await.unwrap();
    workspace_create_file(workspace, &path("/folder/file.txt")).await.unwrap();

    assert_matches!(
        workspace_remove_entry(workspace, &path("/folder")).await,
        Err(WorkspaceRemoveEntryError::EntryIsNonEmptyFolder)
    );
    workspace_remove_folder_all(workspace, &path("/folder")).await.unwrap();
    assert_matches!(
        workspace_stat_entry(workspace, &path("/folder")).await,
        Err(WorkspaceStatEntryError::EntryNotFound)
    );

    client_stop(client).await.unwrap();
}

#[tokio::test]
async fn test_move_modes() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let realm_id = client_create_workspace(client, name("Docs")).await.unwrap();
    let workspace = client_start_workspace(client, realm_id).await.unwrap();

    let a = workspace_create_file(workspace, &path("/a.txt")).await.unwrap();
    let b = workspace_create_file(workspace, &path("/b.txt")).await.unwrap();
    workspace_create_folder(workspace, &path("/dir")).await.unwrap();

    assert_matches!(
        workspace_move_entry(workspace, &path("/a.txt"), &path("/b.txt"), MoveEntryMode::NoReplace).await,
        Err(WorkspaceMoveEntryError::DestinationExists)
    );
    assert_matches!(
        workspace_move_entry(workspace, &path("/a.txt"), &path("/dir"), MoveEntryMode::CanReplaceFileOnly).await,
        Err(WorkspaceMoveEntryError::DestinationExists)
    );

    workspace_move_entry(workspace, &path("/a.txt"), &path("/b.txt"), MoveEntryMode::Exchange)
        .await
        .unwrap();
    assert_matches!(workspace_stat_entry(workspace, &path("/a.txt")).await, Ok(EntryStat::File { id, .. }) if id == b);
    assert_matches!(workspace_stat_entry(workspace, &path("/b.txt")).await, Ok(EntryStat::File { id, .. }) if id == a);

    workspace_move_entry(workspace, &path("/a.txt"), &path("/b.txt"), MoveEntryMode::CanReplace)
        .await
        .unwrap();
    let children = workspace_stat_folder_children(workspace, &path("/")).await.unwrap();
    let names: Vec<&str> = children.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"b.txt"));
    assert!(names.contains(&"dir"));

    // Two folders swap along with their content
    workspace_create_file(workspace, &path("/dir/in_dir.txt")).await.unwrap();
    workspace_create_folder(workspace, &path("/other")).await.unwrap();
    workspace_create_file(workspace, &path("/other/in_other.txt")).await.unwrap();
    workspace_move_entry(workspace, &path("/dir"), &path("/other"), MoveEntryMode::Exchange)
        .await
        .unwrap();
    assert_matches!(workspace_stat_entry(workspace, &path("/dir/in_other.txt")).await, Ok(EntryStat::File { .. }));
    assert_matches!(workspace_stat_entry(workspace, &path("/other/in_dir.txt")).await, Ok(EntryStat::File { .. }));

    // A file replaces a folder
    workspace_move_entry(workspace, &path("/b.txt"), &path("/dir"), MoveEntryMode::CanReplace)
        .await
        .unwrap();
    assert_matches!(workspace_stat_entry(workspace, &path("/dir")).await, Ok(EntryStat::File { id, .. }) if id == b);
    assert_matches!(
        workspace_stat_entry(workspace, &path("/b.txt")).await,
        Err(WorkspaceStatEntryError::EntryNotFound)
    );

    client_stop(client).await.unwrap();
}

#[tokio::test]
async fn test_exchange_with_ancestor_is_rejected() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let realm_id = client_create_workspace(client, name("Docs")).await.unwrap();
    let workspace = client_start_workspace(client, realm_id).await.unwrap();

    workspace_create_folder_all(workspace, &path("/a/b/c")).await.unwrap();
    workspace_create_file(workspace, &path("/a/keep.txt")).await.unwrap();

    assert_matches!(
        workspace_move_entry(workspace, &path("/a/b"), &path("/a"), MoveEntryMode::Exchange).await,
        Err(WorkspaceMoveEntryError::CannotMoveIntoItself)
    );
    assert_matches!(
        workspace_move_entry(workspace, &path("/a/b/c"), &path("/a"), MoveEntryMode::Exchange).await,
        Err(WorkspaceMoveEntryError::CannotMoveIntoItself)
    );
    assert_matches!(
        workspace_move_entry(workspace, &path("/a"), &path("/a/b"), MoveEntryMode::Exchange).await,
        Err(WorkspaceMoveEntryError::CannotMoveIntoItself)
    );

    // Tree left untouched
    assert_matches!(workspace_stat_entry(workspace, &path("/a/keep.txt")).await, Ok(EntryStat::File { .. }));
    assert_matches!(workspace_stat_entry(workspace, &path("/a/b/c")).await, Ok(EntryStat::Folder { .. }));
    let children = workspace_stat_folder_children(workspace, &path("/")).await.unwrap();
    assert_eq!(children.len(), 1);

    client_stop(client).await.unwrap();
}

#[tokio::test]
async fn test_file_descriptors_over_handles() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let realm_id = client_create_workspace(client, name("Docs")).await.unwrap();
    let workspace = client_start_workspace(client, realm_id).await.unwrap();

    workspace_create_folder_all(workspace, &path("/x/y")).await.unwrap();
    let fd = workspace_open_file(workspace, &path("/x/y/z.bin"), OpenOptions::create())
        .await
        .unwrap();
    assert_eq!(workspace_fd_write(workspace, fd, 0, b"abcdef").await.unwrap(), 6);
    assert_eq!(workspace_fd_read(workspace, fd, 2, 3).await.unwrap(), b"cde");
    assert_eq!(workspace_fd_stat(workspace, fd).await.unwrap().size, 6);
    workspace_fd_close(workspace, fd).await.unwrap();
    assert_matches!(
        workspace_fd_read(workspace, fd, 0, 1).await,
        Err(WorkspaceFdReadError::BadFileDescriptor)
    );

    workspace_stop(workspace).await.unwrap();
    assert_matches!(
        workspace_stat_entry(workspace, &path("/x")).await,
        Err(WorkspaceStatEntryError::Stopped)
    );
    // A new handle is handed out once the old one is stopped
    let restarted = client_start_workspace(client, realm_id).await.unwrap();
    assert_ne!(restarted, workspace);
    assert_matches!(workspace_stat_entry(restarted, &path("/x/y/z.bin")).await, Ok(EntryStat::File { size: 6, .. }));

    client_stop(client).await.unwrap();
}

#[tokio::test]
async fn test_history_handle() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let realm_id = env.workspace("wksp1").unwrap().realm_id;
    let client = start_client(&env, "alice", tmp.path()).await;

    let history = client_start_workspace_history(client, realm_id).await.unwrap();
    let lower = workspace_history_get_timestamp_lower_bound(history).unwrap();
    let higher = workspace_history_get_timestamp_higher_bound(history).unwrap();
    assert!(lower <= higher);
    assert_matches!(
        workspace_history_open_file(history, &path("/missing.txt")).await,
        Err(WorkspaceHistoryError::EntryNotFound)
    );

    workspace_history_stop(history).await.unwrap();
    assert_matches!(
        workspace_history_get_timestamp_lower_bound(history),
        Err(WorkspaceHistoryGetTimestampError::Stopped)
    );
    assert_matches!(
        workspace_history_fd_read(history, parsec_client::workspace::FileDescriptor(0), 0, 1).await,
        Err(WorkspaceHistoryError::Stopped)
    );

    client_stop(client).await.unwrap();
}
