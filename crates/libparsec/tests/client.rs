mod common;

use assert_matches::assert_matches;
use common::{config, name, path, start_client};
use libparsec::{
    claimer_greeter_abort_operation, client_create_workspace, client_info, client_list_workspaces, client_start,
    client_start_with_device, client_start_workspace, client_start_workspace_history, client_stop,
    list_started_clients, mountpoint_to_os_path, release_canceller, workspace_create_file,
    workspace_history_get_timestamp_lower_bound, workspace_history_stop, workspace_info, workspace_mount,
    workspace_stat_entry, workspace_stop, CancelError, ClaimerGreeterAbortOperationError, ClientListWorkspacesError,
    DeviceAccessStrategy, WorkspaceHistoryStopError, WorkspaceStopError,
};
use parsec_client::client::ClientStopError;
use parsec_client::workspace::WorkspaceStatEntryError;
use parsec_client::{ClientInfoError, ClientStartError};
use parsec_testbed::TestbedEnv;

#[tokio::test]
async fn test_stopped_client_handle_reports_stopped() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    let info = client_info(client).unwrap();
    assert_eq!(info.device_id, alice.device_id);
    assert!(list_started_clients().contains(&(client, alice.device_id)));

    client_stop(client).await.unwrap();
    assert_matches!(client_info(client), Err(ClientInfoError::Stopped));
    assert_matches!(client_list_workspaces(client).await, Err(ClientListWorkspacesError::Stopped));
    assert!(!list_started_clients().iter().any(|(handle, _)| *handle == client));
    assert_matches!(client_stop(client).await, Err(ClientStopError::Internal(_)));
}

#[tokio::test]
async fn test_start_with_missing_key_file() {
    let tmp = tempfile::tempdir().unwrap();
    let access = DeviceAccessStrategy::Password {
        key_file: tmp.path().join("missing.keys"),
        password: "whatever".to_owned(),
    };
    assert!(matches!(
        client_start(config(tmp.path()), access).await,
        Err(ClientStartError::LoadDeviceInvalidPath(_) | ClientStartError::Internal(_))
    ));
}

#[tokio::test]
async fn test_stopping_client_releases_its_workspaces() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    let realm_id = client_create_workspace(client, name("Notes")).await.unwrap();
    let workspace = client_start_workspace(client, realm_id).await.unwrap();
    // Starting twice gives back the same handle
    assert_eq!(client_start_workspace(client, realm_id).await.unwrap(), workspace);

    let info = workspace_info(workspace).await.unwrap();
    assert_eq!(info.client, client);
    assert_eq!(info.id, realm_id);
    assert_eq!(info.current_name, name("Notes"));
    assert!(info.mountpoints.is_empty());

    let (mountpoint, mount_dir) = workspace_mount(workspace).await.unwrap();
    assert!(mount_dir.starts_with(tmp.path().join("mountpoints")));
    assert!(mount_dir.is_dir());
    assert_eq!(
        mountpoint_to_os_path(mountpoint, &path("/a/b.txt")).unwrap(),
        mount_dir.join("a").join("b.txt")
    );
    assert_eq!(workspace_info(workspace).await.unwrap().mountpoints, vec![(mountpoint, mount_dir.clone())]);

    client_stop(client).await.unwrap();
    assert_matches!(
        workspace_stat_entry(workspace, &path("/")).await,
        Err(WorkspaceStatEntryError::Stopped)
    );
    assert!(mountpoint_to_os_path(mountpoint, &path("/")).is_err());
    assert!(!mount_dir.exists());
}

#[tokio::test]
async fn test_release_with_wrong_kind_leaves_resources_alive() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let realm_id = client_create_workspace(client, name("Notes")).await.unwrap();
    let workspace = client_start_workspace(client, realm_id).await.unwrap();
    let wksp1_id = env.workspace("wksp1").unwrap().realm_id;
    let history = client_start_workspace_history(client, wksp1_id).await.unwrap();

    assert_matches!(release_canceller(client), Err(CancelError::NotBound));
    assert_matches!(
        claimer_greeter_abort_operation(client),
        Err(ClaimerGreeterAbortOperationError::Internal(_))
    );
    assert_matches!(
        claimer_greeter_abort_operation(workspace),
        Err(ClaimerGreeterAbortOperationError::Internal(_))
    );
    assert_matches!(workspace_history_stop(workspace).await, Err(WorkspaceHistoryStopError::Internal(_)));
    assert_matches!(workspace_stop(history).await, Err(WorkspaceStopError::Internal(_)));
    assert_matches!(release_canceller(history), Err(CancelError::NotBound));

    assert_eq!(client_info(client).unwrap().device_id, alice.device_id);
    workspace_stat_entry(workspace, &path("/")).await.unwrap();
    workspace_history_get_timestamp_lower_bound(history).unwrap();

    client_stop(client).await.unwrap();
}

#[tokio::test]
async fn test_client_stop_goes_on_after_a_workspace_fails_to_stop() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let broken_id = client_create_workspace(client, name("Broken")).await.unwrap();
    let other_id = client_create_workspace(client, name("Other")).await.unwrap();
    let broken = client_start_workspace(client, broken_id).await.unwrap();
    let other = client_start_workspace(client, other_id).await.unwrap();

    // A directory in the way of the temporary file keeps the workspace from being saved
    let workspaces_dir = tmp.path().join("data").join(alice.device_id.hex()).join("workspaces");
    std::fs::create_dir_all(workspaces_dir.join(format!("{}.tmp", broken_id.hex()))).unwrap();
    assert!(workspace_create_file(broken, &path("/unsaved.txt")).await.is_err());

    assert!(client_stop(client).await.is_err());
    assert_matches!(
        workspace_stat_entry(broken, &path("/")).await,
        Err(WorkspaceStatEntryError::Stopped)
    );
    assert_matches!(
        workspace_stat_entry(other, &path("/")).await,
        Err(WorkspaceStatEntryError::Stopped)
    );
    assert_matches!(client_info(client), Err(ClientInfoError::Stopped));
    assert!(list_started_clients().iter().all(|(handle, _)| *handle != client));

    // The device is free to be started again
    let restarted = client_start_with_device(config(tmp.path()), alice).await.unwrap();
    client_stop(restarted).await.unwrap();
}
