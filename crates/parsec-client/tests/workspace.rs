mod common;

use assert_matches::assert_matches;
use common::start_client;
use parsec_client::client::{ClientShareWorkspaceError, ClientStartWorkspaceError};
use parsec_client::workspace::{
    EntryStat, OpenOptions, WorkspaceCreateEntryError, WorkspaceFdWriteError, WorkspaceHistoryEntryStat,
    WorkspaceHistorySetTimestampOfInterestError, WorkspaceOpenFileError, WorkspaceStatEntryError, MAX_FILE_SIZE,
};
use parsec_testbed::TestbedEnv;
use parsec_types::{EntryName, FsPath, RealmRole, VlobID};

fn path(raw: &str) -> FsPath {
    raw.parse().unwrap()
}

fn name(raw: &str) -> EntryName {
    raw.parse().unwrap()
}

#[tokio::test]
async fn test_local_workspace_lifecycle() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    let realm_id = client.create_workspace(name("Projects")).await.unwrap();
    let info = client
        .list_workspaces()
        .await
        .into_iter()
        .find(|workspace| workspace.id == realm_id)
        .unwrap();
    assert_eq!(info.current_name, name("Projects"));
    assert_eq!(info.current_self_role, RealmRole::Owner);
    assert!(!info.is_bootstrapped);

    let users = client.list_workspace_users(realm_id).await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, alice.user_id);
    assert_eq!(users[0].current_role, RealmRole::Owner);

    client.rename_workspace(realm_id, name("Archives")).await.unwrap();
    let renamed = client
        .list_workspaces()
        .await
        .into_iter()
        .find(|workspace| workspace.id == realm_id)
        .unwrap();
    assert_eq!(renamed.current_name, name("Archives"));

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_files_and_folders() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let realm_id = client.create_workspace(name("Docs")).await.unwrap();
    let workspace = client.start_workspace(realm_id).await.unwrap();

    // Starting twice gives the same workspace
    let again = client.start_workspace(realm_id).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&workspace, &again));

    workspace.create_folder_all(&path("/a/b")).await.unwrap();
    let fd = workspace
        .open_file(&path("/a/b/notes.txt"), OpenOptions::create())
        .await
        .unwrap();
    assert_eq!(workspace.fd_write(fd, 0, b"hello world").await.unwrap(), 11);
    assert_eq!(workspace.fd_read(fd, 6, 100).await.unwrap(), b"world");
    workspace.fd_close(fd).await.unwrap();

    let children = workspace.stat_folder_children(&path("/a/b")).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].0, name("notes.txt"));
    assert_matches!(children[0].1, EntryStat::File { size: 11, .. });

    assert_matches!(
        workspace.stat_entry(&path("/a/missing")).await,
        Err(WorkspaceStatEntryError::EntryNotFound)
    );

    client.stop().await.unwrap();
    assert!(workspace.is_stopped());
}

#[tokio::test]
async fn test_write_past_max_file_size() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let realm_id = client.create_workspace(name("Docs")).await.unwrap();
    let workspace = client.start_workspace(realm_id).await.unwrap();

    let fd = workspace
        .open_file(&path("/big.bin"), OpenOptions::create())
        .await
        .unwrap();
    assert_eq!(workspace.fd_write(fd, 0, b"abc").await.unwrap(), 3);

    assert_matches!(
        workspace.fd_write(fd, u64::MAX, b"x").await,
        Err(WorkspaceFdWriteError::FileTooLarge { max }) if max == MAX_FILE_SIZE
    );
    assert_matches!(
        workspace.fd_write(fd, MAX_FILE_SIZE, b"x").await,
        Err(WorkspaceFdWriteError::FileTooLarge { .. })
    );
    assert_matches!(
        workspace.fd_resize(fd, u64::MAX, false).await,
        Err(WorkspaceFdWriteError::FileTooLarge { .. })
    );

    // Failed writes leave the file as it was
    assert_eq!(workspace.fd_write_start_eof(fd, b"def").await.unwrap(), 3);
    assert_eq!(workspace.fd_read(fd, 0, 100).await.unwrap(), b"abcdef");
    workspace.fd_close(fd).await.unwrap();

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_workspace_cannot_start() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    assert_matches!(
        client.start_workspace(VlobID::default_new()).await,
        Err(ClientStartWorkspaceError::WorkspaceNotFound)
    );
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_share_workspace() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let bob = env.device("bob").unwrap();
    let mallory = env.device("mallory").unwrap();
    let realm_id = env.workspace("wksp1").unwrap().realm_id;
    let client = start_client(&env, "alice", tmp.path()).await;

    assert_matches!(
        client.share_workspace(realm_id, alice.user_id, Some(RealmRole::Reader)).await,
        Err(ClientShareWorkspaceError::RecipientIsSelf)
    );
    assert_matches!(
        client.share_workspace(realm_id, mallory.user_id, Some(RealmRole::Manager)).await,
        Err(ClientShareWorkspaceError::RoleIncompatibleWithOutsider)
    );
    // Bob already is a reader
    client
        .share_workspace(realm_id, bob.user_id, Some(RealmRole::Reader))
        .await
        .unwrap();

    client
        .share_workspace(realm_id, mallory.user_id, Some(RealmRole::Reader))
        .await
        .unwrap();
    let roles: Vec<_> = client
        .list_workspace_users(realm_id)
        .await
        .unwrap()
        .into_iter()
        .map(|user| (user.user_id, user.current_role))
        .collect();
    assert!(roles.contains(&(mallory.user_id, RealmRole::Reader)));
    assert!(roles.contains(&(bob.user_id, RealmRole::Reader)));

    // Mallory sees the workspace under its name
    let mallory_client = start_client(&env, "mallory", tmp.path()).await;
    let workspaces = mallory_client.list_workspaces().await;
    assert_eq!(workspaces.len(), 1);
    assert_eq!(workspaces[0].id, realm_id);
    assert_eq!(workspaces[0].current_name, name("wksp1"));
    assert_eq!(workspaces[0].current_self_role, RealmRole::Reader);

    client.share_workspace(realm_id, mallory.user_id, None).await.unwrap();
    mallory_client
        .certificates()
        .poll_server_for_new_certificates()
        .await
        .unwrap();
    assert!(mallory_client.list_workspaces().await.is_empty());

    mallory_client.stop().await.unwrap();
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_reader_cannot_write() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let bob = env.device("bob").unwrap();
    let realm_id = env.workspace("wksp1").unwrap().realm_id;
    let alice_client = start_client(&env, "alice", tmp.path()).await;
    let bob_client = start_client(&env, "bob", tmp.path()).await;
    let workspace = bob_client.start_workspace(realm_id).await.unwrap();

    assert_matches!(
        workspace.create_file(&path("/notes.txt")).await,
        Err(WorkspaceCreateEntryError::ReadOnlyRealm)
    );
    assert_matches!(
        workspace.create_folder(&path("/folder")).await,
        Err(WorkspaceCreateEntryError::ReadOnlyRealm)
    );
    assert_matches!(
        workspace.open_file(&path("/notes.txt"), OpenOptions::create()).await,
        Err(WorkspaceOpenFileError::ReadOnlyRealm)
    );

    // Writing through a file opened before the downgrade is refused too
    alice_client
        .share_workspace(realm_id, bob.user_id, Some(RealmRole::Contributor))
        .await
        .unwrap();
    bob_client
        .certificates()
        .poll_server_for_new_certificates()
        .await
        .unwrap();
    let fd = workspace
        .open_file(&path("/notes.txt"), OpenOptions::create())
        .await
        .unwrap();
    workspace.fd_write(fd, 0, b"draft").await.unwrap();

    alice_client
        .share_workspace(realm_id, bob.user_id, Some(RealmRole::Reader))
        .await
        .unwrap();
    bob_client
        .certificates()
        .poll_server_for_new_certificates()
        .await
        .unwrap();
    assert_matches!(
        workspace.fd_write(fd, 5, b" more").await,
        Err(WorkspaceFdWriteError::ReadOnlyRealm)
    );
    assert_eq!(workspace.fd_read(fd, 0, 64).await.unwrap(), b"draft");
    workspace.fd_close(fd).await.unwrap();

    bob_client.stop().await.unwrap();
    alice_client.stop().await.unwrap();
}

#[tokio::test]
async fn test_sync_between_users() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let realm_id = env.workspace("wksp1").unwrap().realm_id;
    let alice_client = start_client(&env, "alice", tmp.path()).await;
    let bob_client = start_client(&env, "bob", tmp.path()).await;

    let alice_workspace = alice_client.start_workspace(realm_id).await.unwrap();
    let fd = alice_workspace
        .open_file(&path("/hello.txt"), OpenOptions::create())
        .await
        .unwrap();
    alice_workspace.fd_write(fd, 0, b"hello from alice").await.unwrap();
    alice_workspace.fd_close(fd).await.unwrap();
    assert!(!alice_workspace.get_need_outbound_sync().await.unwrap().is_empty());
    alice_workspace.sync().await.unwrap();
    assert!(alice_workspace.get_need_outbound_sync().await.unwrap().is_empty());

    let bob_workspace = bob_client.start_workspace(realm_id).await.unwrap();
    bob_workspace.inbound_sync().await.unwrap();
    let fd = bob_workspace
        .open_file(&path("/hello.txt"), OpenOptions::read_only())
        .await
        .unwrap();
    assert_eq!(bob_workspace.fd_read(fd, 0, 1024).await.unwrap(), b"hello from alice");
    bob_workspace.fd_close(fd).await.unwrap();

    // The history sees what was synced
    let history = bob_client.start_workspace_history(realm_id).await.unwrap();
    assert!(history.get_timestamp_lower_bound() <= history.get_timestamp_higher_bound());
    let children = history.stat_folder_children(&FsPath::root()).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].0, name("hello.txt"));
    assert_matches!(children[0].1, WorkspaceHistoryEntryStat::File { size: 16, .. });
    let fd = history.open_file(&path("/hello.txt")).await.unwrap();
    assert_eq!(history.fd_read(fd, 6, 4).await.unwrap(), b"from");
    history.fd_close(fd).await.unwrap();

    // Back when the workspace was created the file did not exist
    history
        .set_timestamp_of_interest(history.get_timestamp_lower_bound())
        .await
        .unwrap();
    assert!(history.open_file(&path("/hello.txt")).await.is_err());

    bob_client.stop().await.unwrap();
    assert!(history.is_stopped());
    alice_client.stop().await.unwrap();
}

#[tokio::test]
async fn test_history_timestamp_of_interest() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let realm_id = env.workspace("wksp1").unwrap().realm_id;
    let client = start_client(&env, "alice", tmp.path()).await;
    let workspace = client.start_workspace(realm_id).await.unwrap();

    let fd = workspace
        .open_file(&path("/versioned.txt"), OpenOptions::create())
        .await
        .unwrap();
    workspace.fd_write(fd, 0, b"first").await.unwrap();
    workspace.fd_close(fd).await.unwrap();
    workspace.sync().await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let between_versions = chrono::Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let fd = workspace
        .open_file(&path("/versioned.txt"), OpenOptions::read_write())
        .await
        .unwrap();
    workspace.fd_write(fd, 0, b"second version").await.unwrap();
    workspace.fd_close(fd).await.unwrap();
    workspace.sync().await.unwrap();

    let history = client.start_workspace_history(realm_id).await.unwrap();
    let lower = history.get_timestamp_lower_bound();
    let higher = history.get_timestamp_higher_bound();

    assert_matches!(
        history.set_timestamp_of_interest(lower - chrono::Duration::seconds(1)).await,
        Err(WorkspaceHistorySetTimestampOfInterestError::OlderThanLowerBound { timestamp_lower_bound })
            if timestamp_lower_bound == lower
    );
    assert_matches!(
        history.set_timestamp_of_interest(higher + chrono::Duration::seconds(1)).await,
        Err(WorkspaceHistorySetTimestampOfInterestError::NewerThanHigherBound { timestamp_higher_bound })
            if timestamp_higher_bound == higher
    );
    // Rejected timestamps leave the view where it was
    assert_eq!(history.get_timestamp_of_interest().await, higher);

    let fd = history.open_file(&path("/versioned.txt")).await.unwrap();
    assert_eq!(history.fd_read(fd, 0, 64).await.unwrap(), b"second version");

    history.set_timestamp_of_interest(between_versions).await.unwrap();
    assert_eq!(history.get_timestamp_of_interest().await, between_versions);
    assert_matches!(
        history.stat_entry(&path("/versioned.txt")).await,
        Ok(WorkspaceHistoryEntryStat::File { size: 5, .. })
    );
    assert_eq!(history.fd_read(fd, 0, 64).await.unwrap(), b"first");
    history.fd_close(fd).await.unwrap();

    client.stop().await.unwrap();
}
