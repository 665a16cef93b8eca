mod common;

use assert_matches::assert_matches;
use common::{config, password_strategy, start_client};
use parsec_client::client::{ClientRevokeUserError, ClientSetupShamirRecoveryError};
use parsec_client::{bootstrap_organization, Client, ClientEvent, ClientInfoError, ClientStartError};
use parsec_device_loader::DeviceAccessStrategy;
use parsec_testbed::{TestbedEnv, TESTBED_PASSWORD};
use parsec_types::{HumanHandle, MockedTime, UserProfile, BALLPARK_CLIENT_LATE_OFFSET};
use std::collections::BTreeMap;

#[tokio::test]
async fn test_start_info_and_stop() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    let info = client.info().unwrap();
    assert_eq!(info.device_id, alice.device_id);
    assert_eq!(info.user_id, alice.user_id);
    assert_eq!(info.organization_id, env.organization_id);
    assert_eq!(info.current_profile, UserProfile::Admin);
    // No monitor was started, nothing tells us the server is reachable
    assert!(!info.is_server_online);

    client.stop().await.unwrap();
    assert!(client.is_stopped());
    assert_matches!(client.info(), Err(ClientInfoError::Stopped));
    // Stopping twice is fine
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_device_cannot_run_twice() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    assert_matches!(
        Client::start_with_device(config(tmp.path()), alice.clone()).await,
        Err(ClientStartError::DeviceAlreadyRunning)
    );

    client.stop().await.unwrap();
    let restarted = Client::start_with_device(config(tmp.path()), alice).await.unwrap();
    // Certificates fetched by the first client were kept on disk
    assert_eq!(restarted.certificates().list_users(false).len(), 3);
    restarted.stop().await.unwrap();
}

#[tokio::test]
async fn test_users_and_devices() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let bob = env.device("bob").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    let users = client.list_users(false).await.unwrap();
    assert_eq!(users.len(), 3);
    assert_eq!(client.list_user_devices(alice.user_id).await.unwrap().len(), 2);

    let bob_info = client.get_user_info(bob.user_id).await.unwrap();
    assert_eq!(bob_info.current_profile, UserProfile::Standard);
    assert_eq!(bob_info.human_handle, bob.human_handle);

    let (user, device) = client.get_user_device(bob.device_id).await.unwrap();
    assert_eq!(user.id, bob.user_id);
    assert_eq!(device.id, bob.device_id);

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_clock_out_of_ballpark() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let mallory = env.device("mallory").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let mut events = client.event_bus().subscribe();

    alice.time_provider.mock_time(MockedTime::ShiftedBy(chrono::Duration::hours(1)));
    let res = client.revoke_user(mallory.user_id).await;
    assert_matches!(
        res,
        Err(ClientRevokeUserError::TimestampOutOfBallpark {
            server_timestamp,
            client_timestamp,
            ballpark_client_late_offset,
            ..
        }) if client_timestamp > server_timestamp && ballpark_client_late_offset == BALLPARK_CLIENT_LATE_OFFSET
    );
    let mut drift_reported = false;
    while let Ok(event) = events.try_recv() {
        drift_reported |= matches!(event, ClientEvent::TooMuchDriftWithServerClock { .. });
    }
    assert!(drift_reported);

    // Back in the ballpark, nothing was revoked meanwhile
    alice.time_provider.mock_time(MockedTime::RealTime);
    client.revoke_user(mallory.user_id).await.unwrap();
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_revoke_user() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let mallory = env.device("mallory").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    assert_matches!(
        client.revoke_user(alice.user_id).await,
        Err(ClientRevokeUserError::UserIsSelf)
    );

    client.revoke_user(mallory.user_id).await.unwrap();
    assert_eq!(client.list_users(true).await.unwrap().len(), 2);
    assert_matches!(
        client.revoke_user(mallory.user_id).await,
        Err(ClientRevokeUserError::UserAlreadyRevoked)
    );

    // A revoked user is no valid shamir recipient
    let recipients = BTreeMap::from([(mallory.user_id, 1)]);
    assert_matches!(
        client.setup_shamir_recovery(recipients, 1).await,
        Err(ClientSetupShamirRecoveryError::RecipientRevoked(user_id)) if user_id == mallory.user_id
    );

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_standard_user_cannot_revoke() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let mallory = env.device("mallory").unwrap();
    let client = start_client(&env, "bob", tmp.path()).await;

    assert_matches!(
        client.revoke_user(mallory.user_id).await,
        Err(ClientRevokeUserError::AuthorNotAllowed)
    );

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_organization() {
    let env = TestbedEnv::empty().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());

    let available = bootstrap_organization(
        config.clone(),
        env.bootstrap_addr(),
        &password_strategy(),
        HumanHandle::from_raw("alice@example.com", "Alicey McAliceFace").unwrap(),
        "dev1".parse().unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(available.organization_id, env.organization_id);

    let client = Client::start(
        config,
        &DeviceAccessStrategy::Password {
            key_file: available.key_file_path.clone(),
            password: TESTBED_PASSWORD.to_owned(),
        },
    )
    .await
    .unwrap();
    client
        .certificates()
        .poll_server_for_new_certificates()
        .await
        .unwrap();
    assert_eq!(client.device().device_id, available.device_id);
    assert_eq!(client.info().unwrap().current_profile, UserProfile::Admin);
    assert!(client.certificates().bootstrapped_on().is_some());

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_twice_is_refused() {
    let env = TestbedEnv::minimal().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();

    let outcome = bootstrap_organization(
        config(tmp.path()),
        env.bootstrap_addr(),
        &password_strategy(),
        HumanHandle::from_raw("zack@example.com", "Zack").unwrap(),
        "dev1".parse().unwrap(),
    )
    .await;
    assert_matches!(
        outcome,
        Err(parsec_client::client::BootstrapOrganizationError::AlreadyUsedToken)
    );
}
