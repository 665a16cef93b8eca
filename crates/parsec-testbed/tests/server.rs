use assert_matches::assert_matches;
use parsec_connection::protocol::*;
use parsec_connection::{authenticated_cmds, invited_cmds, ConnectionError, ServerEvent};
use parsec_testbed::TestbedEnv;
use parsec_types::{AnyCertificate, RealmRole, UserProfile, VlobID};
use std::collections::BTreeMap;

#[tokio::test]
async fn test_coolorg_certificates() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let alice = env.device("alice").unwrap();
    let cmds = env.cmds(&alice).unwrap();

    let certificates = cmds.certificate_get(None).await.unwrap();
    let root_key = env.root_signing_key.verify_key();
    assert_matches!(
        AnyCertificate::verify_and_load(&certificates[0], &root_key),
        Ok(AnyCertificate::User(user)) if user.profile == UserProfile::Admin
    );
    let last = AnyCertificate::unsecure_load(certificates.last().unwrap())
        .unwrap()
        .timestamp();
    assert!(cmds.certificate_get(Some(last)).await.unwrap().is_empty());

    let wksp1 = env.workspace("wksp1").unwrap();
    let bob = env.device("bob").unwrap();
    let bob_cmds = env.cmds(&bob).unwrap();
    assert_matches!(
        bob_cmds.realm_get_keys_bundle(wksp1.realm_id).await,
        Ok(RealmGetKeysBundleRep::Ok { .. })
    );
    let mallory = env.device("mallory").unwrap();
    assert_matches!(
        env.cmds(&mallory).unwrap().realm_get_keys_bundle(wksp1.realm_id).await,
        Ok(RealmGetKeysBundleRep::AuthorNotAllowed)
    );

    let invitations = cmds.invite_list().await.unwrap();
    assert_eq!(invitations.len(), 2);
}

#[tokio::test]
async fn test_offline_server() {
    let env = TestbedEnv::minimal().await.unwrap();
    let alice = env.device("alice").unwrap();
    let cmds = env.cmds(&alice).unwrap();

    env.server.set_online(false);
    assert_matches!(cmds.ping("hello".into()).await, Err(ConnectionError::NoResponse));
    env.server.set_online(true);
    assert_eq!(cmds.ping("hello".into()).await.unwrap(), "hello");
}

#[tokio::test]
async fn test_dropped_server_is_unreachable() {
    let env = TestbedEnv::minimal().await.unwrap();
    let alice = env.device("alice").unwrap();
    let addr = env.server.addr().clone();
    let organization_id = env.organization_id.clone();
    drop(env);
    assert_matches!(
        authenticated_cmds(&addr, &organization_id, alice.device_id).err(),
        Some(ConnectionError::NoResponse)
    );
}

#[tokio::test]
async fn test_vlob_lifecycle() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let alice = env.device("alice").unwrap();
    let bob = env.device("bob").unwrap();
    let realm_id = env.workspace("wksp1").unwrap().realm_id;
    let cmds = env.cmds(&alice).unwrap();
    let vlob_id = VlobID::default_new();

    let t1 = alice.now();
    assert_matches!(
        cmds.vlob_create(realm_id, vlob_id, 1, t1, b"v1".to_vec()).await,
        Ok(VlobWriteRep::Ok)
    );
    assert_matches!(
        cmds.vlob_create(realm_id, vlob_id, 1, alice.now(), b"v1".to_vec()).await,
        Ok(VlobWriteRep::VlobAlreadyExists)
    );
    assert_matches!(
        cmds.vlob_update(realm_id, vlob_id, 1, 3, alice.now(), b"v3".to_vec()).await,
        Ok(VlobWriteRep::BadVlobVersion)
    );
    let t2 = alice.now();
    assert_matches!(
        cmds.vlob_update(realm_id, vlob_id, 1, 2, t2, b"v2".to_vec()).await,
        Ok(VlobWriteRep::Ok)
    );

    // Bob is only reader
    let bob_cmds = env.cmds(&bob).unwrap();
    assert_matches!(
        bob_cmds.vlob_create(realm_id, VlobID::default_new(), 1, bob.now(), vec![]).await,
        Ok(VlobWriteRep::AuthorNotAllowed)
    );

    let rep = bob_cmds.vlob_read_batch(realm_id, vec![vlob_id], None).await.unwrap();
    assert_matches!(rep, VlobReadRep::Ok { items } if items[0].version == 2 && items[0].blob == b"v2");
    let rep = bob_cmds.vlob_read_batch(realm_id, vec![vlob_id], Some(t1)).await.unwrap();
    assert_matches!(rep, VlobReadRep::Ok { items } if items[0].version == 1);

    let rep = bob_cmds.vlob_poll_changes(realm_id, 1).await.unwrap();
    assert_matches!(
        rep,
        VlobPollChangesRep::Ok { current_checkpoint: 2, changes } if changes.len() == 1 && changes[0].version == 2
    );
}

#[tokio::test]
async fn test_vlob_write_before_last_realm_certificate() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let alice = env.device("alice").unwrap();
    let realm_id = env.workspace("wksp1").unwrap().realm_id;
    let cmds = env.cmds(&alice).unwrap();

    let too_old = alice.now() - chrono::Duration::seconds(60);
    assert_matches!(
        cmds.vlob_create(realm_id, VlobID::default_new(), 1, too_old, vec![]).await,
        Ok(VlobWriteRep::RequireGreaterTimestamp { .. })
    );
    let way_too_old = alice.now() - chrono::Duration::hours(1);
    assert_matches!(
        cmds.vlob_create(realm_id, VlobID::default_new(), 1, way_too_old, vec![]).await,
        Ok(VlobWriteRep::TimestampOutOfBallpark { .. })
    );
}

#[tokio::test]
async fn test_frozen_and_tos() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let alice = env.device("alice").unwrap();
    let bob = env.device("bob").unwrap();
    let bob_cmds = env.cmds(&bob).unwrap();

    env.server.freeze_user(&env.organization_id, bob.user_id, true);
    assert_matches!(bob_cmds.server_config().await, Err(ConnectionError::FrozenUser));
    assert_matches!(
        env.cmds(&alice).unwrap().user_list_frozen().await,
        Ok(UserListFrozenRep::Ok { frozen_users }) if frozen_users == vec![bob.user_id]
    );
    env.server.freeze_user(&env.organization_id, bob.user_id, false);

    let mut urls = BTreeMap::new();
    urls.insert("en_US".to_owned(), "https://parsec.invalid/tos_en.pdf".to_owned());
    env.server.set_tos(&env.organization_id, urls);
    assert_matches!(bob_cmds.server_config().await, Err(ConnectionError::UserMustAcceptTos));
    let tos = match bob_cmds.tos_get().await.unwrap() {
        TosGetRep::Ok(tos) => tos,
        rep => panic!("unexpected {rep:?}"),
    };
    assert_matches!(
        bob_cmds.tos_accept(tos.updated_on - chrono::Duration::seconds(1)).await,
        Ok(TosAcceptRep::TosMismatch)
    );
    assert_matches!(bob_cmds.tos_accept(tos.updated_on).await, Ok(TosAcceptRep::Ok));
    assert!(bob_cmds.server_config().await.is_ok());
}

#[tokio::test]
async fn test_events_listen() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let bob = env.device("bob").unwrap();
    let mut events = env.cmds(&bob).unwrap().events_listen().await.unwrap();
    assert_matches!(events.recv().await, Some(ServerEvent::ServerConfig(_)));

    let alice = env.device("alice").unwrap();
    let realm_id = env.workspace("wksp1").unwrap().realm_id;
    let vlob_id = VlobID::default_new();
    env.cmds(&alice)
        .unwrap()
        .vlob_create(realm_id, vlob_id, 1, alice.now(), vec![])
        .await
        .unwrap();
    assert_matches!(
        events.recv().await,
        Some(ServerEvent::RealmVlob { vlob_id: id, version: 1, .. }) if id == vlob_id
    );

    env.server.set_online(false);
    assert_matches!(events.recv().await, None);
}

#[tokio::test]
async fn test_share_rules() {
    let mut env = TestbedEnv::coolorg().await.unwrap();
    let alice = env.device("alice").unwrap();
    let mallory = env.device("mallory").unwrap();
    env.new_workspace(&alice, "wksp2").await.unwrap();

    assert!(env
        .share_workspace(&alice, "wksp2", &mallory, RealmRole::Reader)
        .await
        .is_ok());
    let err = env
        .share_workspace(&alice, "wksp2", &mallory, RealmRole::Manager)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("RoleIncompatibleWithOutsider"));
}

#[tokio::test]
async fn test_invitation_authentication() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let alice = env.device("alice").unwrap();
    let token = env.invitation("zack").unwrap();
    let invited = invited_cmds(env.server.addr(), &env.organization_id, token).unwrap();

    assert_matches!(
        invited.invite_info().await,
        Ok(InviteInfoRep::User { claimer_email, administrators, .. })
            if claimer_email.as_str() == "zack@example.invalid" && administrators.len() == 1
    );

    assert_matches!(
        env.cmds(&alice).unwrap().invite_cancel(token).await,
        Ok(InviteCancelRep::Ok)
    );
    assert_matches!(
        invited.invite_info().await,
        Err(ConnectionError::InvitationAlreadyUsedOrDeleted)
    );
}
