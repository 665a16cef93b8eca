mod common;

use assert_matches::assert_matches;
use common::{config, password_strategy, start_client};
use parsec_client::client::ClientCancelInvitationError;
use parsec_client::invite::{
    claimer_retrieve_info, AnyClaimRetrievedInfoCtx, ClaimInProgressError, ClaimerRetrieveInfoError,
    GreetInProgressError,
};
use parsec_client::Client;
use parsec_device_loader::DeviceAccessStrategy;
use parsec_testbed::{TestbedEnv, TESTBED_PASSWORD};
use parsec_types::{
    CancelledGreetingAttemptReason, DeviceLabel, GreeterOrClaimer, HumanHandle, InvitationType,
    ParsecInvitationAddr, UserProfile,
};

fn invitation_addr(env: &TestbedEnv, ty: InvitationType, name: &str) -> ParsecInvitationAddr {
    ParsecInvitationAddr::new(
        env.server.addr().clone(),
        env.organization_id.clone(),
        ty,
        env.invitation(name).unwrap(),
    )
}

#[tokio::test]
async fn test_device_invitation() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let token = env.invitation("alice_new_device").unwrap();

    let addr = invitation_addr(&env, InvitationType::Device, "alice_new_device");
    let claim = match claimer_retrieve_info(config(tmp.path()), addr, None).await.unwrap() {
        AnyClaimRetrievedInfoCtx::Device(ctx) => ctx,
        _ => panic!("expected a device invitation"),
    };
    assert_eq!(claim.greeter_user_id(), alice.user_id);
    let greet = client.start_device_invitation_greet(token);

    let (greet, claim) = tokio::join!(greet.do_wait_peer(), claim.do_wait_peer());
    let (greet, claim) = (greet.unwrap(), claim.unwrap());
    assert_eq!(greet.greeter_sas(), claim.greeter_sas());

    let greeter_sas = greet.greeter_sas().clone();
    let (greet, claim) = tokio::join!(greet.do_wait_peer_trust(), claim.do_pick_greeter_sas(&greeter_sas));
    let (greet, claim) = (greet.unwrap(), claim.unwrap());
    assert_eq!(greet.claimer_sas(), claim.claimer_sas());

    let (greet, claim) = tokio::join!(greet.do_signify_trust(), claim.do_wait_peer_trust());
    let (greet, claim) = (greet.unwrap(), claim.unwrap());

    let requested: DeviceLabel = "dev3".parse().unwrap();
    let greeter_side = async {
        let greet = greet.do_get_claim_requests().await.unwrap();
        assert_eq!(greet.requested_device_label(), &requested);
        let device_label = greet.requested_device_label().clone();
        greet.do_create(device_label).await
    };
    let (created, finalize) = tokio::join!(greeter_side, claim.do_claim(requested.clone()));
    created.unwrap();
    let finalize = finalize.unwrap();
    assert_eq!(finalize.new_local_device().user_id, alice.user_id);
    assert_eq!(finalize.new_local_device().device_label, requested);

    let key_file = finalize.get_default_key_file();
    let available = finalize
        .save_local_device(&password_strategy(), &key_file)
        .await
        .unwrap();
    client
        .certificates()
        .poll_server_for_new_certificates()
        .await
        .unwrap();
    assert_eq!(client.list_user_devices(alice.user_id).await.unwrap().len(), 3);

    // The claimed device is usable on its own
    let new_client = Client::start(
        config(tmp.path()),
        &DeviceAccessStrategy::Password {
            key_file: available.key_file_path,
            password: TESTBED_PASSWORD.to_owned(),
        },
    )
    .await
    .unwrap();
    assert_eq!(new_client.device().device_id, available.device_id);
    new_client.stop().await.unwrap();
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_user_invitation() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let token = env.invitation("zack").unwrap();

    let addr = invitation_addr(&env, InvitationType::User, "zack");
    let claim = match claimer_retrieve_info(config(tmp.path()), addr, None).await.unwrap() {
        AnyClaimRetrievedInfoCtx::User(ctx) => ctx,
        _ => panic!("expected a user invitation"),
    };
    assert_eq!(claim.claimer_email().to_string(), "zack@example.invalid");
    assert_eq!(claim.administrators().len(), 1);
    let greet = client.start_user_invitation_greet(token);

    let (greet, claim) = tokio::join!(greet.do_wait_peer(), claim.wait_all_peers());
    let (greet, claim) = (greet.unwrap(), claim.unwrap());
    let (greet, claim) = tokio::join!(greet.do_wait_peer_trust(), claim.do_signify_trust());
    let (greet, claim) = (greet.unwrap(), claim.unwrap());
    let (greet, claim) = tokio::join!(greet.do_signify_trust(), claim.do_wait_peer_trust());
    let (greet, claim) = (greet.unwrap(), claim.unwrap());

    let human_handle = HumanHandle::from_raw("zack@example.invalid", "Zack").unwrap();
    let greeter_side = async {
        let greet = greet.do_get_claim_requests().await.unwrap();
        assert_eq!(greet.requested_human_handle(), &human_handle);
        let human_handle = greet.requested_human_handle().clone();
        let device_label = greet.requested_device_label().clone();
        // The greeter has the final say on the profile
        greet.do_create(human_handle, device_label, UserProfile::Outsider).await
    };
    let (created, finalize) = tokio::join!(
        greeter_side,
        claim.do_claim("laptop".parse().unwrap(), human_handle.clone())
    );
    created.unwrap();
    let finalize = finalize.unwrap();
    let zack = finalize.new_local_device().clone();
    assert_eq!(zack.human_handle, human_handle);
    assert_eq!(zack.initial_profile, UserProfile::Outsider);

    client
        .certificates()
        .poll_server_for_new_certificates()
        .await
        .unwrap();
    assert_eq!(client.list_users(false).await.unwrap().len(), 4);
    assert_eq!(
        client.get_user_info(zack.user_id).await.unwrap().current_profile,
        UserProfile::Outsider
    );

    // A completed invitation cannot be claimed again
    let addr = invitation_addr(&env, InvitationType::User, "zack");
    assert_matches!(
        claimer_retrieve_info(config(tmp.path()), addr, None).await,
        Err(ClaimerRetrieveInfoError::AlreadyUsedOrDeleted)
    );
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_wrong_greeter_sas_cancels_attempt() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let token = env.invitation("alice_new_device").unwrap();

    let addr = invitation_addr(&env, InvitationType::Device, "alice_new_device");
    let claim = match claimer_retrieve_info(config(tmp.path()), addr, None).await.unwrap() {
        AnyClaimRetrievedInfoCtx::Device(ctx) => ctx,
        _ => panic!("expected a device invitation"),
    };
    let greet = client.start_device_invitation_greet(token);
    let (greet, claim) = tokio::join!(greet.do_wait_peer(), claim.do_wait_peer());
    let (greet, claim) = (greet.unwrap(), claim.unwrap());

    let wrong = claim
        .generate_greeter_sas_choices(4)
        .into_iter()
        .find(|candidate| candidate != claim.greeter_sas())
        .unwrap();
    let (greet, claim) = tokio::join!(greet.do_wait_peer_trust(), claim.do_pick_greeter_sas(&wrong));
    assert_matches!(
        claim,
        Err(ClaimInProgressError::GreetingAttemptCancelled {
            origin: GreeterOrClaimer::Claimer,
            reason: CancelledGreetingAttemptReason::InvalidSasCode,
            ..
        })
    );
    assert_matches!(
        greet,
        Err(GreetInProgressError::GreetingAttemptCancelled {
            origin: GreeterOrClaimer::Claimer,
            reason: CancelledGreetingAttemptReason::InvalidSasCode,
            ..
        })
    );

    // The invitation itself is still pending
    let addr = invitation_addr(&env, InvitationType::Device, "alice_new_device");
    assert!(claimer_retrieve_info(config(tmp.path()), addr, None).await.is_ok());
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_new_and_cancel_invitation() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    let info = client
        .new_user_invitation("philip@example.invalid".parse().unwrap(), false)
        .await
        .unwrap();
    assert_eq!(info.addr.token(), info.token);
    assert_eq!(info.addr.invitation_type(), InvitationType::User);
    assert!(client
        .list_invitations()
        .await
        .unwrap()
        .iter()
        .any(|item| item.token() == info.token));

    client.cancel_invitation(info.token).await.unwrap();
    assert_matches!(
        client.cancel_invitation(info.token).await,
        Err(ClientCancelInvitationError::InvitationAlreadyCancelled)
    );
    assert_matches!(
        claimer_retrieve_info(config(tmp.path()), info.addr, None).await,
        Err(ClaimerRetrieveInfoError::AlreadyUsedOrDeleted)
    );
    client.stop().await.unwrap();
}
