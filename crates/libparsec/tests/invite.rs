mod common;

use assert_matches::assert_matches;
use common::{config, password_strategy, start_client};
use libparsec::{
    cancel, claimer_device_in_progress_1_do_pick_greeter_sas, claimer_device_in_progress_2_do_wait_peer_trust,
    claimer_device_in_progress_3_do_claim, claimer_device_initial_do_wait_peer, claimer_finalize_save_local_device,
    claimer_greeter_abort_operation, claimer_retrieve_info, claimer_shamir_recovery_add_share,
    claimer_shamir_recovery_in_progress_1_do_signify_trust, claimer_shamir_recovery_in_progress_2_do_wait_peer_trust,
    claimer_shamir_recovery_in_progress_3_do_claim, claimer_shamir_recovery_initial_do_wait_peer,
    claimer_shamir_recovery_pick_recipient, claimer_shamir_recovery_recover_device, claimer_user_list_initial_info,
    client_new_shamir_recovery_invitation, client_setup_shamir_recovery, client_start_device_invitation_greet,
    client_start_shamir_recovery_invitation_greet, client_stop, greeter_device_in_progress_1_do_wait_peer_trust,
    greeter_device_in_progress_2_do_signify_trust, greeter_device_in_progress_3_do_get_claim_requests,
    greeter_device_in_progress_4_do_create, greeter_device_initial_do_wait_peer,
    greeter_shamir_recovery_in_progress_1_do_wait_peer_trust, greeter_shamir_recovery_in_progress_2_do_signify_trust,
    greeter_shamir_recovery_in_progress_3_do_get_claim_requests, greeter_shamir_recovery_initial_do_wait_peer,
    list_available_devices, new_canceller, release_canceller, AnyClaimRetrievedInfo, CancelError,
    ClaimerGreeterAbortOperationError, ShamirRecoveryClaimMaybeRecoverDeviceInfo,
};
use parsec_client::invite::{
    ClaimInProgressError, ClaimerShamirRecoveryPickRecipientError, GreetInProgressError,
};
use parsec_testbed::TestbedEnv;
use parsec_types::{
    CancelledGreetingAttemptReason, DeviceLabel, GreeterOrClaimer, InvitationType, ParsecInvitationAddr,
};
use std::collections::BTreeMap;
use std::time::Duration;

fn invitation_addr(env: &TestbedEnv, ty: InvitationType, name: &str) -> ParsecInvitationAddr {
    ParsecInvitationAddr::new(
        env.server.addr().clone(),
        env.organization_id.clone(),
        ty,
        env.invitation(name).unwrap(),
    )
}

#[tokio::test]
async fn test_device_invitation_over_handles() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let canceller = new_canceller();

    let greet = client_start_device_invitation_greet(client, env.invitation("alice_new_device").unwrap()).unwrap();
    let addr = invitation_addr(&env, InvitationType::Device, "alice_new_device");
    let claim = match claimer_retrieve_info(config(tmp.path()), addr).await.unwrap() {
        AnyClaimRetrievedInfo::Device {
            handle,
            greeter_user_id,
            ..
        } => {
            assert_eq!(greeter_user_id, alice.user_id);
            handle
        }
        info => panic!("expected a device invitation, got {info:?}"),
    };

    let (greet_1, claim_1) = tokio::join!(
        greeter_device_initial_do_wait_peer(canceller, greet.handle),
        claimer_device_initial_do_wait_peer(canceller, claim),
    );
    let (greet_1, claim_1) = (greet_1.unwrap(), claim_1.unwrap());
    assert_eq!(greet_1.greeter_sas, claim_1.greeter_sas);
    assert_eq!(claim_1.greeter_sas_choices.len(), 4);
    assert!(claim_1.greeter_sas_choices.contains(&claim_1.greeter_sas));

    // A consumed stage cannot be run again
    assert_matches!(
        greeter_device_initial_do_wait_peer(canceller, greet.handle).await,
        Err(GreetInProgressError::NotFound)
    );

    let (greet_2, claim_2) = tokio::join!(
        greeter_device_in_progress_1_do_wait_peer_trust(canceller, greet_1.handle),
        claimer_device_in_progress_1_do_pick_greeter_sas(canceller, claim_1.handle, claim_1.greeter_sas.clone()),
    );
    let (greet_2, claim_2) = (greet_2.unwrap(), claim_2.unwrap());
    assert_eq!(greet_2.claimer_sas, claim_2.claimer_sas);
    assert!(greet_2.claimer_sas_choices.contains(&greet_2.claimer_sas));

    let (greet_3, claim_3) = tokio::join!(
        greeter_device_in_progress_2_do_signify_trust(canceller, greet_2.handle),
        claimer_device_in_progress_2_do_wait_peer_trust(canceller, claim_2.handle),
    );
    let (greet_3, claim_3) = (greet_3.unwrap(), claim_3.unwrap());

    let requested: DeviceLabel = "dev3".parse().unwrap();
    let greeter_side = async {
        let greet_4 = greeter_device_in_progress_3_do_get_claim_requests(canceller, greet_3.handle).await?;
        assert_eq!(greet_4.requested_device_label, requested);
        greeter_device_in_progress_4_do_create(canceller, greet_4.handle, greet_4.requested_device_label.clone()).await
    };
    let (created, finalize) = tokio::join!(
        greeter_side,
        claimer_device_in_progress_3_do_claim(canceller, claim_3.handle, requested.clone()),
    );
    created.unwrap();
    let finalize = finalize.unwrap();

    let available = claimer_finalize_save_local_device(finalize.handle, password_strategy())
        .await
        .unwrap();
    assert_eq!(available.user_id, alice.user_id);
    assert_eq!(available.device_label, requested);
    let listed = list_available_devices(&tmp.path().join("config")).await.unwrap();
    assert!(listed.iter().any(|device| device.device_id == available.device_id));

    release_canceller(canceller).unwrap();
    client_stop(client).await.unwrap();
}

#[tokio::test]
async fn test_wrong_greeter_sas_over_handles() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let canceller = new_canceller();

    let greet = client_start_device_invitation_greet(client, env.invitation("alice_new_device").unwrap()).unwrap();
    let addr = invitation_addr(&env, InvitationType::Device, "alice_new_device");
    let claim = match claimer_retrieve_info(config(tmp.path()), addr).await.unwrap() {
        AnyClaimRetrievedInfo::Device { handle, .. } => handle,
        info => panic!("expected a device invitation, got {info:?}"),
    };
    let (greet_1, claim_1) = tokio::join!(
        greeter_device_initial_do_wait_peer(canceller, greet.handle),
        claimer_device_initial_do_wait_peer(canceller, claim),
    );
    let (greet_1, claim_1) = (greet_1.unwrap(), claim_1.unwrap());

    let wrong = claim_1
        .greeter_sas_choices
        .iter()
        .find(|candidate| **candidate != claim_1.greeter_sas)
        .cloned()
        .unwrap();
    let (greet_2, claim_2) = tokio::join!(
        greeter_device_in_progress_1_do_wait_peer_trust(canceller, greet_1.handle),
        claimer_device_in_progress_1_do_pick_greeter_sas(canceller, claim_1.handle, wrong),
    );
    assert_matches!(
        claim_2,
        Err(ClaimInProgressError::GreetingAttemptCancelled {
            origin: GreeterOrClaimer::Claimer,
            reason: CancelledGreetingAttemptReason::InvalidSasCode,
            ..
        })
    );
    assert_matches!(
        greet_2,
        Err(GreetInProgressError::GreetingAttemptCancelled {
            origin: GreeterOrClaimer::Claimer,
            reason: CancelledGreetingAttemptReason::InvalidSasCode,
            ..
        })
    );
    // Failed steps take their stage with them
    assert_matches!(
        claimer_greeter_abort_operation(claim_1.handle),
        Err(ClaimerGreeterAbortOperationError::Internal(_))
    );

    client_stop(client).await.unwrap();
}

#[tokio::test]
async fn test_cancel_waiting_step() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    let idle = new_canceller();
    assert_matches!(cancel(idle), Err(CancelError::NotBound));
    // The cancellation sticks, a step started with it fails right away
    let greet = client_start_device_invitation_greet(client, env.invitation("alice_new_device").unwrap()).unwrap();
    assert_matches!(
        greeter_device_initial_do_wait_peer(idle, greet.handle).await,
        Err(GreetInProgressError::Cancelled)
    );

    // Nobody claims, the greeter waits until cancelled
    let canceller = new_canceller();
    let greet = client_start_device_invitation_greet(client, env.invitation("alice_new_device").unwrap()).unwrap();
    let (waited, ()) = tokio::join!(greeter_device_initial_do_wait_peer(canceller, greet.handle), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel(canceller).unwrap();
    });
    assert_matches!(waited, Err(GreetInProgressError::Cancelled));
    assert_matches!(
        greeter_device_initial_do_wait_peer(new_canceller(), greet.handle).await,
        Err(GreetInProgressError::NotFound)
    );

    client_stop(client).await.unwrap();
}

#[tokio::test]
async fn test_abort_operation() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    let canceller = new_canceller();

    // Idle stage
    let greet = client_start_device_invitation_greet(client, env.invitation("alice_new_device").unwrap()).unwrap();
    claimer_greeter_abort_operation(greet.handle).unwrap();
    assert_matches!(
        greeter_device_initial_do_wait_peer(canceller, greet.handle).await,
        Err(GreetInProgressError::NotFound)
    );

    // Running step
    let greet = client_start_device_invitation_greet(client, env.invitation("alice_new_device").unwrap()).unwrap();
    let (waited, aborted) = tokio::join!(greeter_device_initial_do_wait_peer(canceller, greet.handle), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        claimer_greeter_abort_operation(greet.handle)
    });
    aborted.unwrap();
    assert_matches!(waited, Err(GreetInProgressError::Cancelled));
    assert_matches!(
        claimer_greeter_abort_operation(greet.handle),
        Err(ClaimerGreeterAbortOperationError::Internal(_))
    );

    client_stop(client).await.unwrap();
}

#[tokio::test]
async fn test_shamir_recovery_over_handles() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let bob = env.device("bob").unwrap();
    let mallory = env.device("mallory").unwrap();
    let alice_client = start_client(&env, "alice", tmp.path()).await;
    let bob_client = start_client(&env, "bob", tmp.path()).await;
    let canceller = new_canceller();

    client_setup_shamir_recovery(alice_client, BTreeMap::from([(bob.user_id, 2)]), 2)
        .await
        .unwrap();
    let invitation = client_new_shamir_recovery_invitation(bob_client, alice.user_id, false)
        .await
        .unwrap();

    let pick = match claimer_retrieve_info(config(tmp.path()), invitation.addr.clone()).await.unwrap() {
        AnyClaimRetrievedInfo::ShamirRecovery {
            handle,
            claimer_user_id,
            threshold,
            recipients,
            is_recoverable,
            ..
        } => {
            assert_eq!(claimer_user_id, alice.user_id);
            assert_eq!(threshold, 2);
            assert_eq!(recipients.len(), 1);
            assert!(is_recoverable);
            handle
        }
        info => panic!("expected a shamir recovery invitation, got {info:?}"),
    };
    assert_matches!(
        claimer_shamir_recovery_pick_recipient(pick, mallory.user_id),
        Err(ClaimerShamirRecoveryPickRecipientError::RecipientNotFound)
    );
    // Not a user invitation
    assert!(claimer_user_list_initial_info(pick).is_err());

    let claim = claimer_shamir_recovery_pick_recipient(pick, bob.user_id).unwrap();
    assert_eq!(claim.greeter_user_id, bob.user_id);
    let greet = client_start_shamir_recovery_invitation_greet(bob_client, invitation.token)
        .await
        .unwrap();

    let (greet_1, claim_1) = tokio::join!(
        greeter_shamir_recovery_initial_do_wait_peer(canceller, greet.handle),
        claimer_shamir_recovery_initial_do_wait_peer(canceller, claim.handle),
    );
    let (greet_1, claim_1) = (greet_1.unwrap(), claim_1.unwrap());
    let (greet_2, claim_2) = tokio::join!(
        greeter_shamir_recovery_in_progress_1_do_wait_peer_trust(canceller, greet_1.handle),
        claimer_shamir_recovery_in_progress_1_do_signify_trust(canceller, claim_1.handle),
    );
    let (greet_2, claim_2) = (greet_2.unwrap(), claim_2.unwrap());
    let (greet_3, claim_3) = tokio::join!(
        greeter_shamir_recovery_in_progress_2_do_signify_trust(canceller, greet_2.handle),
        claimer_shamir_recovery_in_progress_2_do_wait_peer_trust(canceller, claim_2.handle),
    );
    let (greet_3, claim_3) = (greet_3.unwrap(), claim_3.unwrap());
    let (handed_over, share) = tokio::join!(
        greeter_shamir_recovery_in_progress_3_do_get_claim_requests(canceller, greet_3.handle),
        claimer_shamir_recovery_in_progress_3_do_claim(canceller, claim_3.handle),
    );
    handed_over.unwrap();
    let share = share.unwrap();

    let recover = match claimer_shamir_recovery_add_share(pick, share.handle).unwrap() {
        ShamirRecoveryClaimMaybeRecoverDeviceInfo::RecoverDevice { handle } => handle,
        info => panic!("threshold should be reached, got {info:?}"),
    };
    let finalize = claimer_shamir_recovery_recover_device(recover, "recovered".parse().unwrap())
        .await
        .unwrap();
    let available = claimer_finalize_save_local_device(finalize.handle, password_strategy())
        .await
        .unwrap();
    assert_eq!(available.user_id, alice.user_id);

    client_stop(bob_client).await.unwrap();
    client_stop(alice_client).await.unwrap();
}
