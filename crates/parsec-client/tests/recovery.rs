mod common;

use assert_matches::assert_matches;
use common::{config, password_strategy, start_client};
use parsec_client::client::{
    import_recovery_device, ClientDeleteShamirRecoveryError, ClientSetupShamirRecoveryError,
    ImportRecoveryDeviceError, OtherShamirRecoveryInfo, SelfShamirRecoveryInfo,
};
use parsec_client::invite::{claimer_retrieve_info, AnyClaimRetrievedInfoCtx, ShamirRecoveryClaimMaybeRecoverDeviceCtx};
use parsec_testbed::TestbedEnv;
use parsec_types::{DeviceLabel, DevicePurpose, InvitationType};
use std::collections::BTreeMap;

#[tokio::test]
async fn test_export_and_import_recovery_device() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    let (passphrase, file) = client
        .export_recovery_device("recovery".parse().unwrap())
        .await
        .unwrap();
    let devices = client.list_user_devices(alice.user_id).await.unwrap();
    assert_eq!(devices.len(), 3);
    assert!(devices
        .iter()
        .any(|device| device.purpose == DevicePurpose::PassphraseRecovery));

    let available = import_recovery_device(
        config(tmp.path()),
        &file,
        &passphrase,
        "restored".parse().unwrap(),
        &password_strategy(),
    )
    .await
    .unwrap();
    assert_eq!(available.user_id, alice.user_id);
    assert_eq!(available.device_label, "restored".parse::<DeviceLabel>().unwrap());

    client
        .certificates()
        .poll_server_for_new_certificates()
        .await
        .unwrap();
    assert_eq!(client.list_user_devices(alice.user_id).await.unwrap().len(), 4);
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_import_with_bad_passphrase() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    let (_, file) = client
        .export_recovery_device("recovery1".parse().unwrap())
        .await
        .unwrap();
    let (other_passphrase, _) = client
        .export_recovery_device("recovery2".parse().unwrap())
        .await
        .unwrap();

    assert_matches!(
        import_recovery_device(
            config(tmp.path()),
            &file,
            "0189-0189",
            "restored".parse().unwrap(),
            &password_strategy(),
        )
        .await,
        Err(ImportRecoveryDeviceError::InvalidPassphrase)
    );
    assert_matches!(
        import_recovery_device(
            config(tmp.path()),
            &file,
            &other_passphrase,
            "restored".parse().unwrap(),
            &password_strategy(),
        )
        .await,
        Err(ImportRecoveryDeviceError::DecryptionFailed)
    );
    assert_matches!(
        import_recovery_device(
            config(tmp.path()),
            b"garbage",
            &other_passphrase,
            "restored".parse().unwrap(),
            &password_strategy(),
        )
        .await,
        Err(ImportRecoveryDeviceError::InvalidData)
    );
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_shamir_setup_validation() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let bob = env.device("bob").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;

    assert_matches!(
        client.setup_shamir_recovery(BTreeMap::new(), 1).await,
        Err(ClientSetupShamirRecoveryError::MissingRecipients)
    );
    assert_matches!(
        client
            .setup_shamir_recovery(BTreeMap::from([(alice.user_id, 1)]), 1)
            .await,
        Err(ClientSetupShamirRecoveryError::AuthorAmongRecipients)
    );
    assert_matches!(
        client.setup_shamir_recovery(BTreeMap::from([(bob.user_id, 0)]), 1).await,
        Err(ClientSetupShamirRecoveryError::RecipientWithoutShare)
    );
    assert_matches!(
        client.setup_shamir_recovery(BTreeMap::from([(bob.user_id, 1)]), 2).await,
        Err(ClientSetupShamirRecoveryError::ThresholdBiggerThanSumOfShares)
    );
    assert_eq!(
        client.get_self_shamir_recovery().await.unwrap(),
        SelfShamirRecoveryInfo::NeverSetup
    );
    assert_matches!(
        client.delete_shamir_recovery().await,
        Err(ClientDeleteShamirRecoveryError::ShamirRecoveryNotFound)
    );
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_shamir_recovery() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let bob = env.device("bob").unwrap();
    let alice_client = start_client(&env, "alice", tmp.path()).await;
    let bob_client = start_client(&env, "bob", tmp.path()).await;

    let per_recipient_shares = BTreeMap::from([(bob.user_id, 2)]);
    alice_client
        .setup_shamir_recovery(per_recipient_shares.clone(), 2)
        .await
        .unwrap();
    assert_matches!(
        alice_client.get_self_shamir_recovery().await.unwrap(),
        SelfShamirRecoveryInfo::SetupAllValid { threshold: 2, per_recipient_shares: shares, .. }
            if shares == per_recipient_shares
    );
    assert_matches!(
        alice_client.setup_shamir_recovery(per_recipient_shares.clone(), 2).await,
        Err(ClientSetupShamirRecoveryError::ShamirRecoveryAlreadyExists)
    );

    bob_client
        .certificates()
        .poll_server_for_new_certificates()
        .await
        .unwrap();
    let others = bob_client.list_shamir_recoveries_for_others().await.unwrap();
    assert_matches!(
        others.as_slice(),
        [OtherShamirRecoveryInfo::SetupAllValid { user_id, .. }] if *user_id == alice.user_id
    );

    let invitation = bob_client
        .new_shamir_recovery_invitation(alice.user_id, false)
        .await
        .unwrap();
    assert_eq!(invitation.addr.invitation_type(), InvitationType::ShamirRecovery);

    let pick = match claimer_retrieve_info(config(tmp.path()), invitation.addr.clone(), None)
        .await
        .unwrap()
    {
        AnyClaimRetrievedInfoCtx::ShamirRecovery(ctx) => ctx,
        _ => panic!("expected a shamir recovery invitation"),
    };
    assert_eq!(pick.claimer_user_id(), alice.user_id);
    assert_eq!(pick.threshold(), 2);
    assert_eq!(pick.recipients_without_a_share().len(), 1);

    let claim = pick.pick_recipient(bob.user_id).unwrap();
    let greet = bob_client
        .start_shamir_recovery_invitation_greet(invitation.token)
        .await
        .unwrap();

    let (greet, claim) = tokio::join!(greet.do_wait_peer(), claim.do_wait_peer());
    let (greet, claim) = (greet.unwrap(), claim.unwrap());
    let (greet, claim) = tokio::join!(greet.do_wait_peer_trust(), claim.do_signify_trust());
    let (greet, claim) = (greet.unwrap(), claim.unwrap());
    let (greet, claim) = tokio::join!(greet.do_signify_trust(), claim.do_wait_peer_trust());
    let (greet, claim) = (greet.unwrap(), claim.unwrap());
    let (handed_over, share) = tokio::join!(greet.do_get_claim_requests(), claim.do_recover_share());
    handed_over.unwrap();
    let share = share.unwrap();
    assert_eq!(share.recipient(), bob.user_id);

    // Bob holds two shares, enough to reach the threshold alone
    let recover = match pick.add_share(share).unwrap() {
        ShamirRecoveryClaimMaybeRecoverDeviceCtx::RecoverDevice(ctx) => ctx,
        ShamirRecoveryClaimMaybeRecoverDeviceCtx::PickRecipient(_) => panic!("threshold should be reached"),
    };
    let finalize = recover
        .recover_device("recovered".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(finalize.new_local_device().user_id, alice.user_id);

    alice_client
        .certificates()
        .poll_server_for_new_certificates()
        .await
        .unwrap();
    let devices = alice_client.list_user_devices(alice.user_id).await.unwrap();
    assert!(devices
        .iter()
        .any(|device| device.id == finalize.device_id()));

    alice_client.delete_shamir_recovery().await.unwrap();
    assert_matches!(
        alice_client.get_self_shamir_recovery().await.unwrap(),
        SelfShamirRecoveryInfo::Deleted { .. }
    );

    bob_client.stop().await.unwrap();
    alice_client.stop().await.unwrap();
}
