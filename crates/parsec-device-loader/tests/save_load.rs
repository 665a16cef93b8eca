use assert_matches::assert_matches;
use parsec_device_loader::*;
use parsec_types::{
    AccountVaultItemOpaqueKeyID, HumanHandle, LocalDevice, ParsecAddr, ParsecOrganizationAddr,
    SecretKey, SigningKey, UserProfile,
};
use std::path::Path;

const PASSWORD: &str = "P@ssw0rd.";

fn alice() -> LocalDevice {
    let addr = ParsecOrganizationAddr::new(
        ParsecAddr::new("test.invalid", None, false),
        "CoolOrg".parse().unwrap(),
        SigningKey::generate().verify_key(),
    );
    LocalDevice::generate_new_device(
        addr,
        UserProfile::Admin,
        HumanHandle::from_raw("alice@example.com", "Alicey McAliceFace").unwrap(),
        "My dev1 machine".parse().unwrap(),
    )
}

fn password_access(key_file: &Path, password: &str) -> DeviceAccessStrategy {
    DeviceAccessStrategy::Password {
        key_file: key_file.to_path_buf(),
        password: password.to_owned(),
    }
}

#[tokio::test]
async fn test_password_save_and_load() {
    let tmp = tempfile::tempdir().unwrap();
    let device = alice();
    let key_file = get_default_key_file(tmp.path(), device.device_id);

    let available = save_device(
        &DeviceSaveStrategy::Password {
            password: PASSWORD.to_owned(),
        },
        &device,
        key_file.clone(),
    )
    .await
    .unwrap();
    assert_eq!(available.key_file_path, key_file);
    assert_eq!(available.device_id, device.device_id);
    assert_eq!(available.user_id, device.user_id);
    assert_eq!(available.organization_id, *device.organization_id());
    assert_eq!(available.server_url, "http://test.invalid");
    assert_eq!(available.ty, AvailableDeviceType::Password);

    let loaded = load_device(&password_access(&key_file, PASSWORD)).await.unwrap();
    assert_eq!(loaded.device_id, device.device_id);
    assert_eq!(loaded.private_key, device.private_key);
    assert_eq!(loaded.signing_key.verify_key(), device.signing_key.verify_key());
    assert_eq!(loaded.organization_addr, device.organization_addr);

    assert_matches!(
        load_device(&password_access(&key_file, "dummy")).await,
        Err(LoadDeviceError::DecryptionFailed)
    );
}

#[tokio::test]
async fn test_keyring_save_and_load() {
    let tmp = tempfile::tempdir().unwrap();
    let device = alice();
    let key_file = get_default_key_file(tmp.path(), device.device_id);
    assert!(is_keyring_available());

    let available = save_device(&DeviceSaveStrategy::Keyring, &device, key_file.clone())
        .await
        .unwrap();
    assert_eq!(available.ty, AvailableDeviceType::Keyring);

    let loaded = load_device(&DeviceAccessStrategy::Keyring { key_file }).await.unwrap();
    assert_eq!(loaded.device_id, device.device_id);
}

#[tokio::test]
async fn test_account_vault_save_and_load() {
    let tmp = tempfile::tempdir().unwrap();
    let device = alice();
    let key_file = get_default_key_file(tmp.path(), device.device_id);
    let ciphertext_key_id = AccountVaultItemOpaqueKeyID::default_new();
    let ciphertext_key = SecretKey::generate();

    let available = save_device(
        &DeviceSaveStrategy::AccountVault {
            ciphertext_key_id,
            ciphertext_key: ciphertext_key.clone(),
        },
        &device,
        key_file.clone(),
    )
    .await
    .unwrap();
    assert_eq!(available.ty, AvailableDeviceType::AccountVault { ciphertext_key_id });

    let loaded = load_device(&DeviceAccessStrategy::AccountVault {
        key_file: key_file.clone(),
        ciphertext_key_id,
        ciphertext_key,
    })
    .await
    .unwrap();
    assert_eq!(loaded.device_id, device.device_id);

    assert_matches!(
        load_device(&DeviceAccessStrategy::AccountVault {
            key_file,
            ciphertext_key_id,
            ciphertext_key: SecretKey::generate(),
        })
        .await,
        Err(LoadDeviceError::DecryptionFailed)
    );
}

#[tokio::test]
async fn test_smartcard_not_available() {
    let tmp = tempfile::tempdir().unwrap();
    let device = alice();
    let key_file = get_default_key_file(tmp.path(), device.device_id);

    assert_matches!(
        save_device(&DeviceSaveStrategy::Smartcard, &device, key_file.clone()).await,
        Err(SaveDeviceError::StorageNotAvailable)
    );

    save_device(
        &DeviceSaveStrategy::Password {
            password: PASSWORD.to_owned(),
        },
        &device,
        key_file.clone(),
    )
    .await
    .unwrap();
    assert_matches!(
        load_device(&DeviceAccessStrategy::Smartcard { key_file }).await,
        Err(LoadDeviceError::StorageNotAvailable)
    );
}

#[tokio::test]
async fn test_load_missing_or_invalid_file() {
    let tmp = tempfile::tempdir().unwrap();
    let key_file = tmp.path().join("devices").join("missing.keys");
    assert_matches!(
        load_device(&password_access(&key_file, PASSWORD)).await,
        Err(LoadDeviceError::InvalidPath(_))
    );

    tokio::fs::create_dir_all(key_file.parent().unwrap()).await.unwrap();
    tokio::fs::write(&key_file, b"dummy").await.unwrap();
    assert_matches!(
        load_device(&password_access(&key_file, PASSWORD)).await,
        Err(LoadDeviceError::InvalidData)
    );
}

#[tokio::test]
async fn test_list_and_archive() {
    let tmp = tempfile::tempdir().unwrap();
    assert_eq!(list_available_devices(tmp.path()).await.unwrap(), vec![]);

    let alice = alice();
    let bob = alice.new_device_for_same_user("Other machine".parse().unwrap());
    let strategy = DeviceSaveStrategy::Password {
        password: PASSWORD.to_owned(),
    };
    let alice_file = get_default_key_file(tmp.path(), alice.device_id);
    let bob_file = get_default_key_file(tmp.path(), bob.device_id);
    save_device(&strategy, &alice, alice_file.clone()).await.unwrap();
    save_device(&strategy, &bob, bob_file.clone()).await.unwrap();
    tokio::fs::write(tmp.path().join("devices").join("garbage.keys"), b"dummy")
        .await
        .unwrap();
    tokio::fs::write(tmp.path().join("devices").join("notes.txt"), b"dummy")
        .await
        .unwrap();

    let mut listed: Vec<_> = list_available_devices(tmp.path())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.device_id)
        .collect();
    listed.sort();
    let mut expected = vec![alice.device_id, bob.device_id];
    expected.sort();
    assert_eq!(listed, expected);

    archive_device(&alice_file).await.unwrap();
    let listed: Vec<_> = list_available_devices(tmp.path())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.device_id)
        .collect();
    assert_eq!(listed, vec![bob.device_id]);
    assert_matches!(
        load_device(&password_access(&alice_file, PASSWORD)).await,
        Err(LoadDeviceError::InvalidPath(_))
    );
}

#[tokio::test]
async fn test_change_authentication() {
    let tmp = tempfile::tempdir().unwrap();
    let device = alice();
    let key_file = get_default_key_file(tmp.path(), device.device_id);
    let before = save_device(
        &DeviceSaveStrategy::Password {
            password: PASSWORD.to_owned(),
        },
        &device,
        key_file.clone(),
    )
    .await
    .unwrap();

    let after = update_device_change_authentication(
        &password_access(&key_file, PASSWORD),
        &DeviceSaveStrategy::Password {
            password: "N3wP@ssw0rd.".to_owned(),
        },
    )
    .await
    .unwrap();
    assert_eq!(after.created_on, before.created_on);
    assert_eq!(after.key_file_path, key_file);

    assert_matches!(
        load_device(&password_access(&key_file, PASSWORD)).await,
        Err(LoadDeviceError::DecryptionFailed)
    );
    let loaded = load_device(&password_access(&key_file, "N3wP@ssw0rd.")).await.unwrap();
    assert_eq!(loaded.device_id, device.device_id);

    assert_matches!(
        update_device_change_authentication(
            &password_access(&key_file, "dummy"),
            &DeviceSaveStrategy::Keyring
        )
        .await,
        Err(UpdateDeviceError::DecryptionFailed)
    );
}

#[tokio::test]
async fn test_overwrite_server_addr() {
    let tmp = tempfile::tempdir().unwrap();
    let device = alice();
    let key_file = get_default_key_file(tmp.path(), device.device_id);
    save_device(&DeviceSaveStrategy::Keyring, &device, key_file.clone())
        .await
        .unwrap();

    let access = DeviceAccessStrategy::Keyring { key_file: key_file.clone() };
    let new_addr = ParsecAddr::new("parsec.example.com", Some(4443), true);
    let old_addr = update_device_overwrite_server_addr(&access, new_addr.clone())
        .await
        .unwrap();
    assert_eq!(old_addr, *device.organization_addr.server());

    let loaded = load_device(&access).await.unwrap();
    assert_eq!(*loaded.organization_addr.server(), new_addr);
    assert_eq!(loaded.organization_id(), device.organization_id());
    let available = load_available_device(&key_file).await.unwrap();
    assert_eq!(available.server_url, "https://parsec.example.com:4443");
}

#[test]
fn test_recovery_device_file() {
    let device = alice();
    let (passphrase, data) = dump_recovery_device(&device).unwrap();

    let loaded = load_recovery_device(&data, &passphrase).unwrap();
    assert_eq!(loaded.device_id, device.device_id);

    let (other_passphrase, _) = SecretKey::generate_recovery_passphrase();
    assert_matches!(
        load_recovery_device(&data, &other_passphrase),
        Err(LoadRecoveryDeviceError::DecryptionFailed)
    );
    assert_matches!(
        load_recovery_device(&data, "not a passphrase!"),
        Err(LoadRecoveryDeviceError::InvalidPassphrase)
    );
    assert_matches!(
        load_recovery_device(b"dummy", &passphrase),
        Err(LoadRecoveryDeviceError::InvalidData)
    );
}
