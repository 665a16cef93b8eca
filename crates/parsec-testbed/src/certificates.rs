//! Rules applied to submitted certificates
//!
//! Each function validates one command's certificates against the
//! organization state and applies them. A refusal is returned as the
//! `CertificateRep` to send back; nothing is modified in that case.

use crate::state::{invalid, rejected, Organization, Realm, ShamirSetup, UserState};
use parsec_connection::protocol::{ActiveUsersLimit, Bytes, CertificateRejection, CertificateRep};
use parsec_connection::ServerEvent;
use parsec_types::{
    AnyCertificate, DateTime, DeviceID, RealmRole, ShamirRevealToken, UserID, UserProfile,
};

pub(crate) fn outcome(result: Result<(), CertificateRep>) -> CertificateRep {
    result.err().unwrap_or(CertificateRep::Ok)
}

fn require_admin(org: &Organization, author_user: UserID) -> Result<(), CertificateRep> {
    match org.users.get(&author_user) {
        Some(user) if user.current_profile == UserProfile::Admin => Ok(()),
        _ => Err(rejected(CertificateRejection::AuthorNotAllowed)),
    }
}

pub(crate) fn user_create(
    org: &mut Organization,
    author: DeviceID,
    author_user: UserID,
    user_certificate: Bytes,
    device_certificate: Bytes,
    now: DateTime,
) -> Result<(), CertificateRep> {
    require_admin(org, author_user)?;
    let AnyCertificate::User(user) = org.check_certificate(author, &user_certificate, now)? else {
        return Err(invalid("expected a user certificate"));
    };
    let AnyCertificate::Device(device) = org.check_certificate(author, &device_certificate, now)? else {
        return Err(invalid("expected a device certificate"));
    };
    if device.user_id != user.user_id || device.timestamp != user.timestamp {
        return Err(invalid("user and device certificates do not match"));
    }
    if user.profile == UserProfile::Outsider && !org.server_config.user_profile_outsider_allowed {
        return Err(invalid("outsider profile is not allowed"));
    }
    if org.users.contains_key(&user.user_id) {
        return Err(rejected(CertificateRejection::UserAlreadyExists));
    }
    if org.devices.contains_key(&device.device_id) {
        return Err(rejected(CertificateRejection::DeviceAlreadyExists));
    }
    let email_taken = org
        .users
        .values()
        .any(|u| u.is_active() && u.certificate.human_handle.email() == user.human_handle.email());
    if email_taken {
        return Err(rejected(CertificateRejection::HumanHandleAlreadyTaken));
    }
    if let ActiveUsersLimit::LimitedTo(limit) = org.server_config.active_users_limit {
        if org.active_users_count() as u64 >= limit {
            return Err(rejected(CertificateRejection::ActiveUsersLimitReached));
        }
    }

    let timestamp = user.timestamp;
    org.devices.insert(device.device_id, device);
    org.users.insert(
        user.user_id,
        UserState {
            current_profile: user.profile,
            certificate: user,
            revoked_on: None,
            frozen: false,
            tos_accepted_on: None,
        },
    );
    org.add_certificate(timestamp, user_certificate);
    org.add_certificate(timestamp, device_certificate);
    Ok(())
}

pub(crate) fn device_create(
    org: &mut Organization,
    author: DeviceID,
    author_user: UserID,
    device_certificate: Bytes,
    now: DateTime,
) -> Result<(), CertificateRep> {
    let AnyCertificate::Device(device) = org.check_certificate(author, &device_certificate, now)? else {
        return Err(invalid("expected a device certificate"));
    };
    if device.user_id != author_user {
        return Err(rejected(CertificateRejection::AuthorNotAllowed));
    }
    if org.devices.contains_key(&device.device_id) {
        return Err(rejected(CertificateRejection::DeviceAlreadyExists));
    }
    let timestamp = device.timestamp;
    org.devices.insert(device.device_id, device);
    org.add_certificate(timestamp, device_certificate);
    Ok(())
}

pub(crate) fn user_revoke(
    org: &mut Organization,
    author: DeviceID,
    author_user: UserID,
    revoked_user_certificate: Bytes,
    now: DateTime,
) -> Result<(), CertificateRep> {
    require_admin(org, author_user)?;
    let AnyCertificate::RevokedUser(revoked) = org.check_certificate(author, &revoked_user_certificate, now)? else {
        return Err(invalid("expected a revoked user certificate"));
    };
    if revoked.user_id == author_user {
        return Err(invalid("cannot revoke oneself"));
    }
    let user = org
        .users
        .get_mut(&revoked.user_id)
        .ok_or(rejected(CertificateRejection::UserNotFound))?;
    if user.revoked_on.is_some() {
        return Err(rejected(CertificateRejection::UserAlreadyRevoked));
    }
    user.revoked_on = Some(revoked.timestamp);
    org.notify_user(revoked.user_id, ServerEvent::UserRevoked);
    org.add_certificate(revoked.timestamp, revoked_user_certificate);
    Ok(())
}

pub(crate) fn user_update(
    org: &mut Organization,
    author: DeviceID,
    author_user: UserID,
    user_update_certificate: Bytes,
    now: DateTime,
) -> Result<(), CertificateRep> {
    require_admin(org, author_user)?;
    let AnyCertificate::UserUpdate(update) = org.check_certificate(author, &user_update_certificate, now)? else {
        return Err(invalid("expected a user update certificate"));
    };
    match org.users.get(&update.user_id) {
        None => return Err(rejected(CertificateRejection::UserNotFound)),
        Some(user) if !user.is_active() => return Err(rejected(CertificateRejection::UserAlreadyRevoked)),
        Some(_) => (),
    }
    if update.new_profile == UserProfile::Outsider {
        let manages_realm = org.realms.values().any(|realm| {
            matches!(
                realm.roles.get(&update.user_id),
                Some(RealmRole::Owner) | Some(RealmRole::Manager)
            )
        });
        if manages_realm {
            return Err(rejected(CertificateRejection::RoleIncompatibleWithOutsider));
        }
    }
    if let Some(user) = org.users.get_mut(&update.user_id) {
        user.current_profile = update.new_profile;
    }
    org.add_certificate(update.timestamp, user_update_certificate);
    Ok(())
}

pub(crate) fn realm_create(
    org: &mut Organization,
    author: DeviceID,
    author_user: UserID,
    realm_role_certificate: Bytes,
    keys_bundle_access: Bytes,
    now: DateTime,
) -> Result<(), CertificateRep> {
    let AnyCertificate::RealmRole(role) = org.check_certificate(author, &realm_role_certificate, now)? else {
        return Err(invalid("expected a realm role certificate"));
    };
    if role.user_id != author_user || role.role != Some(RealmRole::Owner) {
        return Err(invalid("realm creator must be its owner"));
    }
    if org.users.get(&author_user).map(|u| u.current_profile) == Some(UserProfile::Outsider) {
        return Err(rejected(CertificateRejection::AuthorNotAllowed));
    }
    if org.realms.contains_key(&role.realm_id) {
        return Err(rejected(CertificateRejection::RealmAlreadyExists));
    }
    let mut realm = Realm {
        key_index: 1,
        last_certificate_timestamp: Some(role.timestamp),
        ..Realm::default()
    };
    realm.roles.insert(author_user, RealmRole::Owner);
    realm.keys_bundle_accesses.insert(author_user, keys_bundle_access);
    org.realms.insert(role.realm_id, realm);
    org.add_certificate(role.timestamp, realm_role_certificate);
    Ok(())
}

pub(crate) fn realm_share(
    org: &mut Organization,
    author: DeviceID,
    author_user: UserID,
    realm_role_certificate: Bytes,
    recipient_keys_bundle_access: Bytes,
    now: DateTime,
) -> Result<(), CertificateRep> {
    let AnyCertificate::RealmRole(role) = org.check_certificate(author, &realm_role_certificate, now)? else {
        return Err(invalid("expected a realm role certificate"));
    };
    let Some(new_role) = role.role else {
        return Err(invalid("sharing requires a role"));
    };
    if role.user_id == author_user {
        return Err(invalid("cannot share with oneself"));
    }
    let realm = org
        .realms
        .get(&role.realm_id)
        .ok_or(rejected(CertificateRejection::RealmNotFound))?;
    let author_role = realm.roles.get(&author_user).copied();
    let current_role = realm.roles.get(&role.user_id).copied();
    let allowed = author_role
        .map(|r| r.can_grant(Some(new_role)) && r.can_grant(current_role))
        .unwrap_or(false);
    if !allowed {
        return Err(rejected(CertificateRejection::AuthorNotAllowed));
    }
    let recipient = org
        .users
        .get(&role.user_id)
        .ok_or(rejected(CertificateRejection::UserNotFound))?;
    if !recipient.is_active() {
        return Err(rejected(CertificateRejection::RecipientRevoked));
    }
    if recipient.current_profile == UserProfile::Outsider
        && matches!(new_role, RealmRole::Owner | RealmRole::Manager)
    {
        return Err(rejected(CertificateRejection::RoleIncompatibleWithOutsider));
    }
    if current_role == Some(new_role) {
        return Err(rejected(CertificateRejection::RoleAlreadyGranted));
    }

    if let Some(realm) = org.realms.get_mut(&role.realm_id) {
        realm.roles.insert(role.user_id, new_role);
        realm
            .keys_bundle_accesses
            .insert(role.user_id, recipient_keys_bundle_access);
        realm.last_certificate_timestamp = Some(role.timestamp);
    }
    org.add_certificate(role.timestamp, realm_role_certificate);
    Ok(())
}

pub(crate) fn realm_unshare(
    org: &mut Organization,
    author: DeviceID,
    author_user: UserID,
    realm_role_certificate: Bytes,
    now: DateTime,
) -> Result<(), CertificateRep> {
    let AnyCertificate::RealmRole(role) = org.check_certificate(author, &realm_role_certificate, now)? else {
        return Err(invalid("expected a realm role certificate"));
    };
    if role.role.is_some() {
        return Err(invalid("unsharing must remove the role"));
    }
    if role.user_id == author_user {
        return Err(invalid("cannot unshare with oneself"));
    }
    let realm = org
        .realms
        .get_mut(&role.realm_id)
        .ok_or(rejected(CertificateRejection::RealmNotFound))?;
    let current_role = realm.roles.get(&role.user_id).copied();
    let allowed = realm
        .roles
        .get(&author_user)
        .map(|r| r.can_grant(current_role))
        .unwrap_or(false);
    if !allowed {
        return Err(rejected(CertificateRejection::AuthorNotAllowed));
    }
    if current_role.is_none() {
        return Err(rejected(CertificateRejection::RoleAlreadyGranted));
    }
    realm.roles.remove(&role.user_id);
    realm.keys_bundle_accesses.remove(&role.user_id);
    realm.last_certificate_timestamp = Some(role.timestamp);
    org.add_certificate(role.timestamp, realm_role_certificate);
    Ok(())
}

pub(crate) fn realm_rename(
    org: &mut Organization,
    author: DeviceID,
    author_user: UserID,
    realm_name_certificate: Bytes,
    now: DateTime,
) -> Result<(), CertificateRep> {
    let AnyCertificate::RealmName(name) = org.check_certificate(author, &realm_name_certificate, now)? else {
        return Err(invalid("expected a realm name certificate"));
    };
    let realm = org
        .realms
        .get_mut(&name.realm_id)
        .ok_or(rejected(CertificateRejection::RealmNotFound))?;
    if realm.roles.get(&author_user) != Some(&RealmRole::Owner) {
        return Err(rejected(CertificateRejection::AuthorNotAllowed));
    }
    if name.key_index != realm.key_index {
        return Err(invalid("bad key index"));
    }
    realm.last_certificate_timestamp = Some(name.timestamp);
    org.add_certificate(name.timestamp, realm_name_certificate);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn shamir_recovery_setup(
    org: &mut Organization,
    author: DeviceID,
    author_user: UserID,
    ciphered_data: Bytes,
    reveal_token: ShamirRevealToken,
    brief_certificate: Bytes,
    share_certificates: Vec<Bytes>,
    now: DateTime,
) -> Result<(), CertificateRep> {
    let AnyCertificate::ShamirRecoveryBrief(brief) = org.check_certificate(author, &brief_certificate, now)? else {
        return Err(invalid("expected a shamir recovery brief certificate"));
    };
    if brief.user_id != author_user {
        return Err(rejected(CertificateRejection::AuthorNotAllowed));
    }
    if org.shamir_setups.contains_key(&author_user) {
        return Err(rejected(CertificateRejection::ShamirRecoveryAlreadyExists));
    }
    let total_shares: u32 = brief.per_recipient_shares.values().map(|s| u32::from(*s)).sum();
    if brief.threshold == 0 || u32::from(brief.threshold) > total_shares {
        return Err(invalid("threshold cannot be reached"));
    }
    if brief.per_recipient_shares.contains_key(&author_user) {
        return Err(invalid("cannot be a recipient of one's own setup"));
    }
    for recipient in brief.per_recipient_shares.keys() {
        match org.users.get(recipient) {
            None => return Err(rejected(CertificateRejection::UserNotFound)),
            Some(user) if !user.is_active() => return Err(rejected(CertificateRejection::RecipientRevoked)),
            Some(_) => (),
        }
    }
    if share_certificates.len() != brief.per_recipient_shares.len() {
        return Err(invalid("one share certificate per recipient is required"));
    }
    let mut shares = Vec::with_capacity(share_certificates.len());
    for signed in share_certificates {
        let AnyCertificate::ShamirRecoveryShare(share) = org.check_certificate(author, &signed, now)? else {
            return Err(invalid("expected a shamir recovery share certificate"));
        };
        if share.timestamp != brief.timestamp
            || share.user_id != author_user
            || !brief.per_recipient_shares.contains_key(&share.recipient)
        {
            return Err(invalid("share certificate does not match the brief"));
        }
        shares.push((share.timestamp, signed));
    }

    let timestamp = brief.timestamp;
    let recipients: Vec<UserID> = brief.per_recipient_shares.keys().copied().collect();
    org.shamir_setups.insert(
        author_user,
        ShamirSetup {
            brief,
            reveal_token,
            ciphered_data,
        },
    );
    org.add_certificate(timestamp, brief_certificate);
    for (timestamp, signed) in shares {
        org.add_certificate(timestamp, signed);
    }
    tracing::debug!(user_id = %author_user, recipients = recipients.len(), "Shamir recovery setup registered");
    Ok(())
}

pub(crate) fn shamir_recovery_delete(
    org: &mut Organization,
    author: DeviceID,
    author_user: UserID,
    deletion_certificate: Bytes,
    now: DateTime,
) -> Result<(), CertificateRep> {
    let AnyCertificate::ShamirRecoveryDeletion(deletion) = org.check_certificate(author, &deletion_certificate, now)? else {
        return Err(invalid("expected a shamir recovery deletion certificate"));
    };
    if deletion.setup_to_delete_user_id != author_user {
        return Err(rejected(CertificateRejection::AuthorNotAllowed));
    }
    let matches_setup = org
        .shamir_setups
        .get(&author_user)
        .map(|setup| setup.brief.timestamp == deletion.setup_to_delete_timestamp)
        .unwrap_or(false);
    if !matches_setup {
        return Err(rejected(CertificateRejection::ShamirRecoveryNotFound));
    }
    org.shamir_setups.remove(&author_user);
    org.add_certificate(deletion.timestamp, deletion_certificate);
    Ok(())
}
