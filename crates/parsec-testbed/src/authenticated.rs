//! Commands issued by a device of the organization

use crate::certificates::{self, outcome};
use crate::greeting::{self, AttemptActor};
use crate::server::ServerInner;
use crate::state::{Invitation, InvitationDetails, Listener, Organization};
use async_trait::async_trait;
use parsec_connection::protocol::*;
use parsec_connection::{
    AuthenticatedCmds, ClaimerStep, ConnectionError, EventsListener, GreeterStep, GreetingStepRep,
    ServerEvent,
};
use parsec_types::{
    timestamps_in_the_ballpark, BlockID, CancelledGreetingAttemptReason, DateTime, DeviceID,
    EmailAddress, GreeterOrClaimer, GreetingAttemptID, HumanHandle, InvitationEmailSentStatus,
    InvitationStatus, InvitationToken, OrganizationID, ShamirRevealToken, UserID, UserProfile, VlobID,
    BALLPARK_CLIENT_EARLY_OFFSET, BALLPARK_CLIENT_LATE_OFFSET,
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) struct AuthenticatedSession {
    inner: Arc<ServerInner>,
    organization_id: OrganizationID,
    device_id: DeviceID,
}

/// Who is calling, once authenticated
#[derive(Debug, Clone)]
struct Author {
    device_id: DeviceID,
    user_id: UserID,
    profile: UserProfile,
    human_handle: HumanHandle,
}

fn authenticate(org: &Organization, device_id: DeviceID, allow_tos_pending: bool) -> Result<Author, ConnectionError> {
    if org.is_expired {
        return Err(ConnectionError::ExpiredOrganization);
    }
    let device = org.devices.get(&device_id).ok_or(ConnectionError::BadAuthentication)?;
    let user = org
        .users
        .get(&device.user_id)
        .ok_or(ConnectionError::BadAuthentication)?;
    if !user.is_active() {
        return Err(ConnectionError::RevokedUser);
    }
    if user.frozen {
        return Err(ConnectionError::FrozenUser);
    }
    if let Some(tos) = &org.tos {
        let accepted = user.tos_accepted_on.map(|on| on >= tos.updated_on).unwrap_or(false);
        if !accepted && !allow_tos_pending {
            return Err(ConnectionError::UserMustAcceptTos);
        }
    }
    Ok(Author {
        device_id,
        user_id: device.user_id,
        profile: user.current_profile,
        human_handle: user.certificate.human_handle.clone(),
    })
}

impl AuthenticatedSession {
    pub fn new(inner: Arc<ServerInner>, organization_id: OrganizationID, device_id: DeviceID) -> Self {
        Self {
            inner,
            organization_id,
            device_id,
        }
    }

    /// Read-only command
    fn read<T>(&self, f: impl FnOnce(&mut Organization, Author) -> T) -> Result<T, ConnectionError> {
        self.inner.with_org_quiet(&self.organization_id, |org| {
            let author = authenticate(org, self.device_id, false)?;
            Ok(f(org, author))
        })
    }

    /// Command that may modify the organization
    fn write<T>(&self, f: impl FnOnce(&mut Organization, Author, DateTime) -> T) -> Result<T, ConnectionError> {
        let now = self.inner.now();
        self.inner.with_org(&self.organization_id, |org| {
            let author = authenticate(org, self.device_id, false)?;
            Ok(f(org, author, now))
        })
    }

    fn new_invitation(org: &mut Organization, author: &Author, details: InvitationDetails, now: DateTime, send_email: bool) -> InviteNewRep {
        let existing = org.invitations.values().find(|inv| {
            inv.status == InvitationStatus::Pending
                && match (&inv.details, &details) {
                    (InvitationDetails::User { claimer_email: a }, InvitationDetails::User { claimer_email: b }) => a == b,
                    (InvitationDetails::Device { claimer_user_id: a }, InvitationDetails::Device { claimer_user_id: b }) => a == b,
                    (
                        InvitationDetails::ShamirRecovery { claimer_user_id: a },
                        InvitationDetails::ShamirRecovery { claimer_user_id: b },
                    ) => a == b,
                    _ => false,
                }
        });
        let token = match existing {
            Some(invitation) => invitation.token,
            None => {
                let invitation = Invitation {
                    token: InvitationToken::default_new(),
                    details,
                    created_by: InvitationCreatedBy::User {
                        user_id: author.user_id,
                        human_handle: author.human_handle.clone(),
                    },
                    created_on: now,
                    status: InvitationStatus::Pending,
                };
                let token = invitation.token;
                let greeters = org.greeters(&invitation);
                org.invitations.insert(token, invitation);
                org.notify_users(
                    &greeters,
                    ServerEvent::Invitation {
                        token,
                        status: InvitationStatus::Pending,
                    },
                );
                tracing::debug!(%token, "Invitation created");
                token
            }
        };
        // No mail server is configured in the testbed
        let email_sent = if send_email {
            InvitationEmailSentStatus::ServerUnavailable
        } else {
            InvitationEmailSentStatus::Success
        };
        InviteNewRep::Ok { token, email_sent }
    }

    fn vlob_write(
        org: &mut Organization,
        author: &Author,
        realm_id: VlobID,
        item: VlobItem,
        expect_existing: bool,
        now: DateTime,
    ) -> VlobWriteRep {
        let Some(realm) = org.realms.get_mut(&realm_id) else {
            return VlobWriteRep::RealmNotFound;
        };
        if !realm.roles.get(&author.user_id).map(|r| r.can_write()).unwrap_or(false) {
            return VlobWriteRep::AuthorNotAllowed;
        }
        if !timestamps_in_the_ballpark(item.created_on, now) {
            return VlobWriteRep::TimestampOutOfBallpark {
                server_timestamp: now,
                client_timestamp: item.created_on,
                ballpark_client_early_offset: BALLPARK_CLIENT_EARLY_OFFSET,
                ballpark_client_late_offset: BALLPARK_CLIENT_LATE_OFFSET,
            };
        }
        if let Some(last) = realm.last_certificate_timestamp {
            if item.created_on <= last {
                return VlobWriteRep::RequireGreaterTimestamp {
                    strictly_greater_than: last,
                };
            }
        }
        let versions = realm.vlobs.get(&item.vlob_id);
        match (expect_existing, versions) {
            (false, Some(_)) => return VlobWriteRep::VlobAlreadyExists,
            (true, None) => return VlobWriteRep::VlobNotFound,
            (true, Some(versions)) if versions.len() as u32 + 1 != item.version => {
                return VlobWriteRep::BadVlobVersion
            }
            _ => (),
        }

        realm.changes.push(VlobChange {
            vlob_id: item.vlob_id,
            version: item.version,
            timestamp: item.created_on,
        });
        let checkpoint = realm.changes.len() as u64;
        let event = ServerEvent::RealmVlob {
            realm_id,
            vlob_id: item.vlob_id,
            author: author.device_id,
            version: item.version,
            checkpoint,
        };
        realm.vlobs.entry(item.vlob_id).or_default().push(item);
        let members: Vec<UserID> = realm.roles.keys().copied().collect();
        org.notify_users(&members, event);
        VlobWriteRep::Ok
    }
}

#[async_trait]
impl AuthenticatedCmds for AuthenticatedSession {
    async fn ping(&self, ping: String) -> Result<String, ConnectionError> {
        self.write(|org, author, _| {
            org.notify_user(author.user_id, ServerEvent::Pinged { ping: ping.clone() });
        })?;
        Ok(ping)
    }

    async fn server_config(&self) -> Result<ServerConfig, ConnectionError> {
        self.read(|org, _| org.server_config.clone())
    }

    async fn organization_stats(&self) -> Result<OrganizationStats, ConnectionError> {
        self.read(|org, _| {
            let mut stats = OrganizationStats {
                total_block_bytes: 0,
                total_metadata_bytes: 0,
                bootstrapped_on: org.bootstrapped_on,
            };
            for realm in org.realms.values() {
                stats.total_block_bytes += realm.blocks.values().map(|b| b.len() as u64).sum::<u64>();
                stats.total_metadata_bytes += realm
                    .vlobs
                    .values()
                    .flatten()
                    .map(|item| item.blob.len() as u64)
                    .sum::<u64>();
            }
            stats
        })
    }

    async fn certificate_get(&self, after: Option<DateTime>) -> Result<Vec<Bytes>, ConnectionError> {
        self.read(|org, _| {
            org.certificates
                .iter()
                .filter(|(timestamp, _)| after.map(|after| *timestamp > after).unwrap_or(true))
                .map(|(_, signed)| signed.clone())
                .collect()
        })
    }

    async fn user_create(&self, user_certificate: Bytes, device_certificate: Bytes) -> Result<CertificateRep, ConnectionError> {
        self.write(|org, author, now| {
            outcome(certificates::user_create(
                org,
                author.device_id,
                author.user_id,
                user_certificate,
                device_certificate,
                now,
            ))
        })
    }

    async fn device_create(&self, device_certificate: Bytes) -> Result<CertificateRep, ConnectionError> {
        self.write(|org, author, now| {
            outcome(certificates::device_create(org, author.device_id, author.user_id, device_certificate, now))
        })
    }

    async fn user_revoke(&self, revoked_user_certificate: Bytes) -> Result<CertificateRep, ConnectionError> {
        self.write(|org, author, now| {
            outcome(certificates::user_revoke(
                org,
                author.device_id,
                author.user_id,
                revoked_user_certificate,
                now,
            ))
        })
    }

    async fn user_update(&self, user_update_certificate: Bytes) -> Result<CertificateRep, ConnectionError> {
        self.write(|org, author, now| {
            outcome(certificates::user_update(
                org,
                author.device_id,
                author.user_id,
                user_update_certificate,
                now,
            ))
        })
    }

    async fn user_list_frozen(&self) -> Result<UserListFrozenRep, ConnectionError> {
        self.read(|org, author| {
            if author.profile != UserProfile::Admin {
                return UserListFrozenRep::AuthorNotAllowed;
            }
            let mut frozen_users: Vec<UserID> =
                org.users.iter().filter(|(_, u)| u.frozen).map(|(id, _)| *id).collect();
            frozen_users.sort();
            UserListFrozenRep::Ok { frozen_users }
        })
    }

    async fn realm_create(&self, realm_role_certificate: Bytes, keys_bundle_access: Bytes) -> Result<CertificateRep, ConnectionError> {
        self.write(|org, author, now| {
            outcome(certificates::realm_create(
                org,
                author.device_id,
                author.user_id,
                realm_role_certificate,
                keys_bundle_access,
                now,
            ))
        })
    }

    async fn realm_share(&self, realm_role_certificate: Bytes, recipient_keys_bundle_access: Bytes) -> Result<CertificateRep, ConnectionError> {
        self.write(|org, author, now| {
            outcome(certificates::realm_share(
                org,
                author.device_id,
                author.user_id,
                realm_role_certificate,
                recipient_keys_bundle_access,
                now,
            ))
        })
    }

    async fn realm_unshare(&self, realm_role_certificate: Bytes) -> Result<CertificateRep, ConnectionError> {
        self.write(|org, author, now| {
            outcome(certificates::realm_unshare(
                org,
                author.device_id,
                author.user_id,
                realm_role_certificate,
                now,
            ))
        })
    }

    async fn realm_rename(&self, realm_name_certificate: Bytes) -> Result<CertificateRep, ConnectionError> {
        self.write(|org, author, now| {
            outcome(certificates::realm_rename(
                org,
                author.device_id,
                author.user_id,
                realm_name_certificate,
                now,
            ))
        })
    }

    async fn realm_get_keys_bundle(&self, realm_id: VlobID) -> Result<RealmGetKeysBundleRep, ConnectionError> {
        self.read(|org, author| {
            let Some(realm) = org.realms.get(&realm_id) else {
                return RealmGetKeysBundleRep::RealmNotFound;
            };
            match realm.keys_bundle_accesses.get(&author.user_id) {
                Some(access) if realm.roles.contains_key(&author.user_id) => RealmGetKeysBundleRep::Ok {
                    keys_bundle_access: access.clone(),
                },
                _ => RealmGetKeysBundleRep::AuthorNotAllowed,
            }
        })
    }

    async fn vlob_create(
        &self,
        realm_id: VlobID,
        vlob_id: VlobID,
        key_index: u64,
        timestamp: DateTime,
        blob: Bytes,
    ) -> Result<VlobWriteRep, ConnectionError> {
        self.write(|org, author, now| {
            let item = VlobItem {
                vlob_id,
                key_index,
                author: author.device_id,
                version: 1,
                created_on: timestamp,
                blob,
            };
            Self::vlob_write(org, &author, realm_id, item, false, now)
        })
    }

    async fn vlob_update(
        &self,
        realm_id: VlobID,
        vlob_id: VlobID,
        key_index: u64,
        version: u32,
        timestamp: DateTime,
        blob: Bytes,
    ) -> Result<VlobWriteRep, ConnectionError> {
        self.write(|org, author, now| {
            let item = VlobItem {
                vlob_id,
                key_index,
                author: author.device_id,
                version,
                created_on: timestamp,
                blob,
            };
            Self::vlob_write(org, &author, realm_id, item, true, now)
        })
    }

    async fn vlob_read_batch(
        &self,
        realm_id: VlobID,
        vlobs: Vec<VlobID>,
        at: Option<DateTime>,
    ) -> Result<VlobReadRep, ConnectionError> {
        self.read(|org, author| {
            let Some(realm) = org.realms.get(&realm_id) else {
                return VlobReadRep::RealmNotFound;
            };
            if !realm.roles.contains_key(&author.user_id) {
                return VlobReadRep::AuthorNotAllowed;
            }
            let items = vlobs
                .iter()
                .filter_map(|vlob_id| {
                    let versions = realm.vlobs.get(vlob_id)?;
                    let item = match at {
                        None => versions.last(),
                        Some(at) => versions.iter().rev().find(|item| item.created_on <= at),
                    };
                    item.cloned()
                })
                .collect();
            VlobReadRep::Ok { items }
        })
    }

    async fn vlob_poll_changes(&self, realm_id: VlobID, last_checkpoint: u64) -> Result<VlobPollChangesRep, ConnectionError> {
        self.read(|org, author| {
            let Some(realm) = org.realms.get(&realm_id) else {
                return VlobPollChangesRep::RealmNotFound;
            };
            if !realm.roles.contains_key(&author.user_id) {
                return VlobPollChangesRep::AuthorNotAllowed;
            }
            let start = usize::try_from(last_checkpoint)
                .unwrap_or(usize::MAX)
                .min(realm.changes.len());
            VlobPollChangesRep::Ok {
                current_checkpoint: realm.changes.len() as u64,
                changes: realm.changes[start..].to_vec(),
            }
        })
    }

    async fn block_create(&self, realm_id: VlobID, block_id: BlockID, key_index: u64, block: Bytes) -> Result<BlockCreateRep, ConnectionError> {
        self.write(|org, author, _| {
            let store_available = org.block_store_available;
            let Some(realm) = org.realms.get_mut(&realm_id) else {
                return BlockCreateRep::RealmNotFound;
            };
            if !realm.roles.get(&author.user_id).map(|r| r.can_write()).unwrap_or(false) {
                return BlockCreateRep::AuthorNotAllowed;
            }
            if !store_available {
                return BlockCreateRep::StoreUnavailable;
            }
            if realm.blocks.contains_key(&block_id) {
                return BlockCreateRep::BlockAlreadyExists;
            }
            tracing::trace!(%block_id, key_index, size = block.len(), "Block stored");
            realm.blocks.insert(block_id, block);
            BlockCreateRep::Ok
        })
    }

    async fn block_read(&self, realm_id: VlobID, block_id: BlockID) -> Result<BlockReadRep, ConnectionError> {
        self.read(|org, author| {
            let Some(realm) = org.realms.get(&realm_id) else {
                return BlockReadRep::BlockNotFound;
            };
            if !realm.roles.contains_key(&author.user_id) {
                return BlockReadRep::AuthorNotAllowed;
            }
            if !org.block_store_available {
                return BlockReadRep::StoreUnavailable;
            }
            match realm.blocks.get(&block_id) {
                Some(data) => BlockReadRep::Ok { data: data.clone() },
                None => BlockReadRep::BlockNotFound,
            }
        })
    }

    async fn invite_new_user(&self, claimer_email: EmailAddress, send_email: bool) -> Result<InviteNewRep, ConnectionError> {
        self.write(|org, author, now| {
            if author.profile != UserProfile::Admin {
                return InviteNewRep::AuthorNotAllowed;
            }
            let enrolled = org
                .users
                .values()
                .any(|u| u.is_active() && *u.certificate.human_handle.email() == claimer_email);
            if enrolled {
                return InviteNewRep::ClaimerEmailAlreadyEnrolled;
            }
            Self::new_invitation(org, &author, InvitationDetails::User { claimer_email }, now, send_email)
        })
    }

    async fn invite_new_device(&self, send_email: bool) -> Result<InviteNewRep, ConnectionError> {
        self.write(|org, author, now| {
            let details = InvitationDetails::Device {
                claimer_user_id: author.user_id,
            };
            Self::new_invitation(org, &author, details, now, send_email)
        })
    }

    async fn invite_new_shamir_recovery(&self, claimer_user_id: UserID, send_email: bool) -> Result<InviteNewRep, ConnectionError> {
        self.write(|org, author, now| {
            match org.users.get(&claimer_user_id) {
                None => return InviteNewRep::UserNotFound,
                Some(user) if !user.is_active() => return InviteNewRep::UserRevoked,
                Some(_) => (),
            }
            let Some(setup) = org.shamir_setups.get(&claimer_user_id) else {
                return InviteNewRep::ShamirRecoveryNotSetup;
            };
            if !setup.brief.per_recipient_shares.contains_key(&author.user_id) {
                return InviteNewRep::AuthorNotAllowed;
            }
            let details = InvitationDetails::ShamirRecovery { claimer_user_id };
            Self::new_invitation(org, &author, details, now, send_email)
        })
    }

    async fn invite_list(&self) -> Result<Vec<InviteListItem>, ConnectionError> {
        self.read(|org, author| {
            let mut invitations: Vec<&Invitation> = org
                .invitations
                .values()
                .filter(|inv| {
                    let created_by_author = matches!(
                        &inv.created_by,
                        InvitationCreatedBy::User { user_id, .. } if *user_id == author.user_id
                    );
                    created_by_author || org.greeters(inv).contains(&author.user_id)
                })
                .collect();
            invitations.sort_by_key(|inv| inv.created_on);
            invitations
                .into_iter()
                .map(|inv| {
                    let (token, created_on, created_by, status) =
                        (inv.token, inv.created_on, inv.created_by.clone(), inv.status);
                    match &inv.details {
                        InvitationDetails::User { claimer_email } => InviteListItem::User {
                            token,
                            created_on,
                            created_by,
                            claimer_email: claimer_email.clone(),
                            status,
                        },
                        InvitationDetails::Device { .. } => InviteListItem::Device {
                            token,
                            created_on,
                            created_by,
                            status,
                        },
                        InvitationDetails::ShamirRecovery { claimer_user_id } => InviteListItem::ShamirRecovery {
                            token,
                            created_on,
                            created_by,
                            claimer_user_id: *claimer_user_id,
                            shamir_recovery_created_on: org
                                .shamir_setups
                                .get(claimer_user_id)
                                .map(|setup| setup.brief.timestamp)
                                .unwrap_or(created_on),
                            status,
                        },
                    }
                })
                .collect()
        })
    }

    async fn invite_cancel(&self, token: InvitationToken) -> Result<InviteCancelRep, ConnectionError> {
        self.write(|org, author, _| {
            let Some(invitation) = org.invitations.get(&token) else {
                return InviteCancelRep::InvitationNotFound;
            };
            let greeters = org.greeters(invitation);
            let created_by_author = matches!(
                &invitation.created_by,
                InvitationCreatedBy::User { user_id, .. } if *user_id == author.user_id
            );
            if !created_by_author && !greeters.contains(&author.user_id) {
                return InviteCancelRep::AuthorNotAllowed;
            }
            match invitation.status {
                InvitationStatus::Cancelled => return InviteCancelRep::InvitationAlreadyCancelled,
                InvitationStatus::Finished => return InviteCancelRep::InvitationCompleted,
                InvitationStatus::Pending => (),
            }
            if let Some(invitation) = org.invitations.get_mut(&token) {
                invitation.status = InvitationStatus::Cancelled;
            }
            org.notify_users(
                &greeters,
                ServerEvent::Invitation {
                    token,
                    status: InvitationStatus::Cancelled,
                },
            );
            tracing::debug!(%token, "Invitation cancelled");
            InviteCancelRep::Ok
        })
    }

    async fn invite_complete(&self, token: InvitationToken) -> Result<InviteCompleteRep, ConnectionError> {
        self.write(|org, author, _| {
            let Some(invitation) = org.invitations.get(&token) else {
                return InviteCompleteRep::InvitationNotFound;
            };
            let greeters = org.greeters(invitation);
            let is_claimer = match &invitation.details {
                InvitationDetails::User { .. } => false,
                InvitationDetails::Device { claimer_user_id }
                | InvitationDetails::ShamirRecovery { claimer_user_id } => *claimer_user_id == author.user_id,
            };
            if !is_claimer && !greeters.contains(&author.user_id) {
                return InviteCompleteRep::AuthorNotAllowed;
            }
            match invitation.status {
                InvitationStatus::Cancelled => return InviteCompleteRep::InvitationCancelled,
                InvitationStatus::Finished => return InviteCompleteRep::InvitationAlreadyCompleted,
                InvitationStatus::Pending => (),
            }
            if let Some(invitation) = org.invitations.get_mut(&token) {
                invitation.status = InvitationStatus::Finished;
            }
            org.notify_users(
                &greeters,
                ServerEvent::Invitation {
                    token,
                    status: InvitationStatus::Finished,
                },
            );
            tracing::debug!(%token, "Invitation completed");
            InviteCompleteRep::Ok
        })
    }

    async fn invite_greeter_start_greeting_attempt(&self, token: InvitationToken) -> Result<StartGreetingAttemptRep, ConnectionError> {
        self.write(|org, author, now| {
            match greeting::start_attempt(org, token, author.user_id, GreeterOrClaimer::Greeter, now) {
                StartGreetingAttemptRep::GreeterNotAllowed => StartGreetingAttemptRep::AuthorNotAllowed,
                rep => rep,
            }
        })
    }

    async fn invite_greeter_cancel_greeting_attempt(
        &self,
        greeting_attempt: GreetingAttemptID,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<CancelGreetingAttemptRep, ConnectionError> {
        self.write(|org, author, now| {
            greeting::cancel_attempt(org, AttemptActor::Greeter(author.user_id), greeting_attempt, reason, now)
        })
    }

    async fn invite_greeter_step(
        &self,
        greeting_attempt: GreetingAttemptID,
        step: GreeterStep,
    ) -> Result<GreetingStepRep<ClaimerStep>, ConnectionError> {
        let author = self.read(|_, author| author)?;
        let device_id = self.device_id;
        greeting::run_step(
            &self.inner,
            &self.organization_id,
            AttemptActor::Greeter(author.user_id),
            greeting_attempt,
            step,
            |org| authenticate(org, device_id, false).map(|_| ()),
        )
        .await
    }

    async fn shamir_recovery_setup(
        &self,
        ciphered_data: Bytes,
        reveal_token: ShamirRevealToken,
        brief_certificate: Bytes,
        share_certificates: Vec<Bytes>,
    ) -> Result<CertificateRep, ConnectionError> {
        self.write(|org, author, now| {
            outcome(certificates::shamir_recovery_setup(
                org,
                author.device_id,
                author.user_id,
                ciphered_data,
                reveal_token,
                brief_certificate,
                share_certificates,
                now,
            ))
        })
    }

    async fn shamir_recovery_delete(&self, deletion_certificate: Bytes) -> Result<CertificateRep, ConnectionError> {
        self.write(|org, author, now| {
            outcome(certificates::shamir_recovery_delete(
                org,
                author.device_id,
                author.user_id,
                deletion_certificate,
                now,
            ))
        })
    }

    async fn tos_get(&self) -> Result<TosGetRep, ConnectionError> {
        self.inner.with_org_quiet(&self.organization_id, |org| {
            authenticate(org, self.device_id, true)?;
            Ok(match &org.tos {
                Some(tos) => TosGetRep::Ok(tos.clone()),
                None => TosGetRep::NoTos,
            })
        })
    }

    async fn tos_accept(&self, tos_updated_on: DateTime) -> Result<TosAcceptRep, ConnectionError> {
        let now = self.inner.now();
        self.inner.with_org(&self.organization_id, |org| {
            let author = authenticate(org, self.device_id, true)?;
            let Some(tos) = &org.tos else {
                return Ok(TosAcceptRep::NoTos);
            };
            if tos.updated_on != tos_updated_on {
                return Ok(TosAcceptRep::TosMismatch);
            }
            if let Some(user) = org.users.get_mut(&author.user_id) {
                user.tos_accepted_on = Some(now);
            }
            Ok(TosAcceptRep::Ok)
        })
    }

    async fn events_listen(&self) -> Result<EventsListener, ConnectionError> {
        self.inner.with_org_quiet(&self.organization_id, |org| {
            let author = authenticate(org, self.device_id, true)?;
            let (sender, receiver) = mpsc::unbounded_channel();
            // The receiver is alive, sending cannot fail
            let _ = sender.send(ServerEvent::ServerConfig(org.server_config.clone()));
            org.listeners.push(Listener {
                user_id: author.user_id,
                sender,
            });
            Ok(receiver)
        })
    }
}
