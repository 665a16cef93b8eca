//! Commands issued by a claimer, authenticated by its invitation token

use crate::greeting::{self, AttemptActor};
use crate::server::ServerInner;
use crate::state::{Invitation, InvitationDetails, Organization};
use async_trait::async_trait;
use parsec_connection::protocol::{
    CancelGreetingAttemptRep, InviteInfoRep, RevealRep, ShamirRecoveryRecipient,
    StartGreetingAttemptRep, UserGreetingAdministrator,
};
use parsec_connection::{ClaimerStep, ConnectionError, GreeterStep, GreetingStepRep, InvitedCmds};
use parsec_types::{
    CancelledGreetingAttemptReason, DateTime, GreeterOrClaimer, GreetingAttemptID, InvitationStatus,
    InvitationToken, OrganizationID, ShamirRevealToken, UserID, UserOnlineStatus, UserProfile,
};
use std::sync::Arc;

pub(crate) struct InvitedSession {
    inner: Arc<ServerInner>,
    organization_id: OrganizationID,
    token: InvitationToken,
}

fn authenticate(org: &Organization, token: InvitationToken) -> Result<&Invitation, ConnectionError> {
    if org.is_expired {
        return Err(ConnectionError::ExpiredOrganization);
    }
    let invitation = org.invitations.get(&token).ok_or(ConnectionError::InvitationNotFound)?;
    if invitation.status != InvitationStatus::Pending {
        return Err(ConnectionError::InvitationAlreadyUsedOrDeleted);
    }
    Ok(invitation)
}

fn online_status(org: &Organization, user_id: UserID) -> UserOnlineStatus {
    if org.listeners.iter().any(|l| l.user_id == user_id && !l.sender.is_closed()) {
        UserOnlineStatus::Online
    } else {
        UserOnlineStatus::Offline
    }
}

fn last_joined(org: &Organization, token: InvitationToken, greeter: UserID) -> Option<DateTime> {
    org.greeting_attempts
        .values()
        .filter(|a| a.token == token && a.greeter == greeter)
        .filter_map(|a| a.greeter_joined)
        .max()
}

impl InvitedSession {
    pub fn new(inner: Arc<ServerInner>, organization_id: OrganizationID, token: InvitationToken) -> Self {
        Self {
            inner,
            organization_id,
            token,
        }
    }

    fn info(org: &Organization, invitation: &Invitation) -> Result<InviteInfoRep, ConnectionError> {
        let human_handle = |user_id: &UserID| {
            org.users
                .get(user_id)
                .map(|u| u.certificate.human_handle.clone())
                .ok_or(ConnectionError::InvitationAlreadyUsedOrDeleted)
        };
        let created_by = invitation.created_by.clone();
        let rep = match &invitation.details {
            InvitationDetails::User { claimer_email } => {
                let mut administrators: Vec<UserGreetingAdministrator> = org
                    .users
                    .iter()
                    .filter(|(_, u)| u.is_active() && u.current_profile == UserProfile::Admin)
                    .map(|(user_id, u)| UserGreetingAdministrator {
                        user_id: *user_id,
                        human_handle: u.certificate.human_handle.clone(),
                        online_status: online_status(org, *user_id),
                        last_greeting_attempt_joined_on: last_joined(org, invitation.token, *user_id),
                    })
                    .collect();
                administrators.sort_by(|a, b| a.human_handle.label().cmp(b.human_handle.label()));
                InviteInfoRep::User {
                    claimer_email: claimer_email.clone(),
                    created_by,
                    administrators,
                }
            }
            InvitationDetails::Device { claimer_user_id } => InviteInfoRep::Device {
                claimer_user_id: *claimer_user_id,
                claimer_human_handle: human_handle(claimer_user_id)?,
                created_by,
            },
            InvitationDetails::ShamirRecovery { claimer_user_id } => {
                let setup = org
                    .shamir_setups
                    .get(claimer_user_id)
                    .ok_or(ConnectionError::InvitationAlreadyUsedOrDeleted)?;
                let mut recipients = Vec::with_capacity(setup.brief.per_recipient_shares.len());
                for (user_id, shares) in &setup.brief.per_recipient_shares {
                    let Some(user) = org.users.get(user_id) else {
                        continue;
                    };
                    recipients.push(ShamirRecoveryRecipient {
                        user_id: *user_id,
                        human_handle: user.certificate.human_handle.clone(),
                        shares: *shares,
                        revoked_on: user.revoked_on,
                        online_status: online_status(org, *user_id),
                    });
                }
                InviteInfoRep::ShamirRecovery {
                    claimer_user_id: *claimer_user_id,
                    claimer_human_handle: human_handle(claimer_user_id)?,
                    created_by,
                    shamir_recovery_created_on: setup.brief.timestamp,
                    threshold: setup.brief.threshold,
                    recipients,
                }
            }
        };
        Ok(rep)
    }
}

#[async_trait]
impl InvitedCmds for InvitedSession {
    async fn invite_info(&self) -> Result<InviteInfoRep, ConnectionError> {
        self.inner.with_org_quiet(&self.organization_id, |org| {
            let invitation = authenticate(org, self.token)?;
            Self::info(org, invitation)
        })
    }

    async fn invite_claimer_start_greeting_attempt(&self, greeter: UserID) -> Result<StartGreetingAttemptRep, ConnectionError> {
        let now = self.inner.now();
        self.inner.with_org(&self.organization_id, |org| {
            authenticate(org, self.token)?;
            Ok(greeting::start_attempt(org, self.token, greeter, GreeterOrClaimer::Claimer, now))
        })
    }

    async fn invite_claimer_cancel_greeting_attempt(
        &self,
        greeting_attempt: GreetingAttemptID,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<CancelGreetingAttemptRep, ConnectionError> {
        let now = self.inner.now();
        self.inner.with_org(&self.organization_id, |org| {
            authenticate(org, self.token)?;
            Ok(greeting::cancel_attempt(
                org,
                AttemptActor::Claimer(self.token),
                greeting_attempt,
                reason,
                now,
            ))
        })
    }

    async fn invite_claimer_step(
        &self,
        greeting_attempt: GreetingAttemptID,
        step: ClaimerStep,
    ) -> Result<GreetingStepRep<GreeterStep>, ConnectionError> {
        let token = self.token;
        greeting::run_step(
            &self.inner,
            &self.organization_id,
            AttemptActor::Claimer(token),
            greeting_attempt,
            step,
            // Completion is reported by the step itself, so the last step can still be collected
            |org| {
                if org.is_expired {
                    return Err(ConnectionError::ExpiredOrganization);
                }
                if !org.invitations.contains_key(&token) {
                    return Err(ConnectionError::InvitationNotFound);
                }
                Ok(())
            },
        )
        .await
    }

    async fn invite_shamir_recovery_reveal(&self, reveal_token: ShamirRevealToken) -> Result<RevealRep, ConnectionError> {
        self.inner.with_org_quiet(&self.organization_id, |org| {
            let invitation = authenticate(org, self.token)?;
            let InvitationDetails::ShamirRecovery { claimer_user_id } = &invitation.details else {
                return Ok(RevealRep::NotFound);
            };
            Ok(match org.shamir_setups.get(claimer_user_id) {
                Some(setup) if setup.reveal_token == reveal_token => RevealRep::Ok {
                    ciphered_data: setup.ciphered_data.clone(),
                },
                _ => RevealRep::NotFound,
            })
        })
    }
}
