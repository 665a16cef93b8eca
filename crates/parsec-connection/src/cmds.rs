//! Command families of the server API
//!
//! - [`AuthenticatedCmds`]: issued by a device of the organization
//! - [`InvitedCmds`]: issued by a claimer holding an invitation token
//! - [`AnonymousCmds`]: issued by anyone, used to bootstrap an organization
//!
//! Every method returns `Err(ConnectionError)` when no answer could be
//! obtained at all, and the command's response type otherwise.

use crate::error::ConnectionError;
use crate::events::ServerEvent;
use crate::greeting::{ClaimerStep, GreeterStep, GreetingStepRep};
use crate::protocol::*;
use async_trait::async_trait;
use parsec_types::{
    BlockID, BootstrapToken, CancelledGreetingAttemptReason, DateTime, EmailAddress,
    GreetingAttemptID, InvitationToken, ShamirRevealToken, UserID, VerifyKey, VlobID,
};
use tokio::sync::mpsc;

/// Stream of events for an authenticated device
pub type EventsListener = mpsc::UnboundedReceiver<ServerEvent>;

#[async_trait]
pub trait AuthenticatedCmds: Send + Sync {
    async fn ping(&self, ping: String) -> Result<String, ConnectionError>;

    async fn server_config(&self) -> Result<ServerConfig, ConnectionError>;

    async fn organization_stats(&self) -> Result<OrganizationStats, ConnectionError>;

    /// Signed certificates issued strictly after `after`, oldest first
    async fn certificate_get(&self, after: Option<DateTime>) -> Result<Vec<Bytes>, ConnectionError>;

    async fn user_create(&self, user_certificate: Bytes, device_certificate: Bytes) -> Result<CertificateRep, ConnectionError>;

    async fn device_create(&self, device_certificate: Bytes) -> Result<CertificateRep, ConnectionError>;

    async fn user_revoke(&self, revoked_user_certificate: Bytes) -> Result<CertificateRep, ConnectionError>;

    async fn user_update(&self, user_update_certificate: Bytes) -> Result<CertificateRep, ConnectionError>;

    /// Users frozen by the organization administration, admins only
    async fn user_list_frozen(&self) -> Result<UserListFrozenRep, ConnectionError>;

    async fn realm_create(&self, realm_role_certificate: Bytes, keys_bundle_access: Bytes) -> Result<CertificateRep, ConnectionError>;

    async fn realm_share(&self, realm_role_certificate: Bytes, recipient_keys_bundle_access: Bytes) -> Result<CertificateRep, ConnectionError>;

    async fn realm_unshare(&self, realm_role_certificate: Bytes) -> Result<CertificateRep, ConnectionError>;

    async fn realm_rename(&self, realm_name_certificate: Bytes) -> Result<CertificateRep, ConnectionError>;

    async fn realm_get_keys_bundle(&self, realm_id: VlobID) -> Result<RealmGetKeysBundleRep, ConnectionError>;

    async fn vlob_create(
        &self,
        realm_id: VlobID,
        vlob_id: VlobID,
        key_index: u64,
        timestamp: DateTime,
        blob: Bytes,
    ) -> Result<VlobWriteRep, ConnectionError>;

    async fn vlob_update(
        &self,
        realm_id: VlobID,
        vlob_id: VlobID,
        key_index: u64,
        version: u32,
        timestamp: DateTime,
        blob: Bytes,
    ) -> Result<VlobWriteRep, ConnectionError>;

    /// Latest versions of `vlobs`, or the versions current at `at`
    async fn vlob_read_batch(
        &self,
        realm_id: VlobID,
        vlobs: Vec<VlobID>,
        at: Option<DateTime>,
    ) -> Result<VlobReadRep, ConnectionError>;

    async fn vlob_poll_changes(&self, realm_id: VlobID, last_checkpoint: u64) -> Result<VlobPollChangesRep, ConnectionError>;

    async fn block_create(&self, realm_id: VlobID, block_id: BlockID, key_index: u64, block: Bytes) -> Result<BlockCreateRep, ConnectionError>;

    async fn block_read(&self, realm_id: VlobID, block_id: BlockID) -> Result<BlockReadRep, ConnectionError>;

    async fn invite_new_user(&self, claimer_email: EmailAddress, send_email: bool) -> Result<InviteNewRep, ConnectionError>;

    async fn invite_new_device(&self, send_email: bool) -> Result<InviteNewRep, ConnectionError>;

    async fn invite_new_shamir_recovery(&self, claimer_user_id: UserID, send_email: bool) -> Result<InviteNewRep, ConnectionError>;

    async fn invite_list(&self) -> Result<Vec<InviteListItem>, ConnectionError>;

    async fn invite_cancel(&self, token: InvitationToken) -> Result<InviteCancelRep, ConnectionError>;

    async fn invite_complete(&self, token: InvitationToken) -> Result<InviteCompleteRep, ConnectionError>;

    async fn invite_greeter_start_greeting_attempt(&self, token: InvitationToken) -> Result<StartGreetingAttemptRep, ConnectionError>;

    async fn invite_greeter_cancel_greeting_attempt(
        &self,
        greeting_attempt: GreetingAttemptID,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<CancelGreetingAttemptRep, ConnectionError>;

    /// Post our data for a step and wait for the claimer's
    async fn invite_greeter_step(
        &self,
        greeting_attempt: GreetingAttemptID,
        step: GreeterStep,
    ) -> Result<GreetingStepRep<ClaimerStep>, ConnectionError>;

    async fn shamir_recovery_setup(
        &self,
        ciphered_data: Bytes,
        reveal_token: ShamirRevealToken,
        brief_certificate: Bytes,
        share_certificates: Vec<Bytes>,
    ) -> Result<CertificateRep, ConnectionError>;

    async fn shamir_recovery_delete(&self, deletion_certificate: Bytes) -> Result<CertificateRep, ConnectionError>;

    async fn tos_get(&self) -> Result<TosGetRep, ConnectionError>;

    async fn tos_accept(&self, tos_updated_on: DateTime) -> Result<TosAcceptRep, ConnectionError>;

    async fn events_listen(&self) -> Result<EventsListener, ConnectionError>;
}

#[async_trait]
pub trait InvitedCmds: Send + Sync {
    async fn invite_info(&self) -> Result<InviteInfoRep, ConnectionError>;

    async fn invite_claimer_start_greeting_attempt(&self, greeter: UserID) -> Result<StartGreetingAttemptRep, ConnectionError>;

    async fn invite_claimer_cancel_greeting_attempt(
        &self,
        greeting_attempt: GreetingAttemptID,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<CancelGreetingAttemptRep, ConnectionError>;

    /// Post our data for a step and wait for the greeter's
    async fn invite_claimer_step(
        &self,
        greeting_attempt: GreetingAttemptID,
        step: ClaimerStep,
    ) -> Result<GreetingStepRep<GreeterStep>, ConnectionError>;

    async fn invite_shamir_recovery_reveal(&self, reveal_token: ShamirRevealToken) -> Result<RevealRep, ConnectionError>;
}

#[async_trait]
pub trait AnonymousCmds: Send + Sync {
    async fn organization_bootstrap(
        &self,
        bootstrap_token: Option<BootstrapToken>,
        root_verify_key: VerifyKey,
        user_certificate: Bytes,
        device_certificate: Bytes,
    ) -> Result<CertificateRep, ConnectionError>;
}
