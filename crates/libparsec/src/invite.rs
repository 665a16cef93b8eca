//! Greeter and claimer sides of invitations over handles
//!
//! Each stage of a greeting attempt lives behind its own handle. Running a
//! step consumes the handle it was given and hands out a new one for the
//! next stage, so a stage is never run twice. While a step runs its handle
//! only holds what is needed to abort it, see
//! [`claimer_greeter_abort_operation`].
//!
//! Network-bound steps take a canceller; cancelling one drops the step at
//! its current suspension point and the stage it came from is lost, as it
//! would be after a peer reset.

use crate::cancel::{get_canceller, run_cancellable, Cancellable, Canceller};
use crate::client::borrow_client;
use crate::handle::{
    borrow_from_handle, impl_from_handle_error, register_handle_with, release_handle_of_kind,
    release_handle_if, take_and_replace, Handle, HandleError, HandleItem, HandleKind,
};
use parsec_client::invite::{
    claimer_retrieve_info as retrieve_info, AnyClaimRetrievedInfoCtx, ClaimFinalizeCtx, ClaimInProgress1Ctx,
    ClaimInProgress2Ctx, ClaimInProgress3Ctx, ClaimInitialCtx, DeviceClaim, DeviceGreet, DeviceGreetInProgress4Ctx,
    GreetInProgress1Ctx, GreetInProgress2Ctx, GreetInProgress3Ctx, GreetInitialCtx, ShamirRecoveryClaim,
    ShamirRecoveryClaimMaybeRecoverDeviceCtx, ShamirRecoveryClaimPickRecipientCtx,
    ShamirRecoveryClaimRecoverDeviceCtx, ShamirRecoveryClaimShare, ShamirRecoveryGreet, UserClaim,
    UserClaimListAdministratorsCtx, UserGreet, UserGreetInProgress4Ctx,
};
pub use parsec_client::client::ClientStartInvitationGreetError;
pub use parsec_client::invite::{
    ClaimInProgressError, ClaimerRetrieveInfoError, ClaimerShamirRecoveryAddShareError,
    ClaimerShamirRecoveryPickRecipientError, ClaimerShamirRecoveryRecoverDeviceError, GreetInProgressError,
};
use parsec_client::ClientConfig;
use parsec_connection::protocol::{ShamirRecoveryRecipient, UserGreetingAdministrator};
use parsec_device_loader::{AvailableDevice, DeviceSaveStrategy, SaveDeviceError};
use parsec_types::{
    DateTime, DeviceLabel, EmailAddress, HumanHandle, InvitationToken, ParsecInvitationAddr, SasCode, UserID,
    UserOnlineStatus, UserProfile,
};
use std::future::Future;
use std::sync::Arc;

/// How many codes the human picks the right one from
const SAS_CODE_CHOICES_SIZE: usize = 4;

impl Cancellable for GreetInProgressError {
    fn cancelled() -> Self {
        Self::Cancelled
    }
}

impl Cancellable for ClaimInProgressError {
    fn cancelled() -> Self {
        Self::Cancelled
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimerGreeterAbortOperationError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UserClaimListInitialInfosError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_handle_error!(NotFound: GreetInProgressError, ClaimInProgressError);
impl_from_handle_error!(Stopped: ClientStartInvitationGreetError);
impl_from_handle_error!(
    Internal: ClaimerGreeterAbortOperationError,
    UserClaimListInitialInfosError,
    ClaimerShamirRecoveryPickRecipientError,
    ClaimerShamirRecoveryAddShareError,
    ClaimerShamirRecoveryRecoverDeviceError,
    SaveDeviceError,
);

/// A stage of a greeting attempt that can be stored behind a handle
trait StoredCtx: Sized {
    fn wrap(self) -> InvitationCtx;
    fn unwrap(ctx: InvitationCtx) -> Result<Self, InvitationCtx>;
    fn peek(ctx: &InvitationCtx) -> Option<&Self>;
}

macro_rules! invitation_ctxs {
    ($($variant:ident($ty:ty)),+ $(,)?) => {
        pub(crate) enum InvitationCtx {
            $($variant($ty),)+
        }

        $(
            impl StoredCtx for $ty {
                fn wrap(self) -> InvitationCtx {
                    InvitationCtx::$variant(self)
                }

                fn unwrap(ctx: InvitationCtx) -> Result<Self, InvitationCtx> {
                    match ctx {
                        InvitationCtx::$variant(ctx) => Ok(ctx),
                        ctx => Err(ctx),
                    }
                }

                fn peek(ctx: &InvitationCtx) -> Option<&Self> {
                    match ctx {
                        InvitationCtx::$variant(ctx) => Some(ctx),
                        _ => None,
                    }
                }
            }
        )+
    };
}

invitation_ctxs!(
    UserGreetInitial(GreetInitialCtx<UserGreet>),
    UserGreetInProgress1(GreetInProgress1Ctx<UserGreet>),
    UserGreetInProgress2(GreetInProgress2Ctx<UserGreet>),
    UserGreetInProgress3(GreetInProgress3Ctx<UserGreet>),
    UserGreetInProgress4(UserGreetInProgress4Ctx),
    DeviceGreetInitial(GreetInitialCtx<DeviceGreet>),
    DeviceGreetInProgress1(GreetInProgress1Ctx<DeviceGreet>),
    DeviceGreetInProgress2(GreetInProgress2Ctx<DeviceGreet>),
    DeviceGreetInProgress3(GreetInProgress3Ctx<DeviceGreet>),
    DeviceGreetInProgress4(DeviceGreetInProgress4Ctx),
    ShamirRecoveryGreetInitial(GreetInitialCtx<ShamirRecoveryGreet>),
    ShamirRecoveryGreetInProgress1(GreetInProgress1Ctx<ShamirRecoveryGreet>),
    ShamirRecoveryGreetInProgress2(GreetInProgress2Ctx<ShamirRecoveryGreet>),
    ShamirRecoveryGreetInProgress3(GreetInProgress3Ctx<ShamirRecoveryGreet>),
    UserClaimListAdministrators(UserClaimListAdministratorsCtx),
    UserClaimInitial(ClaimInitialCtx<UserClaim>),
    UserClaimInProgress1(ClaimInProgress1Ctx<UserClaim>),
    UserClaimInProgress2(ClaimInProgress2Ctx<UserClaim>),
    UserClaimInProgress3(ClaimInProgress3Ctx<UserClaim>),
    DeviceClaimInitial(ClaimInitialCtx<DeviceClaim>),
    DeviceClaimInProgress1(ClaimInProgress1Ctx<DeviceClaim>),
    DeviceClaimInProgress2(ClaimInProgress2Ctx<DeviceClaim>),
    DeviceClaimInProgress3(ClaimInProgress3Ctx<DeviceClaim>),
    ShamirRecoveryClaimPickRecipient(ShamirRecoveryClaimPickRecipientCtx),
    ShamirRecoveryClaimInitial(ClaimInitialCtx<ShamirRecoveryClaim>),
    ShamirRecoveryClaimInProgress1(ClaimInProgress1Ctx<ShamirRecoveryClaim>),
    ShamirRecoveryClaimInProgress2(ClaimInProgress2Ctx<ShamirRecoveryClaim>),
    ShamirRecoveryClaimInProgress3(ClaimInProgress3Ctx<ShamirRecoveryClaim>),
    ShamirRecoveryClaimShare(ShamirRecoveryClaimShare),
    ShamirRecoveryClaimRecoverDevice(ShamirRecoveryClaimRecoverDeviceCtx),
    ClaimFinalize(ClaimFinalizeCtx),
);

fn register_ctx<C: StoredCtx, I>(ctx: C, info: impl FnOnce(Handle, &C) -> I) -> I {
    register_handle_with(|handle| {
        let info = info(handle, &ctx);
        (HandleItem::Invitation(Box::new(ctx.wrap())), info)
    })
}

/// Swap the stage behind `handle` for a running step
fn take_ctx<C: StoredCtx>(handle: Handle, abort: &Arc<Canceller>) -> Result<C, HandleError> {
    take_and_replace(handle, HandleKind::Invitation, |item| match item {
        HandleItem::Invitation(ctx) => match C::unwrap(*ctx) {
            Ok(ctx) => Ok((HandleItem::InvitationStep(abort.clone()), ctx)),
            Err(ctx) => Err(HandleItem::Invitation(Box::new(ctx))),
        },
        item => Err(item),
    })
}

fn is_step_of(item: &HandleItem, abort: &Arc<Canceller>) -> bool {
    matches!(item, HandleItem::InvitationStep(step) if Arc::ptr_eq(step, abort))
}

/// Remove a stage for good, outside of any step
fn release_ctx<C: StoredCtx>(handle: Handle) -> Result<C, HandleError> {
    let item = release_handle_if(handle, |item| matches!(item, HandleItem::Invitation(ctx) if C::peek(ctx).is_some()));
    match item {
        Some(HandleItem::Invitation(ctx)) => C::unwrap(*ctx).map_err(|_| HandleError::WrongState { handle }),
        _ => Err(HandleError::NotFound { handle }),
    }
}

/// Run `step` on the stage behind `handle`, consuming it
async fn run_step<C, T, E, Fut>(canceller: Handle, handle: Handle, step: impl FnOnce(C) -> Fut) -> Result<T, E>
where
    C: StoredCtx,
    E: Cancellable + From<HandleError>,
    Fut: Future<Output = Result<T, E>>,
{
    let canceller = get_canceller(canceller)?;
    let abort = Arc::new(Canceller::new());
    let ctx = take_ctx::<C>(handle, &abort)?;
    let res = run_cancellable(&canceller, Some(&abort), step(ctx)).await;
    // Already gone if the step was aborted
    release_handle_if(handle, |item| is_step_of(item, &abort));
    if res.is_err() {
        tracing::debug!(%handle, "Invitation step failed");
    }
    res
}

/// Run `step` then store the stage it leads to under a new handle
async fn advance<C, N, I, E, Fut>(
    canceller: Handle,
    handle: Handle,
    step: impl FnOnce(C) -> Fut,
    info: impl FnOnce(Handle, &N) -> I,
) -> Result<I, E>
where
    C: StoredCtx,
    N: StoredCtx,
    E: Cancellable + From<HandleError>,
    Fut: Future<Output = Result<N, E>>,
{
    let next = run_step(canceller, handle, step).await?;
    Ok(register_ctx(next, info))
}

/// Tear down an invitation stage, aborting its step if one is running
pub fn claimer_greeter_abort_operation(handle: Handle) -> Result<(), ClaimerGreeterAbortOperationError> {
    match release_handle_of_kind(handle, HandleKind::Invitation)? {
        HandleItem::InvitationStep(abort) => {
            abort.cancel();
            tracing::info!(%handle, "Running invitation step aborted");
            Ok(())
        }
        HandleItem::Invitation(_) => {
            tracing::info!(%handle, "Invitation stage dropped");
            Ok(())
        }
        _ => Err(anyhow::anyhow!("handle {handle} is not an invitation").into()),
    }
}

/*
 * Greeter side
 */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetInitialInfo {
    pub handle: Handle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetInProgress1Info {
    pub handle: Handle,
    pub greeter_sas: SasCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetInProgress2Info {
    pub handle: Handle,
    pub claimer_sas: SasCode,
    /// The claimer's code among decoys, in random order
    pub claimer_sas_choices: Vec<SasCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetInProgress3Info {
    pub handle: Handle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserGreetInProgress4Info {
    pub handle: Handle,
    pub requested_human_handle: HumanHandle,
    pub requested_device_label: DeviceLabel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGreetInProgress4Info {
    pub handle: Handle,
    pub requested_device_label: DeviceLabel,
}

fn greet_in_progress_1_info<K>(handle: Handle, ctx: &GreetInProgress1Ctx<K>) -> GreetInProgress1Info {
    GreetInProgress1Info {
        handle,
        greeter_sas: ctx.greeter_sas().clone(),
    }
}

fn greet_in_progress_2_info<K>(handle: Handle, ctx: &GreetInProgress2Ctx<K>) -> GreetInProgress2Info {
    GreetInProgress2Info {
        handle,
        claimer_sas: ctx.claimer_sas().clone(),
        claimer_sas_choices: ctx.generate_claimer_sas_choices(SAS_CODE_CHOICES_SIZE),
    }
}

fn greet_in_progress_3_info<K>(handle: Handle, _: &GreetInProgress3Ctx<K>) -> GreetInProgress3Info {
    GreetInProgress3Info { handle }
}

pub fn client_start_user_invitation_greet(
    client: Handle,
    token: InvitationToken,
) -> Result<GreetInitialInfo, ClientStartInvitationGreetError> {
    let client = borrow_client(client)?;
    if client.is_stopped() {
        return Err(ClientStartInvitationGreetError::Stopped);
    }
    let ctx = client.start_user_invitation_greet(token);
    Ok(register_ctx(ctx, |handle, _| GreetInitialInfo { handle }))
}

pub fn client_start_device_invitation_greet(
    client: Handle,
    token: InvitationToken,
) -> Result<GreetInitialInfo, ClientStartInvitationGreetError> {
    let client = borrow_client(client)?;
    if client.is_stopped() {
        return Err(ClientStartInvitationGreetError::Stopped);
    }
    let ctx = client.start_device_invitation_greet(token);
    Ok(register_ctx(ctx, |handle, _| GreetInitialInfo { handle }))
}

pub async fn client_start_shamir_recovery_invitation_greet(
    client: Handle,
    token: InvitationToken,
) -> Result<GreetInitialInfo, ClientStartInvitationGreetError> {
    let ctx = borrow_client(client)?.start_shamir_recovery_invitation_greet(token).await?;
    Ok(register_ctx(ctx, |handle, _| GreetInitialInfo { handle }))
}

pub async fn greeter_user_initial_do_wait_peer(
    canceller: Handle,
    handle: Handle,
) -> Result<GreetInProgress1Info, GreetInProgressError> {
    advance(canceller, handle, GreetInitialCtx::<UserGreet>::do_wait_peer, greet_in_progress_1_info).await
}

pub async fn greeter_user_in_progress_1_do_wait_peer_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<GreetInProgress2Info, GreetInProgressError> {
    advance(
        canceller,
        handle,
        GreetInProgress1Ctx::<UserGreet>::do_wait_peer_trust,
        greet_in_progress_2_info,
    )
    .await
}

pub async fn greeter_user_in_progress_2_do_signify_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<GreetInProgress3Info, GreetInProgressError> {
    advance(
        canceller,
        handle,
        GreetInProgress2Ctx::<UserGreet>::do_signify_trust,
        greet_in_progress_3_info,
    )
    .await
}

pub async fn greeter_user_in_progress_2_do_deny_trust(canceller: Handle, handle: Handle) -> Result<(), GreetInProgressError> {
    run_step(canceller, handle, GreetInProgress2Ctx::<UserGreet>::do_deny_trust).await
}

pub async fn greeter_user_in_progress_3_do_get_claim_requests(
    canceller: Handle,
    handle: Handle,
) -> Result<UserGreetInProgress4Info, GreetInProgressError> {
    advance(
        canceller,
        handle,
        GreetInProgress3Ctx::<UserGreet>::do_get_claim_requests,
        |handle, ctx: &UserGreetInProgress4Ctx| UserGreetInProgress4Info {
            handle,
            requested_human_handle: ctx.requested_human_handle().clone(),
            requested_device_label: ctx.requested_device_label().clone(),
        },
    )
    .await
}

/// Create the user, with the claimer's request or anything the greeter prefers
pub async fn greeter_user_in_progress_4_do_create(
    canceller: Handle,
    handle: Handle,
    human_handle: HumanHandle,
    device_label: DeviceLabel,
    profile: UserProfile,
) -> Result<(), GreetInProgressError> {
    run_step(canceller, handle, move |ctx: UserGreetInProgress4Ctx| {
        ctx.do_create(human_handle, device_label, profile)
    })
    .await
}

pub async fn greeter_device_initial_do_wait_peer(
    canceller: Handle,
    handle: Handle,
) -> Result<GreetInProgress1Info, GreetInProgressError> {
    advance(canceller, handle, GreetInitialCtx::<DeviceGreet>::do_wait_peer, greet_in_progress_1_info).await
}

pub async fn greeter_device_in_progress_1_do_wait_peer_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<GreetInProgress2Info, GreetInProgressError> {
    advance(
        canceller,
        handle,
        GreetInProgress1Ctx::<DeviceGreet>::do_wait_peer_trust,
        greet_in_progress_2_info,
    )
    .await
}

pub async fn greeter_device_in_progress_2_do_signify_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<GreetInProgress3Info, GreetInProgressError> {
    advance(
        canceller,
        handle,
        GreetInProgress2Ctx::<DeviceGreet>::do_signify_trust,
        greet_in_progress_3_info,
    )
    .await
}

pub async fn greeter_device_in_progress_2_do_deny_trust(canceller: Handle, handle: Handle) -> Result<(), GreetInProgressError> {
    run_step(canceller, handle, GreetInProgress2Ctx::<DeviceGreet>::do_deny_trust).await
}

pub async fn greeter_device_in_progress_3_do_get_claim_requests(
    canceller: Handle,
    handle: Handle,
) -> Result<DeviceGreetInProgress4Info, GreetInProgressError> {
    advance(
        canceller,
        handle,
        GreetInProgress3Ctx::<DeviceGreet>::do_get_claim_requests,
        |handle, ctx: &DeviceGreetInProgress4Ctx| DeviceGreetInProgress4Info {
            handle,
            requested_device_label: ctx.requested_device_label().clone(),
        },
    )
    .await
}

pub async fn greeter_device_in_progress_4_do_create(
    canceller: Handle,
    handle: Handle,
    device_label: DeviceLabel,
) -> Result<(), GreetInProgressError> {
    run_step(canceller, handle, move |ctx: DeviceGreetInProgress4Ctx| ctx.do_create(device_label)).await
}

pub async fn greeter_shamir_recovery_initial_do_wait_peer(
    canceller: Handle,
    handle: Handle,
) -> Result<GreetInProgress1Info, GreetInProgressError> {
    advance(
        canceller,
        handle,
        GreetInitialCtx::<ShamirRecoveryGreet>::do_wait_peer,
        greet_in_progress_1_info,
    )
    .await
}

pub async fn greeter_shamir_recovery_in_progress_1_do_wait_peer_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<GreetInProgress2Info, GreetInProgressError> {
    advance(
        canceller,
        handle,
        GreetInProgress1Ctx::<ShamirRecoveryGreet>::do_wait_peer_trust,
        greet_in_progress_2_info,
    )
    .await
}

pub async fn greeter_shamir_recovery_in_progress_2_do_signify_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<GreetInProgress3Info, GreetInProgressError> {
    advance(
        canceller,
        handle,
        GreetInProgress2Ctx::<ShamirRecoveryGreet>::do_signify_trust,
        greet_in_progress_3_info,
    )
    .await
}

pub async fn greeter_shamir_recovery_in_progress_2_do_deny_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<(), GreetInProgressError> {
    run_step(canceller, handle, GreetInProgress2Ctx::<ShamirRecoveryGreet>::do_deny_trust).await
}

/// Hand our shares over, this ends the greeting
pub async fn greeter_shamir_recovery_in_progress_3_do_get_claim_requests(
    canceller: Handle,
    handle: Handle,
) -> Result<(), GreetInProgressError> {
    run_step(
        canceller,
        handle,
        GreetInProgress3Ctx::<ShamirRecoveryGreet>::do_get_claim_requests,
    )
    .await
}

/*
 * Claimer side
 */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyClaimRetrievedInfo {
    User {
        handle: Handle,
        claimer_email: EmailAddress,
        administrators: Vec<UserGreetingAdministrator>,
    },
    Device {
        handle: Handle,
        greeter_user_id: UserID,
        greeter_human_handle: HumanHandle,
    },
    ShamirRecovery {
        handle: Handle,
        claimer_user_id: UserID,
        claimer_human_handle: HumanHandle,
        shamir_recovery_created_on: DateTime,
        recipients: Vec<ShamirRecoveryRecipient>,
        threshold: u8,
        /// Enough shares are held by non-revoked recipients
        is_recoverable: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimInitialInfo {
    pub handle: Handle,
    pub greeter_user_id: UserID,
    pub greeter_human_handle: HumanHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserClaimInitialInfo {
    pub handle: Handle,
    pub greeter_user_id: UserID,
    pub greeter_human_handle: HumanHandle,
    pub online_status: UserOnlineStatus,
    pub last_greeting_attempt_joined_on: Option<DateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimInProgress1Info {
    pub handle: Handle,
    pub greeter_user_id: UserID,
    pub greeter_human_handle: HumanHandle,
    pub greeter_sas: SasCode,
    /// The greeter's code among decoys, in random order
    pub greeter_sas_choices: Vec<SasCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimInProgress2Info {
    pub handle: Handle,
    pub claimer_sas: SasCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimInProgress3Info {
    pub handle: Handle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimFinalizeInfo {
    pub handle: Handle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShamirRecoveryClaimShareInfo {
    pub handle: Handle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShamirRecoveryClaimMaybeRecoverDeviceInfo {
    /// More shares are needed
    PickRecipient {
        handle: Handle,
        recipients_without_a_share: Vec<ShamirRecoveryRecipient>,
    },
    RecoverDevice {
        handle: Handle,
    },
}

fn claim_initial_info<K>(handle: Handle, ctx: &ClaimInitialCtx<K>) -> ClaimInitialInfo {
    ClaimInitialInfo {
        handle,
        greeter_user_id: ctx.greeter_user_id(),
        greeter_human_handle: ctx.greeter_human_handle().clone(),
    }
}

fn claim_in_progress_1_info<K>(handle: Handle, ctx: &ClaimInProgress1Ctx<K>) -> ClaimInProgress1Info {
    ClaimInProgress1Info {
        handle,
        greeter_user_id: ctx.greeter_user_id(),
        greeter_human_handle: ctx.greeter_human_handle().clone(),
        greeter_sas: ctx.greeter_sas().clone(),
        greeter_sas_choices: ctx.generate_greeter_sas_choices(SAS_CODE_CHOICES_SIZE),
    }
}

fn claim_in_progress_2_info<K>(handle: Handle, ctx: &ClaimInProgress2Ctx<K>) -> ClaimInProgress2Info {
    ClaimInProgress2Info {
        handle,
        claimer_sas: ctx.claimer_sas().clone(),
    }
}

fn claim_in_progress_3_info<K>(handle: Handle, _: &ClaimInProgress3Ctx<K>) -> ClaimInProgress3Info {
    ClaimInProgress3Info { handle }
}

fn claim_finalize_info(handle: Handle, _: &ClaimFinalizeCtx) -> ClaimFinalizeInfo {
    ClaimFinalizeInfo { handle }
}

/// Ask the server what the invitation behind `addr` is about
pub async fn claimer_retrieve_info(
    config: Arc<ClientConfig>,
    addr: ParsecInvitationAddr,
) -> Result<AnyClaimRetrievedInfo, ClaimerRetrieveInfoError> {
    let info = match retrieve_info(config, addr, None).await? {
        AnyClaimRetrievedInfoCtx::User(ctx) => register_ctx(ctx, |handle, ctx| AnyClaimRetrievedInfo::User {
            handle,
            claimer_email: ctx.claimer_email().clone(),
            administrators: ctx.administrators().to_vec(),
        }),
        AnyClaimRetrievedInfoCtx::Device(ctx) => register_ctx(ctx, |handle, ctx| AnyClaimRetrievedInfo::Device {
            handle,
            greeter_user_id: ctx.greeter_user_id(),
            greeter_human_handle: ctx.greeter_human_handle().clone(),
        }),
        AnyClaimRetrievedInfoCtx::ShamirRecovery(ctx) => register_ctx(ctx, |handle, ctx| {
            let available_shares: usize = ctx
                .recipients()
                .iter()
                .filter(|recipient| recipient.revoked_on.is_none())
                .map(|recipient| usize::from(recipient.shares))
                .sum();
            AnyClaimRetrievedInfo::ShamirRecovery {
                handle,
                claimer_user_id: ctx.claimer_user_id(),
                claimer_human_handle: ctx.claimer_human_handle().clone(),
                shamir_recovery_created_on: ctx.shamir_recovery_created_on(),
                recipients: ctx.recipients().to_vec(),
                threshold: ctx.threshold(),
                is_recoverable: available_shares >= usize::from(ctx.threshold()),
            }
        }),
    };
    Ok(info)
}

/// One handle per administrator able to greet us, the list itself stays usable
pub fn claimer_user_list_initial_info(handle: Handle) -> Result<Vec<UserClaimInitialInfo>, UserClaimListInitialInfosError> {
    let list = borrow_from_handle(handle, HandleKind::Invitation, |item| match item {
        HandleItem::Invitation(ctx) => UserClaimListAdministratorsCtx::peek(ctx).cloned(),
        _ => None,
    })?;
    let administrators = list.administrators().to_vec();
    let infos = list
        .list_initial_ctxs()
        .into_iter()
        .zip(administrators)
        .map(|(ctx, administrator)| {
            register_ctx(ctx, |handle, ctx| UserClaimInitialInfo {
                handle,
                greeter_user_id: ctx.greeter_user_id(),
                greeter_human_handle: ctx.greeter_human_handle().clone(),
                online_status: administrator.online_status,
                last_greeting_attempt_joined_on: administrator.last_greeting_attempt_joined_on,
            })
        })
        .collect();
    Ok(infos)
}

/// Wait on every administrator at once, the first to join greets us
pub async fn claimer_user_wait_all_peers(
    canceller: Handle,
    handle: Handle,
) -> Result<ClaimInProgress1Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        UserClaimListAdministratorsCtx::wait_all_peers,
        claim_in_progress_1_info,
    )
    .await
}

pub async fn claimer_user_initial_do_wait_peer(
    canceller: Handle,
    handle: Handle,
) -> Result<ClaimInProgress1Info, ClaimInProgressError> {
    advance(canceller, handle, ClaimInitialCtx::<UserClaim>::do_wait_peer, claim_in_progress_1_info).await
}

pub async fn claimer_user_in_progress_1_do_signify_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<ClaimInProgress2Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        ClaimInProgress1Ctx::<UserClaim>::do_signify_trust,
        claim_in_progress_2_info,
    )
    .await
}

/// Check the code picked by the human against the greeter's, cancelling the
/// attempt for both sides on mismatch
pub async fn claimer_user_in_progress_1_do_pick_greeter_sas(
    canceller: Handle,
    handle: Handle,
    picked: SasCode,
) -> Result<ClaimInProgress2Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        move |ctx: ClaimInProgress1Ctx<UserClaim>| async move { ctx.do_pick_greeter_sas(&picked).await },
        claim_in_progress_2_info,
    )
    .await
}

pub async fn claimer_user_in_progress_1_do_deny_trust(canceller: Handle, handle: Handle) -> Result<(), ClaimInProgressError> {
    run_step(canceller, handle, ClaimInProgress1Ctx::<UserClaim>::do_deny_trust).await
}

pub async fn claimer_user_in_progress_2_do_wait_peer_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<ClaimInProgress3Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        ClaimInProgress2Ctx::<UserClaim>::do_wait_peer_trust,
        claim_in_progress_3_info,
    )
    .await
}

pub async fn claimer_user_in_progress_3_do_claim(
    canceller: Handle,
    handle: Handle,
    requested_device_label: DeviceLabel,
    requested_human_handle: HumanHandle,
) -> Result<ClaimFinalizeInfo, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        move |ctx: ClaimInProgress3Ctx<UserClaim>| ctx.do_claim(requested_device_label, requested_human_handle),
        claim_finalize_info,
    )
    .await
}

pub async fn claimer_device_initial_do_wait_peer(
    canceller: Handle,
    handle: Handle,
) -> Result<ClaimInProgress1Info, ClaimInProgressError> {
    advance(canceller, handle, ClaimInitialCtx::<DeviceClaim>::do_wait_peer, claim_in_progress_1_info).await
}

pub async fn claimer_device_in_progress_1_do_signify_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<ClaimInProgress2Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        ClaimInProgress1Ctx::<DeviceClaim>::do_signify_trust,
        claim_in_progress_2_info,
    )
    .await
}

pub async fn claimer_device_in_progress_1_do_pick_greeter_sas(
    canceller: Handle,
    handle: Handle,
    picked: SasCode,
) -> Result<ClaimInProgress2Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        move |ctx: ClaimInProgress1Ctx<DeviceClaim>| async move { ctx.do_pick_greeter_sas(&picked).await },
        claim_in_progress_2_info,
    )
    .await
}

pub async fn claimer_device_in_progress_1_do_deny_trust(canceller: Handle, handle: Handle) -> Result<(), ClaimInProgressError> {
    run_step(canceller, handle, ClaimInProgress1Ctx::<DeviceClaim>::do_deny_trust).await
}

pub async fn claimer_device_in_progress_2_do_wait_peer_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<ClaimInProgress3Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        ClaimInProgress2Ctx::<DeviceClaim>::do_wait_peer_trust,
        claim_in_progress_3_info,
    )
    .await
}

pub async fn claimer_device_in_progress_3_do_claim(
    canceller: Handle,
    handle: Handle,
    requested_device_label: DeviceLabel,
) -> Result<ClaimFinalizeInfo, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        move |ctx: ClaimInProgress3Ctx<DeviceClaim>| ctx.do_claim(requested_device_label),
        claim_finalize_info,
    )
    .await
}

/// Start claiming the shares of one recipient, the pick stage stays usable
pub fn claimer_shamir_recovery_pick_recipient(
    handle: Handle,
    recipient_user_id: UserID,
) -> Result<ClaimInitialInfo, ClaimerShamirRecoveryPickRecipientError> {
    let ctx = borrow_from_handle(handle, HandleKind::Invitation, |item| match item {
        HandleItem::Invitation(ctx) => {
            ShamirRecoveryClaimPickRecipientCtx::peek(ctx).map(|ctx| ctx.pick_recipient(recipient_user_id))
        }
        _ => None,
    })??;
    Ok(register_ctx(ctx, claim_initial_info))
}

pub async fn claimer_shamir_recovery_initial_do_wait_peer(
    canceller: Handle,
    handle: Handle,
) -> Result<ClaimInProgress1Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        ClaimInitialCtx::<ShamirRecoveryClaim>::do_wait_peer,
        claim_in_progress_1_info,
    )
    .await
}

pub async fn claimer_shamir_recovery_in_progress_1_do_signify_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<ClaimInProgress2Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        ClaimInProgress1Ctx::<ShamirRecoveryClaim>::do_signify_trust,
        claim_in_progress_2_info,
    )
    .await
}

pub async fn claimer_shamir_recovery_in_progress_1_do_pick_greeter_sas(
    canceller: Handle,
    handle: Handle,
    picked: SasCode,
) -> Result<ClaimInProgress2Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        move |ctx: ClaimInProgress1Ctx<ShamirRecoveryClaim>| async move { ctx.do_pick_greeter_sas(&picked).await },
        claim_in_progress_2_info,
    )
    .await
}

pub async fn claimer_shamir_recovery_in_progress_1_do_deny_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<(), ClaimInProgressError> {
    run_step(canceller, handle, ClaimInProgress1Ctx::<ShamirRecoveryClaim>::do_deny_trust).await
}

pub async fn claimer_shamir_recovery_in_progress_2_do_wait_peer_trust(
    canceller: Handle,
    handle: Handle,
) -> Result<ClaimInProgress3Info, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        ClaimInProgress2Ctx::<ShamirRecoveryClaim>::do_wait_peer_trust,
        claim_in_progress_3_info,
    )
    .await
}

/// Receive the recipient's shares, to be given to [`claimer_shamir_recovery_add_share`]
pub async fn claimer_shamir_recovery_in_progress_3_do_claim(
    canceller: Handle,
    handle: Handle,
) -> Result<ShamirRecoveryClaimShareInfo, ClaimInProgressError> {
    advance(
        canceller,
        handle,
        ClaimInProgress3Ctx::<ShamirRecoveryClaim>::do_recover_share,
        |handle, _: &ShamirRecoveryClaimShare| ShamirRecoveryClaimShareInfo { handle },
    )
    .await
}

/// Merge a recipient's shares into the pick stage, both handles are consumed
pub fn claimer_shamir_recovery_add_share(
    recipient_pick_handle: Handle,
    share_handle: Handle,
) -> Result<ShamirRecoveryClaimMaybeRecoverDeviceInfo, ClaimerShamirRecoveryAddShareError> {
    // Both must be there before either is taken
    let both_present = borrow_from_handle(recipient_pick_handle, HandleKind::Invitation, |item| match item {
        HandleItem::Invitation(ctx) => ShamirRecoveryClaimPickRecipientCtx::peek(ctx).map(|_| ()),
        _ => None,
    })
    .and_then(|()| {
        borrow_from_handle(share_handle, HandleKind::Invitation, |item| match item {
            HandleItem::Invitation(ctx) => ShamirRecoveryClaimShare::peek(ctx).map(|_| ()),
            _ => None,
        })
    });
    both_present?;
    let share = release_ctx::<ShamirRecoveryClaimShare>(share_handle)?;
    let pick = release_ctx::<ShamirRecoveryClaimPickRecipientCtx>(recipient_pick_handle)?;

    let info = match pick.add_share(share)? {
        ShamirRecoveryClaimMaybeRecoverDeviceCtx::PickRecipient(ctx) => register_ctx(ctx, |handle, ctx| {
            ShamirRecoveryClaimMaybeRecoverDeviceInfo::PickRecipient {
                handle,
                recipients_without_a_share: ctx.recipients_without_a_share().into_iter().cloned().collect(),
            }
        }),
        ShamirRecoveryClaimMaybeRecoverDeviceCtx::RecoverDevice(ctx) => register_ctx(ctx, |handle, _| {
            ShamirRecoveryClaimMaybeRecoverDeviceInfo::RecoverDevice { handle }
        }),
    };
    Ok(info)
}

/// Register a new device from the recovered secret
///
/// On failure the handle stays valid and the recovery can be retried.
pub async fn claimer_shamir_recovery_recover_device(
    handle: Handle,
    requested_device_label: DeviceLabel,
) -> Result<ClaimFinalizeInfo, ClaimerShamirRecoveryRecoverDeviceError> {
    let abort = Arc::new(Canceller::new());
    let ctx = take_ctx::<ShamirRecoveryClaimRecoverDeviceCtx>(handle, &abort)?;
    let res = ctx.recover_device(requested_device_label).await;
    match res {
        Ok(finalize) => {
            release_handle_if(handle, |item| is_step_of(item, &abort));
            Ok(register_ctx(finalize, claim_finalize_info))
        }
        Err(err) => {
            // Put the stage back unless it was aborted meanwhile
            let restored = take_and_replace(handle, HandleKind::Invitation, |item| {
                if is_step_of(&item, &abort) {
                    Ok((HandleItem::Invitation(Box::new(ctx.wrap())), ()))
                } else {
                    Err(item)
                }
            });
            if restored.is_err() {
                tracing::debug!(%handle, "Recovery stage aborted while running");
            }
            Err(err)
        }
    }
}

/// Save the new device under its default key file
pub async fn claimer_finalize_save_local_device(
    handle: Handle,
    save_strategy: DeviceSaveStrategy,
) -> Result<AvailableDevice, SaveDeviceError> {
    let ctx = release_ctx::<ClaimFinalizeCtx>(handle)?;
    let key_file = ctx.get_default_key_file();
    let device_id = ctx.device_id();
    let available = ctx.save_local_device(&save_strategy, &key_file).await?;
    tracing::info!(%device_id, key_file = %key_file.display(), "Claimed device saved");
    Ok(available)
}
