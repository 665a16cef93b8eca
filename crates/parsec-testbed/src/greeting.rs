//! Greeting attempts: join, cancel, and the step-by-step rendezvous

use crate::server::ServerInner;
use crate::state::{GreetingAttempt, Organization};
use parsec_connection::protocol::{CancelGreetingAttemptRep, StartGreetingAttemptRep};
use parsec_connection::{ClaimerStep, ConnectionError, GreeterStep, GreetingStepRep, ServerEvent};
use parsec_types::{
    CancelledGreetingAttemptReason, DateTime, GreeterOrClaimer, GreetingAttemptID,
    InvitationStatus, InvitationToken, OrganizationID, UserID,
};

/// Step data posted by one side of an attempt
pub(crate) trait SideStep: Clone + PartialEq + Send + 'static {
    type Peer: Clone + Send + 'static;
    const SIDE: GreeterOrClaimer;

    fn position(&self) -> usize;

    fn slots(attempt: &mut GreetingAttempt) -> (&mut Vec<Self>, &Vec<Self::Peer>);
}

impl SideStep for GreeterStep {
    type Peer = ClaimerStep;
    const SIDE: GreeterOrClaimer = GreeterOrClaimer::Greeter;

    fn position(&self) -> usize {
        usize::from(self.index())
    }

    fn slots(attempt: &mut GreetingAttempt) -> (&mut Vec<Self>, &Vec<Self::Peer>) {
        (&mut attempt.greeter_steps, &attempt.claimer_steps)
    }
}

impl SideStep for ClaimerStep {
    type Peer = GreeterStep;
    const SIDE: GreeterOrClaimer = GreeterOrClaimer::Claimer;

    fn position(&self) -> usize {
        usize::from(self.index())
    }

    fn slots(attempt: &mut GreetingAttempt) -> (&mut Vec<Self>, &Vec<Self::Peer>) {
        (&mut attempt.claimer_steps, &attempt.greeter_steps)
    }
}

/// Who is allowed to act on an attempt
#[derive(Debug, Clone, Copy)]
pub(crate) enum AttemptActor {
    Greeter(UserID),
    Claimer(InvitationToken),
}

impl AttemptActor {
    fn side(self) -> GreeterOrClaimer {
        match self {
            AttemptActor::Greeter(_) => GreeterOrClaimer::Greeter,
            AttemptActor::Claimer(_) => GreeterOrClaimer::Claimer,
        }
    }

    fn owns(self, attempt: &GreetingAttempt) -> bool {
        match self {
            AttemptActor::Greeter(user_id) => attempt.greeter == user_id,
            AttemptActor::Claimer(token) => attempt.token == token,
        }
    }
}

fn cancel(org: &mut Organization, attempt_id: GreetingAttemptID, origin: GreeterOrClaimer, reason: CancelledGreetingAttemptReason, now: DateTime) {
    let Some(attempt) = org.greeting_attempts.get_mut(&attempt_id) else {
        return;
    };
    if attempt.cancelled.is_some() {
        return;
    }
    attempt.cancelled = Some((origin, reason, now));
    let (token, greeter) = (attempt.token, attempt.greeter);
    org.notify_user(
        greeter,
        ServerEvent::GreetingAttemptCancelled {
            token,
            greeting_attempt: attempt_id,
        },
    );
}

/// Join the current attempt of `(token, greeter)`, replacing it if our side already joined it
pub(crate) fn start_attempt(
    org: &mut Organization,
    token: InvitationToken,
    greeter: UserID,
    side: GreeterOrClaimer,
    now: DateTime,
) -> StartGreetingAttemptRep {
    let Some(invitation) = org.invitations.get(&token) else {
        return StartGreetingAttemptRep::InvitationNotFound;
    };
    match invitation.status {
        InvitationStatus::Pending => (),
        InvitationStatus::Cancelled => return StartGreetingAttemptRep::InvitationCancelled,
        InvitationStatus::Finished => return StartGreetingAttemptRep::InvitationCompleted,
    }
    match org.users.get(&greeter) {
        None => return StartGreetingAttemptRep::GreeterNotFound,
        Some(user) if !user.is_active() => return StartGreetingAttemptRep::GreeterRevoked,
        Some(_) => (),
    }
    if !org.greeters(invitation).contains(&greeter) {
        return StartGreetingAttemptRep::GreeterNotAllowed;
    }

    let current = org
        .greeting_attempts
        .values()
        .find(|a| a.token == token && a.greeter == greeter && a.cancelled.is_none())
        .map(|a| (a.id, a.joined(side)));
    let attempt_id = match current {
        Some((id, false)) => id,
        Some((id, true)) => {
            cancel(org, id, side, CancelledGreetingAttemptReason::AutomaticallyCancelled, now);
            let attempt = GreetingAttempt::new(token, greeter);
            let id = attempt.id;
            org.greeting_attempts.insert(id, attempt);
            id
        }
        None => {
            let attempt = GreetingAttempt::new(token, greeter);
            let id = attempt.id;
            org.greeting_attempts.insert(id, attempt);
            id
        }
    };

    if let Some(attempt) = org.greeting_attempts.get_mut(&attempt_id) {
        match side {
            GreeterOrClaimer::Greeter => attempt.greeter_joined = Some(now),
            GreeterOrClaimer::Claimer => attempt.claimer_joined = Some(now),
        }
    }
    let event = match side {
        GreeterOrClaimer::Greeter => ServerEvent::GreetingAttemptJoined {
            token,
            greeting_attempt: attempt_id,
        },
        GreeterOrClaimer::Claimer => ServerEvent::GreetingAttemptReady {
            token,
            greeting_attempt: attempt_id,
        },
    };
    org.notify_user(greeter, event);

    StartGreetingAttemptRep::Ok {
        greeting_attempt: attempt_id,
    }
}

pub(crate) fn cancel_attempt(
    org: &mut Organization,
    actor: AttemptActor,
    attempt_id: GreetingAttemptID,
    reason: CancelledGreetingAttemptReason,
    now: DateTime,
) -> CancelGreetingAttemptRep {
    let Some(attempt) = org.greeting_attempts.get(&attempt_id) else {
        return CancelGreetingAttemptRep::GreetingAttemptNotFound;
    };
    if !actor.owns(attempt) {
        return match actor {
            AttemptActor::Greeter(_) => CancelGreetingAttemptRep::AuthorNotAllowed,
            AttemptActor::Claimer(_) => CancelGreetingAttemptRep::GreetingAttemptNotFound,
        };
    }
    match org.invitations.get(&attempt.token).map(|i| i.status) {
        Some(InvitationStatus::Pending) => (),
        Some(InvitationStatus::Finished) => return CancelGreetingAttemptRep::InvitationCompleted,
        Some(InvitationStatus::Cancelled) | None => return CancelGreetingAttemptRep::InvitationCancelled,
    }
    if !attempt.joined(actor.side()) {
        return CancelGreetingAttemptRep::GreetingAttemptNotJoined;
    }
    if let Some((origin, reason, timestamp)) = attempt.cancelled {
        return CancelGreetingAttemptRep::GreetingAttemptAlreadyCancelled {
            origin,
            reason,
            timestamp,
        };
    }
    cancel(org, attempt_id, actor.side(), reason, now);
    tracing::debug!(greeting_attempt = %attempt_id, ?reason, "Greeting attempt cancelled");
    CancelGreetingAttemptRep::Ok
}

/// Post `step` if needed, then return the peer's data for the same step if already there
///
/// The boolean tells whether the attempt was modified.
fn poll_step<S: SideStep>(
    org: &mut Organization,
    actor: AttemptActor,
    attempt_id: GreetingAttemptID,
    step: &S,
) -> (Option<GreetingStepRep<S::Peer>>, bool) {
    let Some(attempt) = org.greeting_attempts.get_mut(&attempt_id) else {
        return (Some(GreetingStepRep::GreetingAttemptNotFound), false);
    };
    if !actor.owns(attempt) {
        let rep = match actor {
            AttemptActor::Greeter(_) => GreetingStepRep::AuthorNotAllowed,
            AttemptActor::Claimer(_) => GreetingStepRep::GreetingAttemptNotFound,
        };
        return (Some(rep), false);
    }
    if !attempt.joined(S::SIDE) {
        return (Some(GreetingStepRep::GreetingAttemptNotJoined), false);
    }
    if let Some((origin, reason, timestamp)) = attempt.cancelled {
        return (
            Some(GreetingStepRep::GreetingAttemptCancelled {
                origin,
                reason,
                timestamp,
            }),
            false,
        );
    }
    let token = attempt.token;

    let (mine, peer) = S::slots(attempt);
    let position = step.position();
    let mut pushed = false;
    if position < mine.len() {
        if mine[position] != *step {
            return (Some(GreetingStepRep::StepMismatch), false);
        }
    } else if position == mine.len() && peer.len() >= position {
        mine.push(step.clone());
        pushed = true;
    } else {
        return (Some(GreetingStepRep::StepTooAdvanced), false);
    }
    if let Some(peer_step) = peer.get(position) {
        return (Some(GreetingStepRep::Ok(peer_step.clone())), pushed);
    }

    let rep = match org.invitations.get(&token).map(|i| i.status) {
        Some(InvitationStatus::Pending) => None,
        Some(InvitationStatus::Finished) => Some(GreetingStepRep::InvitationCompleted),
        Some(InvitationStatus::Cancelled) | None => Some(GreetingStepRep::InvitationCancelled),
    };
    (rep, pushed)
}

/// Long-poll until the peer posted the same step or the attempt went away
pub(crate) async fn run_step<S: SideStep>(
    inner: &ServerInner,
    organization_id: &OrganizationID,
    actor: AttemptActor,
    attempt_id: GreetingAttemptID,
    step: S,
    check_actor: impl Fn(&Organization) -> Result<(), ConnectionError>,
) -> Result<GreetingStepRep<S::Peer>, ConnectionError> {
    let mut changes = inner.subscribe_changes();
    loop {
        let (rep, pushed) = inner.with_org_quiet(organization_id, |org| {
            check_actor(org)?;
            Ok(poll_step(org, actor, attempt_id, &step))
        })?;
        if pushed {
            inner.notify_changed();
        }
        if let Some(rep) = rep {
            return Ok(rep);
        }
        if changes.changed().await.is_err() {
            return Err(ConnectionError::NoResponse);
        }
    }
}
