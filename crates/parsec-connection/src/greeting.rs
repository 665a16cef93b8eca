//! Steps of a greeting attempt
//!
//! A greeting attempt is a server-relayed rendezvous: for each step number
//! both parties post their data, and each one receives the data posted by
//! the other once it is available. Steps must be run in order.
//!
//! | step | greeter sends        | claimer sends        |
//! |------|----------------------|----------------------|
//! | 0    | public key           | public key           |
//! | 1    | -                    | hashed nonce         |
//! | 2    | nonce                | -                    |
//! | 3    | -                    | nonce                |
//! | 4    | -                    | trust signal         |
//! | 5    | trust signal         | -                    |
//! | 6    | -                    | encrypted payload    |
//! | 7    | encrypted payload    | -                    |
//! | 8    | -                    | acknowledgement      |

use parsec_types::{CancelledGreetingAttemptReason, DateTime, GreeterOrClaimer, PublicKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GreeterStep {
    Number0WaitPeer { public_key: PublicKey },
    Number1GetHashedNonce,
    Number2SendNonce { greeter_nonce: Vec<u8> },
    Number3GetNonce,
    Number4WaitPeerTrust,
    Number5SignifyTrust,
    Number6GetPayload,
    Number7SendPayload { greeter_payload: Vec<u8> },
    Number8WaitPeerAcknowledgment,
}

impl GreeterStep {
    pub fn index(&self) -> u8 {
        match self {
            GreeterStep::Number0WaitPeer { .. } => 0,
            GreeterStep::Number1GetHashedNonce => 1,
            GreeterStep::Number2SendNonce { .. } => 2,
            GreeterStep::Number3GetNonce => 3,
            GreeterStep::Number4WaitPeerTrust => 4,
            GreeterStep::Number5SignifyTrust => 5,
            GreeterStep::Number6GetPayload => 6,
            GreeterStep::Number7SendPayload { .. } => 7,
            GreeterStep::Number8WaitPeerAcknowledgment => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimerStep {
    Number0WaitPeer { public_key: PublicKey },
    Number1SendHashedNonce { hashed_nonce: Vec<u8> },
    Number2GetNonce,
    Number3SendNonce { claimer_nonce: Vec<u8> },
    Number4SignifyTrust,
    Number5WaitPeerTrust,
    Number6SendPayload { claimer_payload: Vec<u8> },
    Number7GetPayload,
    Number8Acknowledge,
}

impl ClaimerStep {
    pub fn index(&self) -> u8 {
        match self {
            ClaimerStep::Number0WaitPeer { .. } => 0,
            ClaimerStep::Number1SendHashedNonce { .. } => 1,
            ClaimerStep::Number2GetNonce => 2,
            ClaimerStep::Number3SendNonce { .. } => 3,
            ClaimerStep::Number4SignifyTrust => 4,
            ClaimerStep::Number5WaitPeerTrust => 5,
            ClaimerStep::Number6SendPayload { .. } => 6,
            ClaimerStep::Number7GetPayload => 7,
            ClaimerStep::Number8Acknowledge => 8,
        }
    }
}

/// Outcome of posting a step; `T` is the peer's step type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GreetingStepRep<T> {
    /// The peer's data for the same step
    Ok(T),
    AuthorNotAllowed,
    InvitationCancelled,
    InvitationCompleted,
    GreetingAttemptNotFound,
    GreetingAttemptNotJoined,
    GreetingAttemptCancelled {
        origin: GreeterOrClaimer,
        reason: CancelledGreetingAttemptReason,
        timestamp: DateTime,
    },
    /// The same step was already posted with different data
    StepMismatch,
    /// The previous step has not been completed by both sides
    StepTooAdvanced,
}
