//! Events a running client reports to whoever listens
//!
//! Events of one bus are delivered to every subscriber in the order they
//! were sent.

use parking_lot::Mutex;
use parsec_types::{DateTime, DeviceID, GreetingAttemptID, InvitationStatus, InvitationToken, VlobID};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ClientStarted {
        device_id: DeviceID,
    },
    ClientStopped {
        device_id: DeviceID,
    },
    Online,
    Offline,
    ExpiredOrganization,
    FrozenSelfUser,
    RevokedSelfUser,
    MustAcceptTos,
    ServerConfigChanged,
    TooMuchDriftWithServerClock {
        server_timestamp: DateTime,
        client_timestamp: DateTime,
        ballpark_client_early_offset: f64,
        ballpark_client_late_offset: f64,
    },
    InvitationChanged {
        token: InvitationToken,
        status: InvitationStatus,
    },
    InvitationAlreadyUsedOrDeleted {
        token: InvitationToken,
    },
    GreetingAttemptReady {
        token: InvitationToken,
        greeting_attempt: GreetingAttemptID,
    },
    GreetingAttemptJoined {
        token: InvitationToken,
        greeting_attempt: GreetingAttemptID,
    },
    GreetingAttemptCancelled {
        token: InvitationToken,
        greeting_attempt: GreetingAttemptID,
    },
    WorkspaceLocallyCreated {
        realm_id: VlobID,
    },
    WorkspacesSelfListChanged,
    WorkspaceOpsOutboundSyncStarted {
        realm_id: VlobID,
        entry_id: VlobID,
    },
    WorkspaceOpsOutboundSyncProgress {
        realm_id: VlobID,
        entry_id: VlobID,
        blocks: u64,
        block_index: u64,
        blocksize: u64,
    },
    WorkspaceOpsOutboundSyncDone {
        realm_id: VlobID,
        entry_id: VlobID,
    },
    WorkspaceOpsOutboundSyncAborted {
        realm_id: VlobID,
        entry_id: VlobID,
    },
    WorkspaceOpsInboundSyncDone {
        realm_id: VlobID,
        entry_id: VlobID,
    },
    WorkspaceWatchedEntryChanged {
        realm_id: VlobID,
        entry_id: VlobID,
    },
    Ping {
        ping: String,
    },
}

/// Fan-out of [`ClientEvent`]s, clones share the same subscribers
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event sent from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    pub fn send(&self, event: ClientEvent) {
        tracing::trace!(?event, "Client event");
        let mut subscribers = self.subscribers.lock();
        // Dropped receivers are forgotten on the next send
        subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_fanned_out_in_order() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.send(ClientEvent::Online);
        bus.send(ClientEvent::Ping { ping: "hello".into() });

        for receiver in [&mut first, &mut second] {
            assert_eq!(receiver.recv().await, Some(ClientEvent::Online));
            assert_eq!(receiver.recv().await, Some(ClientEvent::Ping { ping: "hello".into() }));
        }

        drop(first);
        bus.send(ClientEvent::Offline);
        assert_eq!(second.recv().await, Some(ClientEvent::Offline));
        assert_eq!(bus.subscribers.lock().len(), 1);
    }
}
