//! Delivery of client events to the caller
//!
//! A single callback is registered for the whole process. Each started
//! client gets a task reading its event bus and calling the callback, so
//! events of one client reach the callback in the order they were emitted
//! and never from inside the engine's own locks.

use crate::handle::Handle;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use parsec_client::{Client, ClientEvent};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub type OnEventCallback = Arc<dyn Fn(Handle, ClientEvent) + Send + Sync>;

static ON_EVENT_CALLBACK: Lazy<RwLock<Option<OnEventCallback>>> = Lazy::new(|| RwLock::new(None));

/// Register the callback receiving every client's events, replacing the previous one
pub fn set_on_event_callback(callback: OnEventCallback) {
    *ON_EVENT_CALLBACK.write() = Some(callback);
}

pub fn clear_on_event_callback() {
    *ON_EVENT_CALLBACK.write() = None;
}

fn dispatch(client: Handle, event: ClientEvent) {
    // Cloned so the callback runs without the lock, it may register another one
    let callback = ON_EVENT_CALLBACK.read().clone();
    match callback {
        Some(callback) => callback(client, event),
        None => tracing::trace!(%client, ?event, "No event callback registered"),
    }
}

/// Forward `client`'s events until it reports being stopped
///
/// The subscription is taken right away, events are held until the client's
/// handle is known. `ClientStarted` is emitted before anyone can subscribe,
/// it is replayed first.
pub(crate) fn spawn_events_forwarder(handle: oneshot::Receiver<Handle>, client: &Client) -> JoinHandle<()> {
    let mut events = client.event_bus().subscribe();
    let device_id = client.device().device_id;
    tokio::spawn(async move {
        let Ok(handle) = handle.await else { return };
        dispatch(handle, ClientEvent::ClientStarted { device_id });
        while let Some(event) = events.recv().await {
            let stopped = matches!(event, ClientEvent::ClientStopped { .. });
            dispatch(handle, event);
            if stopped {
                break;
            }
        }
        tracing::debug!(client = %handle, "Events forwarder done");
    })
}
