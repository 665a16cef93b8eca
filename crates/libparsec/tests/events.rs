mod common;

use common::start_client;
use libparsec::{clear_on_event_callback, client_stop, set_on_event_callback, ClientEvent, Handle};
use parking_lot::Mutex;
use parsec_testbed::TestbedEnv;
use std::sync::Arc;

#[tokio::test]
async fn test_events_reach_callback_in_order() {
    let received: Arc<Mutex<Vec<(Handle, ClientEvent)>>> = Arc::default();
    let sink = received.clone();
    set_on_event_callback(Arc::new(move |client, event| sink.lock().push((client, event))));

    let env = TestbedEnv::coolorg().await.unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let alice = env.device("alice").unwrap();
    let client = start_client(&env, "alice", tmp.path()).await;
    client_stop(client).await.unwrap();
    clear_on_event_callback();

    let events: Vec<ClientEvent> = received
        .lock()
        .iter()
        .filter(|(handle, _)| *handle == client)
        .map(|(_, event)| event.clone())
        .collect();
    assert_eq!(
        events.first(),
        Some(&ClientEvent::ClientStarted {
            device_id: alice.device_id
        })
    );
    assert_eq!(
        events.last(),
        Some(&ClientEvent::ClientStopped {
            device_id: alice.device_id
        })
    );
    let started = events
        .iter()
        .filter(|event| matches!(event, ClientEvent::ClientStarted { .. }))
        .count();
    assert_eq!(started, 1);
}
