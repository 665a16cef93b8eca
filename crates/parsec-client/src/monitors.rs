//! Background work of a running client
//!
//! Monitors are tasks tracked by the client's [`TaskRegistry`], they all
//! stop with the client.

use crate::client::Client;
use crate::event_bus::ClientEvent;
use crate::workspace::{WorkspaceOps, WorkspaceSyncError};
use parking_lot::Mutex;
use parsec_connection::ServerEvent;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const RECONNECT_MIN_BACKOFF: Duration = Duration::from_millis(500);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(30);
const OUTBOUND_SYNC_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub(crate) struct TaskRegistry {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn spawn_cancellable<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = fut => {}
            }
        });
        self.handles.lock().push(handle);
    }

    /// Run `f` every `interval` until it returns `false` or the registry shuts down
    pub fn spawn_interval_until<F, Fut>(&self, interval: Duration, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                if !f().await {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
        self.handles.lock().push(handle);
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

/// Keep a server events subscription alive and turn what it yields into client events
///
/// The monitor only holds a weak reference so a dropped client is not kept alive by it.
pub(crate) fn start_server_events_monitor(client: &Arc<Client>) {
    let weak = Arc::downgrade(client);
    client.tasks().spawn_cancellable(async move {
        let mut backoff = RECONNECT_MIN_BACKOFF;
        loop {
            let Some(client) = weak.upgrade() else { return };
            let mut listener = match client.cmds.events_listen().await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::debug!(error = %err, "Cannot listen to server events");
                    client.note_connection_error(&err);
                    if !err.is_offline() {
                        // Organization expired, user revoked or frozen: retrying won't help
                        return;
                    }
                    drop(client);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF);
                    continue;
                }
            };
            backoff = RECONNECT_MIN_BACKOFF;
            set_online(&client);
            if let Err(err) = client.refresh_certificates().await {
                tracing::warn!(error = %err, "Cannot fetch new certificates");
            }
            drop(client);

            while let Some(event) = listener.recv().await {
                let Some(client) = weak.upgrade() else { return };
                handle_server_event(&client, event).await;
            }

            let Some(client) = weak.upgrade() else { return };
            client.note_connection_error(&parsec_connection::ConnectionError::NoResponse);
        }
    });
}

fn set_online(client: &Client) {
    let was_online = std::mem::replace(&mut client.status.lock().online, true);
    if !was_online {
        tracing::info!(device_id = %client.device.device_id, "Server is online");
        client.event_bus.send(ClientEvent::Online);
    }
}

async fn handle_server_event(client: &Client, event: ServerEvent) {
    tracing::trace!(?event, "Server event");
    match event {
        ServerEvent::Pinged { ping } => client.event_bus.send(ClientEvent::Ping { ping }),
        ServerEvent::ServerConfig(config) => {
            let changed = {
                let mut status = client.status.lock();
                let changed = status.server_config.as_ref() != Some(&config);
                status.server_config = Some(config);
                changed
            };
            if changed {
                client.event_bus.send(ClientEvent::ServerConfigChanged);
            }
        }
        ServerEvent::CertificatesUpdated { timestamp } => {
            tracing::debug!(%timestamp, "New certificates available");
            if let Err(err) = client.refresh_certificates().await {
                tracing::warn!(error = %err, "Cannot fetch new certificates");
            }
        }
        ServerEvent::Invitation { token, status } => {
            client.event_bus.send(ClientEvent::InvitationChanged { token, status })
        }
        ServerEvent::GreetingAttemptReady { token, greeting_attempt } => client
            .event_bus
            .send(ClientEvent::GreetingAttemptReady { token, greeting_attempt }),
        ServerEvent::GreetingAttemptCancelled { token, greeting_attempt } => client
            .event_bus
            .send(ClientEvent::GreetingAttemptCancelled { token, greeting_attempt }),
        ServerEvent::GreetingAttemptJoined { token, greeting_attempt } => client
            .event_bus
            .send(ClientEvent::GreetingAttemptJoined { token, greeting_attempt }),
        ServerEvent::RealmVlob {
            realm_id, author, ..
        } => {
            if author == client.device.device_id {
                return;
            }
            let started = client
                .started_workspaces()
                .into_iter()
                .find(|workspace| workspace.realm_id() == realm_id);
            if let Some(workspace) = started {
                match workspace.inbound_sync().await {
                    Ok(()) | Err(WorkspaceSyncError::Stopped) => (),
                    Err(err) => tracing::warn!(%realm_id, error = %err, "Inbound sync failed"),
                }
            }
        }
        ServerEvent::OrganizationExpired => {
            client.note_connection_error(&parsec_connection::ConnectionError::ExpiredOrganization)
        }
        ServerEvent::UserRevoked => {
            if let Err(err) = client.refresh_certificates().await {
                tracing::warn!(error = %err, "Cannot fetch new certificates");
            }
        }
        ServerEvent::UserFrozen => client.note_connection_error(&parsec_connection::ConnectionError::FrozenUser),
        ServerEvent::TosUpdated => {
            client.note_connection_error(&parsec_connection::ConnectionError::UserMustAcceptTos)
        }
    }
}

/// Periodically upload the local changes of a started workspace
pub(crate) fn start_workspace_outbound_sync_monitor(client: &Client, workspace: &Arc<WorkspaceOps>) {
    let workspace: Weak<WorkspaceOps> = Arc::downgrade(workspace);
    client.tasks().spawn_interval_until(OUTBOUND_SYNC_INTERVAL, move || {
        let workspace = workspace.clone();
        async move {
            let Some(workspace) = workspace.upgrade() else { return false };
            let need_sync = match workspace.get_need_outbound_sync().await {
                Ok(need_sync) => need_sync,
                Err(WorkspaceSyncError::Stopped) => return false,
                Err(err) => {
                    tracing::debug!(realm_id = %workspace.realm_id(), error = %err, "Cannot list entries to sync");
                    return true;
                }
            };
            for entry_id in need_sync {
                match workspace.outbound_sync(entry_id).await {
                    Ok(()) => (),
                    Err(WorkspaceSyncError::Stopped) => return false,
                    Err(WorkspaceSyncError::Offline) => break,
                    Err(err) => {
                        tracing::warn!(realm_id = %workspace.realm_id(), %entry_id, error = %err, "Outbound sync failed")
                    }
                }
            }
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_interval_task_stops_when_asked() {
        let registry = TaskRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        registry.spawn_interval_until(Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move { counter.fetch_add(1, Ordering::SeqCst) < 2 }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_tasks() {
        let registry = TaskRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        registry.spawn_cancellable(async move {
            std::future::pending::<()>().await;
            let _ = tx.send(());
        });

        registry.shutdown();
        // The sender is dropped without sending once the task is gone
        assert!(rx.await.is_err());
    }
}
