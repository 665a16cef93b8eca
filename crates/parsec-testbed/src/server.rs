//! The in-memory server and its test controls

use crate::anonymous::AnonymousSession;
use crate::authenticated::AuthenticatedSession;
use crate::invited::InvitedSession;
use crate::state::{Organization, ServerState};
use parking_lot::Mutex;
use parsec_connection::protocol::{ActiveUsersLimit, Tos};
use parsec_connection::{
    register_server, unregister_server, AnonymousCmds, AuthenticatedCmds, ConnectionError,
    InvitedCmds, ServerConnector, ServerEvent,
};
use parsec_types::{
    BootstrapToken, DateTime, DeviceID, InvitationToken, OrganizationID, ParsecAddr, TimeProvider,
    UserID,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

pub(crate) struct ServerInner {
    pub addr: ParsecAddr,
    pub state: Mutex<ServerState>,
    /// Bumped on every change a long-polling command may be waiting for
    changes: watch::Sender<u64>,
    online: AtomicBool,
    pub time_provider: TimeProvider,
}

impl ServerInner {
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn check_online(&self) -> Result<(), ConnectionError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(ConnectionError::NoResponse)
        }
    }

    pub fn now(&self) -> DateTime {
        self.time_provider.now()
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn notify_changed(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Run `f` on an organization without waking long-polling commands
    pub fn with_org_quiet<T>(
        &self,
        organization_id: &OrganizationID,
        f: impl FnOnce(&mut Organization) -> Result<T, ConnectionError>,
    ) -> Result<T, ConnectionError> {
        self.check_online()?;
        let mut state = self.state.lock();
        let org = state
            .organizations
            .get_mut(organization_id)
            .ok_or(ConnectionError::OrganizationNotFound)?;
        f(org)
    }

    /// Run `f` on an organization, failing as an unknown organization if it does not exist
    pub fn with_org<T>(
        &self,
        organization_id: &OrganizationID,
        f: impl FnOnce(&mut Organization) -> Result<T, ConnectionError>,
    ) -> Result<T, ConnectionError> {
        let outcome = self.with_org_quiet(organization_id, f);
        self.notify_changed();
        outcome
    }
}

struct TestbedConnector(Arc<ServerInner>);

impl ServerConnector for TestbedConnector {
    fn authenticated(
        &self,
        organization_id: &OrganizationID,
        device_id: DeviceID,
    ) -> Result<Arc<dyn AuthenticatedCmds>, ConnectionError> {
        Ok(Arc::new(AuthenticatedSession::new(
            self.0.clone(),
            organization_id.clone(),
            device_id,
        )))
    }

    fn invited(
        &self,
        organization_id: &OrganizationID,
        token: InvitationToken,
    ) -> Result<Arc<dyn InvitedCmds>, ConnectionError> {
        Ok(Arc::new(InvitedSession::new(self.0.clone(), organization_id.clone(), token)))
    }

    fn anonymous(&self, organization_id: &OrganizationID) -> Result<Arc<dyn AnonymousCmds>, ConnectionError> {
        Ok(Arc::new(AnonymousSession::new(self.0.clone(), organization_id.clone())))
    }
}

/// A server reachable at its address for as long as this value lives
pub struct TestbedServer {
    inner: Arc<ServerInner>,
}

impl TestbedServer {
    /// Start a server on a unique address
    pub fn new() -> Self {
        let hostname = format!("{}.testbed.invalid", UserID::default_new().hex());
        Self::with_addr(ParsecAddr::new(hostname, None, false))
    }

    pub fn with_addr(addr: ParsecAddr) -> Self {
        let inner = Arc::new(ServerInner {
            addr: addr.clone(),
            state: Mutex::new(ServerState::default()),
            changes: watch::channel(0).0,
            online: AtomicBool::new(true),
            time_provider: TimeProvider::default(),
        });
        register_server(&addr, Arc::new(TestbedConnector(inner.clone())));
        tracing::info!(server = %addr, "Testbed server started");
        Self { inner }
    }

    pub fn addr(&self) -> &ParsecAddr {
        &self.inner.addr
    }

    /// The server clock, shift it to simulate drift with clients
    pub fn time_provider(&self) -> &TimeProvider {
        &self.inner.time_provider
    }

    /// Offline drops every event listener and makes every command fail with `NoResponse`
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
        if !online {
            let mut state = self.inner.state.lock();
            for org in state.organizations.values_mut() {
                org.listeners.clear();
            }
        }
        self.inner.notify_changed();
        tracing::info!(server = %self.inner.addr, online, "Testbed server connectivity changed");
    }

    pub fn is_online(&self) -> bool {
        self.inner.is_online()
    }

    /// Host a new, not yet bootstrapped, organization
    pub fn create_organization(&self, organization_id: OrganizationID, bootstrap_token: Option<BootstrapToken>) {
        self.inner
            .state
            .lock()
            .organizations
            .insert(organization_id, Organization::new(bootstrap_token));
    }

    fn update_org(&self, organization_id: &OrganizationID, f: impl FnOnce(&mut Organization)) {
        let mut state = self.inner.state.lock();
        if let Some(org) = state.organizations.get_mut(organization_id) {
            f(org);
        }
        drop(state);
        self.inner.notify_changed();
    }

    pub fn expire_organization(&self, organization_id: &OrganizationID) {
        self.update_org(organization_id, |org| {
            org.is_expired = true;
            org.notify_all(ServerEvent::OrganizationExpired);
        });
    }

    pub fn freeze_user(&self, organization_id: &OrganizationID, user_id: UserID, frozen: bool) {
        self.update_org(organization_id, |org| {
            if let Some(user) = org.users.get_mut(&user_id) {
                user.frozen = frozen;
            }
            if frozen {
                org.notify_user(user_id, ServerEvent::UserFrozen);
            }
        });
    }

    pub fn set_tos(&self, organization_id: &OrganizationID, per_locale_urls: BTreeMap<String, String>) {
        let updated_on = self.inner.now();
        self.update_org(organization_id, |org| {
            org.tos = Some(Tos {
                updated_on,
                per_locale_urls,
            });
            org.notify_all(ServerEvent::TosUpdated);
        });
    }

    pub fn set_active_users_limit(&self, organization_id: &OrganizationID, limit: ActiveUsersLimit) {
        self.update_org(organization_id, |org| {
            org.server_config.active_users_limit = limit;
            let event = ServerEvent::ServerConfig(org.server_config.clone());
            org.notify_all(event);
        });
    }

    pub fn set_block_store_available(&self, organization_id: &OrganizationID, available: bool) {
        self.update_org(organization_id, |org| org.block_store_available = available);
    }
}

impl Default for TestbedServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestbedServer {
    fn drop(&mut self) {
        unregister_server(&self.inner.addr);
    }
}
