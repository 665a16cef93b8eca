//! Process-wide registry of reachable servers
//!
//! A server is identified by hostname and port. Whatever provides the server
//! side (the in-process testbed, or a transport to a remote server) registers
//! a [`ServerConnector`] for its address; commands to an address without a
//! registered connector fail with [`ConnectionError::NoResponse`].

use crate::cmds::{AnonymousCmds, AuthenticatedCmds, InvitedCmds};
use crate::error::ConnectionError;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use parsec_types::{DeviceID, InvitationToken, OrganizationID, ParsecAddr};
use std::collections::HashMap;
use std::sync::Arc;

/// Opens command channels to one server
pub trait ServerConnector: Send + Sync {
    fn authenticated(
        &self,
        organization_id: &OrganizationID,
        device_id: DeviceID,
    ) -> Result<Arc<dyn AuthenticatedCmds>, ConnectionError>;

    fn invited(
        &self,
        organization_id: &OrganizationID,
        token: InvitationToken,
    ) -> Result<Arc<dyn InvitedCmds>, ConnectionError>;

    fn anonymous(&self, organization_id: &OrganizationID) -> Result<Arc<dyn AnonymousCmds>, ConnectionError>;
}

type ServerKey = (String, u16);

static GLOBAL_SERVER_REGISTRY: Lazy<RwLock<HashMap<ServerKey, Arc<dyn ServerConnector>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn key(addr: &ParsecAddr) -> ServerKey {
    (addr.hostname().to_ascii_lowercase(), addr.port())
}

/// Make `addr` reachable through `connector`, replacing any previous one
pub fn register_server(addr: &ParsecAddr, connector: Arc<dyn ServerConnector>) {
    tracing::debug!(server = %addr, "Registering server connector");
    GLOBAL_SERVER_REGISTRY.write().insert(key(addr), connector);
}

/// Make `addr` unreachable
pub fn unregister_server(addr: &ParsecAddr) {
    tracing::debug!(server = %addr, "Unregistering server connector");
    GLOBAL_SERVER_REGISTRY.write().remove(&key(addr));
}

fn connector(addr: &ParsecAddr) -> Result<Arc<dyn ServerConnector>, ConnectionError> {
    GLOBAL_SERVER_REGISTRY
        .read()
        .get(&key(addr))
        .cloned()
        .ok_or(ConnectionError::NoResponse)
}

/// Commands as a device of `organization_id`
pub fn authenticated_cmds(
    addr: &ParsecAddr,
    organization_id: &OrganizationID,
    device_id: DeviceID,
) -> Result<Arc<dyn AuthenticatedCmds>, ConnectionError> {
    connector(addr)?.authenticated(organization_id, device_id)
}

/// Commands as the claimer of invitation `token`
pub fn invited_cmds(
    addr: &ParsecAddr,
    organization_id: &OrganizationID,
    token: InvitationToken,
) -> Result<Arc<dyn InvitedCmds>, ConnectionError> {
    connector(addr)?.invited(organization_id, token)
}

/// Unauthenticated commands
pub fn anonymous_cmds(
    addr: &ParsecAddr,
    organization_id: &OrganizationID,
) -> Result<Arc<dyn AnonymousCmds>, ConnectionError> {
    connector(addr)?.anonymous(organization_id)
}
