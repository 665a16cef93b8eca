//! Server connector registry behavior

use assert_matches::assert_matches;
use parsec_connection::*;
use parsec_types::{DeviceID, InvitationToken, OrganizationID, ParsecAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Connector refusing everything, counting how often it is asked
#[derive(Default)]
struct CountingConnector {
    calls: AtomicUsize,
}

impl ServerConnector for CountingConnector {
    fn authenticated(
        &self,
        _organization_id: &OrganizationID,
        _device_id: DeviceID,
    ) -> Result<Arc<dyn AuthenticatedCmds>, ConnectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ConnectionError::BadAuthentication)
    }

    fn invited(
        &self,
        _organization_id: &OrganizationID,
        _token: InvitationToken,
    ) -> Result<Arc<dyn InvitedCmds>, ConnectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ConnectionError::InvitationNotFound)
    }

    fn anonymous(&self, _organization_id: &OrganizationID) -> Result<Arc<dyn AnonymousCmds>, ConnectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ConnectionError::OrganizationNotFound)
    }
}

fn org() -> OrganizationID {
    "CoolOrg".parse().expect("valid organization ID")
}

#[test]
fn test_unregistered_server_is_offline() {
    let addr = ParsecAddr::new("unregistered.invalid", None, true);
    assert_matches!(
        authenticated_cmds(&addr, &org(), DeviceID::default_new()).err(),
        Some(ConnectionError::NoResponse)
    );
    assert_matches!(anonymous_cmds(&addr, &org()).err(), Some(e) if e.is_offline());
}

#[test]
fn test_register_and_unregister() {
    let addr = ParsecAddr::new("Registry.Test.invalid", Some(1337), false);
    let connector = Arc::new(CountingConnector::default());
    register_server(&addr, connector.clone());

    // Hostname lookup is case insensitive
    let same = ParsecAddr::new("registry.test.invalid", Some(1337), false);
    assert_matches!(
        authenticated_cmds(&same, &org(), DeviceID::default_new()).err(),
        Some(ConnectionError::BadAuthentication)
    );
    assert_matches!(
        invited_cmds(&addr, &org(), InvitationToken::default_new()).err(),
        Some(ConnectionError::InvitationNotFound)
    );
    assert_eq!(connector.calls.load(Ordering::SeqCst), 2);

    unregister_server(&addr);
    assert_matches!(anonymous_cmds(&addr, &org()).err(), Some(ConnectionError::NoResponse));
    assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
}
