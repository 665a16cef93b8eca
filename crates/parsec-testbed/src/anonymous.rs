use crate::server::ServerInner;
use crate::state::{invalid, rejected, UserState};
use async_trait::async_trait;
use parsec_connection::protocol::{Bytes, CertificateRejection, CertificateRep};
use parsec_connection::{AnonymousCmds, ConnectionError};
use parsec_types::{
    AnyCertificate, BootstrapToken, CertificateAuthor, OrganizationID, UserProfile, VerifyKey,
};
use std::sync::Arc;

pub(crate) struct AnonymousSession {
    inner: Arc<ServerInner>,
    organization_id: OrganizationID,
}

impl AnonymousSession {
    pub fn new(inner: Arc<ServerInner>, organization_id: OrganizationID) -> Self {
        Self {
            inner,
            organization_id,
        }
    }
}

#[async_trait]
impl AnonymousCmds for AnonymousSession {
    async fn organization_bootstrap(
        &self,
        bootstrap_token: Option<BootstrapToken>,
        root_verify_key: VerifyKey,
        user_certificate: Bytes,
        device_certificate: Bytes,
    ) -> Result<CertificateRep, ConnectionError> {
        let now = self.inner.now();
        self.inner.with_org(&self.organization_id, |org| {
            if org.bootstrapped_on.is_some() {
                return Ok(rejected(CertificateRejection::OrganizationAlreadyBootstrapped));
            }
            if org.bootstrap_token.is_some() && org.bootstrap_token != bootstrap_token {
                return Ok(rejected(CertificateRejection::InvalidBootstrapToken));
            }

            let user = match AnyCertificate::verify_and_load(&user_certificate, &root_verify_key) {
                Ok(AnyCertificate::User(user)) => user,
                _ => return Ok(invalid("invalid user certificate")),
            };
            let device = match AnyCertificate::verify_and_load(&device_certificate, &root_verify_key) {
                Ok(AnyCertificate::Device(device)) => device,
                _ => return Ok(invalid("invalid device certificate")),
            };
            if user.author != CertificateAuthor::Root
                || device.author != CertificateAuthor::Root
                || device.user_id != user.user_id
                || device.timestamp != user.timestamp
                || user.profile != UserProfile::Admin
            {
                return Ok(invalid("inconsistent bootstrap certificates"));
            }
            if let Err(rep) = org.check_timestamp(user.timestamp, now) {
                return Ok(rep);
            }

            org.root_verify_key = Some(root_verify_key);
            org.bootstrapped_on = Some(now);
            org.devices.insert(device.device_id, device);
            org.users.insert(
                user.user_id,
                UserState {
                    current_profile: user.profile,
                    certificate: user.clone(),
                    revoked_on: None,
                    frozen: false,
                    tos_accepted_on: None,
                },
            );
            org.add_certificate(user.timestamp, user_certificate);
            org.add_certificate(user.timestamp, device_certificate);
            tracing::info!(organization_id = %self.organization_id, "Organization bootstrapped");
            Ok(CertificateRep::Ok)
        })
    }
}
