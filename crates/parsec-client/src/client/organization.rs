use super::Client;
use parsec_connection::protocol::{Tos, TosAcceptRep, TosGetRep};
use parsec_types::DateTime;

#[derive(Debug, thiserror::Error)]
pub enum ClientOrganizationInfoError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Cannot reach the server")]
    Offline,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientGetOrganizationBootstrapDateError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Cannot reach the server")]
    Offline,
    #[error("Bootstrap date is unknown")]
    BootstrapDateNotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientGetTosError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Cannot reach the server")]
    Offline,
    #[error("Organization has no Terms of Service")]
    NoTos,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientAcceptTosError {
    #[error("Client is stopped")]
    Stopped,
    #[error("Cannot reach the server")]
    Offline,
    #[error("Organization has no Terms of Service")]
    NoTos,
    #[error("Terms of Service have changed since")]
    TosMismatch,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl_from_connection_error!(
    ClientOrganizationInfoError,
    ClientGetOrganizationBootstrapDateError,
    ClientGetTosError,
    ClientAcceptTosError,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrganizationInfo {
    pub total_block_bytes: u64,
    pub total_metadata_bytes: u64,
}

impl Client {
    pub async fn organization_info(&self) -> Result<OrganizationInfo, ClientOrganizationInfoError> {
        if self.is_stopped() {
            return Err(ClientOrganizationInfoError::Stopped);
        }
        let stats = self.cmds.organization_stats().await?;
        Ok(OrganizationInfo {
            total_block_bytes: stats.total_block_bytes,
            total_metadata_bytes: stats.total_metadata_bytes,
        })
    }

    /// When the organization was bootstrapped, taken from the certificates when known
    pub async fn get_organization_bootstrap_date(&self) -> Result<DateTime, ClientGetOrganizationBootstrapDateError> {
        if self.is_stopped() {
            return Err(ClientGetOrganizationBootstrapDateError::Stopped);
        }
        if let Some(bootstrapped_on) = self.certificates.bootstrapped_on() {
            return Ok(bootstrapped_on);
        }
        match self.certificates.poll_server_for_new_certificates().await {
            Ok(_) => (),
            Err(crate::certif::CertifPollError::Offline) => return Err(ClientGetOrganizationBootstrapDateError::Offline),
            Err(err) => return Err(anyhow::Error::from(err).into()),
        }
        if let Some(bootstrapped_on) = self.certificates.bootstrapped_on() {
            return Ok(bootstrapped_on);
        }
        self.cmds
            .organization_stats()
            .await?
            .bootstrapped_on
            .ok_or(ClientGetOrganizationBootstrapDateError::BootstrapDateNotFound)
    }

    pub async fn get_tos(&self) -> Result<Tos, ClientGetTosError> {
        if self.is_stopped() {
            return Err(ClientGetTosError::Stopped);
        }
        match self.cmds.tos_get().await? {
            TosGetRep::Ok(tos) => Ok(tos),
            TosGetRep::NoTos => Err(ClientGetTosError::NoTos),
        }
    }

    /// Accept the Terms of Service last updated at `tos_updated_on`
    pub async fn accept_tos(&self, tos_updated_on: DateTime) -> Result<(), ClientAcceptTosError> {
        if self.is_stopped() {
            return Err(ClientAcceptTosError::Stopped);
        }
        match self.cmds.tos_accept(tos_updated_on).await? {
            TosAcceptRep::Ok => {
                self.status.lock().must_accept_tos = false;
                tracing::info!(%tos_updated_on, "Terms of Service accepted");
                Ok(())
            }
            TosAcceptRep::NoTos => Err(ClientAcceptTosError::NoTos),
            TosAcceptRep::TosMismatch => Err(ClientAcceptTosError::TosMismatch),
        }
    }

    /// Drop the local certificates, they are fetched again on next use
    pub async fn forget_all_certificates(&self) -> anyhow::Result<()> {
        self.certificates.forget_all_certificates().await?;
        tracing::info!(device_id = %self.device.device_id, "Local certificates forgotten");
        Ok(())
    }
}
