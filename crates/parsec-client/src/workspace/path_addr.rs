//! Sharable links to a path inside the workspace
//!
//! The path is encrypted with the realm's current key, so the link only
//! makes sense to members of the workspace.

use super::{FsOperationError, WorkspaceDecryptPathAddrError, WorkspaceGeneratePathAddrError, WorkspaceOps};
use parsec_types::{FsPath, ParsecWorkspacePathAddr};

impl WorkspaceOps {
    pub async fn generate_path_addr(&self, path: &FsPath) -> Result<ParsecWorkspacePathAddr, WorkspaceGeneratePathAddrError> {
        if self.is_stopped() {
            return Err(WorkspaceGeneratePathAddrError::Stopped);
        }
        self.ctx.self_role()?;
        self.ctx
            .realms
            .ensure_bootstrapped(self.ctx.realm_id)
            .await
            .map_err(FsOperationError::from)?;
        let keys_bundle = self
            .ctx
            .realms
            .keys_bundle(self.ctx.realm_id)
            .await
            .map_err(FsOperationError::from)?;
        let (key_index, key) = keys_bundle
            .current_key()
            .ok_or_else(|| WorkspaceGeneratePathAddrError::InvalidKeysBundle { reason: "no key".into() })?;
        let organization_addr = &self.ctx.device.organization_addr;
        Ok(ParsecWorkspacePathAddr::new(
            organization_addr.server().clone(),
            organization_addr.organization_id().clone(),
            self.ctx.realm_id,
            key_index,
            key.encrypt(path.to_string().as_bytes()),
        ))
    }

    pub async fn decrypt_path_addr(&self, link: &ParsecWorkspacePathAddr) -> Result<FsPath, WorkspaceDecryptPathAddrError> {
        if self.is_stopped() {
            return Err(WorkspaceDecryptPathAddrError::Stopped);
        }
        if link.workspace_id() != self.ctx.realm_id
            || link.organization_id() != self.ctx.device.organization_addr.organization_id()
        {
            return Err(WorkspaceDecryptPathAddrError::NotThisWorkspace);
        }
        self.ctx.self_role()?;
        let keys_bundle = self
            .ctx
            .realms
            .keys_bundle(self.ctx.realm_id)
            .await
            .map_err(FsOperationError::from)?;
        let key = keys_bundle
            .key(link.key_index())
            .ok_or(WorkspaceDecryptPathAddrError::KeyNotFound {
                key_index: link.key_index(),
            })?;
        let raw = key
            .decrypt(link.encrypted_path())
            .map_err(|_| WorkspaceDecryptPathAddrError::CorruptedData)?;
        String::from_utf8(raw)
            .ok()
            .and_then(|raw| raw.parse::<FsPath>().ok())
            .ok_or(WorkspaceDecryptPathAddrError::CorruptedData)
    }
}
