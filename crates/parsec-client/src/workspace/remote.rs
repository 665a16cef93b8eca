//! Reading manifests and blocks from the server

use super::{FsOperationError, WorkspaceContext};
use parsec_connection::protocol::{BlockReadRep, VlobItem, VlobReadRep};
use parsec_types::{BlockAccess, ChildManifest, DataError, DateTime, HashDigest, VlobID};

/// Latest manifests of `ids`, or the ones current at `at`
///
/// Entries unknown to the server are missing from the result. A realm not
/// bootstrapped yet has no remote entries.
pub(crate) async fn fetch_manifests(
    ctx: &WorkspaceContext,
    ids: Vec<VlobID>,
    at: Option<DateTime>,
) -> Result<Vec<ChildManifest>, FsOperationError> {
    if ids.is_empty() || !ctx.realms.is_bootstrapped(ctx.realm_id) {
        return Ok(vec![]);
    }
    let items = match ctx.cmds.vlob_read_batch(ctx.realm_id, ids, at).await? {
        VlobReadRep::Ok { items } => items,
        VlobReadRep::AuthorNotAllowed => return Err(FsOperationError::NoRealmAccess),
        VlobReadRep::RealmNotFound => return Ok(vec![]),
    };
    let mut manifests = Vec::with_capacity(items.len());
    for item in items {
        manifests.push(load_manifest(ctx, item).await?);
    }
    Ok(manifests)
}

async fn load_manifest(ctx: &WorkspaceContext, item: VlobItem) -> Result<ChildManifest, FsOperationError> {
    let keys_bundle = ctx.realms.keys_bundle(ctx.realm_id).await?;
    let key = keys_bundle
        .key(item.key_index)
        .ok_or_else(|| FsOperationError::InvalidKeysBundle {
            reason: format!("no key with index {}", item.key_index),
        })?;

    let verify_key = match ctx.certificates.device_verify_key(item.author) {
        Some(verify_key) => verify_key,
        None => {
            // The author may be more recent than our certificates
            ctx.certificates
                .poll_server_for_new_certificates()
                .await
                .map_err(|err| FsOperationError::InvalidCertificate { reason: err.to_string() })?;
            ctx.certificates
                .device_verify_key(item.author)
                .ok_or_else(|| FsOperationError::InvalidCertificate {
                    reason: format!("unknown author {}", item.author),
                })?
        }
    };

    ChildManifest::decrypt_verify_and_load(&item.blob, key, &verify_key, item.author, item.vlob_id, item.version)
        .map_err(|err| match err {
            DataError::Decryption => FsOperationError::InvalidKeysBundle {
                reason: format!("cannot decrypt manifest {}", item.vlob_id),
            },
            err => FsOperationError::InvalidManifest { reason: err.to_string() },
        })
}

/// Cleartext of a block, checked against its digest
pub(crate) async fn fetch_block(ctx: &WorkspaceContext, access: &BlockAccess) -> Result<Vec<u8>, FsOperationError> {
    let encrypted = match ctx.cmds.block_read(ctx.realm_id, access.id).await? {
        BlockReadRep::Ok { data } => data,
        BlockReadRep::AuthorNotAllowed => return Err(FsOperationError::NoRealmAccess),
        BlockReadRep::StoreUnavailable => return Err(FsOperationError::ServerBlockstoreUnavailable),
        BlockReadRep::BlockNotFound => return Err(FsOperationError::InvalidBlockAccess),
    };
    let data = access
        .key
        .decrypt(&encrypted)
        .map_err(|_| FsOperationError::InvalidBlockAccess)?;
    if HashDigest::from_data(&data) != access.digest {
        tracing::warn!(realm_id = %ctx.realm_id, block_id = %access.id, "Block does not match its digest");
        return Err(FsOperationError::InvalidBlockAccess);
    }
    Ok(data)
}
