//! Synchronization with the server
//!
//! Outbound: entries needing sync are uploaded children first, the root
//! last, so a folder never references an entry the server does not have.
//! A concurrent remote change is merged into the local state then the
//! upload is retried against the new remote version.
//!
//! Inbound: remote changes since the last checkpoint are applied to the
//! entries known locally; unknown entries are fetched on first access.

use super::remote;
use super::store::{Chunk, LocalContent, LocalManifest, WorkspaceStore};
use super::{FsOperationError, WorkspaceContext, WorkspaceOps, WorkspaceSyncError};
use crate::event_bus::ClientEvent;
use parsec_connection::protocol::{BlockCreateRep, VlobPollChangesRep, VlobWriteRep};
use parsec_types::{BlockAccess, BlockID, ChildManifest, EntryName, HashDigest, SecretKey, VlobID};
use std::collections::BTreeMap;

const MAX_SYNC_ATTEMPTS: usize = 8;

impl WorkspaceOps {
    /// Entries with local changes to upload, in upload order
    pub async fn get_need_outbound_sync(&self) -> Result<Vec<VlobID>, WorkspaceSyncError> {
        let store = self.lock().await?;
        Ok(need_outbound_sync(&store, &self.ctx))
    }

    /// Upload the local changes of one entry
    pub async fn outbound_sync(&self, entry_id: VlobID) -> Result<(), WorkspaceSyncError> {
        let role = self.ctx.self_role()?;
        if !role.can_write() {
            return Ok(());
        }
        self.ctx.realms.ensure_bootstrapped(self.ctx.realm_id).await.map_err(FsOperationError::from)?;
        let mut store = self.lock().await?;
        let outcome = sync_entry_outbound(&mut store, &self.ctx, entry_id).await;
        store.persist(&self.ctx.device.local_symkey).await?;
        if outcome.is_err() {
            self.ctx.event_bus.send(ClientEvent::WorkspaceOpsOutboundSyncAborted {
                realm_id: self.ctx.realm_id,
                entry_id,
            });
        }
        Ok(outcome?)
    }

    /// Apply the remote changes made since the last inbound sync
    pub async fn inbound_sync(&self) -> Result<(), WorkspaceSyncError> {
        self.ctx.self_role()?;
        if !self.ctx.realms.is_bootstrapped(self.ctx.realm_id) {
            return Ok(());
        }
        let mut store = self.lock().await?;
        let outcome = sync_inbound(&mut store, &self.ctx).await;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(outcome?)
    }

    /// Inbound then outbound sync of the whole workspace
    pub async fn sync(&self) -> Result<(), WorkspaceSyncError> {
        self.inbound_sync().await?;
        for entry_id in self.get_need_outbound_sync().await? {
            self.outbound_sync(entry_id).await?;
        }
        Ok(())
    }
}

/// Entries reachable from the root that need sync, deepest first
///
/// Confined entries and everything under them are left out.
fn need_outbound_sync(store: &WorkspaceStore, ctx: &WorkspaceContext) -> Vec<VlobID> {
    fn visit(store: &WorkspaceStore, ctx: &WorkspaceContext, id: VlobID, out: &mut Vec<VlobID>, depth: usize) {
        let Some(manifest) = store.manifests.get(&id) else {
            return;
        };
        if depth > store.manifests.len() {
            return;
        }
        if let Some(children) = manifest.children() {
            for (name, child) in children {
                if !ctx.is_confined_name(name) {
                    visit(store, ctx, *child, out, depth + 1);
                }
            }
        }
        if manifest.need_sync {
            out.push(id);
        }
    }
    let mut out = vec![];
    visit(store, ctx, ctx.realm_id, &mut out, 0);
    out
}

async fn upload_blocks(store: &mut WorkspaceStore, ctx: &WorkspaceContext, entry_id: VlobID, key_index: u64) -> Result<(), FsOperationError> {
    let (blocksize, local_chunks): (u64, Vec<(usize, Vec<u8>)>) = match store.manifests.get(&entry_id).map(|m| &m.content) {
        Some(LocalContent::File { blocksize, chunks, .. }) => (
            *blocksize,
            chunks
                .iter()
                .enumerate()
                .filter_map(|(index, chunk)| match chunk {
                    Chunk::Local(data) => Some((index, data.clone())),
                    Chunk::Remote(_) => None,
                })
                .collect(),
        ),
        _ => return Ok(()),
    };
    let blocks = local_chunks.len() as u64;
    for (position, (index, data)) in local_chunks.into_iter().enumerate() {
        let access = BlockAccess {
            id: BlockID::default_new(),
            key: SecretKey::generate(),
            offset: index as u64 * blocksize,
            size: data.len() as u64,
            digest: HashDigest::from_data(&data),
        };
        let encrypted = access.key.encrypt(&data);
        match ctx.cmds.block_create(ctx.realm_id, access.id, key_index, encrypted).await? {
            BlockCreateRep::Ok | BlockCreateRep::BlockAlreadyExists => (),
            BlockCreateRep::AuthorNotAllowed | BlockCreateRep::RealmNotFound => return Err(FsOperationError::NoRealmAccess),
            BlockCreateRep::StoreUnavailable => return Err(FsOperationError::ServerBlockstoreUnavailable),
        }
        ctx.event_bus.send(ClientEvent::WorkspaceOpsOutboundSyncProgress {
            realm_id: ctx.realm_id,
            entry_id,
            blocks,
            block_index: position as u64,
            blocksize,
        });
        // Same content, now living on the server
        if let Some(LocalContent::File { chunks, .. }) = store.manifests.get_mut(&entry_id).map(|m| &mut m.content) {
            if let Some(chunk) = chunks.get_mut(index) {
                if *chunk == Chunk::Local(data.clone()) {
                    *chunk = Chunk::Remote(access.clone());
                }
            }
        }
        store.blocks.insert(access.id, data);
        store.mark_dirty();
    }
    Ok(())
}

async fn sync_entry_outbound(store: &mut WorkspaceStore, ctx: &WorkspaceContext, entry_id: VlobID) -> Result<(), FsOperationError> {
    let keys_bundle = ctx.realms.keys_bundle(ctx.realm_id).await?;
    let (key_index, key) = keys_bundle
        .current_key()
        .ok_or_else(|| FsOperationError::InvalidKeysBundle { reason: "no key".into() })?;

    let mut timestamp = ctx.device.now();
    let mut started = false;
    for _ in 0..MAX_SYNC_ATTEMPTS {
        match store.manifests.get(&entry_id) {
            Some(manifest) if manifest.need_sync => (),
            _ => return Ok(()),
        }
        if !started {
            started = true;
            ctx.event_bus.send(ClientEvent::WorkspaceOpsOutboundSyncStarted {
                realm_id: ctx.realm_id,
                entry_id,
            });
        }
        upload_blocks(store, ctx, entry_id, key_index).await?;

        let (remote, base_version) = {
            let manifest = store.manifests.get(&entry_id).ok_or(FsOperationError::EntryNotFound)?;
            let remote = manifest
                .to_remote(ctx.device.device_id, timestamp, |name| !ctx.is_confined_name(name))
                .ok_or_else(|| anyhow::anyhow!("file {entry_id} still has local chunks"))?;
            (remote, manifest.base_version())
        };
        let blob = remote.dump_sign_and_encrypt(&ctx.device.signing_key, key);
        let rep = if base_version == 0 {
            ctx.cmds.vlob_create(ctx.realm_id, entry_id, key_index, timestamp, blob).await?
        } else {
            ctx.cmds
                .vlob_update(ctx.realm_id, entry_id, key_index, remote.version(), timestamp, blob)
                .await?
        };

        match rep {
            VlobWriteRep::Ok => {
                if let Some(manifest) = store.manifests.get_mut(&entry_id) {
                    manifest.base = Some(remote);
                    manifest.need_sync = false;
                }
                store.mark_dirty();
                tracing::debug!(realm_id = %ctx.realm_id, %entry_id, base_version = base_version + 1, "Entry synced");
                ctx.event_bus.send(ClientEvent::WorkspaceOpsOutboundSyncDone {
                    realm_id: ctx.realm_id,
                    entry_id,
                });
                return Ok(());
            }
            VlobWriteRep::RequireGreaterTimestamp { strictly_greater_than } => {
                timestamp = ctx
                    .device
                    .now()
                    .max(strictly_greater_than + chrono::Duration::microseconds(1));
            }
            VlobWriteRep::TimestampOutOfBallpark {
                server_timestamp,
                client_timestamp,
                ballpark_client_early_offset,
                ballpark_client_late_offset,
            } => {
                ctx.event_bus.send(ClientEvent::TooMuchDriftWithServerClock {
                    server_timestamp,
                    client_timestamp,
                    ballpark_client_early_offset,
                    ballpark_client_late_offset,
                });
                return Err(FsOperationError::TimestampOutOfBallpark {
                    server_timestamp,
                    client_timestamp,
                    ballpark_client_early_offset,
                    ballpark_client_late_offset,
                });
            }
            VlobWriteRep::VlobAlreadyExists | VlobWriteRep::BadVlobVersion => {
                tracing::info!(realm_id = %ctx.realm_id, %entry_id, "Concurrent remote change, merging");
                let fetched = remote::fetch_manifests(ctx, vec![entry_id], None).await?;
                let remote = fetched
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("entry {entry_id} vanished from the server"))?;
                merge_remote(store, ctx, remote);
                timestamp = ctx.device.now();
            }
            VlobWriteRep::AuthorNotAllowed | VlobWriteRep::RealmNotFound => return Err(FsOperationError::NoRealmAccess),
            VlobWriteRep::VlobNotFound => {
                return Err(anyhow::anyhow!("entry {entry_id} has a base version unknown to the server").into())
            }
        }
    }
    Err(anyhow::anyhow!("cannot sync entry {entry_id}: too many concurrent changes").into())
}

async fn sync_inbound(store: &mut WorkspaceStore, ctx: &WorkspaceContext) -> Result<(), FsOperationError> {
    let (checkpoint, changes) = match ctx.cmds.vlob_poll_changes(ctx.realm_id, store.last_checkpoint).await? {
        VlobPollChangesRep::Ok {
            current_checkpoint,
            changes,
        } => (current_checkpoint, changes),
        VlobPollChangesRep::AuthorNotAllowed | VlobPollChangesRep::RealmNotFound => {
            return Err(FsOperationError::NoRealmAccess)
        }
    };
    let mut outdated: Vec<VlobID> = changes
        .iter()
        .filter(|change| {
            store
                .manifests
                .get(&change.vlob_id)
                .map(|manifest| manifest.base_version() < change.version)
                .unwrap_or(false)
        })
        .map(|change| change.vlob_id)
        .collect();
    outdated.sort();
    outdated.dedup();

    for remote in remote::fetch_manifests(ctx, outdated, None).await? {
        let entry_id = remote.id();
        merge_remote(store, ctx, remote);
        store.notify_changed(ctx, entry_id);
        ctx.event_bus.send(ClientEvent::WorkspaceOpsInboundSyncDone {
            realm_id: ctx.realm_id,
            entry_id,
        });
    }
    store.last_checkpoint = checkpoint;
    store.mark_dirty();
    Ok(())
}

/// Bring a newer remote version into the local state
///
/// Without local changes the remote version is taken as is (keeping
/// confined children). Otherwise folders get a three-way merge of their
/// children and files keep their local content on top of the new version.
fn merge_remote(store: &mut WorkspaceStore, ctx: &WorkspaceContext, remote: ChildManifest) {
    let entry_id = remote.id();
    let Some(local) = store.manifests.get(&entry_id).cloned() else {
        store.manifests.insert(entry_id, LocalManifest::from_remote(remote));
        store.mark_dirty();
        return;
    };
    if remote.version() <= local.base_version() {
        return;
    }

    let merged = if !local.need_sync {
        let mut merged = LocalManifest::from_remote(remote);
        if let (Some(children), Some(local_children)) = (merged.children_mut(), local.children()) {
            for (name, id) in local_children {
                if ctx.is_confined_name(name) {
                    children.insert(name.clone(), *id);
                }
            }
        }
        merged
    } else {
        match (&remote, &local.content) {
            (ChildManifest::Folder(remote_folder), LocalContent::Folder { children }) => {
                let base_children = match &local.base {
                    Some(ChildManifest::Folder(base)) => base.children.clone(),
                    _ => BTreeMap::new(),
                };
                let merged_children = merge_children(&base_children, children, &remote_folder.children);
                let need_sync = merged_children
                    .iter()
                    .filter(|(name, _)| !ctx.is_confined_name(name))
                    .ne(remote_folder.children.iter());
                let moved_locally = local.base.as_ref().map(ChildManifest::parent) != Some(local.parent);
                LocalManifest {
                    id: entry_id,
                    parent: if moved_locally { local.parent } else { remote_folder.parent },
                    created: local.created,
                    updated: local.updated.max(remote_folder.updated),
                    base: Some(remote.clone()),
                    need_sync: need_sync || moved_locally,
                    content: LocalContent::Folder {
                        children: merged_children,
                    },
                }
            }
            _ => {
                tracing::warn!(realm_id = %ctx.realm_id, %entry_id, "Conflicting file changes, keeping the local content");
                LocalManifest {
                    base: Some(remote.clone()),
                    ..local.clone()
                }
            }
        }
    };
    store.manifests.insert(entry_id, merged);
    store.mark_dirty();
}

/// Apply the local changes (`local` compared to `base`) on top of `remote`
fn merge_children(
    base: &BTreeMap<EntryName, VlobID>,
    local: &BTreeMap<EntryName, VlobID>,
    remote: &BTreeMap<EntryName, VlobID>,
) -> BTreeMap<EntryName, VlobID> {
    let mut merged = remote.clone();
    for (name, id) in base {
        if local.get(name) != Some(id) && merged.get(name) == Some(id) {
            merged.remove(name);
        }
    }
    for (name, id) in local {
        if base.get(name) == Some(id) || merged.values().any(|existing| existing == id) {
            continue;
        }
        match merged.get(name) {
            Some(other) if other != id => {
                merged.insert(conflict_name(name, &merged), *id);
            }
            _ => {
                merged.insert(name.clone(), *id);
            }
        }
    }
    merged
}

fn conflict_name(name: &EntryName, taken: &BTreeMap<EntryName, VlobID>) -> EntryName {
    let (stem, extension) = match name.as_str().rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, format!(".{extension}")),
        _ => (name.as_str(), String::new()),
    };
    (1..)
        .map(|attempt| match attempt {
            1 => format!("{stem} (conflict){extension}"),
            n => format!("{stem} (conflict {n}){extension}"),
        })
        .filter_map(|candidate| candidate.parse::<EntryName>().ok())
        .find(|candidate| !taken.contains_key(candidate))
        .unwrap_or_else(|| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> EntryName {
        raw.parse().unwrap()
    }

    #[test]
    fn test_merge_children_keeps_both_sides() {
        let (a, b, c, d) = (
            VlobID::default_new(),
            VlobID::default_new(),
            VlobID::default_new(),
            VlobID::default_new(),
        );
        let base = BTreeMap::from([(name("a"), a), (name("b"), b)]);
        // Locally: `a` removed, `c.txt` added
        let local = BTreeMap::from([(name("b"), b), (name("c.txt"), c)]);
        // Remotely: another `c.txt` added
        let remote = BTreeMap::from([(name("a"), a), (name("b"), b), (name("c.txt"), d)]);

        let merged = merge_children(&base, &local, &remote);
        assert_eq!(
            merged,
            BTreeMap::from([(name("b"), b), (name("c.txt"), d), (name("c (conflict).txt"), c)])
        );
    }
}
