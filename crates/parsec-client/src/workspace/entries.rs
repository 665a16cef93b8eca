//! Entry tree operations: stat, create, move and remove

use super::store::{LocalManifest, WorkspaceStore};
use super::{
    EntryStat, FsOperationError, MoveEntryMode, WorkspaceContext, WorkspaceCreateEntryError,
    WorkspaceMoveEntryError, WorkspaceOps, WorkspaceRemoveEntryError, WorkspaceStatEntryError,
    WorkspaceWatchError,
};
use parsec_types::{EntryName, FsPath, VlobID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoveKind {
    Any,
    File,
    Folder,
    FolderAll,
}

impl WorkspaceOps {
    pub async fn stat_entry(&self, path: &FsPath) -> Result<EntryStat, WorkspaceStatEntryError> {
        self.ctx.self_role()?;
        let mut store = self.lock().await?;
        let resolved = store.resolve_path(&self.ctx, path).await?;
        let stat = stat_of(&store, resolved.id, resolved.confinement_point)?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(stat)
    }

    pub async fn stat_entry_by_id(&self, entry_id: VlobID) -> Result<EntryStat, WorkspaceStatEntryError> {
        self.ctx.self_role()?;
        let mut store = self.lock().await?;
        if !store.load_manifest(&self.ctx, entry_id).await? {
            return Err(WorkspaceStatEntryError::EntryNotFound);
        }
        let confinement_point = store.confinement_point_of(&self.ctx, entry_id).await?;
        let stat = stat_of(&store, entry_id, confinement_point)?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(stat)
    }

    /// Children of a folder, sorted by name
    pub async fn stat_folder_children(&self, path: &FsPath) -> Result<Vec<(EntryName, EntryStat)>, WorkspaceStatEntryError> {
        self.ctx.self_role()?;
        let mut store = self.lock().await?;
        let resolved = store.resolve_path(&self.ctx, path).await?;
        let children = folder_children(&mut store, &self.ctx, resolved.id, resolved.confinement_point).await?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(children)
    }

    pub async fn stat_folder_children_by_id(
        &self,
        entry_id: VlobID,
    ) -> Result<Vec<(EntryName, EntryStat)>, WorkspaceStatEntryError> {
        self.ctx.self_role()?;
        let mut store = self.lock().await?;
        if !store.load_manifest(&self.ctx, entry_id).await? {
            return Err(WorkspaceStatEntryError::EntryNotFound);
        }
        let confinement_point = store.confinement_point_of(&self.ctx, entry_id).await?;
        let children = folder_children(&mut store, &self.ctx, entry_id, confinement_point).await?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(children)
    }

    pub async fn create_folder(&self, path: &FsPath) -> Result<VlobID, WorkspaceCreateEntryError> {
        self.ctx.check_write()?;
        let mut store = self.lock().await?;
        let (parent, name) = store.resolve_parent(&self.ctx, path).await?;
        let id = create_entry(&mut store, &self.ctx, parent, name, true).await?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(id)
    }

    /// Create a folder and its missing parents, an existing folder is fine
    pub async fn create_folder_all(&self, path: &FsPath) -> Result<VlobID, WorkspaceCreateEntryError> {
        self.ctx.check_write()?;
        let mut store = self.lock().await?;
        store.load_manifest(&self.ctx, self.ctx.realm_id).await?;
        let mut current = self.ctx.realm_id;
        for (depth, name) in path.parts().iter().enumerate() {
            let is_last = depth + 1 == path.parts().len();
            current = match store.child(&self.ctx, current, name).await? {
                Some(child) => match store.manifests.get(&child) {
                    Some(manifest) if manifest.is_folder() => child,
                    _ if is_last => return Err(WorkspaceCreateEntryError::EntryExists),
                    _ => return Err(WorkspaceCreateEntryError::ParentNotAFolder),
                },
                None => create_entry(&mut store, &self.ctx, current, name.clone(), true).await?,
            };
        }
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(current)
    }

    pub async fn create_file(&self, path: &FsPath) -> Result<VlobID, WorkspaceCreateEntryError> {
        self.ctx.check_write()?;
        let mut store = self.lock().await?;
        let (parent, name) = store.resolve_parent(&self.ctx, path).await?;
        let id = create_entry(&mut store, &self.ctx, parent, name, false).await?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(id)
    }

    pub async fn move_entry(&self, src: &FsPath, dst: &FsPath, mode: MoveEntryMode) -> Result<(), WorkspaceMoveEntryError> {
        self.ctx.check_write()?;
        if src.is_root() || dst.is_root() {
            return Err(WorkspaceMoveEntryError::CannotMoveRoot);
        }
        if dst != src && dst.starts_with(src) {
            return Err(WorkspaceMoveEntryError::CannotMoveIntoItself);
        }
        let mut store = self.lock().await?;
        let (src_parent, src_name) = match store.resolve_parent(&self.ctx, src).await {
            Ok(found) => found,
            Err(FsOperationError::ParentNotFound | FsOperationError::ParentNotAFolder) => {
                return Err(WorkspaceMoveEntryError::SourceNotFound)
            }
            Err(err) => return Err(err.into()),
        };
        let (dst_parent, dst_name) = store.resolve_parent(&self.ctx, dst).await?;
        move_in_folders(&mut store, &self.ctx, src_parent, &src_name, dst_parent, dst_name, mode).await?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(())
    }

    /// Rename an entry within its folder
    pub async fn rename_entry_by_id(
        &self,
        src_parent_id: VlobID,
        src_name: &EntryName,
        dst_name: EntryName,
        mode: MoveEntryMode,
    ) -> Result<(), WorkspaceMoveEntryError> {
        self.ctx.check_write()?;
        let mut store = self.lock().await?;
        match store.load_manifest(&self.ctx, src_parent_id).await? {
            true if store.manifests.get(&src_parent_id).is_some_and(LocalManifest::is_folder) => (),
            true => return Err(WorkspaceMoveEntryError::ParentNotAFolder),
            false => return Err(WorkspaceMoveEntryError::ParentNotFound),
        }
        move_in_folders(&mut store, &self.ctx, src_parent_id, src_name, src_parent_id, dst_name, mode).await?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(())
    }

    pub async fn remove_entry(&self, path: &FsPath) -> Result<(), WorkspaceRemoveEntryError> {
        self.remove(path, RemoveKind::Any).await
    }

    pub async fn remove_file(&self, path: &FsPath) -> Result<(), WorkspaceRemoveEntryError> {
        self.remove(path, RemoveKind::File).await
    }

    pub async fn remove_folder(&self, path: &FsPath) -> Result<(), WorkspaceRemoveEntryError> {
        self.remove(path, RemoveKind::Folder).await
    }

    /// Remove a folder and everything in it
    pub async fn remove_folder_all(&self, path: &FsPath) -> Result<(), WorkspaceRemoveEntryError> {
        self.remove(path, RemoveKind::FolderAll).await
    }

    async fn remove(&self, path: &FsPath, kind: RemoveKind) -> Result<(), WorkspaceRemoveEntryError> {
        self.ctx.check_write()?;
        if path.is_root() {
            return Err(WorkspaceRemoveEntryError::CannotRemoveRoot);
        }
        let mut store = self.lock().await?;
        let (parent, name) = match store.resolve_parent(&self.ctx, path).await {
            Ok(found) => found,
            Err(FsOperationError::ParentNotFound | FsOperationError::ParentNotAFolder) => {
                return Err(WorkspaceRemoveEntryError::EntryNotFound)
            }
            Err(err) => return Err(err.into()),
        };
        let id = store
            .child(&self.ctx, parent, &name)
            .await?
            .ok_or(WorkspaceRemoveEntryError::EntryNotFound)?;
        let (is_folder, is_empty) = match store.manifests.get(&id) {
            Some(manifest) => (
                manifest.is_folder(),
                manifest.children().map(|children| children.is_empty()).unwrap_or(true),
            ),
            None => return Err(WorkspaceRemoveEntryError::EntryNotFound),
        };
        match (kind, is_folder) {
            (RemoveKind::File, true) => return Err(WorkspaceRemoveEntryError::EntryIsFolder),
            (RemoveKind::Folder | RemoveKind::FolderAll, false) => return Err(WorkspaceRemoveEntryError::EntryIsFile),
            (RemoveKind::Any | RemoveKind::Folder, true) if !is_empty => {
                return Err(WorkspaceRemoveEntryError::EntryIsNonEmptyFolder)
            }
            _ => (),
        }

        // Detached entries are never synced again, their data stays on the server
        let now = self.ctx.device.now();
        store.update(&self.ctx, parent, now, |manifest| {
            if let Some(children) = manifest.children_mut() {
                children.remove(&name);
            }
        })?;
        store.notify_changed(&self.ctx, id);
        tracing::debug!(realm_id = %self.ctx.realm_id, entry_id = %id, "Entry removed");
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(())
    }

    /// Wait for the next change of an entry
    ///
    /// The entry is resolved when called, the returned future completes once
    /// that entry is modified (locally or by a sync).
    pub async fn watch_entry_oneshot(&self, path: &FsPath) -> Result<VlobID, WorkspaceWatchError> {
        self.ctx.self_role()?;
        let (entry_id, changed) = {
            let mut store = self.lock().await?;
            let resolved = store.resolve_path(&self.ctx, path).await?;
            (resolved.id, store.watch(resolved.id))
        };
        changed.await.map_err(|_| WorkspaceWatchError::Stopped)?;
        Ok(entry_id)
    }
}

fn stat_of(store: &WorkspaceStore, id: VlobID, confinement_point: Option<VlobID>) -> Result<EntryStat, FsOperationError> {
    store
        .manifests
        .get(&id)
        .map(|manifest| manifest.stat(confinement_point))
        .ok_or(FsOperationError::EntryNotFound)
}

async fn folder_children(
    store: &mut WorkspaceStore,
    ctx: &WorkspaceContext,
    folder: VlobID,
    confinement_point: Option<VlobID>,
) -> Result<Vec<(EntryName, EntryStat)>, FsOperationError> {
    let children: Vec<(EntryName, VlobID)> = match store.manifests.get(&folder).and_then(LocalManifest::children) {
        Some(children) => children.iter().map(|(name, id)| (name.clone(), *id)).collect(),
        None if store.manifests.contains_key(&folder) => return Err(FsOperationError::EntryIsFile),
        None => return Err(FsOperationError::EntryNotFound),
    };
    let mut stats = Vec::with_capacity(children.len());
    for (name, id) in children {
        // A child the server does not know (yet) is not listed
        if !store.load_manifest(ctx, id).await? {
            continue;
        }
        let child_confinement = confinement_point.or_else(|| ctx.is_confined_name(&name).then_some(folder));
        stats.push((name, stat_of(store, id, child_confinement)?));
    }
    Ok(stats)
}

async fn create_entry(
    store: &mut WorkspaceStore,
    ctx: &WorkspaceContext,
    parent: VlobID,
    name: EntryName,
    is_folder: bool,
) -> Result<VlobID, FsOperationError> {
    if store.child(ctx, parent, &name).await?.is_some() {
        return Err(FsOperationError::EntryExists);
    }
    let id = VlobID::default_new();
    let now = ctx.device.now();
    let manifest = if is_folder {
        LocalManifest::new_folder(id, parent, now)
    } else {
        LocalManifest::new_file(id, parent, now)
    };
    store.manifests.insert(id, manifest);
    store.update(ctx, parent, now, |manifest| {
        if let Some(children) = manifest.children_mut() {
            children.insert(name, id);
        }
    })?;
    tracing::debug!(realm_id = %ctx.realm_id, entry_id = %id, is_folder, "Entry created");
    Ok(id)
}

async fn move_in_folders(
    store: &mut WorkspaceStore,
    ctx: &WorkspaceContext,
    src_parent: VlobID,
    src_name: &EntryName,
    dst_parent: VlobID,
    dst_name: EntryName,
    mode: MoveEntryMode,
) -> Result<(), FsOperationError> {
    let src = store
        .child(ctx, src_parent, src_name)
        .await?
        .ok_or(FsOperationError::SourceNotFound)?;
    if src_parent == dst_parent && *src_name == dst_name {
        return Ok(());
    }
    if src == dst_parent || is_ancestor(store, ctx, src, dst_parent) {
        return Err(FsOperationError::CannotMoveIntoItself);
    }
    let dst = store.child(ctx, dst_parent, &dst_name).await?;

    match (mode, dst) {
        (MoveEntryMode::Exchange, None) => return Err(FsOperationError::DestinationNotFound),
        // The source would end up inside itself once swapped
        (MoveEntryMode::Exchange, Some(dst)) if dst == src_parent || is_ancestor(store, ctx, dst, src_parent) => {
            return Err(FsOperationError::CannotMoveIntoItself)
        }
        (MoveEntryMode::NoReplace, Some(_)) => return Err(FsOperationError::DestinationExists),
        (MoveEntryMode::CanReplaceFileOnly, Some(dst)) if store.manifests.get(&dst).is_some_and(LocalManifest::is_folder) => {
            return Err(FsOperationError::DestinationExists)
        }
        _ => (),
    }

    let now = ctx.device.now();
    let src_name = src_name.clone();
    match (mode, dst) {
        (MoveEntryMode::Exchange, Some(dst)) => {
            if src_parent == dst_parent {
                store.update(ctx, src_parent, now, |manifest| {
                    if let Some(children) = manifest.children_mut() {
                        children.insert(src_name, dst);
                        children.insert(dst_name, src);
                    }
                })?;
            } else {
                store.update(ctx, src_parent, now, |manifest| {
                    if let Some(children) = manifest.children_mut() {
                        children.insert(src_name, dst);
                    }
                })?;
                store.update(ctx, dst_parent, now, |manifest| {
                    if let Some(children) = manifest.children_mut() {
                        children.insert(dst_name, src);
                    }
                })?;
                store.update(ctx, src, now, |manifest| manifest.parent = dst_parent)?;
                store.update(ctx, dst, now, |manifest| manifest.parent = src_parent)?;
            }
        }
        _ => {
            store.update(ctx, src_parent, now, |manifest| {
                if let Some(children) = manifest.children_mut() {
                    children.remove(&src_name);
                }
            })?;
            store.update(ctx, dst_parent, now, |manifest| {
                if let Some(children) = manifest.children_mut() {
                    children.insert(dst_name, src);
                }
            })?;
            if src_parent != dst_parent {
                store.update(ctx, src, now, |manifest| manifest.parent = dst_parent)?;
            }
            if let Some(replaced) = dst {
                store.notify_changed(ctx, replaced);
            }
        }
    }
    tracing::debug!(realm_id = %ctx.realm_id, entry_id = %src, ?mode, "Entry moved");
    Ok(())
}

/// Whether `ancestor` is above `id` in the tree, looking at loaded manifests only
fn is_ancestor(store: &WorkspaceStore, ctx: &WorkspaceContext, ancestor: VlobID, id: VlobID) -> bool {
    let mut current = id;
    let mut remaining = store.manifests.len();
    while current != ctx.realm_id && remaining > 0 {
        remaining -= 1;
        match store.manifests.get(&current) {
            Some(manifest) if manifest.parent == ancestor => return true,
            Some(manifest) => current = manifest.parent,
            None => return false,
        }
    }
    false
}
