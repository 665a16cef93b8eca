//! Local state of a workspace: manifests, opened files and cached blocks

use super::remote;
use super::{EntryStat, FileDescriptor, FsOperationError, OpenOptions, WorkspaceContext};
use crate::event_bus::ClientEvent;
use anyhow::Context;
use indexmap::IndexMap;
use parsec_types::{
    BlockAccess, BlockID, ChildManifest, DateTime, DeviceID, EntryName, FileManifest,
    FolderManifest, FsPath, SecretKey, VlobID, DEFAULT_BLOCK_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Piece of a file covering one block's worth of data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Chunk {
    /// Synced, the data lives in the server's block store
    Remote(BlockAccess),
    /// Modified since the last sync
    Local(#[serde(with = "serde_bytes")] Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum LocalContent {
    Folder {
        children: BTreeMap<EntryName, VlobID>,
    },
    /// Chunk `i` covers `[i * blocksize, min((i + 1) * blocksize, size))`
    File {
        size: u64,
        blocksize: u64,
        chunks: Vec<Chunk>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LocalManifest {
    pub id: VlobID,
    pub parent: VlobID,
    pub created: DateTime,
    pub updated: DateTime,
    /// Last version synced with the server, `None` for a placeholder
    pub base: Option<ChildManifest>,
    pub need_sync: bool,
    pub content: LocalContent,
}

impl LocalManifest {
    pub fn new_folder(id: VlobID, parent: VlobID, now: DateTime) -> Self {
        Self {
            id,
            parent,
            created: now,
            updated: now,
            base: None,
            need_sync: true,
            content: LocalContent::Folder {
                children: BTreeMap::new(),
            },
        }
    }

    pub fn new_file(id: VlobID, parent: VlobID, now: DateTime) -> Self {
        Self {
            id,
            parent,
            created: now,
            updated: now,
            base: None,
            need_sync: true,
            content: LocalContent::File {
                size: 0,
                blocksize: DEFAULT_BLOCK_SIZE,
                chunks: vec![],
            },
        }
    }

    pub fn from_remote(remote: ChildManifest) -> Self {
        let (id, parent, created, updated, content) = match &remote {
            ChildManifest::Folder(folder) => (
                folder.id,
                folder.parent,
                folder.created,
                folder.updated,
                LocalContent::Folder {
                    children: folder.children.clone(),
                },
            ),
            ChildManifest::File(file) => (
                file.id,
                file.parent,
                file.created,
                file.updated,
                LocalContent::File {
                    size: file.size,
                    blocksize: file.blocksize,
                    chunks: file.blocks.iter().cloned().map(Chunk::Remote).collect(),
                },
            ),
        };
        Self {
            id,
            parent,
            created,
            updated,
            base: Some(remote),
            need_sync: false,
            content,
        }
    }

    pub fn base_version(&self) -> u32 {
        self.base.as_ref().map(ChildManifest::version).unwrap_or(0)
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.content, LocalContent::Folder { .. })
    }

    pub fn children(&self) -> Option<&BTreeMap<EntryName, VlobID>> {
        match &self.content {
            LocalContent::Folder { children } => Some(children),
            LocalContent::File { .. } => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut BTreeMap<EntryName, VlobID>> {
        match &mut self.content {
            LocalContent::Folder { children } => Some(children),
            LocalContent::File { .. } => None,
        }
    }

    pub fn size(&self) -> u64 {
        match &self.content {
            LocalContent::File { size, .. } => *size,
            LocalContent::Folder { .. } => 0,
        }
    }

    pub fn stat(&self, confinement_point: Option<VlobID>) -> EntryStat {
        let base_version = self.base_version();
        match &self.content {
            LocalContent::Folder { .. } => EntryStat::Folder {
                confinement_point,
                id: self.id,
                parent: self.parent,
                created: self.created,
                updated: self.updated,
                base_version,
                is_placeholder: self.base.is_none(),
                need_sync: self.need_sync,
            },
            LocalContent::File { size, .. } => EntryStat::File {
                confinement_point,
                id: self.id,
                parent: self.parent,
                created: self.created,
                updated: self.updated,
                base_version,
                is_placeholder: self.base.is_none(),
                need_sync: self.need_sync,
                size: *size,
            },
        }
    }

    /// Remote manifest for the next version, `None` while the file has unsynced chunks
    pub fn to_remote(
        &self,
        author: DeviceID,
        timestamp: DateTime,
        keep_child: impl Fn(&EntryName) -> bool,
    ) -> Option<ChildManifest> {
        let version = self.base_version() + 1;
        match &self.content {
            LocalContent::Folder { children } => Some(ChildManifest::Folder(FolderManifest {
                author,
                timestamp,
                id: self.id,
                parent: self.parent,
                version,
                created: self.created,
                updated: self.updated,
                children: children
                    .iter()
                    .filter(|(name, _)| keep_child(name))
                    .map(|(name, id)| (name.clone(), *id))
                    .collect(),
            })),
            LocalContent::File { size, blocksize, chunks } => {
                let blocks = chunks
                    .iter()
                    .map(|chunk| match chunk {
                        Chunk::Remote(access) => Some(access.clone()),
                        Chunk::Local(_) => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(ChildManifest::File(FileManifest {
                    author,
                    timestamp,
                    id: self.id,
                    parent: self.parent,
                    version,
                    created: self.created,
                    updated: self.updated,
                    size: *size,
                    blocksize: *blocksize,
                    blocks,
                }))
            }
        }
    }
}

/// Largest file a workspace accepts
pub const MAX_FILE_SIZE: u64 = 1 << 40;

pub(crate) fn chunk_count(size: u64, blocksize: u64) -> usize {
    (size.div_ceil(blocksize)) as usize
}

pub(crate) fn chunk_range(index: usize, size: u64, blocksize: u64) -> (u64, u64) {
    let start = index as u64 * blocksize;
    (start, (start + blocksize).min(size))
}

/// Indices of the existing chunks whose data is needed to resize a file to
/// `new_size` then apply a write of `write_len` bytes at `write_offset`
pub(crate) fn chunks_to_rewrite(size: u64, blocksize: u64, new_size: u64, write: Option<(u64, u64)>) -> Vec<usize> {
    let kept = chunk_count(size, blocksize).min(chunk_count(new_size, blocksize));
    (0..kept)
        .filter(|&index| {
            let old = chunk_range(index, size, blocksize);
            let new = chunk_range(index, new_size, blocksize);
            old != new || intersects(new, write)
        })
        .collect()
}

fn intersects((start, end): (u64, u64), write: Option<(u64, u64)>) -> bool {
    match write {
        Some((offset, len)) => len > 0 && offset < end && offset + len > start,
        None => false,
    }
}

/// Chunks of a file resized to `new_size` with `write` applied
///
/// `old_data` must hold the cleartext of every remote chunk returned by
/// [`chunks_to_rewrite`].
pub(crate) fn rebuild_chunks(
    chunks: &[Chunk],
    size: u64,
    blocksize: u64,
    new_size: u64,
    write: Option<(u64, &[u8])>,
    old_data: &HashMap<usize, Vec<u8>>,
) -> Result<Vec<Chunk>, FsOperationError> {
    let old_count = chunk_count(size, blocksize);
    let write_span = write.map(|(offset, data)| (offset, data.len() as u64));
    (0..chunk_count(new_size, blocksize))
        .map(|index| -> Result<Chunk, FsOperationError> {
            let (start, end) = chunk_range(index, new_size, blocksize);
            let touched = intersects((start, end), write_span);
            if index < old_count && chunk_range(index, size, blocksize) == (start, end) && !touched {
                return Ok(chunks[index].clone());
            }
            let mut data = match chunks.get(index).filter(|_| index < old_count) {
                Some(Chunk::Local(data)) => data.clone(),
                Some(Chunk::Remote(_)) => old_data
                    .get(&index)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("missing data of chunk {index}"))?,
                None => vec![],
            };
            data.resize((end - start) as usize, 0);
            if let (true, Some((offset, buf))) = (touched, write) {
                let from = offset.max(start);
                let to = (offset + buf.len() as u64).min(end);
                data[(from - start) as usize..(to - start) as usize]
                    .copy_from_slice(&buf[(from - offset) as usize..(to - offset) as usize]);
            }
            Ok(Chunk::Local(data))
        })
        .collect()
}

/// Cleartext of recently used blocks, oldest evicted first
#[derive(Debug)]
pub(crate) struct BlockCache {
    blocks: IndexMap<BlockID, Vec<u8>>,
    bytes: u64,
    limit: u64,
}

impl BlockCache {
    pub fn new(limit: u64) -> Self {
        Self {
            blocks: IndexMap::new(),
            bytes: 0,
            limit,
        }
    }

    pub fn get(&self, id: &BlockID) -> Option<&Vec<u8>> {
        self.blocks.get(id)
    }

    pub fn contains(&self, id: &BlockID) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn insert(&mut self, id: BlockID, data: Vec<u8>) {
        let len = data.len() as u64;
        if len > self.limit {
            return;
        }
        while self.bytes + len > self.limit {
            match self.blocks.shift_remove_index(0) {
                Some((_, evicted)) => self.bytes -= evicted.len() as u64,
                None => break,
            }
        }
        if let Some(previous) = self.blocks.insert(id, data) {
            self.bytes -= previous.len() as u64;
        }
        self.bytes += len;
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenedFile {
    pub entry_id: VlobID,
    pub options: OpenOptions,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedWorkspace {
    manifests: HashMap<VlobID, LocalManifest>,
    last_checkpoint: u64,
}

#[derive(Debug)]
pub(crate) struct WorkspaceStore {
    path: PathBuf,
    pub manifests: HashMap<VlobID, LocalManifest>,
    pub last_checkpoint: u64,
    dirty: bool,
    pub blocks: BlockCache,
    pub fds: HashMap<FileDescriptor, OpenedFile>,
    next_fd: u32,
    watchers: HashMap<VlobID, Vec<oneshot::Sender<()>>>,
}

/// Entry found by walking a path from the root
#[derive(Debug, Clone, Copy)]
pub(crate) struct Resolved {
    pub id: VlobID,
    pub confinement_point: Option<VlobID>,
}

impl WorkspaceStore {
    pub async fn load(path: PathBuf, local_symkey: &SecretKey, cache_size: u64) -> anyhow::Result<Self> {
        let persisted = match tokio::fs::read(&path).await {
            Ok(encrypted) => {
                let raw = local_symkey
                    .decrypt(&encrypted)
                    .context("cannot decrypt workspace data")?;
                bincode::deserialize(&raw).context("corrupted workspace data")?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => PersistedWorkspace::default(),
            Err(err) => return Err(err).context("cannot read workspace data"),
        };
        Ok(Self {
            path,
            manifests: persisted.manifests,
            last_checkpoint: persisted.last_checkpoint,
            dirty: false,
            blocks: BlockCache::new(cache_size),
            fds: HashMap::new(),
            next_fd: 1,
            watchers: HashMap::new(),
        })
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Write the local state to disk if it changed since the last call
    pub async fn persist(&mut self, local_symkey: &SecretKey) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let persisted = PersistedWorkspace {
            manifests: self.manifests.clone(),
            last_checkpoint: self.last_checkpoint,
        };
        let encrypted = local_symkey.encrypt(&bincode::serialize(&persisted)?);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, encrypted).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        self.dirty = false;
        Ok(())
    }

    pub fn open(&mut self, entry_id: VlobID, options: OpenOptions) -> FileDescriptor {
        let fd = FileDescriptor(self.next_fd);
        self.next_fd += 1;
        self.fds.insert(fd, OpenedFile { entry_id, options });
        fd
    }

    pub fn opened(&self, fd: FileDescriptor) -> Result<OpenedFile, FsOperationError> {
        self.fds.get(&fd).copied().ok_or(FsOperationError::BadFileDescriptor)
    }

    pub fn close_all(&mut self) {
        self.fds.clear();
        self.watchers.clear();
    }

    pub fn watch(&mut self, entry_id: VlobID) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        self.watchers.entry(entry_id).or_default().push(sender);
        receiver
    }

    /// Wake up whoever watches `entry_id`
    pub fn notify_changed(&mut self, ctx: &WorkspaceContext, entry_id: VlobID) {
        if let Some(watchers) = self.watchers.remove(&entry_id) {
            for watcher in watchers {
                let _ = watcher.send(());
            }
            ctx.event_bus.send(ClientEvent::WorkspaceWatchedEntryChanged {
                realm_id: ctx.realm_id,
                entry_id,
            });
        }
    }

    /// Apply a local change to an entry
    pub fn update(
        &mut self,
        ctx: &WorkspaceContext,
        id: VlobID,
        now: DateTime,
        change: impl FnOnce(&mut LocalManifest),
    ) -> Result<(), FsOperationError> {
        let manifest = self.manifests.get_mut(&id).ok_or(FsOperationError::EntryNotFound)?;
        change(manifest);
        manifest.updated = now;
        manifest.need_sync = true;
        self.dirty = true;
        self.notify_changed(ctx, id);
        Ok(())
    }

    /// Make sure the manifest of `id` is known locally, fetching it if needed
    ///
    /// Returns `false` if the entry does not exist.
    pub async fn load_manifest(&mut self, ctx: &WorkspaceContext, id: VlobID) -> Result<bool, FsOperationError> {
        if self.manifests.contains_key(&id) {
            return Ok(true);
        }
        let fetched = remote::fetch_manifests(ctx, vec![id], None).await?;
        match fetched.into_iter().next() {
            Some(remote) => {
                tracing::trace!(realm_id = %ctx.realm_id, entry_id = %id, "Manifest fetched");
                self.manifests.insert(id, LocalManifest::from_remote(remote));
            }
            // The root of a realm nobody synced yet
            None if id == ctx.realm_id => {
                self.manifests
                    .insert(id, LocalManifest::new_folder(id, id, ctx.device.now()));
            }
            None => return Ok(false),
        }
        self.dirty = true;
        Ok(true)
    }

    pub async fn resolve_path(&mut self, ctx: &WorkspaceContext, path: &FsPath) -> Result<Resolved, FsOperationError> {
        let mut current = ctx.realm_id;
        let mut confinement_point = None;
        self.load_manifest(ctx, current).await?;
        for name in path.parts() {
            let child = self
                .manifests
                .get(&current)
                .and_then(LocalManifest::children)
                .and_then(|children| children.get(name).copied())
                .ok_or(FsOperationError::EntryNotFound)?;
            if !self.load_manifest(ctx, child).await? {
                return Err(FsOperationError::EntryNotFound);
            }
            if confinement_point.is_none() && ctx.is_confined_name(name) {
                confinement_point = Some(current);
            }
            current = child;
        }
        Ok(Resolved {
            id: current,
            confinement_point,
        })
    }

    /// Folder that would contain `path`, and the name of `path` in it
    pub async fn resolve_parent(
        &mut self,
        ctx: &WorkspaceContext,
        path: &FsPath,
    ) -> Result<(VlobID, EntryName), FsOperationError> {
        let (parent_path, name) = path
            .clone()
            .into_parent_and_name()
            .ok_or(FsOperationError::EntryExists)?;
        let parent = match self.resolve_path(ctx, &parent_path).await {
            Ok(resolved) => resolved.id,
            Err(FsOperationError::EntryNotFound) => return Err(FsOperationError::ParentNotFound),
            Err(err) => return Err(err),
        };
        match self.manifests.get(&parent) {
            Some(manifest) if manifest.is_folder() => Ok((parent, name)),
            _ => Err(FsOperationError::ParentNotAFolder),
        }
    }

    /// Child `name` of folder `parent`, loaded
    pub async fn child(
        &mut self,
        ctx: &WorkspaceContext,
        parent: VlobID,
        name: &EntryName,
    ) -> Result<Option<VlobID>, FsOperationError> {
        let child = self
            .manifests
            .get(&parent)
            .and_then(LocalManifest::children)
            .and_then(|children| children.get(name).copied());
        match child {
            Some(id) if self.load_manifest(ctx, id).await? => Ok(Some(id)),
            _ => Ok(None),
        }
    }

    /// Folder under which `id` is confined, climbing up to the root
    pub async fn confinement_point_of(&mut self, ctx: &WorkspaceContext, id: VlobID) -> Result<Option<VlobID>, FsOperationError> {
        let mut confinement_point = None;
        let mut current = id;
        let mut remaining = self.manifests.len() + 1;
        while current != ctx.realm_id && remaining > 0 {
            remaining -= 1;
            let Some(parent) = self.manifests.get(&current).map(|manifest| manifest.parent) else {
                break;
            };
            if !self.load_manifest(ctx, parent).await? {
                break;
            }
            let name = self
                .manifests
                .get(&parent)
                .and_then(LocalManifest::children)
                .and_then(|children| children.iter().find(|(_, child)| **child == current))
                .map(|(name, _)| name.clone());
            match name {
                Some(name) if ctx.is_confined_name(&name) => confinement_point = Some(parent),
                Some(_) => (),
                None => break,
            }
            current = parent;
        }
        Ok(confinement_point)
    }

    /// Cleartext of a synced block, from the cache or the server
    pub async fn block_data(&mut self, ctx: &WorkspaceContext, access: &BlockAccess) -> Result<Vec<u8>, FsOperationError> {
        if let Some(data) = self.blocks.get(&access.id) {
            return Ok(data.clone());
        }
        let data = remote::fetch_block(ctx, access).await?;
        self.blocks.insert(access.id, data.clone());
        Ok(data)
    }

    /// Data of the remote chunks of `entry_id` listed in `indices`
    pub async fn remote_chunks_data(
        &mut self,
        ctx: &WorkspaceContext,
        entry_id: VlobID,
        indices: &[usize],
    ) -> Result<HashMap<usize, Vec<u8>>, FsOperationError> {
        let accesses: Vec<(usize, BlockAccess)> = match self.manifests.get(&entry_id).map(|m| &m.content) {
            Some(LocalContent::File { chunks, .. }) => indices
                .iter()
                .filter_map(|&index| match chunks.get(index) {
                    Some(Chunk::Remote(access)) => Some((index, access.clone())),
                    _ => None,
                })
                .collect(),
            _ => return Err(FsOperationError::EntryNotFound),
        };
        let mut data = HashMap::with_capacity(accesses.len());
        for (index, access) in accesses {
            data.insert(index, self.block_data(ctx, &access).await?);
        }
        Ok(data)
    }

    /// Resize then write into a file
    ///
    /// Missing blocks are fetched before anything changes.
    pub async fn write_file(
        &mut self,
        ctx: &WorkspaceContext,
        entry_id: VlobID,
        new_size: u64,
        write: Option<(u64, &[u8])>,
    ) -> Result<(), FsOperationError> {
        if new_size > MAX_FILE_SIZE {
            return Err(FsOperationError::FileTooLarge { max: MAX_FILE_SIZE });
        }
        let (size, blocksize) = match self.manifests.get(&entry_id).map(|m| &m.content) {
            Some(LocalContent::File { size, blocksize, .. }) => (*size, *blocksize),
            Some(LocalContent::Folder { .. }) => return Err(FsOperationError::EntryIsFolder),
            None => return Err(FsOperationError::EntryNotFound),
        };
        let write_span = write.map(|(offset, data)| (offset, data.len() as u64));
        let indices = chunks_to_rewrite(size, blocksize, new_size, write_span);
        let old_data = self.remote_chunks_data(ctx, entry_id, &indices).await?;

        let new_chunks = match self.manifests.get(&entry_id).map(|m| &m.content) {
            Some(LocalContent::File { chunks, .. }) => rebuild_chunks(chunks, size, blocksize, new_size, write, &old_data)?,
            _ => return Err(FsOperationError::EntryNotFound),
        };
        let now = ctx.device.now();
        self.update(ctx, entry_id, now, |manifest| {
            if let LocalContent::File { size, chunks, .. } = &mut manifest.content {
                *size = new_size;
                *chunks = new_chunks;
            }
        })
    }

    /// Read part of a file, missing blocks are fetched
    pub async fn read_file(
        &mut self,
        ctx: &WorkspaceContext,
        entry_id: VlobID,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, FsOperationError> {
        let (size, blocksize, chunks) = match self.manifests.get(&entry_id).map(|m| &m.content) {
            Some(LocalContent::File { size, blocksize, chunks }) => (*size, *blocksize, chunks.clone()),
            Some(LocalContent::Folder { .. }) => return Err(FsOperationError::EntryIsFolder),
            None => return Err(FsOperationError::EntryNotFound),
        };
        if offset >= size || len == 0 {
            return Ok(vec![]);
        }
        let end = size.min(offset.saturating_add(len));
        let mut buf = Vec::with_capacity((end - offset) as usize);
        let first = (offset / blocksize) as usize;
        let last = ((end - 1) / blocksize) as usize;
        for (index, chunk) in chunks.iter().enumerate().take(last + 1).skip(first) {
            let (start, chunk_end) = chunk_range(index, size, blocksize);
            let data = match chunk {
                Chunk::Local(data) => data.clone(),
                Chunk::Remote(access) => self.block_data(ctx, access).await?,
            };
            let from = offset.max(start) - start;
            let to = end.min(chunk_end) - start;
            let to = (to as usize).min(data.len());
            buf.extend_from_slice(data.get(from as usize..to).unwrap_or_default());
        }
        Ok(buf)
    }

    /// Whether reading the whole file needs no server access
    pub fn is_file_content_local(&self, entry_id: VlobID) -> Result<bool, FsOperationError> {
        match self.manifests.get(&entry_id).map(|m| &m.content) {
            Some(LocalContent::File { chunks, .. }) => Ok(chunks.iter().all(|chunk| match chunk {
                Chunk::Local(_) => true,
                Chunk::Remote(access) => self.blocks.contains(&access.id),
            })),
            Some(LocalContent::Folder { .. }) => Err(FsOperationError::EntryIsFolder),
            None => Err(FsOperationError::EntryNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(data: &[u8]) -> Chunk {
        Chunk::Local(data.to_vec())
    }

    #[test]
    fn test_write_inside_and_past_end() {
        let chunks = vec![local(b"abcd"), local(b"ef")];
        let data = b"XYZ";
        let new = rebuild_chunks(&chunks, 6, 4, 8, Some((5, data)), &HashMap::new()).unwrap();
        assert_eq!(new, vec![local(b"abcd"), local(b"eXYZ")]);

        // Writing past the end pads with zeros
        let new = rebuild_chunks(&chunks, 6, 4, 11, Some((9, b"!!")), &HashMap::new()).unwrap();
        assert_eq!(new, vec![local(b"abcd"), local(b"ef\0\0"), local(b"\0!!")]);
    }

    #[test]
    fn test_shrink_keeps_untouched_chunks() {
        let chunks = vec![local(b"abcd"), local(b"efgh"), local(b"ij")];
        assert_eq!(chunks_to_rewrite(10, 4, 5, None), vec![1]);
        let new = rebuild_chunks(&chunks, 10, 4, 5, None, &HashMap::new()).unwrap();
        assert_eq!(new, vec![local(b"abcd"), local(b"e")]);
    }

    #[test]
    fn test_block_cache_evicts_oldest() {
        let mut cache = BlockCache::new(8);
        let (a, b, c) = (BlockID::default_new(), BlockID::default_new(), BlockID::default_new());
        cache.insert(a, vec![0; 4]);
        cache.insert(b, vec![0; 4]);
        cache.insert(c, vec![0; 4]);
        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
        // Bigger than the whole cache, never kept
        cache.insert(a, vec![0; 9]);
        assert!(!cache.contains(&a));
    }
}
