//! Opened files

use super::store::{LocalManifest, MAX_FILE_SIZE};
use super::{
    FileDescriptor, FileStat, FsOperationError, OpenOptions, WorkspaceFdCloseError,
    WorkspaceFdReadError, WorkspaceFdResizeError, WorkspaceFdStatError, WorkspaceFdWriteError,
    WorkspaceOpenFileError, WorkspaceOps, WorkspaceStatEntryError,
};
use parsec_types::{FsPath, VlobID};

impl WorkspaceOps {
    pub async fn open_file(&self, path: &FsPath, options: OpenOptions) -> Result<FileDescriptor, WorkspaceOpenFileError> {
        self.open_file_and_get_id(path, options).await.map(|(fd, _)| fd)
    }

    pub async fn open_file_and_get_id(
        &self,
        path: &FsPath,
        options: OpenOptions,
    ) -> Result<(FileDescriptor, VlobID), WorkspaceOpenFileError> {
        let wants_write = options.write || options.truncate || options.create || options.create_new;
        if wants_write {
            self.ctx.check_write()?;
        } else {
            self.ctx.self_role()?;
        }
        let mut store = self.lock().await?;
        if path.is_root() {
            return Err(WorkspaceOpenFileError::EntryIsFolder);
        }
        let (parent, name) = store.resolve_parent(&self.ctx, path).await?;
        let entry_id = match store.child(&self.ctx, parent, &name).await? {
            Some(_) if options.create_new => return Err(WorkspaceOpenFileError::EntryExistsInCreateNewMode),
            Some(entry_id) => entry_id,
            None if options.create || options.create_new => {
                let entry_id = VlobID::default_new();
                let now = self.ctx.device.now();
                store
                    .manifests
                    .insert(entry_id, LocalManifest::new_file(entry_id, parent, now));
                store.update(&self.ctx, parent, now, |manifest| {
                    if let Some(children) = manifest.children_mut() {
                        children.insert(name, entry_id);
                    }
                })?;
                entry_id
            }
            None => return Err(WorkspaceOpenFileError::EntryNotFound),
        };
        let fd = open_loaded(&mut store, &self.ctx, entry_id, options).await?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok((fd, entry_id))
    }

    pub async fn open_file_by_id(&self, entry_id: VlobID, options: OpenOptions) -> Result<FileDescriptor, WorkspaceOpenFileError> {
        if options.write || options.truncate {
            self.ctx.check_write()?;
        } else {
            self.ctx.self_role()?;
        }
        let mut store = self.lock().await?;
        if !store.load_manifest(&self.ctx, entry_id).await? {
            return Err(WorkspaceOpenFileError::EntryNotFound);
        }
        if options.create_new {
            return Err(WorkspaceOpenFileError::EntryExistsInCreateNewMode);
        }
        let fd = open_loaded(&mut store, &self.ctx, entry_id, options).await?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(fd)
    }

    pub async fn fd_close(&self, fd: FileDescriptor) -> Result<(), WorkspaceFdCloseError> {
        let mut store = self.lock().await?;
        store.fds.remove(&fd).ok_or(WorkspaceFdCloseError::BadFileDescriptor)?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(())
    }

    pub async fn fd_flush(&self, fd: FileDescriptor) -> Result<(), WorkspaceFdCloseError> {
        let mut store = self.lock().await?;
        store.opened(fd)?;
        store.persist(&self.ctx.device.local_symkey).await?;
        Ok(())
    }

    pub async fn fd_stat(&self, fd: FileDescriptor) -> Result<FileStat, WorkspaceFdStatError> {
        let store = self.lock().await?;
        let opened = store.opened(fd)?;
        let manifest = store
            .manifests
            .get(&opened.entry_id)
            .ok_or_else(|| anyhow::anyhow!("opened file {} has no manifest", opened.entry_id))?;
        Ok(FileStat {
            id: manifest.id,
            created: manifest.created,
            updated: manifest.updated,
            base_version: manifest.base_version(),
            is_placeholder: manifest.base.is_none(),
            need_sync: manifest.need_sync,
            size: manifest.size(),
        })
    }

    pub async fn fd_read(&self, fd: FileDescriptor, offset: u64, size: u64) -> Result<Vec<u8>, WorkspaceFdReadError> {
        let mut store = self.lock().await?;
        let opened = store.opened(fd)?;
        if !opened.options.read {
            return Err(WorkspaceFdReadError::NotInReadMode);
        }
        Ok(store.read_file(&self.ctx, opened.entry_id, offset, size).await?)
    }

    /// Write at `offset`, growing the file if needed
    pub async fn fd_write(&self, fd: FileDescriptor, offset: u64, data: &[u8]) -> Result<u64, WorkspaceFdWriteError> {
        let mut store = self.lock().await?;
        let opened = self.opened_for_write(&store, fd)?;
        let size = store.manifests.get(&opened.entry_id).map(LocalManifest::size).unwrap_or(0);
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(WorkspaceFdWriteError::FileTooLarge { max: MAX_FILE_SIZE })?;
        let new_size = size.max(end);
        store
            .write_file(&self.ctx, opened.entry_id, new_size, Some((offset, data)))
            .await?;
        Ok(data.len() as u64)
    }

    /// Write at `offset` without ever growing the file
    pub async fn fd_write_constrained_io(&self, fd: FileDescriptor, offset: u64, data: &[u8]) -> Result<u64, WorkspaceFdWriteError> {
        let mut store = self.lock().await?;
        let opened = self.opened_for_write(&store, fd)?;
        let size = store.manifests.get(&opened.entry_id).map(LocalManifest::size).unwrap_or(0);
        let writable = size.saturating_sub(offset).min(data.len() as u64) as usize;
        if writable == 0 {
            return Ok(0);
        }
        store
            .write_file(&self.ctx, opened.entry_id, size, Some((offset, &data[..writable])))
            .await?;
        Ok(writable as u64)
    }

    /// Append at the current end of the file
    pub async fn fd_write_start_eof(&self, fd: FileDescriptor, data: &[u8]) -> Result<u64, WorkspaceFdWriteError> {
        let mut store = self.lock().await?;
        let opened = self.opened_for_write(&store, fd)?;
        let size = store.manifests.get(&opened.entry_id).map(LocalManifest::size).unwrap_or(0);
        let new_size = size
            .checked_add(data.len() as u64)
            .ok_or(WorkspaceFdWriteError::FileTooLarge { max: MAX_FILE_SIZE })?;
        store
            .write_file(&self.ctx, opened.entry_id, new_size, Some((size, data)))
            .await?;
        Ok(data.len() as u64)
    }

    /// Set the file size, `truncate_only` never grows it
    pub async fn fd_resize(&self, fd: FileDescriptor, length: u64, truncate_only: bool) -> Result<(), WorkspaceFdResizeError> {
        let mut store = self.lock().await?;
        let opened = self.opened_for_write(&store, fd)?;
        let size = store.manifests.get(&opened.entry_id).map(LocalManifest::size).unwrap_or(0);
        if length == size || (truncate_only && length >= size) {
            return Ok(());
        }
        store.write_file(&self.ctx, opened.entry_id, length, None).await?;
        Ok(())
    }

    fn opened_for_write(
        &self,
        store: &super::store::WorkspaceStore,
        fd: FileDescriptor,
    ) -> Result<super::store::OpenedFile, FsOperationError> {
        let opened = store.opened(fd)?;
        if !opened.options.write {
            return Err(FsOperationError::NotInWriteMode);
        }
        // Our role may have changed since the file was opened
        self.ctx.check_write()?;
        Ok(opened)
    }

    /// Whether the file at `path` can be read without the server
    pub async fn is_file_content_local(&self, path: &FsPath) -> Result<bool, WorkspaceStatEntryError> {
        self.ctx.self_role()?;
        let mut store = self.lock().await?;
        let resolved = store.resolve_path(&self.ctx, path).await?;
        Ok(store.is_file_content_local(resolved.id)?)
    }
}

async fn open_loaded(
    store: &mut super::store::WorkspaceStore,
    ctx: &super::WorkspaceContext,
    entry_id: VlobID,
    options: OpenOptions,
) -> Result<FileDescriptor, FsOperationError> {
    match store.manifests.get(&entry_id) {
        Some(manifest) if manifest.is_folder() => return Err(FsOperationError::EntryIsFolder),
        Some(_) => (),
        None => return Err(FsOperationError::EntryNotFound),
    }
    if options.truncate && store.manifests.get(&entry_id).map(LocalManifest::size).unwrap_or(0) > 0 {
        store.write_file(ctx, entry_id, 0, None).await?;
    }
    let options = OpenOptions {
        read: options.read,
        write: options.write || options.truncate || options.create || options.create_new,
        ..options
    };
    let fd = store.open(entry_id, options);
    tracing::trace!(realm_id = %ctx.realm_id, entry_id = %entry_id, %fd, "File opened");
    Ok(fd)
}
