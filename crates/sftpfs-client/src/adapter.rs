//! Filesystem contract implemented against a remote session.
//!
//! Every call runs on the calling worker's channel. Well-formed refusals
//! from the server come back as ordinary errors; anything connection-shaped
//! faults the session, triggers one reconnect and still fails the call.
//!
//! Paths whose final segment carries a property suffix
//! (`name:SSHFSProperty.<Kind>`) never reach the remote as-is:
//! `Permission` reads and writes the octal mode of `name`, every other kind
//! is a zero-length object that accepts and discards writes.

use std::sync::Arc;

use async_trait::async_trait;
use sftpfs_vfs::path::{self, Property, PropertyPath};
use sftpfs_vfs::{
    CreateDisposition, DiskSpace, FileAttributes, FileContext, FileInformation, FileTimes, FsOps,
    OpenOutcome, VfsError, VfsResult, VolumeInformation, from_unix_secs, to_unix_secs,
};
use tracing::{debug, error, info, warn};

use crate::constants::{REPORTED_FREE_BYTES, REPORTED_TOTAL_BYTES, REPORTED_TOTAL_FREE_BYTES};
use crate::error::{RemoteError, RemoteResult, StatusKind};
use crate::session::RemoteSession;
use crate::transport::{ChannelOf, RemoteAttrs, RemoteChannel, SetAttrs, Transport};

/// Adapter settings.
#[derive(Debug, Clone, Default)]
pub struct RemoteOptions {
    /// Remote directory the mount root maps onto. Empty maps `/` to `/`.
    pub root: String,
    /// Flag every entry as offline so shells skip thumbnailing.
    pub offline_attribute: bool,
}

/// The remote filesystem adapter.
pub struct RemoteFs<T: Transport> {
    session: RemoteSession<T>,
    options: RemoteOptions,
}

impl<T: Transport> RemoteFs<T> {
    pub fn new(transport: T, options: RemoteOptions) -> Self {
        Self {
            session: RemoteSession::new(transport),
            options,
        }
    }

    pub fn session(&self) -> &RemoteSession<T> {
        &self.session
    }

    pub fn options(&self) -> &RemoteOptions {
        &self.options
    }

    /// Connect eagerly so a bad host or credential fails the mount.
    pub async fn connect(&self) -> RemoteResult<()> {
        self.session.connect().await
    }

    fn remote_path(&self, path: &str) -> String {
        let root = self.options.root.trim_end_matches('/');
        if root.is_empty() {
            return path.to_string();
        }
        if path == "/" || path.is_empty() {
            return root.to_string();
        }
        if path.starts_with('/') {
            format!("{root}{path}")
        } else {
            format!("{root}/{path}")
        }
    }

    /// Map a remote failure onto the driver's vocabulary.
    ///
    /// Transport faults reconnect once before the error is returned.
    async fn fail(&self, path: &str, err: RemoteError) -> VfsError {
        match err {
            RemoteError::Status { kind, message } => match kind {
                StatusKind::NoSuchFile => VfsError::not_found(path),
                StatusKind::PermissionDenied => VfsError::permission_denied(path),
                _ => VfsError::remote(path, message),
            },
            RemoteError::Transport(message) => {
                warn!(path, %message, "transport fault");
                self.session.mark_faulted();
                if self.session.reconnect().await {
                    info!(retries = self.session.retry_count(), "reconnected");
                } else {
                    error!(retries = self.session.retry_count(), "reconnect failed");
                }
                VfsError::transport(message)
            }
        }
    }

    async fn check<R>(&self, path: &str, result: RemoteResult<R>) -> VfsResult<R> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(path, e).await),
        }
    }

    async fn channel(&self, ctx: &FileContext, path: &str) -> VfsResult<Arc<ChannelOf<T>>> {
        let result = self.session.channel_for(ctx.worker).await;
        self.check(path, result).await
    }

    async fn stat(&self, ctx: &FileContext, path: &str) -> VfsResult<RemoteAttrs> {
        let channel = self.channel(ctx, path).await?;
        let result = channel.stat(&self.remote_path(path)).await;
        self.check(path, result).await
    }

    /// Stat that reports absence as `None`.
    async fn probe(
        &self,
        channel: &ChannelOf<T>,
        path: &str,
    ) -> VfsResult<Option<RemoteAttrs>> {
        match channel.stat(&self.remote_path(path)).await {
            Ok(attrs) => Ok(Some(attrs)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(self.fail(path, e).await),
        }
    }

    async fn set_attrs(&self, ctx: &FileContext, path: &str, changes: SetAttrs) -> VfsResult<()> {
        let channel = self.channel(ctx, path).await?;
        let result = channel.set_attrs(&self.remote_path(path), changes).await;
        self.check(path, result).await
    }

    async fn create_empty(&self, channel: &ChannelOf<T>, path: &str) -> VfsResult<OpenOutcome> {
        let result = channel.create(&self.remote_path(path)).await;
        self.check(path, result).await?;
        Ok(OpenOutcome::file())
    }

    fn to_info(&self, name: &str, attrs: &RemoteAttrs, listing: bool) -> FileInformation {
        let mut attributes = if attrs.is_dir() {
            FileAttributes::DIRECTORY
        } else {
            FileAttributes::NORMAL
        };
        if !attrs.is_dir() && attrs.permissions & 0o222 == 0 {
            attributes |= FileAttributes::READONLY;
        }
        if listing && name.starts_with('.') {
            attributes |= FileAttributes::HIDDEN;
        }
        if self.options.offline_attribute {
            attributes |= FileAttributes::OFFLINE;
        }

        let modified = from_unix_secs(attrs.mtime);
        FileInformation {
            file_name: name.to_string(),
            attributes,
            creation_time: modified,
            last_access_time: from_unix_secs(attrs.atime),
            last_write_time: modified,
            length: attrs.size,
            permissions: Some(attrs.permissions & 0o7777),
        }
    }

    async fn create_directory(
        &self,
        path: &str,
        disposition: CreateDisposition,
        ctx: &FileContext,
    ) -> VfsResult<OpenOutcome> {
        if !matches!(
            disposition,
            CreateDisposition::Open | CreateDisposition::CreateNew
        ) {
            return Err(VfsError::invalid_argument(format!(
                "{disposition:?} is not valid for directory {path}"
            )));
        }

        let channel = self.channel(ctx, path).await?;
        let existing = self.probe(&channel, path).await?;
        match (disposition, existing) {
            (CreateDisposition::Open, Some(attrs)) if attrs.is_dir() => Ok(OpenOutcome::directory()),
            (CreateDisposition::Open, Some(_)) => Err(VfsError::not_a_directory(path)),
            (CreateDisposition::Open, None) => Err(VfsError::not_found(path)),
            (_, Some(_)) => Err(VfsError::already_exists(path)),
            (_, None) => {
                let result = channel.mkdir(&self.remote_path(path)).await;
                self.check(path, result).await?;
                debug!(path, "created directory");
                Ok(OpenOutcome::directory())
            }
        }
    }

    async fn read_property(
        &self,
        property: &PropertyPath<'_>,
        offset: u64,
        size: u32,
        ctx: &FileContext,
    ) -> VfsResult<Vec<u8>> {
        if property.property != Property::Permission {
            return Ok(Vec::new());
        }
        let attrs = self.stat(ctx, property.base).await?;
        let text = format!("{:03o}\n", attrs.permissions & 0o7777).into_bytes();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(text.len());
        let end = start.saturating_add(size as usize).min(text.len());
        Ok(text[start..end].to_vec())
    }

    async fn write_property(
        &self,
        property: &PropertyPath<'_>,
        offset: u64,
        data: &[u8],
        ctx: &FileContext,
    ) -> VfsResult<u32> {
        let written = u32::try_from(data.len())
            .map_err(|_| VfsError::invalid_argument("property write too large"))?;
        if property.property != Property::Permission || offset != 0 {
            return Ok(written);
        }

        let mode = parse_mode(data)?;
        self.set_attrs(ctx, property.base, SetAttrs::permissions(mode))
            .await?;
        debug!(path = property.base, mode = %format!("{mode:o}"), "permissions set");
        Ok(written)
    }
}

/// Parse octal permission text such as `"0644\n"`.
fn parse_mode(data: &[u8]) -> VfsResult<u32> {
    let text = std::str::from_utf8(data)
        .map_err(|_| VfsError::invalid_argument("permission is not text"))?
        .trim();
    let mode = u32::from_str_radix(text, 8)
        .map_err(|_| VfsError::invalid_argument(format!("invalid octal permission {text:?}")))?;
    if mode > 0o7777 {
        return Err(VfsError::invalid_argument(format!(
            "permission {text} out of range"
        )));
    }
    Ok(mode)
}

#[async_trait]
impl<T: Transport + 'static> FsOps for RemoteFs<T> {
    async fn create_file(
        &self,
        path: &str,
        disposition: CreateDisposition,
        ctx: &FileContext,
    ) -> VfsResult<OpenOutcome> {
        if path::split_property(path).is_some() {
            return Ok(OpenOutcome::file());
        }
        if ctx.is_directory {
            return self.create_directory(path, disposition, ctx).await;
        }

        let channel = self.channel(ctx, path).await?;
        let existing = self.probe(&channel, path).await?;

        if let Some(attrs) = existing
            && attrs.is_dir()
        {
            return match disposition {
                CreateDisposition::Open
                | CreateDisposition::OpenOrCreate
                | CreateDisposition::Append => Ok(OpenOutcome::directory()),
                CreateDisposition::CreateNew => Err(VfsError::already_exists(path)),
                CreateDisposition::Create | CreateDisposition::Truncate => {
                    Err(VfsError::is_a_directory(path))
                }
            };
        }

        let exists = existing.is_some();
        match disposition {
            CreateDisposition::Open | CreateDisposition::Truncate if !exists => {
                Err(VfsError::not_found(path))
            }
            CreateDisposition::Open => Ok(OpenOutcome::file()),
            CreateDisposition::CreateNew if exists => Err(VfsError::already_exists(path)),
            CreateDisposition::OpenOrCreate | CreateDisposition::Append if exists => {
                Ok(OpenOutcome::file())
            }
            _ => self.create_empty(&channel, path).await,
        }
    }

    async fn cleanup(&self, _path: &str, _ctx: &FileContext) -> VfsResult<()> {
        Ok(())
    }

    async fn close_file(&self, _path: &str, _ctx: &FileContext) -> VfsResult<()> {
        Ok(())
    }

    async fn read_file(
        &self,
        path: &str,
        offset: u64,
        size: u32,
        ctx: &FileContext,
    ) -> VfsResult<Vec<u8>> {
        if let Some(property) = path::split_property(path) {
            return self.read_property(&property, offset, size, ctx).await;
        }
        let channel = self.channel(ctx, path).await?;
        let result = channel.read(&self.remote_path(path), offset, size).await;
        self.check(path, result).await
    }

    async fn write_file(
        &self,
        path: &str,
        offset: u64,
        data: &[u8],
        ctx: &FileContext,
    ) -> VfsResult<u32> {
        if let Some(property) = path::split_property(path) {
            return self.write_property(&property, offset, data, ctx).await;
        }
        let written = u32::try_from(data.len())
            .map_err(|_| VfsError::invalid_argument("write too large"))?;
        let channel = self.channel(ctx, path).await?;
        let result = channel.write(&self.remote_path(path), offset, data).await;
        self.check(path, result).await?;
        Ok(written)
    }

    async fn flush_file_buffers(&self, _path: &str, _ctx: &FileContext) -> VfsResult<()> {
        Ok(())
    }

    async fn get_file_information(
        &self,
        path: &str,
        ctx: &FileContext,
    ) -> VfsResult<FileInformation> {
        if let Some(property) = path::split_property(path) {
            let base = self.stat(ctx, property.base).await?;
            let mut info = self.to_info(path::file_name(path), &base, false);
            info.attributes = FileAttributes::NORMAL;
            info.length = 0;
            info.permissions = Some(0o644);
            return Ok(info);
        }
        let attrs = self.stat(ctx, path).await?;
        Ok(self.to_info(path::file_name(path), &attrs, false))
    }

    async fn find_files(&self, path: &str, ctx: &FileContext) -> VfsResult<Vec<FileInformation>> {
        let channel = self.channel(ctx, path).await?;
        let result = channel.list(&self.remote_path(path)).await;
        let entries = self.check(path, result).await?;
        Ok(entries
            .iter()
            .filter(|entry| entry.name != "." && entry.name != "..")
            .map(|entry| self.to_info(&entry.name, &entry.attrs, true))
            .collect())
    }

    async fn find_files_with_pattern(
        &self,
        _path: &str,
        _pattern: &str,
        _ctx: &FileContext,
    ) -> VfsResult<Vec<FileInformation>> {
        Err(VfsError::NotImplemented("find_files_with_pattern"))
    }

    async fn find_streams(
        &self,
        _path: &str,
        _ctx: &FileContext,
    ) -> VfsResult<Vec<FileInformation>> {
        Err(VfsError::NotImplemented("find_streams"))
    }

    async fn set_file_attributes(
        &self,
        path: &str,
        _attributes: FileAttributes,
        ctx: &FileContext,
    ) -> VfsResult<()> {
        // POSIX has no attribute flags; touch the mode so the call is a real
        // remote mutation.
        let attrs = self.stat(ctx, path).await?;
        self.set_attrs(ctx, path, SetAttrs::permissions(attrs.permissions & 0o7777))
            .await
    }

    async fn set_file_time(
        &self,
        path: &str,
        times: FileTimes,
        ctx: &FileContext,
    ) -> VfsResult<()> {
        let current = self.stat(ctx, path).await?;
        let atime = times.last_access.map(to_unix_secs).unwrap_or(current.atime);
        let mtime = times.last_write.map(to_unix_secs).unwrap_or(current.mtime);
        self.set_attrs(ctx, path, SetAttrs::times(atime, mtime)).await
    }

    async fn set_end_of_file(&self, path: &str, length: u64, ctx: &FileContext) -> VfsResult<()> {
        self.set_attrs(ctx, path, SetAttrs::size(length)).await
    }

    async fn set_allocation_size(
        &self,
        path: &str,
        length: u64,
        ctx: &FileContext,
    ) -> VfsResult<()> {
        let current = self.stat(ctx, path).await?;
        if current.size >= length {
            return Ok(());
        }
        self.set_attrs(ctx, path, SetAttrs::size(length)).await
    }

    async fn delete_file(&self, path: &str, ctx: &FileContext) -> VfsResult<()> {
        let channel = self.channel(ctx, path).await?;
        let result = channel.remove(&self.remote_path(path)).await;
        self.check(path, result).await
    }

    async fn delete_directory(&self, path: &str, ctx: &FileContext) -> VfsResult<()> {
        let channel = self.channel(ctx, path).await?;
        let result = channel.rmdir(&self.remote_path(path)).await;
        self.check(path, result).await
    }

    async fn move_file(
        &self,
        from: &str,
        to: &str,
        replace_existing: bool,
        ctx: &FileContext,
    ) -> VfsResult<()> {
        let channel = self.channel(ctx, from).await?;
        match self.probe(&channel, to).await? {
            Some(attrs) if replace_existing && !attrs.is_dir() => {
                let result = channel.remove(&self.remote_path(to)).await;
                self.check(to, result).await?;
            }
            Some(_) => return Err(VfsError::already_exists(to)),
            None => {}
        }

        let result = channel
            .rename(&self.remote_path(from), &self.remote_path(to))
            .await;
        self.check(from, result).await
    }

    async fn lock_file(
        &self,
        _path: &str,
        _offset: u64,
        _length: u64,
        _ctx: &FileContext,
    ) -> VfsResult<()> {
        Ok(())
    }

    async fn unlock_file(
        &self,
        _path: &str,
        _offset: u64,
        _length: u64,
        _ctx: &FileContext,
    ) -> VfsResult<()> {
        Ok(())
    }

    async fn get_disk_free_space(&self, _ctx: &FileContext) -> VfsResult<DiskSpace> {
        Ok(DiskSpace {
            free_bytes_available: REPORTED_FREE_BYTES,
            total_bytes: REPORTED_TOTAL_BYTES,
            total_free_bytes: REPORTED_TOTAL_FREE_BYTES,
        })
    }

    async fn get_volume_information(&self, _ctx: &FileContext) -> VfsResult<VolumeInformation> {
        Err(VfsError::NotImplemented("get_volume_information"))
    }

    async fn get_file_security(&self, _path: &str, _ctx: &FileContext) -> VfsResult<Vec<u8>> {
        Err(VfsError::NotImplemented("get_file_security"))
    }

    async fn set_file_security(
        &self,
        _path: &str,
        _descriptor: &[u8],
        _ctx: &FileContext,
    ) -> VfsResult<()> {
        Err(VfsError::NotImplemented("set_file_security"))
    }

    async fn mounted(&self, _ctx: &FileContext) -> VfsResult<()> {
        let result = self.session.connect().await;
        self.check("/", result).await?;
        info!(root = %self.options.root, "mounted");
        Ok(())
    }

    async fn unmounted(&self, _ctx: &FileContext) -> VfsResult<()> {
        self.session.teardown().await;
        info!("unmounted");
        Ok(())
    }
}
