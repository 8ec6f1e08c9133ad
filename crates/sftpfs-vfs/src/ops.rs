//! Driver operation contract.
//!
//! One method per callback a user-mode filesystem driver issues. Paths are
//! absolute, `/`-separated and may carry a `:`-delimited property suffix on
//! the final segment (see [`crate::path`]).

use async_trait::async_trait;

use super::VfsResult;
use super::types::{
    CreateDisposition, DiskSpace, FileAttributes, FileContext, FileInformation, FileTimes,
    OpenOutcome, VolumeInformation,
};

/// The filesystem operation contract.
///
/// Implemented by the remote adapter, by [`CacheLayer`](crate::CacheLayer)
/// as a decorator over any other implementation, and by
/// [`MemoryBackend`](crate::MemoryBackend) for tests.
#[async_trait]
pub trait FsOps: Send + Sync {
    // ========================================================================
    // Open / close
    // ========================================================================

    /// Open or create `path` according to `disposition`.
    ///
    /// `ctx.is_directory` selects directory semantics; only
    /// [`CreateDisposition::Open`] and [`CreateDisposition::CreateNew`] are
    /// valid for directories.
    async fn create_file(
        &self,
        path: &str,
        disposition: CreateDisposition,
        ctx: &FileContext,
    ) -> VfsResult<OpenOutcome>;

    /// Last handle to `path` is being closed.
    async fn cleanup(&self, path: &str, ctx: &FileContext) -> VfsResult<()>;

    /// Handle to `path` is released.
    async fn close_file(&self, path: &str, ctx: &FileContext) -> VfsResult<()>;

    // ========================================================================
    // Data
    // ========================================================================

    /// Read up to `size` bytes at `offset`. Returns fewer at end of file.
    async fn read_file(
        &self,
        path: &str,
        offset: u64,
        size: u32,
        ctx: &FileContext,
    ) -> VfsResult<Vec<u8>>;

    /// Write `data` at `offset`. Returns the number of bytes written.
    async fn write_file(
        &self,
        path: &str,
        offset: u64,
        data: &[u8],
        ctx: &FileContext,
    ) -> VfsResult<u32>;

    async fn flush_file_buffers(&self, path: &str, ctx: &FileContext) -> VfsResult<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    async fn get_file_information(
        &self,
        path: &str,
        ctx: &FileContext,
    ) -> VfsResult<FileInformation>;

    /// List a directory. Listings are materialized in full.
    async fn find_files(&self, path: &str, ctx: &FileContext) -> VfsResult<Vec<FileInformation>>;

    async fn find_files_with_pattern(
        &self,
        path: &str,
        pattern: &str,
        ctx: &FileContext,
    ) -> VfsResult<Vec<FileInformation>>;

    /// List alternate data streams of `path`.
    async fn find_streams(&self, path: &str, ctx: &FileContext)
    -> VfsResult<Vec<FileInformation>>;

    async fn set_file_attributes(
        &self,
        path: &str,
        attributes: FileAttributes,
        ctx: &FileContext,
    ) -> VfsResult<()>;

    async fn set_file_time(&self, path: &str, times: FileTimes, ctx: &FileContext)
    -> VfsResult<()>;

    async fn set_end_of_file(&self, path: &str, length: u64, ctx: &FileContext) -> VfsResult<()>;

    async fn set_allocation_size(
        &self,
        path: &str,
        length: u64,
        ctx: &FileContext,
    ) -> VfsResult<()>;

    // ========================================================================
    // Namespace
    // ========================================================================

    async fn delete_file(&self, path: &str, ctx: &FileContext) -> VfsResult<()>;

    async fn delete_directory(&self, path: &str, ctx: &FileContext) -> VfsResult<()>;

    /// Rename `from` to `to`.
    async fn move_file(
        &self,
        from: &str,
        to: &str,
        replace_existing: bool,
        ctx: &FileContext,
    ) -> VfsResult<()>;

    // ========================================================================
    // Locking, volume, security
    // ========================================================================

    async fn lock_file(&self, path: &str, offset: u64, length: u64, ctx: &FileContext)
    -> VfsResult<()>;

    async fn unlock_file(
        &self,
        path: &str,
        offset: u64,
        length: u64,
        ctx: &FileContext,
    ) -> VfsResult<()>;

    async fn get_disk_free_space(&self, ctx: &FileContext) -> VfsResult<DiskSpace>;

    async fn get_volume_information(&self, ctx: &FileContext) -> VfsResult<VolumeInformation>;

    /// Serialized security descriptor of `path`.
    async fn get_file_security(&self, path: &str, ctx: &FileContext) -> VfsResult<Vec<u8>>;

    async fn set_file_security(
        &self,
        path: &str,
        descriptor: &[u8],
        ctx: &FileContext,
    ) -> VfsResult<()>;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// The volume has been mounted.
    async fn mounted(&self, ctx: &FileContext) -> VfsResult<()>;

    /// The volume is being unmounted.
    async fn unmounted(&self, ctx: &FileContext) -> VfsResult<()>;
}
