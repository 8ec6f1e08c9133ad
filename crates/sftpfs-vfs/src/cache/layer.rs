//! Caching decorator over any [`FsOps`] backend.
//!
//! Open, get-metadata, listing and stream-listing outcomes are memoized per
//! path, failures included. Mutations clear the affected slots afterwards.
//! The tree lock is never held across a backend call.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use tracing::debug;

use super::tree::{CacheNode, OpenKey, PathCacheTree, Slot};
use crate::error::{VfsError, VfsResult};
use crate::ops::FsOps;
use crate::path::{self, Property, PropertyPath};
use crate::types::{
    CreateDisposition, DiskSpace, FileAttributes, FileContext, FileInformation, FileTimes,
    OpenOutcome, VolumeInformation,
};

/// Transport faults say nothing about the path and are never stored.
fn cacheable<T>(result: &VfsResult<T>) -> bool {
    !matches!(result, Err(VfsError::Transport(_)))
}

/// Transparent caching decorator.
pub struct CacheLayer<B> {
    inner: B,
    tree: Mutex<PathCacheTree>,
}

impl<B: FsOps> CacheLayer<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            tree: Mutex::new(PathCacheTree::new()),
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Drop every cached result.
    pub fn flush(&self) {
        let mut tree = self.tree.lock();
        let root = tree.root();
        tree.clear_all(root);
    }

    /// Number of materialized cache nodes, root included.
    pub fn cached_nodes(&self) -> usize {
        self.tree.lock().node_count()
    }

    /// Serve a slot from the tree, or run `fetch` and record its outcome.
    async fn memoize<T, Fut>(
        &self,
        path: &str,
        op: &'static str,
        read: fn(&CacheNode) -> Slot<T>,
        write: fn(&mut CacheNode, VfsResult<T>),
        fetch: Fut,
    ) -> VfsResult<T>
    where
        T: Clone + Send,
        Fut: Future<Output = VfsResult<T>> + Send,
    {
        let ticket = {
            let mut tree = self.tree.lock();
            let id = tree.lookup(path);
            if let Some(hit) = tree.node(id).and_then(read) {
                debug!(path, op, "cache hit");
                return hit;
            }
            tree.ticket(id)
        };

        debug!(path, op, "cache miss");
        let result = fetch.await;
        if let Some(ticket) = ticket
            && cacheable(&result)
        {
            let stored = result.clone();
            self.tree.lock().fill(ticket, move |node| write(node, stored));
        }
        result
    }

    fn clear_metadata(&self, path: &str) {
        let mut tree = self.tree.lock();
        let id = tree.lookup(path);
        tree.clear_metadata(id);
    }

    fn clear_parent_listing(&self, path: &str) {
        let mut tree = self.tree.lock();
        let id = tree.lookup(path);
        if let Some(parent) = tree.parent(id) {
            tree.clear_listing(parent);
        }
    }

    fn clear_parent_all(&self, path: &str) {
        let mut tree = self.tree.lock();
        let id = tree.lookup(path);
        if let Some(parent) = tree.parent(id) {
            tree.clear_all(parent);
        }
    }

    /// `path` is gone or replaced: forget it and its parent's listing.
    fn forget_removed(tree: &mut PathCacheTree, path: &str) {
        let id = tree.lookup(path);
        let parent = tree.parent(id);
        tree.clear_all(id);
        if let Some(parent) = parent {
            tree.clear_listing(parent);
        }
    }

    async fn open_cached(
        &self,
        path: &str,
        disposition: CreateDisposition,
        ctx: &FileContext,
    ) -> VfsResult<OpenOutcome> {
        let key = OpenKey::new(disposition, ctx);
        let (ticket, known_to_exist) = {
            let mut tree = self.tree.lock();
            let id = tree.lookup(path);
            let node = tree.node(id);
            if let Some(hit) = node.and_then(|n| n.open_outcome(key)) {
                debug!(path, "open cache hit");
                return hit;
            }
            let known = node.is_some_and(|n| matches!(n.metadata, Some(Ok(_))));
            (tree.ticket(id), known)
        };

        let result = self.inner.create_file(path, disposition, ctx).await;
        if let Some(ticket) = ticket
            && cacheable(&result)
        {
            let stored = result.clone();
            self.tree.lock().fill(ticket, move |node| {
                node.open.insert(key, stored);
            });
        }

        if disposition == CreateDisposition::OpenOrCreate && result.is_ok() && !known_to_exist {
            debug!(path, "open-or-create may have created, clearing parent listing");
            self.clear_parent_listing(path);
        }
        result
    }
}

#[async_trait]
impl<B: FsOps> FsOps for CacheLayer<B> {
    async fn create_file(
        &self,
        path: &str,
        disposition: CreateDisposition,
        ctx: &FileContext,
    ) -> VfsResult<OpenOutcome> {
        if let Some(PropertyPath {
            base,
            property: Property::Cache,
        }) = path::split_property(path)
        {
            debug!(path = base, "cache flush requested");
            let mut tree = self.tree.lock();
            let id = tree.lookup(base);
            tree.clear_all(id);
            return Ok(OpenOutcome::file());
        }

        match disposition {
            CreateDisposition::Open | CreateDisposition::OpenOrCreate => {
                self.open_cached(path, disposition, ctx).await
            }
            CreateDisposition::CreateNew | CreateDisposition::Create => {
                let result = self.inner.create_file(path, disposition, ctx).await;
                if ctx.is_directory {
                    self.clear_parent_all(path);
                } else {
                    self.clear_parent_listing(path);
                }
                result
            }
            CreateDisposition::Truncate => {
                let result = self.inner.create_file(path, disposition, ctx).await;
                self.clear_metadata(path);
                result
            }
            CreateDisposition::Append => {
                let result = self.inner.create_file(path, disposition, ctx).await;
                self.clear_parent_listing(path);
                result
            }
        }
    }

    async fn cleanup(&self, path: &str, ctx: &FileContext) -> VfsResult<()> {
        self.inner.cleanup(path, ctx).await
    }

    async fn close_file(&self, path: &str, ctx: &FileContext) -> VfsResult<()> {
        self.inner.close_file(path, ctx).await
    }

    async fn read_file(
        &self,
        path: &str,
        offset: u64,
        size: u32,
        ctx: &FileContext,
    ) -> VfsResult<Vec<u8>> {
        self.inner.read_file(path, offset, size, ctx).await
    }

    async fn write_file(
        &self,
        path: &str,
        offset: u64,
        data: &[u8],
        ctx: &FileContext,
    ) -> VfsResult<u32> {
        let result = self.inner.write_file(path, offset, data, ctx).await;
        if result.is_ok() {
            let target = path::split_property(path).map_or(path, |p| p.base);
            self.clear_metadata(target);
        }
        result
    }

    async fn flush_file_buffers(&self, path: &str, ctx: &FileContext) -> VfsResult<()> {
        self.inner.flush_file_buffers(path, ctx).await
    }

    async fn get_file_information(
        &self,
        path: &str,
        ctx: &FileContext,
    ) -> VfsResult<FileInformation> {
        self.memoize(
            path,
            "get_file_information",
            |n| n.metadata.clone(),
            |n, r| n.metadata = Some(r),
            self.inner.get_file_information(path, ctx),
        )
        .await
    }

    async fn find_files(&self, path: &str, ctx: &FileContext) -> VfsResult<Vec<FileInformation>> {
        self.memoize(
            path,
            "find_files",
            |n| n.listing.clone(),
            |n, r| n.listing = Some(r),
            self.inner.find_files(path, ctx),
        )
        .await
    }

    async fn find_files_with_pattern(
        &self,
        path: &str,
        pattern: &str,
        ctx: &FileContext,
    ) -> VfsResult<Vec<FileInformation>> {
        self.inner.find_files_with_pattern(path, pattern, ctx).await
    }

    async fn find_streams(
        &self,
        path: &str,
        ctx: &FileContext,
    ) -> VfsResult<Vec<FileInformation>> {
        self.memoize(
            path,
            "find_streams",
            |n| n.streams.clone(),
            |n, r| n.streams = Some(r),
            self.inner.find_streams(path, ctx),
        )
        .await
    }

    async fn set_file_attributes(
        &self,
        path: &str,
        attributes: FileAttributes,
        ctx: &FileContext,
    ) -> VfsResult<()> {
        let result = self.inner.set_file_attributes(path, attributes, ctx).await;
        self.clear_metadata(path);
        result
    }

    async fn set_file_time(
        &self,
        path: &str,
        times: FileTimes,
        ctx: &FileContext,
    ) -> VfsResult<()> {
        let result = self.inner.set_file_time(path, times, ctx).await;
        self.clear_metadata(path);
        result
    }

    async fn set_end_of_file(&self, path: &str, length: u64, ctx: &FileContext) -> VfsResult<()> {
        let result = self.inner.set_end_of_file(path, length, ctx).await;
        self.clear_metadata(path);
        result
    }

    async fn set_allocation_size(
        &self,
        path: &str,
        length: u64,
        ctx: &FileContext,
    ) -> VfsResult<()> {
        let result = self.inner.set_allocation_size(path, length, ctx).await;
        self.clear_metadata(path);
        result
    }

    async fn delete_file(&self, path: &str, ctx: &FileContext) -> VfsResult<()> {
        let result = self.inner.delete_file(path, ctx).await;
        Self::forget_removed(&mut self.tree.lock(), path);
        result
    }

    async fn delete_directory(&self, path: &str, ctx: &FileContext) -> VfsResult<()> {
        let result = self.inner.delete_directory(path, ctx).await;
        Self::forget_removed(&mut self.tree.lock(), path);
        result
    }

    async fn move_file(
        &self,
        from: &str,
        to: &str,
        replace_existing: bool,
        ctx: &FileContext,
    ) -> VfsResult<()> {
        let result = self.inner.move_file(from, to, replace_existing, ctx).await;
        {
            let mut tree = self.tree.lock();
            Self::forget_removed(&mut tree, from);
            Self::forget_removed(&mut tree, to);
        }
        result
    }

    async fn lock_file(
        &self,
        path: &str,
        offset: u64,
        length: u64,
        ctx: &FileContext,
    ) -> VfsResult<()> {
        self.inner.lock_file(path, offset, length, ctx).await
    }

    async fn unlock_file(
        &self,
        path: &str,
        offset: u64,
        length: u64,
        ctx: &FileContext,
    ) -> VfsResult<()> {
        self.inner.unlock_file(path, offset, length, ctx).await
    }

    async fn get_disk_free_space(&self, ctx: &FileContext) -> VfsResult<DiskSpace> {
        self.inner.get_disk_free_space(ctx).await
    }

    async fn get_volume_information(&self, ctx: &FileContext) -> VfsResult<VolumeInformation> {
        self.inner.get_volume_information(ctx).await
    }

    async fn get_file_security(&self, path: &str, ctx: &FileContext) -> VfsResult<Vec<u8>> {
        self.inner.get_file_security(path, ctx).await
    }

    async fn set_file_security(
        &self,
        path: &str,
        descriptor: &[u8],
        ctx: &FileContext,
    ) -> VfsResult<()> {
        self.inner.set_file_security(path, descriptor, ctx).await
    }

    async fn mounted(&self, ctx: &FileContext) -> VfsResult<()> {
        self.flush();
        self.inner.mounted(ctx).await
    }

    async fn unmounted(&self, ctx: &FileContext) -> VfsResult<()> {
        self.flush();
        self.inner.unmounted(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::error::VfsError;
    use crate::types::WorkerId;
    use std::sync::Arc;

    fn ctx() -> FileContext {
        FileContext::new(WorkerId(1))
    }

    fn layer() -> CacheLayer<MemoryBackend> {
        let backend = MemoryBackend::new();
        backend.insert_file("/a/b", b"hello").unwrap();
        backend.insert_file("/a/c", b"").unwrap();
        CacheLayer::new(backend)
    }

    #[tokio::test]
    async fn test_metadata_served_from_cache() {
        let fs = layer();
        let first = fs.get_file_information("/a/b", &ctx()).await.unwrap();
        let second = fs.get_file_information("/a/b", &ctx()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fs.inner().calls("get_file_information"), 1);
    }

    #[tokio::test]
    async fn test_set_length_clears_only_metadata() {
        let fs = layer();
        fs.get_file_information("/a/b", &ctx()).await.unwrap();
        fs.find_files("/a/b", &ctx()).await.ok();
        fs.set_end_of_file("/a/b", 2, &ctx()).await.unwrap();

        let info = fs.get_file_information("/a/b", &ctx()).await.unwrap();
        assert_eq!(info.length, 2);
        assert_eq!(fs.inner().calls("get_file_information"), 2);

        fs.find_files("/a/b", &ctx()).await.ok();
        assert_eq!(fs.inner().calls("find_files"), 1);
    }

    async fn mutate(fs: &CacheLayer<MemoryBackend>, op: &str) {
        let ctx = ctx();
        let result = match op {
            "set_file_time" => {
                let times = FileTimes::new().with_write(crate::types::from_unix_secs(7));
                fs.set_file_time("/a/b", times, &ctx).await
            }
            "set_allocation_size" => fs.set_allocation_size("/a/b", 64, &ctx).await,
            "set_file_attributes" => {
                fs.set_file_attributes("/a/b", FileAttributes::NORMAL, &ctx)
                    .await
            }
            _ => fs.set_end_of_file("/a/b", 2, &ctx).await,
        };
        result.unwrap();
    }

    #[tokio::test]
    async fn test_setters_clear_only_metadata() {
        for op in ["set_file_time", "set_allocation_size", "set_file_attributes"] {
            let fs = layer();
            fs.get_file_information("/a/b", &ctx()).await.unwrap();
            fs.create_file("/a/b", CreateDisposition::Open, &ctx())
                .await
                .unwrap();
            fs.find_files("/a", &ctx()).await.unwrap();

            mutate(&fs, op).await;

            fs.get_file_information("/a/b", &ctx()).await.unwrap();
            fs.create_file("/a/b", CreateDisposition::Open, &ctx())
                .await
                .unwrap();
            fs.find_files("/a", &ctx()).await.unwrap();
            assert_eq!(fs.inner().calls("get_file_information"), 2, "{op}");
            assert_eq!(fs.inner().calls("create_file"), 1, "{op}");
            assert_eq!(fs.inner().calls("find_files"), 1, "{op}");
        }
    }

    #[tokio::test]
    async fn test_setters_refresh_reported_values() {
        let fs = layer();
        fs.get_file_information("/a/b", &ctx()).await.unwrap();

        mutate(&fs, "set_file_time").await;
        let info = fs.get_file_information("/a/b", &ctx()).await.unwrap();
        assert_eq!(info.last_write_time, crate::types::from_unix_secs(7));

        mutate(&fs, "set_allocation_size").await;
        let info = fs.get_file_information("/a/b", &ctx()).await.unwrap();
        assert_eq!(info.length, 64);
    }

    #[tokio::test]
    async fn test_directory_and_file_opens_cached_apart() {
        let fs = layer();
        let dir = FileContext::directory(WorkerId(1));
        for _ in 0..2 {
            let err = fs.create_file("/a/b", CreateDisposition::Open, &dir).await;
            assert!(matches!(err, Err(VfsError::NotADirectory(_))));
            let out = fs
                .create_file("/a/b", CreateDisposition::Open, &ctx())
                .await
                .unwrap();
            assert!(!out.is_directory);
        }
        assert_eq!(fs.inner().calls("create_file"), 2);
    }

    #[tokio::test]
    async fn test_open_or_create_not_served_a_failed_open() {
        let fs = layer();
        let err = fs.create_file("/a/late", CreateDisposition::Open, &ctx()).await;
        assert!(matches!(err, Err(VfsError::NotFound(_))));

        fs.create_file("/a/late", CreateDisposition::OpenOrCreate, &ctx())
            .await
            .unwrap();
        assert_eq!(fs.inner().calls("create_file"), 2);
        assert!(fs.get_file_information("/a/late", &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_invalidates_node_and_parent_listing() {
        let fs = layer();
        assert_eq!(fs.find_files("/a", &ctx()).await.unwrap().len(), 2);
        fs.get_file_information("/a/b", &ctx()).await.unwrap();

        fs.delete_file("/a/b", &ctx()).await.unwrap();

        let listing = fs.find_files("/a", &ctx()).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(fs.inner().calls("find_files"), 2);

        let err = fs.get_file_information("/a/b", &ctx()).await;
        assert!(matches!(err, Err(VfsError::NotFound(_))));
        assert_eq!(fs.inner().calls("get_file_information"), 2);
    }

    #[tokio::test]
    async fn test_failed_open_is_cached() {
        let fs = layer();
        for _ in 0..3 {
            let err = fs.create_file("/nope", CreateDisposition::Open, &ctx()).await;
            assert!(matches!(err, Err(VfsError::NotFound(_))));
        }
        assert_eq!(fs.inner().calls("create_file"), 1);
    }

    #[tokio::test]
    async fn test_create_new_clears_cached_not_found() {
        let fs = layer();
        let err = fs.create_file("/a/new", CreateDisposition::Open, &ctx()).await;
        assert!(err.is_err());

        fs.create_file("/a/new", CreateDisposition::CreateNew, &ctx())
            .await
            .unwrap();
        fs.create_file("/a/new", CreateDisposition::Open, &ctx())
            .await
            .unwrap();
        assert_eq!(fs.inner().calls("create_file"), 3);
    }

    #[tokio::test]
    async fn test_copy_out_isolation() {
        let fs = layer();
        let mut info = fs.get_file_information("/a/b", &ctx()).await.unwrap();
        info.length = 999;
        info.file_name.push_str("-mutated");
        let again = fs.get_file_information("/a/b", &ctx()).await.unwrap();
        assert_eq!(again.length, 5);
        assert_eq!(again.file_name, "b");

        let mut listing = fs.find_files("/a", &ctx()).await.unwrap();
        listing.clear();
        assert_eq!(fs.find_files("/a", &ctx()).await.unwrap().len(), 2);
        assert_eq!(fs.inner().calls("find_files"), 1);
    }

    #[tokio::test]
    async fn test_cache_property_flushes_without_backend_call() {
        let fs = layer();
        fs.get_file_information("/a/b", &ctx()).await.unwrap();

        let out = fs
            .create_file("/a/b:SSHFSProperty.Cache", CreateDisposition::Open, &ctx())
            .await;
        assert!(out.is_ok());
        assert_eq!(fs.inner().calls("create_file"), 0);

        fs.get_file_information("/a/b", &ctx()).await.unwrap();
        assert_eq!(fs.inner().calls("get_file_information"), 2);
    }

    #[tokio::test]
    async fn test_cache_property_on_missing_path_succeeds() {
        let fs = layer();
        let out = fs
            .create_file("/ghost:SSHFSProperty.Cache", CreateDisposition::CreateNew, &ctx())
            .await;
        assert!(out.is_ok());
        assert_eq!(fs.inner().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_directory_create_clears_parent_entirely() {
        let fs = layer();
        fs.get_file_information("/a", &ctx()).await.unwrap();
        fs.find_files("/a", &ctx()).await.unwrap();

        let dir = FileContext::directory(WorkerId(1));
        fs.create_file("/a/sub", CreateDisposition::CreateNew, &dir)
            .await
            .unwrap();

        fs.get_file_information("/a", &ctx()).await.unwrap();
        assert_eq!(fs.inner().calls("get_file_information"), 2);
        assert_eq!(fs.find_files("/a", &ctx()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_file_create_clears_only_parent_listing() {
        let fs = layer();
        fs.get_file_information("/a", &ctx()).await.unwrap();
        fs.find_files("/a", &ctx()).await.unwrap();

        fs.create_file("/a/d", CreateDisposition::CreateNew, &ctx())
            .await
            .unwrap();

        fs.get_file_information("/a", &ctx()).await.unwrap();
        assert_eq!(fs.inner().calls("get_file_information"), 1);
        assert_eq!(fs.find_files("/a", &ctx()).await.unwrap().len(), 3);
        assert_eq!(fs.inner().calls("find_files"), 2);
    }

    #[tokio::test]
    async fn test_open_or_create_clears_parent_listing_for_new_node() {
        let fs = layer();
        fs.find_files("/a", &ctx()).await.unwrap();
        fs.create_file("/a/fresh", CreateDisposition::OpenOrCreate, &ctx())
            .await
            .unwrap();
        assert_eq!(fs.find_files("/a", &ctx()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_open_or_create_keeps_listing_for_known_node() {
        let fs = layer();
        fs.find_files("/a", &ctx()).await.unwrap();
        fs.get_file_information("/a/b", &ctx()).await.unwrap();
        fs.create_file("/a/b", CreateDisposition::OpenOrCreate, &ctx())
            .await
            .unwrap();
        fs.find_files("/a", &ctx()).await.unwrap();
        assert_eq!(fs.inner().calls("find_files"), 1);
    }

    #[tokio::test]
    async fn test_rename_invalidates_both_sides() {
        let fs = layer();
        fs.inner().insert_dir("/z").unwrap();
        fs.find_files("/a", &ctx()).await.unwrap();
        fs.find_files("/z", &ctx()).await.unwrap();
        let err = fs.get_file_information("/z/b", &ctx()).await;
        assert!(err.is_err());

        fs.move_file("/a/b", "/z/b", false, &ctx()).await.unwrap();

        assert_eq!(fs.find_files("/a", &ctx()).await.unwrap().len(), 1);
        assert_eq!(fs.find_files("/z", &ctx()).await.unwrap().len(), 1);
        assert_eq!(fs.inner().calls("find_files"), 4);
        assert!(fs.get_file_information("/z/b", &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_clears_metadata() {
        let fs = layer();
        assert_eq!(fs.get_file_information("/a/c", &ctx()).await.unwrap().length, 0);
        fs.write_file("/a/c", 0, b"xyz", &ctx()).await.unwrap();
        assert_eq!(fs.get_file_information("/a/c", &ctx()).await.unwrap().length, 3);
    }

    #[tokio::test]
    async fn test_streams_slot_is_independent() {
        let fs = layer();
        fs.find_files("/a", &ctx()).await.unwrap();
        for _ in 0..2 {
            let err = fs.find_streams("/a", &ctx()).await;
            assert!(matches!(err, Err(VfsError::NotImplemented(_))));
        }
        assert_eq!(fs.inner().calls("find_streams"), 1);
        fs.find_files("/a", &ctx()).await.unwrap();
        assert_eq!(fs.inner().calls("find_files"), 1);
    }

    #[tokio::test]
    async fn test_uncached_operations_pass_through() {
        let fs = layer();
        fs.read_file("/a/b", 0, 5, &ctx()).await.unwrap();
        fs.read_file("/a/b", 0, 5, &ctx()).await.unwrap();
        fs.lock_file("/a/b", 0, 5, &ctx()).await.unwrap();
        fs.get_disk_free_space(&ctx()).await.unwrap();
        fs.get_disk_free_space(&ctx()).await.unwrap();
        assert_eq!(fs.inner().calls("read_file"), 2);
        assert_eq!(fs.inner().calls("lock_file"), 1);
        assert_eq!(fs.inner().calls("get_disk_free_space"), 2);
    }

    #[tokio::test]
    async fn test_unmount_drops_everything() {
        let fs = layer();
        fs.get_file_information("/a/b", &ctx()).await.unwrap();
        fs.find_files("/a", &ctx()).await.unwrap();
        fs.unmounted(&ctx()).await.unwrap();
        assert_eq!(fs.cached_nodes(), 1);

        fs.get_file_information("/a/b", &ctx()).await.unwrap();
        assert_eq!(fs.inner().calls("get_file_information"), 2);
        assert_eq!(fs.inner().calls("unmounted"), 1);
    }

    #[tokio::test]
    async fn test_lookup_of_missing_path_materializes_nodes() {
        let fs = layer();
        let err = fs.get_file_information("/x/y/z", &ctx()).await;
        assert!(err.is_err());
        assert_eq!(fs.cached_nodes(), 4);

        let mut tree = fs.tree.lock();
        let z = tree.lookup("/x/y/z");
        let y = tree.parent(z).unwrap();
        assert!(tree.node(y).unwrap().is_unset());
        assert!(matches!(tree.node(z).unwrap().metadata, Some(Err(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_metadata_reads_agree() {
        let fs = Arc::new(layer());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let fs = fs.clone();
            tasks.push(tokio::spawn(async move {
                let ctx = FileContext::new(WorkerId(i));
                fs.get_file_information("/a/b", &ctx).await.unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().length, 5);
        }
        assert!(fs.inner().calls("get_file_information") >= 1);
    }
}
