//! FUSE front end driving the filesystem operation contract.
//!
//! Callbacks resolve inodes to paths on the FUSE session thread, then run
//! the operation on the tokio runtime while holding a worker token and
//! reply from there.

use std::ffi::OsStr;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use libc::c_int;
use sftpfs_vfs::path::{self, Property};
use sftpfs_vfs::{
    CreateDisposition, FileContext, FileInformation, FileTimes, FsOps, VfsError, VfsResult,
    WorkerId,
};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::constants::{ATTR_TTL, BLOCK_SIZE, NAME_MAX, RENAME_NOREPLACE};
use crate::inode::{InodeTable, ROOT_INODE};
use crate::workers::WorkerPool;

/// Local owner reported for every remote object.
#[derive(Debug, Clone, Copy)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    pub fn current() -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Self { uid, gid }
    }
}

fn file_kind(info: &FileInformation) -> FileType {
    if info.is_dir() {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}

fn file_attr(ino: u64, info: &FileInformation, owner: Owner) -> FileAttr {
    let dir = info.is_dir();
    let default_perm = if dir { 0o755 } else { 0o644 };
    FileAttr {
        ino,
        size: info.length,
        blocks: info.length.div_ceil(512),
        atime: info.last_access_time,
        mtime: info.last_write_time,
        ctime: info.last_write_time,
        crtime: info.creation_time,
        kind: file_kind(info),
        perm: info.permissions.unwrap_or(default_perm) as u16,
        nlink: if dir { 2 } else { 1 },
        uid: owner.uid,
        gid: owner.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn errno(op: &str, path: &str, e: &VfsError) -> c_int {
    match e {
        VfsError::NotFound(_) => debug!(op, path, "not found"),
        VfsError::Transport(_) | VfsError::Remote { .. } | VfsError::Other(_) => {
            warn!(op, path, error = %e, "operation failed")
        }
        _ => debug!(op, path, error = %e, "operation refused"),
    }
    e.to_errno()
}

fn resolve_time(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// Size, times, then mode; returns the resulting metadata.
async fn apply_setattr(
    ops: &dyn FsOps,
    path: &str,
    mode: Option<u32>,
    size: Option<u64>,
    times: FileTimes,
    ctx: &FileContext,
) -> VfsResult<FileInformation> {
    if let Some(size) = size {
        ops.set_end_of_file(path, size, ctx).await?;
    }
    if times.last_access.is_some() || times.last_write.is_some() {
        ops.set_file_time(path, times, ctx).await?;
    }
    if let Some(mode) = mode {
        let property = path::property_path(path, &Property::Permission);
        let text = format!("{:o}\n", mode & 0o7777);
        ops.write_file(&property, 0, text.as_bytes(), ctx).await?;
    }
    ops.get_file_information(path, ctx).await
}

pub struct SftpFuse {
    ops: Arc<dyn FsOps>,
    runtime: Handle,
    inodes: Arc<InodeTable>,
    workers: Arc<WorkerPool>,
    owner: Owner,
}

impl SftpFuse {
    pub fn new(ops: Arc<dyn FsOps>, runtime: Handle, workers: Arc<WorkerPool>) -> Self {
        Self {
            ops,
            runtime,
            inodes: Arc::new(InodeTable::new()),
            workers,
            owner: Owner::current(),
        }
    }

    fn path(&self, ino: u64) -> Result<String, c_int> {
        self.inodes.path(ino).ok_or(libc::ENOENT)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(path::join(&self.path(parent)?, name))
    }

    /// Run `op` on the runtime with a worker token held for its duration.
    fn spawn<F, Fut>(&self, op: F)
    where
        F: FnOnce(Arc<dyn FsOps>, Arc<InodeTable>, WorkerId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ops = self.ops.clone();
        let inodes = self.inodes.clone();
        let workers = self.workers.clone();
        self.runtime.spawn(async move {
            let token = workers.acquire().await;
            op(ops, inodes, token.id()).await;
        });
    }

    /// Block the session thread on a lifecycle hook.
    fn lifecycle(&self, mounting: bool) -> VfsResult<()> {
        let ops = self.ops.clone();
        let workers = self.workers.clone();
        self.runtime.block_on(async move {
            let token = workers.acquire().await;
            let ctx = FileContext::new(token.id());
            if mounting {
                ops.mounted(&ctx).await
            } else {
                ops.unmounted(&ctx).await
            }
        })
    }

    fn release_path(&self, ino: u64, directory: bool, reply: ReplyEmpty) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        self.spawn(move |ops, _, worker| async move {
            let ctx = FileContext {
                worker,
                is_directory: directory,
            };
            let result = match ops.cleanup(&path, &ctx).await {
                Ok(()) => ops.close_file(&path, &ctx).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno("release", &path, &e)),
            }
        });
    }

    fn flush_path(&self, ino: u64, reply: ReplyEmpty) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        self.spawn(move |ops, _, worker| async move {
            match ops.flush_file_buffers(&path, &FileContext::new(worker)).await {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno("flush", &path, &e)),
            }
        });
    }
}

impl Filesystem for SftpFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        match self.lifecycle(true) {
            Ok(()) => {
                info!(workers = self.workers.size(), "filesystem mounted");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "mount hook failed");
                Err(e.to_errno())
            }
        }
    }

    fn destroy(&mut self) {
        if let Err(e) = self.lifecycle(false) {
            warn!(error = %e, "unmount hook failed");
        }
        info!("filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        let owner = self.owner;
        self.spawn(move |ops, inodes, worker| async move {
            match ops
                .get_file_information(&path, &FileContext::new(worker))
                .await
            {
                Ok(info) => {
                    let ino = inodes.get_or_insert(&path);
                    reply.entry(&ATTR_TTL, &file_attr(ino, &info, owner), 0);
                }
                Err(e) => reply.error(errno("lookup", &path, &e)),
            }
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        let owner = self.owner;
        self.spawn(move |ops, _, worker| async move {
            match ops
                .get_file_information(&path, &FileContext::new(worker))
                .await
            {
                Ok(info) => reply.attr(&ATTR_TTL, &file_attr(ino, &info, owner)),
                Err(e) => reply.error(errno("getattr", &path, &e)),
            }
        });
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        let times = FileTimes {
            creation: None,
            last_access: atime.map(resolve_time),
            last_write: mtime.map(resolve_time),
        };
        let owner = self.owner;
        self.spawn(move |ops, _, worker| async move {
            let ctx = FileContext::new(worker);
            match apply_setattr(ops.as_ref(), &path, mode, size, times, &ctx).await {
                Ok(info) => reply.attr(&ATTR_TTL, &file_attr(ino, &info, owner)),
                Err(e) => reply.error(errno("setattr", &path, &e)),
            }
        });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        // Property files report size zero; bypass the page cache for them.
        let open_flags = if path::split_property(&path).is_some() {
            fuser::consts::FOPEN_DIRECT_IO
        } else {
            0
        };
        self.spawn(move |ops, _, worker| async move {
            match ops
                .create_file(&path, CreateDisposition::Open, &FileContext::new(worker))
                .await
            {
                Ok(_) => reply.opened(0, open_flags),
                Err(e) => reply.error(errno("open", &path, &e)),
            }
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        self.spawn(move |ops, _, worker| async move {
            match ops
                .read_file(&path, offset, size, &FileContext::new(worker))
                .await
            {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(errno("read", &path, &e)),
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        let data = data.to_vec();
        self.spawn(move |ops, _, worker| async move {
            match ops
                .write_file(&path, offset, &data, &FileContext::new(worker))
                .await
            {
                Ok(written) => reply.written(written),
                Err(e) => reply.error(errno("write", &path, &e)),
            }
        });
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        self.flush_path(ino, reply);
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        self.flush_path(ino, reply);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.release_path(ino, false, reply);
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        self.spawn(move |ops, _, worker| async move {
            match ops
                .create_file(&path, CreateDisposition::Open, &FileContext::directory(worker))
                .await
            {
                Ok(_) => reply.opened(0, 0),
                Err(e) => reply.error(errno("opendir", &path, &e)),
            }
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        let Ok(skip) = usize::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        let parent_ino = self
            .inodes
            .inode(path::parent(&path))
            .unwrap_or(ROOT_INODE);

        self.spawn(move |ops, inodes, worker| async move {
            let mut reply = reply;
            let listing = match ops.find_files(&path, &FileContext::directory(worker)).await {
                Ok(listing) => listing,
                Err(e) => return reply.error(errno("readdir", &path, &e)),
            };

            let mut entries = vec![
                (ino, FileType::Directory, ".".to_string()),
                (parent_ino, FileType::Directory, "..".to_string()),
            ];
            for info in listing {
                let child = inodes.get_or_insert_no_lookup(&path::join(&path, &info.file_name));
                entries.push((child, file_kind(&info), info.file_name));
            }

            for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(skip) {
                // The offset handed back is the index of the next entry.
                if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.release_path(ino, true, reply);
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        self.spawn(move |ops, _, worker| async move {
            match ops.get_disk_free_space(&FileContext::new(worker)).await {
                Ok(space) => {
                    let block = u64::from(BLOCK_SIZE);
                    reply.statfs(
                        space.total_bytes / block,
                        space.total_free_bytes / block,
                        space.free_bytes_available / block,
                        0,
                        0,
                        BLOCK_SIZE,
                        NAME_MAX,
                        BLOCK_SIZE,
                    );
                }
                Err(e) => reply.error(errno("statfs", "/", &e)),
            }
        });
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        let disposition = if flags & libc::O_EXCL != 0 {
            CreateDisposition::CreateNew
        } else if flags & libc::O_TRUNC != 0 {
            CreateDisposition::Create
        } else {
            CreateDisposition::OpenOrCreate
        };
        let owner = self.owner;
        self.spawn(move |ops, inodes, worker| async move {
            let ctx = FileContext::new(worker);
            let result = match ops.create_file(&path, disposition, &ctx).await {
                Ok(_) => ops.get_file_information(&path, &ctx).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(info) => {
                    let ino = inodes.get_or_insert(&path);
                    reply.created(&ATTR_TTL, &file_attr(ino, &info, owner), 0, 0, 0);
                }
                Err(e) => reply.error(errno("create", &path, &e)),
            }
        });
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        let owner = self.owner;
        self.spawn(move |ops, inodes, worker| async move {
            let ctx = FileContext::directory(worker);
            let result = match ops
                .create_file(&path, CreateDisposition::CreateNew, &ctx)
                .await
            {
                Ok(_) => ops.get_file_information(&path, &ctx).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(info) => {
                    let ino = inodes.get_or_insert(&path);
                    reply.entry(&ATTR_TTL, &file_attr(ino, &info, owner), 0);
                }
                Err(e) => reply.error(errno("mkdir", &path, &e)),
            }
        });
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        self.spawn(move |ops, inodes, worker| async move {
            match ops.delete_file(&path, &FileContext::new(worker)).await {
                Ok(()) => {
                    inodes.remove_path(&path);
                    reply.ok();
                }
                Err(e) => reply.error(errno("unlink", &path, &e)),
            }
        });
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        self.spawn(move |ops, inodes, worker| async move {
            match ops
                .delete_directory(&path, &FileContext::directory(worker))
                .await
            {
                Ok(()) => {
                    inodes.remove_path(&path);
                    reply.ok();
                }
                Err(e) => reply.error(errno("rmdir", &path, &e)),
            }
        });
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let (from, to) = match (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(e), _) | (_, Err(e)) => return reply.error(e),
        };
        let replace = flags & RENAME_NOREPLACE == 0;
        self.spawn(move |ops, inodes, worker| async move {
            match ops
                .move_file(&from, &to, replace, &FileContext::new(worker))
                .await
            {
                Ok(()) => {
                    inodes.rename(&from, &to);
                    reply.ok();
                }
                Err(e) => reply.error(errno("rename", &from, &e)),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sftpfs_vfs::{FileAttributes, MemoryBackend, from_unix_secs};

    fn owner() -> Owner {
        Owner { uid: 1000, gid: 100 }
    }

    #[test]
    fn test_file_attr_for_file() {
        let mut info = FileInformation::file("a", 5000);
        info.permissions = Some(0o600);
        info.last_write_time = from_unix_secs(42);
        let attr = file_attr(7, &info, owner());

        assert_eq!(attr.ino, 7);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o600);
        assert_eq!(attr.blocks, 10);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.mtime, from_unix_secs(42));
        assert_eq!(attr.uid, 1000);
    }

    #[test]
    fn test_file_attr_for_directory() {
        let mut info = FileInformation::directory("d");
        info.permissions = None;
        info.attributes |= FileAttributes::HIDDEN;
        let attr = file_attr(2, &info, owner());
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.nlink, 2);
    }

    #[test]
    fn test_resolve_time() {
        let t = from_unix_secs(100);
        assert_eq!(resolve_time(TimeOrNow::SpecificTime(t)), t);
        assert!(resolve_time(TimeOrNow::Now) > t);
    }

    #[tokio::test]
    async fn test_setattr_applies_size_times_and_mode() {
        let backend = MemoryBackend::new();
        backend.insert_file("/f", b"0123456789").unwrap();
        let ctx = FileContext::new(WorkerId(0));
        let times = FileTimes::new().with_write(from_unix_secs(500));

        let info = apply_setattr(&backend, "/f", None, Some(4), times, &ctx)
            .await
            .unwrap();
        assert_eq!(info.length, 4);
        assert_eq!(info.last_write_time, from_unix_secs(500));
    }

    #[tokio::test]
    async fn test_setattr_missing_path() {
        let backend = MemoryBackend::new();
        let ctx = FileContext::new(WorkerId(0));
        let err = apply_setattr(&backend, "/nope", None, Some(1), FileTimes::new(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }
}
