//! In-memory filesystem backend.
//!
//! Used for testing the cache rules without a network. All data is ephemeral.
//! Every contract call is counted so tests can tell a cache hit from a
//! backend round-trip.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use crate::error::{VfsError, VfsResult};
use crate::ops::FsOps;
use crate::path;
use crate::types::{
    CreateDisposition, DiskSpace, FileAttributes, FileContext, FileInformation, FileTimes,
    OpenOutcome, VolumeInformation,
};

/// Capacity reported by [`MemoryBackend::get_disk_free_space`].
const MEMORY_CAPACITY: u64 = 1 << 30;

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, info: FileInformation },
    Directory { info: FileInformation },
}

impl Entry {
    fn info(&self) -> &FileInformation {
        match self {
            Entry::File { info, .. } => info,
            Entry::Directory { info } => info,
        }
    }

    fn info_mut(&mut self) -> &mut FileInformation {
        match self {
            Entry::File { info, .. } => info,
            Entry::Directory { info } => info,
        }
    }

    fn empty_file(name: &str) -> Self {
        Entry::File {
            data: Vec::new(),
            info: FileInformation::file(name, 0),
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(
            "/".to_string(),
            Entry::Directory {
                info: FileInformation::directory(""),
            },
        );
        Self {
            entries: RwLock::new(entries),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// How many times the contract operation `op` was invoked.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    /// Total number of contract invocations.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    /// Seed a file with contents, creating missing parent directories.
    pub fn insert_file(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;
        Self::ensure_parents(&mut entries, &normalized);
        let info = FileInformation::file(path::file_name(&normalized), data.len() as u64);
        entries.insert(
            normalized,
            Entry::File {
                data: data.to_vec(),
                info,
            },
        );
        Ok(())
    }

    /// Seed a directory, creating missing parents.
    pub fn insert_dir(&self, path: &str) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;
        Self::ensure_parents(&mut entries, &normalized);
        entries.entry(normalized.clone()).or_insert(Entry::Directory {
            info: FileInformation::directory(path::file_name(&normalized)),
        });
        Ok(())
    }

    fn record(&self, op: &'static str) {
        *self.calls.lock().entry(op).or_insert(0) += 1;
    }

    /// Normalize a path: collapse separators, resolve `.` and `..`.
    fn normalize(path: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for segment in path::segments(path) {
            match segment {
                "." => {}
                ".." => {
                    parts.pop();
                }
                s => parts.push(s),
            }
        }
        format!("/{}", parts.join("/"))
    }

    fn read_entries(&self) -> VfsResult<RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))
    }

    fn write_entries(&self) -> VfsResult<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))
    }

    fn ensure_parents(entries: &mut HashMap<String, Entry>, normalized: &str) {
        let mut current = String::new();
        let parent = path::parent(normalized);
        for segment in path::segments(parent) {
            current.push('/');
            current.push_str(segment);
            entries.entry(current.clone()).or_insert(Entry::Directory {
                info: FileInformation::directory(segment),
            });
        }
    }

    /// Fail unless the parent of `normalized` is an existing directory.
    fn check_parent(entries: &HashMap<String, Entry>, normalized: &str) -> VfsResult<()> {
        let parent = path::parent(normalized);
        match entries.get(parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(_) => Err(VfsError::not_a_directory(parent)),
            None => Err(VfsError::not_found(parent)),
        }
    }

    fn is_child_of(candidate: &str, dir: &str) -> bool {
        candidate != dir && path::parent(candidate) == dir
    }

    fn is_descendant_of(candidate: &str, dir: &str) -> bool {
        candidate
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[async_trait]
impl FsOps for MemoryBackend {
    async fn create_file(
        &self,
        path: &str,
        disposition: CreateDisposition,
        ctx: &FileContext,
    ) -> VfsResult<OpenOutcome> {
        self.record("create_file");
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;
        let existing = entries.get(&normalized).map(|e| e.info().is_dir());

        if ctx.is_directory {
            return match (disposition, existing) {
                (CreateDisposition::Open, Some(true)) => Ok(OpenOutcome::directory()),
                (CreateDisposition::Open, Some(false)) => {
                    Err(VfsError::not_a_directory(normalized))
                }
                (CreateDisposition::Open, None) => Err(VfsError::not_found(normalized)),
                (CreateDisposition::CreateNew, Some(_)) => {
                    Err(VfsError::already_exists(normalized))
                }
                (CreateDisposition::CreateNew, None) => {
                    Self::check_parent(&entries, &normalized)?;
                    let name = path::file_name(&normalized).to_string();
                    entries.insert(
                        normalized,
                        Entry::Directory {
                            info: FileInformation::directory(name),
                        },
                    );
                    Ok(OpenOutcome::directory())
                }
                (other, _) => Err(VfsError::invalid_argument(format!(
                    "{other:?} is not valid for directory {normalized}"
                ))),
            };
        }

        if let Some(true) = existing {
            return match disposition {
                CreateDisposition::Open
                | CreateDisposition::OpenOrCreate
                | CreateDisposition::Append => Ok(OpenOutcome::directory()),
                CreateDisposition::CreateNew => Err(VfsError::already_exists(normalized)),
                CreateDisposition::Create | CreateDisposition::Truncate => {
                    Err(VfsError::is_a_directory(normalized))
                }
            };
        }

        let exists = existing.is_some();
        match disposition {
            CreateDisposition::Open if !exists => Err(VfsError::not_found(normalized)),
            CreateDisposition::Truncate if !exists => Err(VfsError::not_found(normalized)),
            CreateDisposition::CreateNew if exists => Err(VfsError::already_exists(normalized)),
            CreateDisposition::Open
            | CreateDisposition::OpenOrCreate
            | CreateDisposition::Append
                if exists =>
            {
                Ok(OpenOutcome::file())
            }
            _ => {
                Self::check_parent(&entries, &normalized)?;
                let name = path::file_name(&normalized).to_string();
                entries.insert(normalized, Entry::empty_file(&name));
                Ok(OpenOutcome::file())
            }
        }
    }

    async fn cleanup(&self, _path: &str, _ctx: &FileContext) -> VfsResult<()> {
        self.record("cleanup");
        Ok(())
    }

    async fn close_file(&self, _path: &str, _ctx: &FileContext) -> VfsResult<()> {
        self.record("close_file");
        Ok(())
    }

    async fn read_file(
        &self,
        path: &str,
        offset: u64,
        size: u32,
        _ctx: &FileContext,
    ) -> VfsResult<Vec<u8>> {
        self.record("read_file");
        let normalized = Self::normalize(path);
        let entries = self.read_entries()?;

        match entries.get(&normalized) {
            Some(Entry::File { data, .. }) => {
                let start = (offset as usize).min(data.len());
                let end = (start + size as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            None => Err(VfsError::not_found(normalized)),
        }
    }

    async fn write_file(
        &self,
        path: &str,
        offset: u64,
        data: &[u8],
        _ctx: &FileContext,
    ) -> VfsResult<u32> {
        self.record("write_file");
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;

        match entries.get_mut(&normalized) {
            Some(Entry::File {
                data: file_data,
                info,
            }) => {
                let offset = offset as usize;
                // Extend if necessary
                if offset + data.len() > file_data.len() {
                    file_data.resize(offset + data.len(), 0);
                }
                file_data[offset..offset + data.len()].copy_from_slice(data);
                info.length = file_data.len() as u64;
                info.last_write_time = SystemTime::now();
                Ok(data.len() as u32)
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            None => Err(VfsError::not_found(normalized)),
        }
    }

    async fn flush_file_buffers(&self, _path: &str, _ctx: &FileContext) -> VfsResult<()> {
        self.record("flush_file_buffers");
        Ok(())
    }

    async fn get_file_information(
        &self,
        path: &str,
        _ctx: &FileContext,
    ) -> VfsResult<FileInformation> {
        self.record("get_file_information");
        let normalized = Self::normalize(path);
        let entries = self.read_entries()?;

        entries
            .get(&normalized)
            .map(|e| e.info().clone())
            .ok_or_else(|| VfsError::not_found(normalized))
    }

    async fn find_files(&self, path: &str, _ctx: &FileContext) -> VfsResult<Vec<FileInformation>> {
        self.record("find_files");
        let normalized = Self::normalize(path);
        let entries = self.read_entries()?;

        // Verify the path is a directory
        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized)),
            None => return Err(VfsError::not_found(normalized)),
        }

        let mut result: Vec<FileInformation> = entries
            .iter()
            .filter(|(entry_path, _)| Self::is_child_of(entry_path, &normalized))
            .map(|(_, entry)| entry.info().clone())
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(result)
    }

    async fn find_files_with_pattern(
        &self,
        _path: &str,
        _pattern: &str,
        _ctx: &FileContext,
    ) -> VfsResult<Vec<FileInformation>> {
        self.record("find_files_with_pattern");
        Err(VfsError::NotImplemented("pattern listing"))
    }

    async fn find_streams(
        &self,
        _path: &str,
        _ctx: &FileContext,
    ) -> VfsResult<Vec<FileInformation>> {
        self.record("find_streams");
        Err(VfsError::NotImplemented("alternate streams"))
    }

    async fn set_file_attributes(
        &self,
        path: &str,
        attributes: FileAttributes,
        _ctx: &FileContext,
    ) -> VfsResult<()> {
        self.record("set_file_attributes");
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;
        let entry = entries
            .get_mut(&normalized)
            .ok_or_else(|| VfsError::not_found(normalized.as_str()))?;

        let info = entry.info_mut();
        let kind = info.attributes & FileAttributes::DIRECTORY;
        info.attributes = (attributes - FileAttributes::DIRECTORY) | kind;
        Ok(())
    }

    async fn set_file_time(
        &self,
        path: &str,
        times: FileTimes,
        _ctx: &FileContext,
    ) -> VfsResult<()> {
        self.record("set_file_time");
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;
        let info = entries
            .get_mut(&normalized)
            .ok_or_else(|| VfsError::not_found(normalized.as_str()))?
            .info_mut();

        if let Some(t) = times.creation {
            info.creation_time = t;
        }
        if let Some(t) = times.last_access {
            info.last_access_time = t;
        }
        if let Some(t) = times.last_write {
            info.last_write_time = t;
        }
        Ok(())
    }

    async fn set_end_of_file(&self, path: &str, length: u64, _ctx: &FileContext) -> VfsResult<()> {
        self.record("set_end_of_file");
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;

        match entries.get_mut(&normalized) {
            Some(Entry::File { data, info }) => {
                data.resize(length as usize, 0);
                info.length = length;
                info.last_write_time = SystemTime::now();
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            None => Err(VfsError::not_found(normalized)),
        }
    }

    async fn set_allocation_size(
        &self,
        path: &str,
        length: u64,
        _ctx: &FileContext,
    ) -> VfsResult<()> {
        self.record("set_allocation_size");
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;

        match entries.get_mut(&normalized) {
            Some(Entry::File { data, info }) => {
                if (data.len() as u64) < length {
                    data.resize(length as usize, 0);
                    info.length = length;
                }
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            None => Err(VfsError::not_found(normalized)),
        }
    }

    async fn delete_file(&self, path: &str, _ctx: &FileContext) -> VfsResult<()> {
        self.record("delete_file");
        let normalized = Self::normalize(path);
        let mut entries = self.write_entries()?;

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            Some(_) => {
                entries.remove(&normalized);
                Ok(())
            }
            None => Err(VfsError::not_found(normalized)),
        }
    }

    async fn delete_directory(&self, path: &str, _ctx: &FileContext) -> VfsResult<()> {
        self.record("delete_directory");
        let normalized = Self::normalize(path);

        if normalized == "/" {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut entries = self.write_entries()?;

        // Check if it's a directory
        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized)),
            None => return Err(VfsError::not_found(normalized)),
        }

        if entries.keys().any(|k| Self::is_child_of(k, &normalized)) {
            return Err(VfsError::directory_not_empty(normalized));
        }

        entries.remove(&normalized);
        Ok(())
    }

    async fn move_file(
        &self,
        from: &str,
        to: &str,
        replace_existing: bool,
        _ctx: &FileContext,
    ) -> VfsResult<()> {
        self.record("move_file");
        let from_normalized = Self::normalize(from);
        let to_normalized = Self::normalize(to);
        let mut entries = self.write_entries()?;

        if !entries.contains_key(&from_normalized) {
            return Err(VfsError::not_found(from_normalized));
        }
        Self::check_parent(&entries, &to_normalized)?;
        if entries.contains_key(&to_normalized) && !replace_existing {
            return Err(VfsError::already_exists(to_normalized));
        }

        // Move the entry and, for directories, everything under it
        let moved: Vec<String> = entries
            .keys()
            .filter(|k| **k == from_normalized || Self::is_descendant_of(k, &from_normalized))
            .cloned()
            .collect();

        for old_path in moved {
            if let Some(mut entry) = entries.remove(&old_path) {
                let new_path = format!("{to_normalized}{}", &old_path[from_normalized.len()..]);
                entry.info_mut().file_name = path::file_name(&new_path).to_string();
                entries.insert(new_path, entry);
            }
        }
        Ok(())
    }

    async fn lock_file(
        &self,
        _path: &str,
        _offset: u64,
        _length: u64,
        _ctx: &FileContext,
    ) -> VfsResult<()> {
        self.record("lock_file");
        Ok(())
    }

    async fn unlock_file(
        &self,
        _path: &str,
        _offset: u64,
        _length: u64,
        _ctx: &FileContext,
    ) -> VfsResult<()> {
        self.record("unlock_file");
        Ok(())
    }

    async fn get_disk_free_space(&self, _ctx: &FileContext) -> VfsResult<DiskSpace> {
        self.record("get_disk_free_space");
        let entries = self.read_entries()?;
        let used: u64 = entries.values().map(|e| e.info().length).sum();
        let free = MEMORY_CAPACITY.saturating_sub(used);
        Ok(DiskSpace {
            free_bytes_available: free,
            total_bytes: MEMORY_CAPACITY,
            total_free_bytes: free,
        })
    }

    async fn get_volume_information(&self, _ctx: &FileContext) -> VfsResult<VolumeInformation> {
        self.record("get_volume_information");
        Ok(VolumeInformation {
            volume_name: "memory".into(),
            serial_number: 0,
            max_component_length: 255,
            file_system_name: "memfs".into(),
        })
    }

    async fn get_file_security(&self, _path: &str, _ctx: &FileContext) -> VfsResult<Vec<u8>> {
        self.record("get_file_security");
        Err(VfsError::NotImplemented("security descriptors"))
    }

    async fn set_file_security(
        &self,
        _path: &str,
        _descriptor: &[u8],
        _ctx: &FileContext,
    ) -> VfsResult<()> {
        self.record("set_file_security");
        Err(VfsError::NotImplemented("security descriptors"))
    }

    async fn mounted(&self, _ctx: &FileContext) -> VfsResult<()> {
        self.record("mounted");
        Ok(())
    }

    async fn unmounted(&self, _ctx: &FileContext) -> VfsResult<()> {
        self.record("unmounted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkerId;

    fn ctx() -> FileContext {
        FileContext::new(WorkerId(0))
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let fs = MemoryBackend::new();
        fs.create_file("/test.txt", CreateDisposition::CreateNew, &ctx())
            .await
            .unwrap();
        fs.write_file("/test.txt", 0, b"hello world", &ctx())
            .await
            .unwrap();

        let data = fs.read_file("/test.txt", 0, 100, &ctx()).await.unwrap();
        assert_eq!(data, b"hello world");

        let data = fs.read_file("/test.txt", 6, 5, &ctx()).await.unwrap();
        assert_eq!(data, b"world");
    }

    #[tokio::test]
    async fn test_dispositions() {
        let fs = MemoryBackend::new();
        let c = ctx();

        let err = fs.create_file("/f", CreateDisposition::Open, &c).await;
        assert!(matches!(err, Err(VfsError::NotFound(_))));
        let err = fs.create_file("/f", CreateDisposition::Truncate, &c).await;
        assert!(matches!(err, Err(VfsError::NotFound(_))));

        fs.create_file("/f", CreateDisposition::Append, &c).await.unwrap();
        let err = fs.create_file("/f", CreateDisposition::CreateNew, &c).await;
        assert!(matches!(err, Err(VfsError::AlreadyExists(_))));

        fs.write_file("/f", 0, b"abc", &c).await.unwrap();
        fs.create_file("/f", CreateDisposition::Truncate, &c).await.unwrap();
        assert_eq!(fs.get_file_information("/f", &c).await.unwrap().length, 0);
    }

    #[tokio::test]
    async fn test_directory_dispositions() {
        let fs = MemoryBackend::new();
        let dir = FileContext::directory(WorkerId(0));

        let out = fs.create_file("/d", CreateDisposition::CreateNew, &dir).await.unwrap();
        assert!(out.is_directory);
        fs.create_file("/d", CreateDisposition::Open, &dir).await.unwrap();

        let err = fs.create_file("/d", CreateDisposition::OpenOrCreate, &dir).await;
        assert!(matches!(err, Err(VfsError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_find_files_lists_direct_children() {
        let fs = MemoryBackend::new();
        fs.insert_file("/sub/file.txt", b"x").unwrap();
        fs.insert_file("/root.txt", b"").unwrap();

        let names: Vec<_> = fs
            .find_files("/", &ctx())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, vec!["root.txt", "sub"]);

        let sub = fs.find_files("/sub", &ctx()).await.unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].file_name, "file.txt");
    }

    #[tokio::test]
    async fn test_delete_directory_not_empty() {
        let fs = MemoryBackend::new();
        fs.insert_file("/d/f", b"").unwrap();
        let err = fs.delete_directory("/d", &ctx()).await;
        assert!(matches!(err, Err(VfsError::DirectoryNotEmpty(_))));

        fs.delete_file("/d/f", &ctx()).await.unwrap();
        fs.delete_directory("/d", &ctx()).await.unwrap();
        assert!(fs.get_file_information("/d", &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn test_move_directory() {
        let fs = MemoryBackend::new();
        fs.insert_file("/a/inner/f", b"data").unwrap();
        fs.insert_dir("/b").unwrap();

        fs.move_file("/a", "/b/a2", false, &ctx()).await.unwrap();
        let data = fs.read_file("/b/a2/inner/f", 0, 10, &ctx()).await.unwrap();
        assert_eq!(data, b"data");
        assert!(fs.get_file_information("/a", &ctx()).await.is_err());
        assert_eq!(
            fs.get_file_information("/b/a2", &ctx()).await.unwrap().file_name,
            "a2"
        );
    }

    #[tokio::test]
    async fn test_move_refuses_existing_target() {
        let fs = MemoryBackend::new();
        fs.insert_file("/x", b"1").unwrap();
        fs.insert_file("/y", b"2").unwrap();
        let err = fs.move_file("/x", "/y", false, &ctx()).await;
        assert!(matches!(err, Err(VfsError::AlreadyExists(_))));
        fs.move_file("/x", "/y", true, &ctx()).await.unwrap();
        assert_eq!(fs.read_file("/y", 0, 4, &ctx()).await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn test_allocation_size_only_grows() {
        let fs = MemoryBackend::new();
        fs.insert_file("/f", b"hello").unwrap();
        fs.set_allocation_size("/f", 2, &ctx()).await.unwrap();
        assert_eq!(fs.get_file_information("/f", &ctx()).await.unwrap().length, 5);
        fs.set_allocation_size("/f", 8, &ctx()).await.unwrap();
        assert_eq!(fs.get_file_information("/f", &ctx()).await.unwrap().length, 8);
        fs.set_end_of_file("/f", 1, &ctx()).await.unwrap();
        assert_eq!(fs.get_file_information("/f", &ctx()).await.unwrap().length, 1);
    }

    #[tokio::test]
    async fn test_calls_are_counted() {
        let fs = MemoryBackend::new();
        fs.get_file_information("/", &ctx()).await.unwrap();
        fs.get_file_information("/", &ctx()).await.unwrap();
        fs.find_files("/", &ctx()).await.unwrap();
        assert_eq!(fs.calls("get_file_information"), 2);
        assert_eq!(fs.calls("find_files"), 1);
        assert_eq!(fs.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_path_normalization() {
        let fs = MemoryBackend::new();
        fs.insert_file("/a/b.txt", b"x").unwrap();
        let info = fs
            .get_file_information("/a/./c/../b.txt", &ctx())
            .await
            .unwrap();
        assert_eq!(info.file_name, "b.txt");
    }
}
