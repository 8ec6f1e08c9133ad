//! Cache layer composed over the remote adapter, against an in-memory host.
//!
//! Remote round-trips are counted at the host, so every assertion about
//! "served from cache" is an assertion that no primitive reached it.

use std::sync::Arc;

use sftpfs_client::{MemoryRemote, RemoteFs, RemoteOptions};
use sftpfs_vfs::{CacheLayer, CreateDisposition, FileContext, FsOps, VfsError, WorkerId};

type Stack = CacheLayer<RemoteFs<MemoryRemote>>;

fn stack(remote: &MemoryRemote) -> Stack {
    CacheLayer::new(RemoteFs::new(remote.clone(), RemoteOptions::default()))
}

fn ctx() -> FileContext {
    FileContext::new(WorkerId(0))
}

#[tokio::test]
async fn metadata_is_served_from_cache_until_invalidated() {
    let remote = MemoryRemote::new();
    remote.insert_file("/docs/a.txt", b"abc", 0o644);
    let fs = stack(&remote);
    let ctx = ctx();

    let first = fs.get_file_information("/docs/a.txt", &ctx).await.unwrap();
    let calls = remote.primitive_calls();
    let second = fs.get_file_information("/docs/a.txt", &ctx).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(remote.primitive_calls(), calls);

    fs.set_end_of_file("/docs/a.txt", 1, &ctx).await.unwrap();
    let third = fs.get_file_information("/docs/a.txt", &ctx).await.unwrap();
    assert_eq!(third.length, 1);
}

#[tokio::test]
async fn delete_refetches_parent_listing() {
    let remote = MemoryRemote::new();
    remote.insert_file("/a/b", b"", 0o644);
    remote.insert_file("/a/c", b"", 0o644);
    let fs = stack(&remote);
    let ctx = ctx();

    assert_eq!(fs.find_files("/a", &ctx).await.unwrap().len(), 2);
    fs.delete_file("/a/b", &ctx).await.unwrap();

    let calls = remote.primitive_calls();
    let names: Vec<_> = fs
        .find_files("/a", &ctx)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.file_name)
        .collect();
    assert_eq!(names, vec!["c".to_string()]);
    assert!(remote.primitive_calls() > calls);

    let err = fs.get_file_information("/a/b", &ctx).await.unwrap_err();
    assert!(matches!(err, VfsError::NotFound(_)));
}

#[tokio::test]
async fn failed_open_is_cached() {
    let remote = MemoryRemote::new();
    let fs = stack(&remote);
    let ctx = ctx();

    for _ in 0..3 {
        let err = fs
            .create_file("/missing", CreateDisposition::Open, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }
    assert_eq!(remote.primitive_calls(), 1);
}

#[tokio::test]
async fn open_or_create_after_failed_open_creates() {
    let remote = MemoryRemote::new();
    let fs = stack(&remote);
    let ctx = ctx();

    let err = fs
        .create_file("/new", CreateDisposition::Open, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::NotFound(_)));

    fs.create_file("/new", CreateDisposition::OpenOrCreate, &ctx)
        .await
        .unwrap();
    assert!(remote.exists("/new"));

    // The create cleared the parent listing and with it the cached failure.
    fs.create_file("/new", CreateDisposition::Open, &ctx)
        .await
        .unwrap();
}

#[tokio::test]
async fn returned_records_are_copies() {
    let remote = MemoryRemote::new();
    remote.insert_file("/d/f", b"1234", 0o644);
    let fs = stack(&remote);
    let ctx = ctx();

    let mut info = fs.get_file_information("/d/f", &ctx).await.unwrap();
    info.length = 999;
    info.file_name.push_str("-changed");
    let again = fs.get_file_information("/d/f", &ctx).await.unwrap();
    assert_eq!(again.length, 4);
    assert_eq!(again.file_name, "f");

    let mut listing = fs.find_files("/d", &ctx).await.unwrap();
    listing.clear();
    assert_eq!(fs.find_files("/d", &ctx).await.unwrap().len(), 1);
}

#[tokio::test]
async fn permission_pseudo_file_round_trip() {
    let remote = MemoryRemote::new();
    remote.insert_file("/bin/tool", b"", 0o700);
    let fs = stack(&remote);
    let ctx = ctx();
    let prop = "/bin/tool:SSHFSProperty.Permission";

    // Prime the base path's metadata so the write has something to clear.
    let before = fs.get_file_information("/bin/tool", &ctx).await.unwrap();
    assert_eq!(before.permissions, Some(0o700));

    fs.create_file(prop, CreateDisposition::Open, &ctx)
        .await
        .unwrap();
    assert_eq!(fs.write_file(prop, 0, b"0644\n", &ctx).await.unwrap(), 5);
    assert_eq!(fs.read_file(prop, 0, 16, &ctx).await.unwrap(), b"644\n");

    let after = fs.get_file_information("/bin/tool", &ctx).await.unwrap();
    assert_eq!(after.permissions, Some(0o644));
}

#[tokio::test]
async fn cache_property_flushes_without_remote_call() {
    let remote = MemoryRemote::new();
    remote.insert_file("/f", b"old", 0o644);
    let fs = stack(&remote);
    let ctx = ctx();

    assert_eq!(fs.get_file_information("/f", &ctx).await.unwrap().length, 3);

    // Changed behind the mount's back; the cache still has the old size.
    remote.insert_file("/f", b"newer", 0o644);
    assert_eq!(fs.get_file_information("/f", &ctx).await.unwrap().length, 3);

    let calls = remote.primitive_calls();
    fs.create_file("/f:SSHFSProperty.Cache", CreateDisposition::Open, &ctx)
        .await
        .unwrap();
    assert_eq!(remote.primitive_calls(), calls);

    assert_eq!(fs.get_file_information("/f", &ctx).await.unwrap().length, 5);
    assert!(remote.primitive_calls() > calls);
}

#[tokio::test]
async fn transport_faults_are_not_cached() {
    let remote = MemoryRemote::new();
    remote.insert_file("/f", b"x", 0o644);
    let fs = stack(&remote);
    let ctx = ctx();

    fs.mounted(&ctx).await.unwrap();
    remote.inject_faults(1);

    let err = fs.get_file_information("/f", &ctx).await.unwrap_err();
    assert!(matches!(err, VfsError::Transport(_)));
    assert_eq!(fs.inner().session().retry_count(), 1);

    let info = fs.get_file_information("/f", &ctx).await.unwrap();
    assert_eq!(info.length, 1);
}

#[tokio::test]
async fn rename_moves_listing_entries() {
    let remote = MemoryRemote::new();
    remote.insert_file("/src/f", b"data", 0o644);
    remote.insert_dir("/dst");
    let fs = stack(&remote);
    let ctx = ctx();

    assert_eq!(fs.find_files("/src", &ctx).await.unwrap().len(), 1);
    assert!(fs.find_files("/dst", &ctx).await.unwrap().is_empty());

    fs.move_file("/src/f", "/dst/f", false, &ctx).await.unwrap();

    assert!(fs.find_files("/src", &ctx).await.unwrap().is_empty());
    assert_eq!(fs.find_files("/dst", &ctx).await.unwrap().len(), 1);
    assert_eq!(remote.contents("/dst/f").unwrap(), b"data");
}

#[tokio::test]
async fn unmount_clears_cache_and_session() {
    let remote = MemoryRemote::new();
    remote.insert_file("/f", b"x", 0o644);
    let fs = stack(&remote);
    let ctx = ctx();

    fs.mounted(&ctx).await.unwrap();
    fs.get_file_information("/f", &ctx).await.unwrap();
    fs.unmounted(&ctx).await.unwrap();

    assert_eq!(fs.cached_nodes(), 1);
    assert_eq!(remote.disconnects(), 1);
    assert_eq!(remote.channels_closed(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_get_their_own_channels() {
    let remote = MemoryRemote::new();
    for i in 0..8 {
        remote.insert_file(&format!("/w/{i}"), b"payload", 0o644);
    }
    let fs = Arc::new(stack(&remote));

    let mut handles = Vec::new();
    for i in 0..8u32 {
        let fs = fs.clone();
        handles.push(tokio::spawn(async move {
            let ctx = FileContext::new(WorkerId(i));
            let path = format!("/w/{i}");
            fs.create_file(&path, CreateDisposition::Open, &ctx)
                .await
                .unwrap();
            fs.read_file(&path, 0, 64, &ctx).await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), b"payload");
    }

    assert_eq!(remote.connects(), 1);
    assert_eq!(remote.channels_opened(), 8);
    assert_eq!(fs.inner().session().channel_count().await, 8);
}
