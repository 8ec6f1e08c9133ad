//! sftpfs binary
//!
//! Mounts a remote directory over SSH/SFTP.
//!
//! ## Usage
//!
//! ```bash
//! # Agent authentication, cache enabled
//! sftpfs build.example.org ~/mnt/build
//!
//! # Key file, custom root, no cache
//! sftpfs -i ~/.ssh/id_ed25519 --root /srv/data --disable-cache host /mnt/data
//! ```
//!
//! Unmount with `fusermount -u <mountpoint>`.

mod config;
mod constants;
mod fuse;
mod inode;
mod workers;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use sftpfs_client::{RemoteFs, SshTransport};
use sftpfs_vfs::{CacheLayer, FsOps};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Args;
use crate::constants::FS_NAME;
use crate::fuse::SftpFuse;
use crate::workers::WorkerPool;

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(args: Args) -> Result<()> {
    let ssh = args.ssh_config()?;
    let mountpoint = args.mountpoint()?;

    // Built by hand: the FUSE session thread blocks on this handle from
    // init and destroy, which must happen outside any runtime context.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sftpfs")
        .build()
        .context("failed to start async runtime")?;

    let target = format!("{}@{}:{}", ssh.username, ssh.host, ssh.port);
    let remote = RemoteFs::new(SshTransport::new(ssh), args.remote_options());
    runtime
        .block_on(remote.connect())
        .with_context(|| format!("failed to connect to {target}"))?;
    info!(%target, root = %args.root, "connected");

    let ops: Arc<dyn FsOps> = if args.disable_cache {
        info!("result cache disabled");
        Arc::new(remote)
    } else {
        Arc::new(CacheLayer::new(remote))
    };

    let fs = SftpFuse::new(ops, runtime.handle().clone(), WorkerPool::new(args.workers));
    let options = [
        MountOption::FSName(format!("{FS_NAME}#{target}")),
        MountOption::Subtype(FS_NAME.to_string()),
        MountOption::DefaultPermissions,
    ];

    info!(mountpoint = %mountpoint.display(), workers = args.workers, "mounting");
    fuser::mount2(fs, &mountpoint, &options)
        .with_context(|| format!("failed to mount on {}", mountpoint.display()))?;
    info!("unmounted");

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
