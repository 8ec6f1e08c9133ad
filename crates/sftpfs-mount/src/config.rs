//! Command-line and environment configuration.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use sftpfs_client::constants::DEFAULT_SSH_PORT;
use sftpfs_client::{Credential, RemoteOptions, SshConfig};

use crate::constants::DEFAULT_WORKERS;

/// Mount a remote directory over SSH/SFTP.
#[derive(Parser, Debug)]
#[command(name = "sftpfs")]
#[command(about = "Mount a remote directory over SSH/SFTP")]
pub struct Args {
    /// Remote host
    #[arg(env = "SFTPFS_HOST")]
    pub host: String,

    /// Local directory to mount on
    #[arg(env = "SFTPFS_MOUNTPOINT")]
    pub mountpoint: String,

    /// SSH port
    #[arg(short, long, env = "SFTPFS_PORT", default_value_t = DEFAULT_SSH_PORT)]
    pub port: u16,

    /// Remote user (default: local user)
    #[arg(short, long, env = "SFTPFS_USER")]
    pub user: Option<String>,

    /// Password authentication
    #[arg(long, env = "SFTPFS_PASSWORD", hide_env_values = true, conflicts_with = "identity")]
    pub password: Option<String>,

    /// Private key file
    #[arg(short, long, env = "SFTPFS_IDENTITY")]
    pub identity: Option<String>,

    /// Passphrase for the private key
    #[arg(long, env = "SFTPFS_PASSPHRASE", hide_env_values = true, requires = "identity")]
    pub passphrase: Option<String>,

    /// Remote directory to expose as the mount root
    #[arg(long, env = "SFTPFS_ROOT", default_value = "")]
    pub root: String,

    /// Concurrent workers, each with its own SFTP channel
    #[arg(short, long, env = "SFTPFS_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Talk to the remote on every call instead of caching results
    #[arg(long)]
    pub disable_cache: bool,

    /// Mark every entry offline so file managers skip previews
    #[arg(long)]
    pub offline_attribute: bool,

    /// Reject host keys not listed in ~/.ssh/known_hosts
    #[arg(long)]
    pub strict_host_key: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub debug: bool,
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

impl Args {
    /// Pick the credential: password, then identity file, then the SSH agent.
    pub fn credential(&self) -> Result<Credential> {
        if let Some(password) = &self.password {
            return Ok(Credential::Password(password.clone()));
        }
        if let Some(identity) = &self.identity {
            let path = expand(identity);
            if !path.is_file() {
                bail!("identity file {} not found", path.display());
            }
            return Ok(Credential::KeyFile {
                path,
                passphrase: self.passphrase.clone(),
            });
        }
        Ok(Credential::Agent)
    }

    pub fn ssh_config(&self) -> Result<SshConfig> {
        let mut config = SshConfig::new(self.host.clone(), self.credential()?);
        config.port = self.port;
        if let Some(user) = &self.user {
            config.username = user.clone();
        }
        config.strict_host_key = self.strict_host_key;
        Ok(config)
    }

    pub fn remote_options(&self) -> RemoteOptions {
        RemoteOptions {
            root: self.root.clone(),
            offline_attribute: self.offline_attribute,
        }
    }

    pub fn mountpoint(&self) -> Result<PathBuf> {
        let path = expand(&self.mountpoint);
        if !path.is_dir() {
            bail!("mount point {} is not a directory", path.display());
        }
        Ok(path)
    }
}
