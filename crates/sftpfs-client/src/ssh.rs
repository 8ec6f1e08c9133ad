//! SSH transport to the remote host.
//!
//! Uses russh for the connection and authenticates with a password, a
//! private key file, or the keys held by a running SSH agent. Every channel
//! opened on the connection is bound to the SFTP subsystem.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::Disconnect;
use russh_sftp::client::SftpSession;

use crate::constants::{
    DEFAULT_SSH_PORT, SFTP_SUBSYSTEM, SSH_INACTIVITY_TIMEOUT, SSH_KEEPALIVE_INTERVAL,
    SSH_KEEPALIVE_MAX,
};
use crate::error::{RemoteError, RemoteResult};
use crate::sftp::SftpChannel;
use crate::transport::{Connection, Transport};

/// How to prove identity to the server.
#[derive(Clone)]
pub enum Credential {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Try every identity offered by the SSH agent.
    Agent,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(..)"),
            Credential::KeyFile { path, .. } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .finish_non_exhaustive(),
            Credential::Agent => f.write_str("Agent"),
        }
    }
}

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    /// Verify the host key against `~/.ssh/known_hosts`.
    pub strict_host_key: bool,
}

impl SshConfig {
    pub fn new(host: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: whoami::username(),
            credential,
            strict_host_key: false,
        }
    }
}

/// Client handler for russh - handles server key verification
pub struct ClientHandler {
    host: String,
    port: u16,
    strict: bool,
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256);
        if !self.strict {
            log::warn!("Accepting server key without verification: {}", fingerprint);
            return Ok(true);
        }

        match russh::keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => {
                log::debug!("Server key {} matches known_hosts", fingerprint);
                Ok(true)
            }
            Ok(false) => {
                log::error!(
                    "Server key {} for {}:{} is not in known_hosts",
                    fingerprint,
                    self.host,
                    self.port
                );
                Ok(false)
            }
            Err(e) => {
                log::error!("Server key check failed for {}: {}", self.host, e);
                Ok(false)
            }
        }
    }
}

/// Connects and authenticates SSH sessions for the remote filesystem.
#[derive(Debug, Clone)]
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    async fn open_session(&self) -> Result<Handle<ClientHandler>, SshError> {
        let config = Config {
            inactivity_timeout: Some(SSH_INACTIVITY_TIMEOUT),
            keepalive_interval: Some(SSH_KEEPALIVE_INTERVAL),
            keepalive_max: SSH_KEEPALIVE_MAX,
            ..<_>::default()
        };

        let handler = ClientHandler {
            host: self.config.host.clone(),
            port: self.config.port,
            strict: self.config.strict_host_key,
        };
        let addr = (self.config.host.as_str(), self.config.port);
        let mut session = client::connect(Arc::new(config), addr, handler)
            .await
            .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        log::info!(
            "Connected to {}:{}, authenticating as {}",
            self.config.host,
            self.config.port,
            self.config.username
        );

        match &self.config.credential {
            Credential::Password(password) => {
                let result = session
                    .authenticate_password(&self.config.username, password)
                    .await?;
                if !result.success() {
                    return Err(SshError::AuthFailed("password rejected".into()));
                }
            }
            Credential::KeyFile { path, passphrase } => {
                let key = russh::keys::load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| SshError::KeyLoad(format!("{}: {}", path.display(), e)))?;
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                let result = session
                    .authenticate_publickey(
                        &self.config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await?;
                if !result.success() {
                    return Err(SshError::AuthFailed(format!(
                        "key {} rejected",
                        path.display()
                    )));
                }
            }
            Credential::Agent => self.authenticate_with_agent(&mut session).await?,
        }

        log::info!("Authenticated as {}", self.config.username);
        Ok(session)
    }

    async fn authenticate_with_agent(
        &self,
        session: &mut Handle<ClientHandler>,
    ) -> Result<(), SshError> {
        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|e| SshError::AgentFailed(e.to_string()))?;

        let keys = agent
            .request_identities()
            .await
            .map_err(|e| SshError::AgentFailed(e.to_string()))?;

        if keys.is_empty() {
            return Err(SshError::NoKeysAvailable);
        }

        log::info!("Found {} keys in SSH agent", keys.len());

        // Try each key until one works
        for key in &keys {
            log::debug!("Trying key: {}", key.fingerprint(HashAlg::Sha256));

            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();

            let result = session
                .authenticate_publickey_with(&self.config.username, key.clone(), hash_alg, &mut agent)
                .await;

            match result {
                Ok(auth_result) if auth_result.success() => {
                    log::info!("Agent key {} accepted", key.fingerprint(HashAlg::Sha256));
                    return Ok(());
                }
                Ok(_) => {
                    log::debug!("Key rejected, trying next...");
                }
                Err(e) => {
                    log::warn!("Auth error with key: {}", e);
                }
            }
        }

        Err(SshError::AuthFailed("No keys accepted by server".into()))
    }
}

#[async_trait]
impl Transport for SshTransport {
    type Connection = SshConnection;

    async fn connect(&self) -> RemoteResult<SshConnection> {
        let handle = self.open_session().await?;
        Ok(SshConnection { handle })
    }
}

/// An authenticated SSH connection.
pub struct SshConnection {
    handle: Handle<ClientHandler>,
}

impl SshConnection {
    /// Check if connected
    pub fn is_connected(&self) -> bool {
        !self.handle.is_closed()
    }
}

#[async_trait]
impl Connection for SshConnection {
    type Channel = SftpChannel;

    async fn open_channel(&self) -> RemoteResult<SftpChannel> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelFailed(e.to_string()))?;
        channel
            .request_subsystem(true, SFTP_SUBSYSTEM)
            .await
            .map_err(|e| SshError::ChannelFailed(format!("{}: {}", SFTP_SUBSYSTEM, e)))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::ChannelFailed(format!("sftp init: {}", e)))?;
        Ok(SftpChannel::new(sftp))
    }

    async fn disconnect(&self) -> RemoteResult<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "Client disconnecting", "en")
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Auth failed: {0}")]
    AuthFailed(String),
    #[error("Channel failed: {0}")]
    ChannelFailed(String),
    #[error("SSH agent error: {0}")]
    AgentFailed(String),
    #[error("No SSH keys available in agent")]
    NoKeysAvailable,
    #[error("Could not load private key {0}")]
    KeyLoad(String),
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::ConnectionFailed(e.to_string())
    }
}

/// Every SSH-level failure is connection-shaped.
impl From<SshError> for RemoteError {
    fn from(e: SshError) -> Self {
        RemoteError::Transport(e.to_string())
    }
}
