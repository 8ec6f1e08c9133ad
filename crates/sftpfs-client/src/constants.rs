//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH inactivity timeout. Keepalives keep an idle mount below it.
pub const SSH_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(3600);

/// SSH keep-alive interval.
pub const SSH_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// SSH keep-alive max retries.
pub const SSH_KEEPALIVE_MAX: usize = 3;

/// Subsystem requested on every channel.
pub const SFTP_SUBSYSTEM: &str = "sftp";

const GIB: u64 = 1 << 30;

/// Free space reported to the driver. The remote host is never asked.
pub const REPORTED_FREE_BYTES: u64 = 10 * GIB;

/// Total capacity reported to the driver.
pub const REPORTED_TOTAL_BYTES: u64 = 20 * GIB;

/// Total free bytes reported to the driver.
pub const REPORTED_TOTAL_FREE_BYTES: u64 = 10 * GIB;
