//! Southbound-interface drivers (spec §4.1): one persistent session per
//! device, created lazily, every public operation retried on
//! `Unreachable`, authentication failures surfaced immediately.

mod raw_ssh;
mod rest;
mod ssh_cli;

pub use raw_ssh::RawSshDriver;
pub use rest::{RestDriver, RestMethod};
pub use ssh_cli::SshCliDriver;

use std::time::Duration;
use thiserror::Error;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const LONG_COMMAND_TIMEOUT: Duration = Duration::from_secs(45);
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum SbiError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("authentication rejected: {0}")]
    Unauthenticated(String),
    #[error("device response violates contract: {0}")]
    Misconfigured(String),
}

impl SbiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SbiError::Unreachable(_))
    }
}

/// Retries `op` up to [`MAX_RETRIES`] times on [`SbiError::Unreachable`];
/// any other error, or the last retry, is returned immediately.
pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, SbiError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SbiError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES - 1 => {
                attempt += 1;
                log::warn!("sbi call failed ({err}), retry {attempt}/{MAX_RETRIES}");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Output of a single text command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Narrow seam so device adapters can be unit-tested against a fake
/// transport instead of a live SSH session.
#[async_trait::async_trait]
pub trait CliTransport: Send + Sync {
    async fn exec(&self, command: &str) -> Result<String, SbiError>;
}

#[async_trait::async_trait]
impl CliTransport for SshCliDriver {
    async fn exec(&self, command: &str) -> Result<String, SbiError> {
        self.get_info(command.to_string()).await
    }
}

/// Same seam for the vendor REST transport.
#[async_trait::async_trait]
pub trait JsonTransport: Send + Sync {
    async fn get(&self, path: &str) -> Result<serde_json::Value, SbiError>;
    async fn send(
        &self,
        method: RestMethod,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, SbiError>;
}

#[async_trait::async_trait]
impl JsonTransport for RestDriver {
    async fn get(&self, path: &str) -> Result<serde_json::Value, SbiError> {
        self.call::<(), serde_json::Value>(RestMethod::Get, path, None)
            .await
    }

    async fn send(
        &self,
        method: RestMethod,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, SbiError> {
        self.call::<serde_json::Value, serde_json::Value>(method, path, Some(body))
            .await
    }
}
