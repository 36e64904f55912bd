use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::store::EtcdStore;

/// Validate that an identifier is safe for use in etcd key paths.
///
/// Identifiers (memberlist names, instance names, namespaces) are
/// interpolated into keys, so `/` and relative path segments are rejected.
/// Dots are allowed because pod names are DNS subdomains.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 253 {
        return Err(Error::InvalidState(
            "identifier must be 1-253 characters".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidState(format!(
            "identifier {name:?} is a relative path segment"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(Error::InvalidState(format!(
            "identifier {name:?} contains invalid characters (only alphanumeric, dash, underscore, dot allowed)"
        )));
    }
    Ok(())
}

pub fn now_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Keep `lease_id` alive until cancelled.
///
/// Returns `Error::LeaseLost` if etcd closes the keep-alive stream, which
/// means every key attached to the lease is about to disappear.
pub async fn run_lease_keepalive(
    store: &EtcdStore,
    lease_id: i64,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let (mut keeper, mut stream) = store.keep_alive(lease_id).await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {
                keeper.keep_alive().await?;
                match stream.message().await? {
                    Some(resp) if resp.ttl() > 0 => {}
                    _ => return Err(Error::LeaseLost(lease_id)),
                }
            }
        }
    }
}

/// Exponential backoff with a ceiling.
///
/// `delay(0)` is the base delay, each further attempt doubles it until `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }
}
