use etcd_coordination::error::Error as StoreError;
use thiserror::Error;

use crate::types::VersionToken;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("memberlist {name} was modified concurrently (expected {expected}, found {actual})")]
    VersionConflict {
        name: String,
        expected: VersionToken,
        actual: VersionToken,
    },

    #[error("no available members to assign resource {resource_id}")]
    NoAvailableMembers { resource_id: String },

    #[error("node watcher has not completed a successful refresh yet")]
    NotReady,

    #[error("member discovery failed: {0}")]
    Discovery(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("channel provisioning failed: {0}")]
    Provisioning(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(e.into())
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Errors that clear up on their own by the next tick. A rejected key
    /// name never does.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(StoreError::InvalidState(_)) => false,
            Error::Store(_)
            | Error::VersionConflict { .. }
            | Error::NotReady
            | Error::Discovery(_)
            | Error::NoAvailableMembers { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_store_state_is_not_transient() {
        let err = Error::from(StoreError::InvalidState("bad key".to_string()));
        assert!(!err.is_transient());
        assert!(Error::from(StoreError::LeaseLost(7)).is_transient());
        assert!(Error::NotReady.is_transient());
        assert!(!Error::config("bad").is_transient());
    }
}

pub type Result<T> = std::result::Result<T, Error>;
