use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Etcd(#[from] etcd_client::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("lease {0} is no longer being kept alive")]
    LeaseLost(i64),
}

pub type Result<T> = std::result::Result<T, Error>;
