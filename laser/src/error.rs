//! Error taxonomy propagated to RPC clients (spec §7).

use thiserror::Error;

/// Status returned by a single-key or batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("key expired")]
    KeyExpire,

    #[error("value type invalid")]
    ValueTypeInvalid,

    #[error("union data type invalid")]
    UnionDataTypeInvalid,

    #[error("no partition mounted for this key")]
    NoPartition,

    #[error("rate limited")]
    RateLimited,

    #[error("client transport error")]
    ClientThriftCallError,

    #[error("client transport timeout")]
    ClientThriftCallTimeout,

    #[error("client future timeout")]
    ClientThriftFutureTimeout,

    #[error("batch failed")]
    RsError,

    #[error("batch partially failed")]
    RsPartFailed,

    #[error("unknown error")]
    Unknown,
}

impl Error {
    /// `OK` and `KEY_EXPIRE` are semantic outcomes, not failures, when
    /// aggregating a batch result (spec §4.8, §7).
    pub fn counts_as_failure(self) -> bool {
        !matches!(self, Error::KeyExpire)
    }

    pub fn is_retryable_as_timeout(self) -> bool {
        matches!(
            self,
            Error::ClientThriftCallTimeout | Error::ClientThriftFutureTimeout
        )
    }

    pub fn is_retryable_as_transport(self) -> bool {
        matches!(self, Error::ClientThriftCallError)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
