pub mod access;
pub mod badge;
pub mod cache;
pub mod clock;
pub mod error;
pub mod period;
pub mod ports;
pub mod rate_limit;
pub mod response_cache;
pub mod rollover;
pub mod snapshots;
pub mod stats;

pub type DomainResult<T> = Result<T, error::DomainError>;
