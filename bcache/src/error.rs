//! Error types for the cache engine, peer, codec, configuration, and
//! single-flight filler. Configuration and transport errors bubble to the
//! caller of `new`/`close`; encoding and filler errors are logged and the
//! triggering operation is abandoned — they never crash the cache.

use thiserror::Error;

/// Errors from `Message` encode/decode.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Errors from constructing or using a `Cache`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("max_keys must be positive, got {0}")]
    InvalidCapacity(i64),
}

/// Errors from `BcacheConfig` validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {0:?}: missing \":port\"")]
    InvalidListenAddr(String),
    #[error("invalid port in listen address {0:?}: {1}")]
    InvalidPort(String, std::num::ParseIntError),
    #[error("no usable MAC address found on this machine: {0}")]
    NoMacAddress(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Errors surfaced by `GetWithFiller`.
#[derive(Debug, Error, Clone)]
pub enum FillerError {
    /// A `None`/absent filler function was supplied. Returned before any
    /// cache lookup is attempted.
    #[error("no filler function supplied")]
    NilFiller,
    /// The filler function itself failed; the error message is preserved
    /// but not downcastable (the filler's error type is erased so it can
    /// be shared across single-flight waiters).
    #[error("filler failed: {0}")]
    Failed(String),
}

/// Errors a `MeshTransport` can surface from `start`/`stop`/registration.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport failed to start: {0}")]
    Start(String),
    #[error("transport failed to stop: {0}")]
    Stop(String),
    #[error("channel {0:?} is already registered")]
    AlreadyRegistered(String),
}

/// Top-level error type uniting every failure mode the core can surface.
#[derive(Debug, Error)]
pub enum BcacheError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Filler(#[from] FillerError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
