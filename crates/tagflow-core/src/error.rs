//! Error types for the snapshot push engine.

/// Errors surfaced by the push engine's public API.
///
/// `QueueFull` and `UpstreamFailed` are also produced internally, but those
/// occurrences are logged and swallowed by the loop that generated them
/// (subscription channel backpressure, polling driver reads) rather than
/// returned to a caller. See spec.md §7 for the full error-kind mapping.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A required argument was null/empty/otherwise malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The subscription (or manager) has already been disposed.
    #[error("already disposed")]
    AlreadyDisposed,

    /// The manager is configured with a maximum subscription count and it
    /// has been reached.
    #[error("capacity exceeded: {0} subscriptions")]
    CapacityExceeded(usize),

    /// The tag resolver failed while resolving a subscribe request.
    #[error("resolver failed: {0}")]
    ResolverFailed(String),

    /// The upstream poll-only source failed to read a snapshot.
    #[error("upstream read failed: {0}")]
    UpstreamFailed(String),

    /// A first/last-subscriber callback returned an error.
    #[error("callback failed: {0}")]
    CallbackFailed(String),

    /// A subscriber's delivery queue was full and the oldest entry was
    /// dropped to admit a new one.
    #[error("subscriber queue full")]
    QueueFull,

    /// The operation was cancelled before it could complete.
    #[error("cancelled")]
    Cancelled,

    /// The KV snapshot-store collaborator failed.
    #[error("kv store error: {0}")]
    KvStore(String),

    /// JSON (de)serialization of a persisted snapshot failed.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
