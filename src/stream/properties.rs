//! Well-known property strings shared with external log tooling.

/// Separator between log messages bulk pushed in one property change.
pub const LOG_MESSAGES_SEPARATOR: &str = "\n";

/// Separator between consumer process identifiers in the streaming-clients property.
pub const STREAMING_CLIENTS_SEPARATOR: &str = ",";

/// Returned by a log pull when no message is queued.
pub const NO_LOG_MESSAGES_AVAILABLE: &str = "No log messages available.";

/// Returned by a log pull when the logger pushes its messages instead.
pub const UNSUPPORTED_LOG_COLLECTION_MODE: &str = "Unsupported log collection mode.";

/// Logged when a producer stalls after it delivered its first frame.
pub const BUFFER_RETRIES_FAILED: &str = "No buffer, retries failed.";
