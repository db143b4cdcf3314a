use thiserror::Error;

/// Error taxonomy for the receiver pipeline.
///
/// Every variant is fatal to the execution call that raised it; the
/// transport is still disconnected best-effort before the error
/// propagates. Callers match on the variant to decide whether a retry
/// makes sense (connection problems) or configuration must change
/// first (authentication, validation).
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("receiver is not initialized")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("mailbox search failed: {0}")]
    Search(String),

    #[error("fetch of message {id} failed: {reason}")]
    Fetch { id: u32, reason: String },

    #[error("cannot decode message: {0}")]
    Decode(String),
}
