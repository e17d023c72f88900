/// Errors from a volume store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API server returned a non-2xx status code.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The write precondition no longer holds; someone else changed the
    /// volume since it was read.
    #[error("Conflicting update to volume {volume}")]
    Conflict { volume: String },

    #[error("Volume not found: {volume}")]
    NotFound { volume: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Store configuration error: {0}")]
    Config(String),

    /// A failure injected by the in-memory store.
    #[error("Injected failure: {0}")]
    Injected(String),
}
