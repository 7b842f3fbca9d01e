use thiserror::Error;

/// A convenience `Result` alias using [`ForageError`].
pub type ForageResult<T> = Result<T, ForageError>;

/// Top-level error type for Forage.
///
/// The first group of variants covers the lifecycle of a proxied child
/// server; the rest are ambient failures from I/O, HTTP and configuration.
#[derive(Error, Debug)]
pub enum ForageError {
    /// The child process could not be spawned.
    #[error("Launch error: {0}")]
    Launch(String),

    /// Protocol negotiation with the child failed or timed out.
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// The child's capability listing failed.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// No session is registered under the requested server name.
    #[error("Server \"{0}\" is not running")]
    NotRunning(String),

    /// The child answered a request with a JSON-RPC error object.
    #[error("MCP error {code}: {message}")]
    Remote {
        /// JSON-RPC error code reported by the child.
        code: i64,
        /// Error message reported by the child.
        message: String,
    },

    /// The session was closed, or closing it failed.
    #[error("Close error: {0}")]
    Close(String),

    /// A request to the child did not complete in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The host catalog rejected a registration (e.g. a duplicate name).
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// A discovery backend failed. Never surfaced by aggregate search.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Reading or writing the install manifest failed.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// A tool was called with arguments it cannot decode.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForageError {
    /// Whether this error happened while starting a server.
    pub fn is_start_error(&self) -> bool {
        matches!(
            self,
            ForageError::Launch(_) | ForageError::Handshake(_) | ForageError::Discovery(_)
        )
    }
}
