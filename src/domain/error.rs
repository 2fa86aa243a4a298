use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Session is not initialized")]
    NoSession,

    #[error("Enter a link")]
    EmptyUrl,

    #[error("Error: {0}")]
    Metadata(String),

    #[error("Could not connect to the download server")]
    ConnectionExhausted,

    /// Message reported verbatim by the server.
    #[error("{0}")]
    Server(String),

    #[error("Download failed: {0}")]
    Retrieval(String),

    #[error("I/O error: {0}")]
    Io(String),
}
