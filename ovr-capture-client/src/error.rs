//! Error types for the capture client

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decoding error: {0}")]
    Decode(#[from] bincode::Error),

    #[error("Protocol version mismatch: client {local}, server {remote}")]
    VersionMismatch { local: u32, remote: u32 },

    /// The server shares none of the requested capture flags
    #[error("Server rejected capture flags {requested:#x}")]
    Rejected { requested: u32 },

    #[error("Malformed stream: {0}")]
    Malformed(String),

    #[error("Timed out")]
    Timeout,
}
