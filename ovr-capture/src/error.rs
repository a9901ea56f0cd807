//! Error types for the capture runtime

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] bincode::Error),

    /// Every port in the configured range is taken
    #[error("No free TCP port in range {begin}..{end}")]
    NoFreePort { begin: u16, end: u16 },

    #[error("Capture is already initialized")]
    AlreadyInitialized,

    #[error("Payload of {size} bytes exceeds the packet limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },
}
