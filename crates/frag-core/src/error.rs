use thiserror::Error;

pub type FragResult<T> = Result<T, FragError>;

/// Every variant is terminal for the run that produced it.
#[derive(Debug, Error)]
pub enum FragError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("out of memory: {0}")]
    ResourceExhausted(String),

    #[error("malformed fragment record: {0}")]
    Malformed(String),

    /// Same hash seen with two lengths: a hash collision or corrupted input.
    #[error("fragment length mismatch for {hash}: stored {stored}, observed {observed}")]
    LengthMismatch {
        hash: String,
        stored: u64,
        observed: u64,
    },

    #[error("fragment at offset {start} too big ({length} bytes)")]
    FragmentTooLarge { start: u64, length: u64 },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FragError {
    /// Allocation failure for a buffer of `bytes` bytes.
    pub fn alloc(what: &str, bytes: usize) -> Self {
        FragError::ResourceExhausted(format!("allocating {bytes} bytes for {what}"))
    }
}
