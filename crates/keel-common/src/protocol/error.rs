use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeelError {
    /// Malformed frame: bad magic, bad version, trailing bytes. Fatal for the
    /// connection since the stream can no longer be trusted to be in sync.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The buffer does not yet hold a complete frame. This is the framing
    /// layer's cue to keep reading, not a failure.
    #[error("incomplete frame: need {expected} bytes, have {actual}")]
    Incomplete { expected: usize, actual: usize },

    #[error("unknown serializer id: {0}")]
    UnknownSerializer(u8),

    /// Header-level valid but unimplemented message type (heartbeat, other).
    /// Fatal for the single message only.
    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(u8),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("no endpoint available for service: {0}")]
    NoEndpoint(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timeout after {0}ms")]
    Timeout(u64),

    /// The remote side produced a well-formed response carrying an error.
    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("failover exhausted: {0}")]
    FailoverExhausted(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KeelError>;
