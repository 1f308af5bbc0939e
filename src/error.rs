use thiserror::Error;

/// Rejected routing configurations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} needs to be larger or equal to zero")]
    Negative { field: &'static str },

    #[error("parallelism {parallelism} exceeds the maximum of {max}")]
    ParallelismTooLarge { parallelism: usize, max: usize },
}

/// Reasons a lookup did not produce a usable frontier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no seed peers to start routing from")]
    NoSeedPeers,

    #[error("too many peer failures")]
    TooManyFailures,
}

/// Failures while framing or decoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the message length")]
    FrameTooLarge(usize),
}
