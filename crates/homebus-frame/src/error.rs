/// Errors raised while resolving a channel configuration.
///
/// These abort startup; nothing in here is produced per frame.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The checksum name is not a known built-in algorithm.
    #[error("unknown checksum algorithm '{0}'")]
    UnknownChecksum(String),

    /// A built-in algorithm was configured in a slot of the wrong width.
    #[error("checksum '{name}' produces {actual} byte(s) but is configured as {expected}-byte")]
    ChecksumWidth {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A script checksum was configured without an evaluator to run it.
    #[error("script checksum configured but no script evaluator was provided")]
    MissingEvaluator,

    /// The receive side has no way to delimit frames.
    #[error("rx side needs rx_length, rx_footer or a checksum to delimit frames")]
    Unframeable,

    /// The fixed frame length cannot hold header, checksum, footer and data.
    #[error("rx_length {length} too small (minimum {minimum})")]
    LengthTooSmall { length: usize, minimum: usize },

    /// `rx_min_length` is larger than `rx_max_length`.
    #[error("rx_min_length {min} exceeds rx_max_length {max}")]
    InvalidBounds { min: usize, max: usize },
}

/// Errors raised while computing a checksum.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// The script evaluator reported an error.
    #[error("checksum script failed: {0}")]
    Script(String),

    /// The script returned something other than the expected numeric shape.
    #[error("checksum script returned {found}, expected {expected}")]
    MalformedResult {
        found: String,
        expected: &'static str,
    },
}

/// Errors surfaced by the framing layer.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Channel configuration could not be resolved.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A checksum could not be computed for an outbound frame.
    #[error("checksum error: {0}")]
    Checksum(#[from] ChecksumError),

    /// An I/O error from a stream driving the reassembler.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
