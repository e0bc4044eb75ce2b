/// Errors raised while validating value and state schemas.
///
/// Decoding and encoding themselves never fail hard; these errors surface at
/// configuration time, before any frame is processed.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The field length is outside what the decode kind supports.
    #[error("invalid length {length} for {kind} (allowed {min}..={max})")]
    InvalidLength {
        kind: &'static str,
        length: usize,
        min: usize,
        max: usize,
    },

    /// A transform needs a parameter that was not provided.
    #[error("value_encode {0} requires {1}")]
    MissingParameter(&'static str, &'static str),

    /// A state pattern carries no data bytes.
    #[error("state pattern must contain at least one data byte")]
    EmptyPattern,

    /// A per-byte mask is longer than the data it masks.
    #[error("mask has {mask} bytes but pattern data has {data}")]
    MaskTooLong { mask: usize, data: usize },
}

pub type Result<T> = std::result::Result<T, CodecError>;
