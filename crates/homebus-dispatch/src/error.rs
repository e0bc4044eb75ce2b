use homebus_frame::ConfigError;

/// Errors that can occur in dispatcher operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No channel is registered under this id.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// A channel with this id is already registered.
    #[error("channel '{0}' already registered")]
    DuplicateChannel(String),

    /// No decoder is registered under this entity id.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// The entity cannot build this command.
    #[error("entity '{entity}' cannot build command '{command}'")]
    UnknownCommand { entity: String, command: String },

    /// A decoder failed or panicked outside frame dispatch.
    #[error("decoder '{entity}' failed: {message}")]
    Decoder { entity: String, message: String },

    /// Channel configuration could not be resolved.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Entity schema is invalid.
    #[error("schema error: {0}")]
    Codec(#[from] homebus_codec::CodecError),
}

/// Errors returned by an [`EntityDecoder`](crate::EntityDecoder).
///
/// The dispatcher turns these into `EntityError` events; they never stop
/// other decoders from seeing the frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame matched but its contents could not be interpreted.
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
