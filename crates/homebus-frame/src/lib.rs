//! Frame reassembly for RS485-style home-automation buses.
//!
//! A bus delivers bytes in arbitrary chunks: frames split across reads, several
//! frames in one read, line noise in between. A [`FrameReassembler`] owns the
//! buffer for one channel and yields only frames whose checksum verifies.
//!
//! Framing is driven by a resolved [`ChannelProfile`]:
//! - a fixed `rx_length`, or
//! - an `rx_footer`, or
//! - the checksum alone, trying the shortest candidate first.
//!
//! Enable the `async` feature for a `tokio-util` codec over the same logic.

pub mod checksum;
#[cfg(feature = "async")]
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod reassembler;
pub mod tx;

pub use checksum::{
    Builtin, Checksum, ChecksumBytes, ChecksumSetting, ChecksumSpec, ChecksumWidth, ScriptEvaluator,
    ScriptInput,
};
#[cfg(feature = "async")]
pub use codec::ReassemblerCodec;
pub use config::{
    ChannelConfig, ChannelProfile, Extraction, RxFraming, StartBytes, DEFAULT_RX_TIMEOUT_MS,
    DEFAULT_TX_DELAY_MS,
};
pub use error::{ChecksumError, ConfigError, FrameError, Result};
pub use frame::{fmt_hex, Frame};
pub use reassembler::{FrameReassembler, MAX_CANDIDATE_LENGTH};
pub use tx::TxFraming;
