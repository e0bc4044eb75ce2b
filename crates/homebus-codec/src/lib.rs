//! Bit-level value codec for home-automation bus frames.
//!
//! Pure functions turning payload bytes into application values and back,
//! driven by a per-field schema:
//! - offset and length inside the payload
//! - plain integers (optionally two's complement), BCD, ASCII, half-unit
//! - big or little endian
//!
//! Plus [`StateSchema`], the masked byte pattern used to recognize state and
//! acknowledgement frames. Nothing here holds state.

pub mod error;
pub mod schema;
pub mod state;
pub mod value;

pub use error::{CodecError, Result};
pub use schema::{DecodeKind, EncodeKind, EncodeSchema, Endian, ValueSchema};
pub use state::{Mask, StateSchema};
pub use value::{decode, encode, Value};
