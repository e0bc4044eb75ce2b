//! Binary framing and codec engine for RS485 home-automation buses.
//!
//! Turns a raw serial byte stream into checksum-verified frames, decodes
//! device fields out of them and paces outbound commands.
//!
//! # Crate Structure
//!
//! - [`codec`]: value codec (integers, BCD, ASCII, half units) and state patterns
//! - [`frame`]: checksums, channel framing and the frame reassembler
//! - [`dispatch`]: entity decoders, events, command queues and background
//!   reassembly (behind the `dispatch` feature)

/// Re-export codec types.
pub mod codec {
    pub use homebus_codec::*;
}

/// Re-export frame types.
pub mod frame {
    pub use homebus_frame::*;
}

/// Re-export dispatch types (requires `dispatch` feature).
#[cfg(feature = "dispatch")]
pub mod dispatch {
    pub use homebus_dispatch::*;
}
