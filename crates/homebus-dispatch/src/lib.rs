//! Frame dispatch and command flow control for home-automation buses.
//!
//! The [`Dispatcher`] owns one reassembler per channel, hands every verified
//! frame to the registered [`EntityDecoder`]s and paces outbound commands per
//! channel with two priority queues and a minimum send interval. Reassembly can
//! move to a background thread with [`OffloadConfig`].

pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod offload;
pub mod queue;

pub use decoder::{CommandSchema, EntityDecoder, EntitySchema, SchemaDecoder, StateFields};
pub use dispatcher::{Dispatcher, DEFAULT_ACK_TIMEOUT};
pub use error::{DecodeError, DispatchError, Result};
pub use events::{Event, EventSink};
pub use offload::{OffloadConfig, OffloadedReassembler, WorkerFactory, DEFAULT_BUFFER_CAP};
pub use queue::{CommandQueue, Priority};
