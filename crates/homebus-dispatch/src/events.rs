use std::sync::mpsc;

use homebus_frame::Frame;
use serde::{Serialize, Serializer};

use crate::decoder::StateFields;

/// Notification emitted by the dispatcher.
///
/// Fire-and-forget: the dispatcher never waits on a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// An entity recognized a frame and reported fields.
    StateUpdate {
        channel: String,
        entity_id: String,
        fields: StateFields,
    },
    /// No decoder recognized a frame.
    UnmatchedFrame {
        channel: String,
        #[serde(serialize_with = "serialize_frame")]
        frame: Frame,
    },
    /// A decoder returned an error or panicked.
    EntityError {
        channel: String,
        entity_id: String,
        message: String,
    },
    /// A frame matched the acknowledgement pattern of a sent command.
    CommandAcked {
        channel: String,
        entity_id: String,
        command: String,
    },
    /// No acknowledgement arrived for a sent command within the ACK timeout.
    CommandTimedOut {
        channel: String,
        entity_id: String,
        command: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::StateUpdate { .. } => "state_update",
            Event::UnmatchedFrame { .. } => "unmatched_frame",
            Event::EntityError { .. } => "entity_error",
            Event::CommandAcked { .. } => "command_acked",
            Event::CommandTimedOut { .. } => "command_timed_out",
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Event::StateUpdate { channel, .. }
            | Event::UnmatchedFrame { channel, .. }
            | Event::EntityError { channel, .. }
            | Event::CommandAcked { channel, .. }
            | Event::CommandTimedOut { channel, .. } => channel,
        }
    }
}

fn serialize_frame<S: Serializer>(frame: &Frame, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(frame)
}

/// Receives dispatcher events.
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

impl EventSink for mpsc::Sender<Event> {
    fn emit(&mut self, event: Event) {
        if self.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

impl<F> EventSink for F
where
    F: FnMut(Event),
{
    fn emit(&mut self, event: Event) {
        self(event)
    }
}
