use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use homebus_codec::Value;
use homebus_frame::{ChannelConfig, ChannelProfile, Frame, FrameReassembler, ScriptEvaluator};

use crate::decoder::{EntityDecoder, StateFields};
use crate::error::{DecodeError, DispatchError, Result};
use crate::events::{Event, EventSink};
use crate::offload::{OffloadConfig, OffloadedReassembler};
use crate::queue::{CommandQueue, Priority};

enum Rx {
    InProcess(FrameReassembler),
    Offloaded(OffloadedReassembler),
}

impl Rx {
    fn set_state(&mut self, state: serde_json::Value) {
        match self {
            Rx::InProcess(r) => r.set_state(Some(state)),
            Rx::Offloaded(r) => r.set_state(Some(state)),
        }
    }
}

/// How long a sent command waits for its acknowledgement by default.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

struct PendingAck {
    entity_id: String,
    command: String,
    sent_at: Instant,
}

struct Channel {
    profile: ChannelProfile,
    rx: Rx,
    queue: CommandQueue,
    acks: Vec<PendingAck>,
}

/// Routes frames to entity decoders and paces outbound commands.
///
/// Owns one reassembler and one pair of command queues per channel. Driven by
/// a single caller: the transport pushes bytes with [`feed`](Self::feed) and
/// pulls commands with [`next_command`](Self::next_command).
pub struct Dispatcher {
    channels: HashMap<String, Channel>,
    decoders: Vec<Arc<dyn EntityDecoder>>,
    states: StateFields,
    sink: Box<dyn EventSink + Send>,
    ack_timeout: Duration,
}

impl Dispatcher {
    pub fn new(sink: impl EventSink + Send + 'static) -> Self {
        Self {
            channels: HashMap::new(),
            decoders: Vec::new(),
            states: StateFields::new(),
            sink: Box::new(sink),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// How long a sent command waits for its acknowledgement. Older
    /// expectations are dropped and reported as [`Event::CommandTimedOut`].
    pub fn set_ack_timeout(&mut self, timeout: Duration) {
        self.ack_timeout = timeout;
    }

    /// Register a decoder. Decoders see frames in registration order.
    pub fn register_decoder(&mut self, decoder: Arc<dyn EntityDecoder>) {
        tracing::debug!(entity = decoder.id(), "decoder registered");
        self.decoders.push(decoder);
    }

    /// Add a channel reassembled on the calling thread.
    pub fn add_channel(&mut self, id: impl Into<String>, profile: ChannelProfile) -> Result<()> {
        let rx = Rx::InProcess(FrameReassembler::new(profile.rx.clone()));
        self.insert_channel(id.into(), profile, rx)
    }

    /// Resolve `config` and add it as an in-process channel.
    pub fn add_channel_config(
        &mut self,
        id: impl Into<String>,
        config: &ChannelConfig,
        evaluator: Option<Arc<dyn ScriptEvaluator>>,
    ) -> Result<ChannelProfile> {
        let profile = config.resolve(evaluator)?;
        self.add_channel(id, profile.clone())?;
        Ok(profile)
    }

    /// Add a channel reassembled on a background worker thread.
    pub fn add_offloaded_channel(
        &mut self,
        id: impl Into<String>,
        profile: ChannelProfile,
        offload: &OffloadConfig,
    ) -> Result<()> {
        let id = id.into();
        if self.channels.contains_key(&id) {
            return Err(DispatchError::DuplicateChannel(id));
        }
        let rx = Rx::Offloaded(OffloadedReassembler::spawn(&id, profile.rx.clone(), offload));
        self.insert_channel(id, profile, rx)
    }

    fn insert_channel(&mut self, id: String, profile: ChannelProfile, rx: Rx) -> Result<()> {
        if self.channels.contains_key(&id) {
            return Err(DispatchError::DuplicateChannel(id));
        }
        tracing::debug!(channel = %id, offloaded = matches!(rx, Rx::Offloaded(_)), "channel added");
        let queue = CommandQueue::new(profile.tx.delay());
        self.channels.insert(
            id,
            Channel {
                profile,
                rx,
                queue,
                acks: Vec::new(),
            },
        );
        Ok(())
    }

    /// Push received bytes for a channel and dispatch every completed frame.
    pub fn feed(&mut self, channel: &str, bytes: &[u8]) -> Result<()> {
        self.feed_at(channel, bytes, Instant::now())
    }

    /// Like [`feed`](Self::feed) with an explicit arrival time.
    pub fn feed_at(&mut self, channel: &str, bytes: &[u8], now: Instant) -> Result<()> {
        let ch = self.channel_mut(channel)?;
        let frames = match &mut ch.rx {
            Rx::InProcess(r) => r.feed_at(bytes, now),
            Rx::Offloaded(r) => r.feed_at(bytes, now),
        };
        self.dispatch(channel, frames, now);
        Ok(())
    }

    /// Dispatch frames an offloaded channel produced since the last call.
    pub fn poll(&mut self, channel: &str) -> Result<()> {
        let ch = self.channel_mut(channel)?;
        let frames = match &mut ch.rx {
            Rx::InProcess(_) => Vec::new(),
            Rx::Offloaded(r) => r.poll(),
        };
        self.dispatch(channel, frames, Instant::now());
        Ok(())
    }

    /// Wait up to `timeout` for an offloaded channel to catch up, dispatching
    /// what it produces.
    pub fn flush(&mut self, channel: &str, timeout: Duration) -> Result<()> {
        let ch = self.channel_mut(channel)?;
        let frames = match &mut ch.rx {
            Rx::InProcess(_) => Vec::new(),
            Rx::Offloaded(r) => r.flush(timeout),
        };
        self.dispatch(channel, frames, Instant::now());
        Ok(())
    }

    /// Queue a ready-made command frame.
    ///
    /// Returns `true` when the channel had nothing queued before, so the
    /// transport knows to start draining.
    pub fn enqueue_command(&mut self, channel: &str, command: Bytes, priority: Priority) -> Result<bool> {
        Ok(self.channel_mut(channel)?.queue.push(command, priority))
    }

    /// Build `command` through the entity's decoder and queue it.
    ///
    /// When the decoder declares an acknowledgement pattern, a matching frame
    /// within the ACK timeout fires [`Event::CommandAcked`].
    pub fn send_command(
        &mut self,
        channel: &str,
        entity_id: &str,
        command: &str,
        value: Option<&Value>,
        priority: Priority,
    ) -> Result<bool> {
        self.send_command_at(channel, entity_id, command, value, priority, Instant::now())
    }

    /// Like [`send_command`](Self::send_command) with an explicit clock.
    pub fn send_command_at(
        &mut self,
        channel: &str,
        entity_id: &str,
        command: &str,
        value: Option<&Value>,
        priority: Priority,
        now: Instant,
    ) -> Result<bool> {
        let decoder = self
            .decoders
            .iter()
            .find(|d| d.id() == entity_id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownEntity(entity_id.to_string()))?;

        let ch = self
            .channels
            .get_mut(channel)
            .ok_or_else(|| DispatchError::UnknownChannel(channel.to_string()))?;
        let state = ch
            .profile
            .tx
            .checksum()
            .is_script()
            .then(|| serde_json::Value::Object(self.states.clone()));

        let built = guarded(|| Ok(decoder.build_command(command, value, state.as_ref())))
            .map_err(|message| DispatchError::Decoder {
                entity: entity_id.to_string(),
                message,
            })?;
        let frame = built.ok_or_else(|| DispatchError::UnknownCommand {
            entity: entity_id.to_string(),
            command: command.to_string(),
        })?;

        if guarded(|| Ok(decoder.expects_ack(command))).unwrap_or(false) {
            ch.acks.push(PendingAck {
                entity_id: entity_id.to_string(),
                command: command.to_string(),
                sent_at: now,
            });
        }
        tracing::debug!(channel, entity = entity_id, command, len = frame.len(), "command queued");
        Ok(ch.queue.push(frame, priority))
    }

    /// Next command to transmit, if one is queued and `tx_delay` has passed.
    pub fn next_command(&mut self, channel: &str) -> Result<Option<Bytes>> {
        self.next_command_at(channel, Instant::now())
    }

    /// Like [`next_command`](Self::next_command) with an explicit clock.
    pub fn next_command_at(&mut self, channel: &str, now: Instant) -> Result<Option<Bytes>> {
        let Self {
            channels,
            sink,
            ack_timeout,
            ..
        } = self;
        let ch = channels
            .get_mut(channel)
            .ok_or_else(|| DispatchError::UnknownChannel(channel.to_string()))?;
        expire_acks(channel, ch, now, *ack_timeout, &mut **sink);
        Ok(ch.queue.pop_at(now))
    }

    /// Acknowledgement expectations still open on a channel.
    pub fn pending_acks(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |ch| ch.acks.len())
    }

    /// Latest fields reported for an entity.
    pub fn state(&self, entity_id: &str) -> Option<&StateFields> {
        self.states.get(entity_id).and_then(serde_json::Value::as_object)
    }

    pub fn profile(&self, channel: &str) -> Option<&ChannelProfile> {
        self.channels.get(channel).map(|ch| &ch.profile)
    }

    pub fn pending_commands(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |ch| ch.queue.len())
    }

    /// Whether an offloaded channel has fallen back to in-process reassembly.
    pub fn is_fallback(&self, channel: &str) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|ch| matches!(&ch.rx, Rx::Offloaded(r) if r.is_fallback()))
    }

    fn channel_mut(&mut self, channel: &str) -> Result<&mut Channel> {
        self.channels
            .get_mut(channel)
            .ok_or_else(|| DispatchError::UnknownChannel(channel.to_string()))
    }

    fn dispatch(&mut self, channel: &str, frames: Vec<Frame>, now: Instant) {
        let Self {
            channels,
            decoders,
            states,
            sink,
            ack_timeout,
        } = self;
        let Some(ch) = channels.get_mut(channel) else {
            return;
        };
        expire_acks(channel, ch, now, *ack_timeout, &mut **sink);

        for frame in frames {
            if !ch.profile.rx.accepts_length(frame.len()) {
                tracing::debug!(channel, len = frame.len(), "frame outside length bounds, dropped");
                continue;
            }

            let mut recognized = false;
            let mut updated = false;
            for decoder in decoders.iter() {
                let outcome = guarded(|| {
                    if !decoder.matches_frame(&frame)? {
                        return Ok(None);
                    }
                    decoder.parse(&frame).map(Some)
                });

                match outcome {
                    Ok(None) => {}
                    Ok(Some(fields)) => {
                        recognized = true;
                        let Some(fields) = fields else { continue };
                        let target = decoder.state_proxy().unwrap_or(decoder.id()).to_string();
                        merge_state(states, &target, &fields);
                        updated = true;
                        sink.emit(Event::StateUpdate {
                            channel: channel.to_string(),
                            entity_id: target,
                            fields,
                        });
                    }
                    Err(message) => {
                        tracing::warn!(channel, entity = decoder.id(), %message, "decoder failed");
                        sink.emit(Event::EntityError {
                            channel: channel.to_string(),
                            entity_id: decoder.id().to_string(),
                            message,
                        });
                    }
                }
            }

            if !recognized {
                tracing::trace!(channel, %frame, "unmatched frame");
                sink.emit(Event::UnmatchedFrame {
                    channel: channel.to_string(),
                    frame: frame.clone(),
                });
            }

            ch.acks.retain(|ack| {
                let Some(decoder) = decoders.iter().find(|d| d.id() == ack.entity_id) else {
                    return false;
                };
                let acked = guarded(|| Ok(decoder.matches_ack(&ack.command, &frame))).unwrap_or(false);
                if acked {
                    sink.emit(Event::CommandAcked {
                        channel: channel.to_string(),
                        entity_id: ack.entity_id.clone(),
                        command: ack.command.clone(),
                    });
                }
                !acked
            });

            if updated && ch.profile.uses_script() {
                ch.rx.set_state(serde_json::Value::Object(states.clone()));
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<_> = self.channels.keys().collect();
        channels.sort();
        f.debug_struct("Dispatcher")
            .field("channels", &channels)
            .field("decoders", &self.decoders.iter().map(|d| d.id()).collect::<Vec<_>>())
            .finish()
    }
}

fn expire_acks(
    channel: &str,
    ch: &mut Channel,
    now: Instant,
    timeout: Duration,
    sink: &mut (dyn EventSink + Send),
) {
    ch.acks.retain(|ack| {
        if now.saturating_duration_since(ack.sent_at) <= timeout {
            return true;
        }
        tracing::debug!(channel, entity = %ack.entity_id, command = %ack.command, "acknowledgement timed out");
        sink.emit(Event::CommandTimedOut {
            channel: channel.to_string(),
            entity_id: ack.entity_id.clone(),
            command: ack.command.clone(),
        });
        false
    });
}

fn merge_state(states: &mut StateFields, entity_id: &str, fields: &StateFields) {
    let entry = states
        .entry(entity_id.to_string())
        .or_insert_with(|| serde_json::Value::Object(StateFields::new()));
    if let serde_json::Value::Object(current) = entry {
        for (name, value) in fields {
            current.insert(name.clone(), value.clone());
        }
    }
}

// Fault boundary around decoder calls: errors and panics both become messages.
fn guarded<T>(f: impl FnOnce() -> std::result::Result<T, DecodeError>) -> std::result::Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("decoder panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("decoder panicked: {s}")
    } else {
        "decoder panicked".to_string()
    }
}
