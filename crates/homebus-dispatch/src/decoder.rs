//! Entity decoders: the capability the dispatcher drives for every frame.

use std::collections::BTreeMap;

use bytes::Bytes;
use homebus_codec::{decode, encode, EncodeSchema, StateSchema, Value, ValueSchema};
use homebus_frame::{Frame, TxFraming};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};

/// Fields reported by a decoder, keyed by field name.
pub type StateFields = serde_json::Map<String, serde_json::Value>;

/// Recognizes and parses one logical entity's frames and builds its commands.
///
/// Decoders run synchronously on the dispatching thread and must not block.
/// Errors and panics are isolated per decoder.
pub trait EntityDecoder: Send + Sync {
    fn id(&self) -> &str;

    /// Entity id to report state under instead of [`id`](Self::id).
    fn state_proxy(&self) -> Option<&str> {
        None
    }

    /// Whether this frame belongs to the entity.
    fn matches_frame(&self, frame: &Frame) -> std::result::Result<bool, DecodeError>;

    /// Extract fields from a frame that [`matches_frame`](Self::matches_frame)
    /// accepted. `None` means recognized with nothing to report.
    fn parse(&self, frame: &Frame) -> std::result::Result<Option<StateFields>, DecodeError>;

    /// Build a complete outbound frame for `command`.
    ///
    /// `state` is the dispatcher's entity state snapshot, for channels whose
    /// transmit checksum is a script.
    fn build_command(
        &self,
        command: &str,
        value: Option<&Value>,
        state: Option<&serde_json::Value>,
    ) -> Option<Bytes> {
        let _ = (command, value, state);
        None
    }

    /// Whether the device acknowledges `command` with a recognizable frame.
    fn expects_ack(&self, command: &str) -> bool {
        let _ = command;
        false
    }

    /// Whether `frame` acknowledges a previously sent `command`.
    fn matches_ack(&self, command: &str, frame: &Frame) -> bool {
        let _ = (command, frame);
        false
    }
}

/// Declarative description of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub id: String,
    #[serde(default)]
    pub state_proxy: Option<String>,
    /// Pattern identifying this entity's state frames.
    pub state: StateSchema,
    /// Numeric or text fields, decoded from the payload.
    #[serde(default)]
    pub fields: BTreeMap<String, ValueSchema>,
    /// Boolean fields, true when the pattern matches.
    #[serde(default)]
    pub flags: BTreeMap<String, StateSchema>,
    #[serde(default)]
    pub commands: BTreeMap<String, CommandSchema>,
}

/// How to build one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSchema {
    /// Command data template, without channel header, checksum or footer.
    pub data: Vec<u8>,
    /// Encoding for the command argument, if it takes one.
    #[serde(default)]
    pub value: Option<EncodeSchema>,
    /// Where the encoded argument goes in `data`. Defaults to appending.
    #[serde(default)]
    pub value_offset: Option<usize>,
    /// Pattern of the device's acknowledgement frame.
    #[serde(default)]
    pub ack: Option<StateSchema>,
}

/// [`EntityDecoder`] driven entirely by an [`EntitySchema`].
#[derive(Debug, Clone)]
pub struct SchemaDecoder {
    schema: EntitySchema,
    tx: TxFraming,
}

impl SchemaDecoder {
    /// Validate the schema and bind it to the channel's transmit framing.
    pub fn new(schema: EntitySchema, tx: TxFraming) -> Result<Self> {
        schema.state.validate()?;
        for field in schema.fields.values() {
            field.validate()?;
        }
        for flag in schema.flags.values() {
            flag.validate()?;
        }
        for command in schema.commands.values() {
            if let Some(value) = &command.value {
                value.validate()?;
            }
            if let Some(ack) = &command.ack {
                ack.validate()?;
            }
        }
        Ok(Self { schema, tx })
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    fn command_data(&self, command: &CommandSchema, value: Option<&Value>) -> Option<Vec<u8>> {
        let mut data = command.data.clone();
        let Some(encoding) = &command.value else {
            return Some(data);
        };
        let Some(value) = value else {
            tracing::debug!(entity = %self.schema.id, "command needs a value");
            return None;
        };

        let encoded = encode(value, encoding);
        if encoded.is_empty() {
            tracing::debug!(entity = %self.schema.id, %value, "value could not be encoded");
            return None;
        }

        let at = command.value_offset.unwrap_or(data.len());
        if data.len() < at + encoded.len() {
            data.resize(at + encoded.len(), 0);
        }
        data[at..at + encoded.len()].copy_from_slice(&encoded);
        Some(data)
    }
}

impl EntityDecoder for SchemaDecoder {
    fn id(&self) -> &str {
        &self.schema.id
    }

    fn state_proxy(&self) -> Option<&str> {
        self.schema.state_proxy.as_deref()
    }

    fn matches_frame(&self, frame: &Frame) -> std::result::Result<bool, DecodeError> {
        Ok(self.schema.state.matches(frame.payload()))
    }

    fn parse(&self, frame: &Frame) -> std::result::Result<Option<StateFields>, DecodeError> {
        let payload = frame.payload();
        let mut fields = StateFields::new();
        for (name, schema) in &self.schema.fields {
            if let Some(value) = decode(payload, schema) {
                fields.insert(name.clone(), value.into());
            }
        }
        for (name, flag) in &self.schema.flags {
            fields.insert(name.clone(), serde_json::Value::Bool(flag.matches(payload)));
        }
        Ok(Some(fields))
    }

    fn build_command(
        &self,
        command: &str,
        value: Option<&Value>,
        state: Option<&serde_json::Value>,
    ) -> Option<Bytes> {
        let schema = self.schema.commands.get(command)?;
        let data = self.command_data(schema, value)?;
        match self.tx.frame(&data, state) {
            Ok(frame) => Some(frame),
            Err(err) => {
                tracing::debug!(entity = %self.schema.id, command, error = %err, "command framing failed");
                None
            }
        }
    }

    fn expects_ack(&self, command: &str) -> bool {
        self.schema
            .commands
            .get(command)
            .is_some_and(|c| c.ack.is_some())
    }

    fn matches_ack(&self, command: &str, frame: &Frame) -> bool {
        self.schema
            .commands
            .get(command)
            .and_then(|c| c.ack.as_ref())
            .is_some_and(|ack| ack.matches(frame.payload()))
    }
}
