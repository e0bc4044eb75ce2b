//! Bus description files: one channel plus the entities listening on it.

use std::path::Path;
use std::sync::Arc;

use homebus_dispatch::{Dispatcher, EntitySchema, EventSink, OffloadConfig, SchemaDecoder};
use homebus_frame::ChannelConfig;
use serde::Deserialize;

use crate::exit::{config_error, dispatch_error, io_error, json_error, CliResult};

fn default_channel_id() -> String {
    "bus".to_string()
}

#[derive(Debug, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_channel_id")]
    pub id: String,
    pub channel: ChannelConfig,
    #[serde(default)]
    pub entities: Vec<EntitySchema>,
    /// Reassemble on a background thread when present.
    #[serde(default)]
    pub offload: Option<OffloadConfig>,
}

impl BusConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let context = format!("read config {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|err| io_error(&context, err))?;
        serde_json::from_str(&text).map_err(|err| json_error(&context, err))
    }

    /// Build a dispatcher with the channel and one schema decoder per entity.
    pub fn into_dispatcher(self, sink: impl EventSink + Send + 'static) -> CliResult<Dispatcher> {
        let profile = self
            .channel
            .resolve(None)
            .map_err(|err| config_error("resolve channel", err))?;

        let mut dispatcher = Dispatcher::new(sink);
        for schema in self.entities {
            let id = schema.id.clone();
            let decoder = SchemaDecoder::new(schema, profile.tx.clone())
                .map_err(|err| dispatch_error(&format!("entity {id}"), err))?;
            dispatcher.register_decoder(Arc::new(decoder));
        }

        let added = match &self.offload {
            Some(offload) => dispatcher.add_offloaded_channel(&self.id, profile, offload),
            None => dispatcher.add_channel(&self.id, profile),
        };
        added.map_err(|err| dispatch_error("add channel", err))?;

        tracing::debug!(
            channel = %self.id,
            offloaded = self.offload.is_some(),
            "dispatcher ready"
        );
        Ok(dispatcher)
    }
}
