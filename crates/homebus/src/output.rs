use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use homebus_dispatch::Event;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_event(event: &Event, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "CHANNEL", "ENTITY", "DETAIL"])
                .add_row(vec![
                    event.kind().to_string(),
                    event.channel().to_string(),
                    entity(event).to_string(),
                    detail(event),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} channel={} entity={} {}",
                event.kind(),
                event.channel(),
                entity(event),
                detail(event)
            );
        }
    }
}

#[derive(Serialize)]
struct BytesOutput<'a> {
    kind: &'a str,
    name: &'a str,
    hex: String,
    bytes: &'a [u8],
}

/// Print a computed byte string such as a checksum or an encoded value.
pub fn print_bytes(kind: &str, name: &str, bytes: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&BytesOutput {
            kind,
            name,
            hex: hex::encode_upper(bytes),
            bytes,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "NAME", "LEN", "BYTES"])
                .add_row(vec![
                    kind.to_string(),
                    name.to_string(),
                    bytes.len().to_string(),
                    spaced_hex(bytes),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{kind} {name}: {}", spaced_hex(bytes)),
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn entity(event: &Event) -> &str {
    match event {
        Event::StateUpdate { entity_id, .. }
        | Event::EntityError { entity_id, .. }
        | Event::CommandAcked { entity_id, .. }
        | Event::CommandTimedOut { entity_id, .. } => entity_id,
        Event::UnmatchedFrame { .. } => "-",
    }
}

fn detail(event: &Event) -> String {
    match event {
        Event::StateUpdate { fields, .. } => {
            serde_json::to_string(fields).unwrap_or_else(|_| "{}".to_string())
        }
        Event::UnmatchedFrame { frame, .. } => frame.to_string(),
        Event::EntityError { message, .. } => message.clone(),
        Event::CommandAcked { command, .. } => command.clone(),
        Event::CommandTimedOut { command, .. } => format!("{command} (no ack)"),
    }
}

fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use homebus_frame::Frame;

    #[test]
    fn unmatched_frame_detail_is_hex() {
        let event = Event::UnmatchedFrame {
            channel: "bus".to_string(),
            frame: Frame::new(vec![0xF7, 0x01, 0xF8], 1),
        };
        assert_eq!(entity(&event), "-");
        assert_eq!(detail(&event), spaced_hex(&[0xF7, 0x01, 0xF8]));
    }

    #[test]
    fn spaced_hex_is_upper_case() {
        assert_eq!(spaced_hex(&[0x0a, 0xff]), "0A FF");
        assert_eq!(spaced_hex(&[]), "");
    }
}
