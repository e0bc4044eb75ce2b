use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use homebus_codec::Value;
use homebus_dispatch::{
    DecodeError, Dispatcher, EntityDecoder, EntitySchema, Event, OffloadConfig, Priority,
    SchemaDecoder, StateFields,
};
use homebus_frame::{ChannelConfig, ChannelProfile, Frame, ScriptEvaluator, ScriptInput};
use serde_json::json;

fn profile(json: &str) -> ChannelProfile {
    let config: ChannelConfig = serde_json::from_str(json).expect("config should parse");
    config.resolve(None).expect("config should resolve")
}

fn add_bus() -> ChannelProfile {
    profile(r#"{"rx_header": [247], "rx_checksum": "add", "tx_header": [247], "tx_checksum": "add"}"#)
}

fn drain(rx: &Receiver<Event>) -> Vec<Event> {
    rx.try_iter().collect()
}

struct Always {
    id: &'static str,
    proxy: Option<&'static str>,
}

impl EntityDecoder for Always {
    fn id(&self) -> &str {
        self.id
    }

    fn state_proxy(&self) -> Option<&str> {
        self.proxy
    }

    fn matches_frame(&self, _frame: &Frame) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn parse(&self, frame: &Frame) -> Result<Option<StateFields>, DecodeError> {
        let mut fields = StateFields::new();
        fields.insert("first".to_string(), json!(frame.payload()[0]));
        Ok(Some(fields))
    }
}

struct Panics;

impl EntityDecoder for Panics {
    fn id(&self) -> &str {
        "panics"
    }

    fn matches_frame(&self, _frame: &Frame) -> Result<bool, DecodeError> {
        panic!("decoder bug")
    }

    fn parse(&self, _frame: &Frame) -> Result<Option<StateFields>, DecodeError> {
        Ok(None)
    }
}

struct Fails;

impl EntityDecoder for Fails {
    fn id(&self) -> &str {
        "fails"
    }

    fn matches_frame(&self, _frame: &Frame) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn parse(&self, _frame: &Frame) -> Result<Option<StateFields>, DecodeError> {
        Err(DecodeError::Invalid("truncated payload".to_string()))
    }
}

#[test]
fn out_of_bounds_frame_is_dropped_and_next_frame_dispatched() {
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    dispatcher
        .add_channel(
            "bus",
            profile(r#"{"rx_header": [247], "rx_checksum": "add", "rx_min_length": 4}"#),
        )
        .unwrap();
    dispatcher.register_decoder(Arc::new(Always { id: "a", proxy: None }));

    dispatcher
        .feed("bus", &[0xF7, 0x01, 0xF8, 0xF7, 0x01, 0x02, 0xFA])
        .unwrap();

    let events = drain(&rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Event::StateUpdate { entity_id, fields, .. } if entity_id == "a" && fields["first"] == json!(1)
    ));
}

#[test]
fn failing_decoders_are_isolated() {
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    dispatcher.add_channel("bus", add_bus()).unwrap();
    dispatcher.register_decoder(Arc::new(Panics));
    dispatcher.register_decoder(Arc::new(Fails));
    dispatcher.register_decoder(Arc::new(Always { id: "a", proxy: None }));

    dispatcher.feed("bus", &[0xF7, 0x01, 0x02, 0xFA]).unwrap();

    let events = drain(&rx);
    let kinds: Vec<_> = events.iter().map(Event::kind).collect();
    assert_eq!(kinds, vec!["entity_error", "entity_error", "state_update"]);
    assert!(matches!(
        &events[0],
        Event::EntityError { entity_id, message, .. } if entity_id == "panics" && message.contains("decoder bug")
    ));
    assert!(matches!(
        &events[1],
        Event::EntityError { entity_id, message, .. } if entity_id == "fails" && message == "truncated payload"
    ));
}

#[test]
fn errors_alone_still_count_as_unmatched() {
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    dispatcher.add_channel("bus", add_bus()).unwrap();
    dispatcher.register_decoder(Arc::new(Fails));

    dispatcher.feed("bus", &[0xF7, 0x01, 0x02, 0xFA]).unwrap();

    let kinds: Vec<_> = drain(&rx).iter().map(Event::kind).collect();
    assert_eq!(kinds, vec!["entity_error", "unmatched_frame"]);
}

#[test]
fn state_proxy_reports_under_proxied_id() {
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    dispatcher.add_channel("bus", add_bus()).unwrap();
    dispatcher.register_decoder(Arc::new(Always {
        id: "relay_raw",
        proxy: Some("living_room_light"),
    }));

    dispatcher.feed("bus", &[0xF7, 0x01, 0x02, 0xFA]).unwrap();

    let events = drain(&rx);
    assert!(matches!(
        &events[0],
        Event::StateUpdate { entity_id, .. } if entity_id == "living_room_light"
    ));
    assert!(dispatcher.state("living_room_light").is_some());
    assert!(dispatcher.state("relay_raw").is_none());
}

#[test]
fn tx_delay_paces_commands() {
    let (tx, _rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    dispatcher
        .add_channel(
            "bus",
            profile(r#"{"rx_checksum": "add", "tx_delay_ms": 50}"#),
        )
        .unwrap();

    assert!(dispatcher
        .enqueue_command("bus", Bytes::from_static(&[0x01]), Priority::Low)
        .unwrap());
    assert!(!dispatcher
        .enqueue_command("bus", Bytes::from_static(&[0x02]), Priority::High)
        .unwrap());

    let t0 = Instant::now();
    assert_eq!(
        dispatcher.next_command_at("bus", t0).unwrap().as_deref(),
        Some(&[0x02][..])
    );
    assert!(dispatcher
        .next_command_at("bus", t0 + Duration::from_millis(10))
        .unwrap()
        .is_none());
    assert_eq!(
        dispatcher
            .next_command_at("bus", t0 + Duration::from_millis(50))
            .unwrap()
            .as_deref(),
        Some(&[0x01][..])
    );
    assert!(dispatcher
        .next_command_at("bus", t0 + Duration::from_millis(200))
        .unwrap()
        .is_none());
}

fn light(tx: homebus_frame::TxFraming) -> SchemaDecoder {
    let schema: EntitySchema = serde_json::from_value(json!({
        "id": "light_1",
        "state": {"offset": 0, "data": [48, 1]},
        "flags": {"on": {"offset": 2, "data": [1]}},
        "commands": {
            "on": {"data": [49, 1, 1], "ack": {"offset": 0, "data": [177, 1]}}
        }
    }))
    .unwrap();
    SchemaDecoder::new(schema, tx).unwrap()
}

#[test]
fn sent_command_is_acknowledged_once() {
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    let bus = add_bus();
    dispatcher.register_decoder(Arc::new(light(bus.tx.clone())));
    dispatcher.add_channel("bus", bus).unwrap();

    assert!(dispatcher
        .send_command("bus", "light_1", "on", None, Priority::High)
        .unwrap());
    let command = dispatcher.next_command("bus").unwrap().unwrap();
    // 0xF7 + 0x31 + 0x01 + 0x01 = 0x12A
    assert_eq!(command.as_ref(), &[0xF7, 0x31, 0x01, 0x01, 0x2A]);

    // 0xF7 + 0xB1 + 0x01 = 0x1A9
    let ack = [0xF7, 0xB1, 0x01, 0xA9];
    dispatcher.feed("bus", &ack).unwrap();
    let kinds: Vec<_> = drain(&rx).iter().map(Event::kind).collect();
    assert_eq!(kinds, vec!["unmatched_frame", "command_acked"]);

    dispatcher.feed("bus", &ack).unwrap();
    let kinds: Vec<_> = drain(&rx).iter().map(Event::kind).collect();
    assert_eq!(kinds, vec!["unmatched_frame"]);
}

#[test]
fn late_ack_is_not_reported() {
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    dispatcher.set_ack_timeout(Duration::from_millis(100));
    let bus = add_bus();
    dispatcher.register_decoder(Arc::new(light(bus.tx.clone())));
    dispatcher.add_channel("bus", bus).unwrap();

    let t0 = Instant::now();
    assert!(dispatcher
        .send_command_at("bus", "light_1", "on", None, Priority::High, t0)
        .unwrap());
    assert!(dispatcher.next_command_at("bus", t0).unwrap().is_some());

    let ack = [0xF7, 0xB1, 0x01, 0xA9];
    dispatcher
        .feed_at("bus", &ack, t0 + Duration::from_millis(150))
        .unwrap();
    let events = drain(&rx);
    let kinds: Vec<_> = events.iter().map(Event::kind).collect();
    assert_eq!(kinds, vec!["command_timed_out", "unmatched_frame"]);
    assert_eq!(
        events[0],
        Event::CommandTimedOut {
            channel: "bus".to_string(),
            entity_id: "light_1".to_string(),
            command: "on".to_string(),
        }
    );
    assert_eq!(dispatcher.pending_acks("bus"), 0);
}

#[test]
fn ack_within_timeout_still_counts() {
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    dispatcher.set_ack_timeout(Duration::from_millis(100));
    let bus = add_bus();
    dispatcher.register_decoder(Arc::new(light(bus.tx.clone())));
    dispatcher.add_channel("bus", bus).unwrap();

    let t0 = Instant::now();
    dispatcher
        .send_command_at("bus", "light_1", "on", None, Priority::High, t0)
        .unwrap();
    dispatcher
        .feed_at("bus", &[0xF7, 0xB1, 0x01, 0xA9], t0 + Duration::from_millis(100))
        .unwrap();
    let kinds: Vec<_> = drain(&rx).iter().map(Event::kind).collect();
    assert_eq!(kinds, vec!["unmatched_frame", "command_acked"]);
}

#[test]
fn idle_channel_expires_acks_when_polled_for_commands() {
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    dispatcher.set_ack_timeout(Duration::from_millis(100));
    let bus = add_bus();
    dispatcher.register_decoder(Arc::new(light(bus.tx.clone())));
    dispatcher.add_channel("bus", bus).unwrap();

    let t0 = Instant::now();
    dispatcher
        .send_command_at("bus", "light_1", "on", None, Priority::High, t0)
        .unwrap();
    assert!(dispatcher.next_command_at("bus", t0).unwrap().is_some());
    assert_eq!(dispatcher.pending_acks("bus"), 1);
    assert!(drain(&rx).is_empty());

    assert!(dispatcher
        .next_command_at("bus", t0 + Duration::from_millis(101))
        .unwrap()
        .is_none());
    let kinds: Vec<_> = drain(&rx).iter().map(Event::kind).collect();
    assert_eq!(kinds, vec!["command_timed_out"]);
    assert_eq!(dispatcher.pending_acks("bus"), 0);
}

#[test]
fn unknown_entity_and_command_are_errors() {
    let (tx, _rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    let bus = add_bus();
    dispatcher.register_decoder(Arc::new(light(bus.tx.clone())));
    dispatcher.add_channel("bus", bus).unwrap();

    assert!(dispatcher
        .send_command("bus", "nobody", "on", None, Priority::Low)
        .is_err());
    assert!(dispatcher
        .send_command("bus", "light_1", "dim", Some(&Value::from(3.0)), Priority::Low)
        .is_err());
    assert_eq!(dispatcher.pending_commands("bus"), 0);
}

fn mode_sum(_expression: &str, input: &ScriptInput<'_>) -> Result<serde_json::Value, String> {
    let mode = input
        .state
        .and_then(|s| s.pointer("/dev/mode"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    let sum: u64 = input.data.iter().map(|&b| u64::from(b)).sum();
    Ok(json!(sum + mode))
}

#[test]
fn script_checksum_sees_entity_state() {
    let config: ChannelConfig =
        serde_json::from_str(r#"{"rx_header": [170], "rx_checksum": {"script": "sum + dev.mode"}}"#)
            .unwrap();
    let evaluator: Arc<dyn ScriptEvaluator> = Arc::new(mode_sum);

    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    let profile = dispatcher
        .add_channel_config("bus", &config, Some(evaluator))
        .unwrap();
    let schema: EntitySchema = serde_json::from_value(json!({
        "id": "dev",
        "state": {"data": [1]},
        "fields": {"mode": {"offset": 1}}
    }))
    .unwrap();
    dispatcher.register_decoder(Arc::new(SchemaDecoder::new(schema, profile.tx).unwrap()));

    // Mode still unknown: plain sum.
    dispatcher.feed("bus", &[0xAA, 0x01, 0x01, 0xAC]).unwrap();
    assert!(matches!(
        &drain(&rx)[..],
        [Event::StateUpdate { fields, .. }] if fields["mode"] == json!(1)
    ));

    // Mode 1 now shifts the checksum by one.
    dispatcher.feed("bus", &[0xAA, 0x02, 0xAD]).unwrap();
    assert!(matches!(
        &drain(&rx)[..],
        [Event::UnmatchedFrame { frame, .. }] if frame.as_bytes() == [0xAA, 0x02, 0xAD]
    ));
}

#[test]
fn offloaded_channel_dispatches_after_flush() {
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = Dispatcher::new(tx);
    dispatcher
        .add_offloaded_channel(
            "bus",
            profile(r#"{"rx_header": [247], "rx_checksum": "add", "rx_timeout_ms": 5000}"#),
            &OffloadConfig::default(),
        )
        .unwrap();
    dispatcher.register_decoder(Arc::new(Always { id: "a", proxy: None }));

    dispatcher.feed("bus", &[0xF7, 0x01]).unwrap();
    dispatcher.feed("bus", &[0x02, 0xFA, 0xF7, 0x05, 0xFC]).unwrap();
    dispatcher.flush("bus", Duration::from_secs(5)).unwrap();

    let firsts: Vec<_> = drain(&rx)
        .into_iter()
        .filter_map(|event| match event {
            Event::StateUpdate { fields, .. } => Some(fields["first"].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(firsts, vec![json!(1), json!(5)]);
    assert!(!dispatcher.is_fallback("bus"));
}
