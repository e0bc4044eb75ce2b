use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::{DecodeKind, EncodeKind, EncodeSchema, Endian, ValueSchema};

/// An application-level field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Number(_) => None,
            Value::Text(s) => Some(s),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Text(s) => serde_json::Value::String(s),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                serde_json::Value::from(n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Decode one field from a frame payload.
///
/// Returns `None` when the field does not fit inside `bytes`; the surrounding
/// frame is still usable.
pub fn decode(bytes: &[u8], schema: &ValueSchema) -> Option<Value> {
    let end = schema.offset.saturating_add(schema.length);
    if schema.length == 0 || end > bytes.len() {
        tracing::warn!(
            offset = schema.offset,
            length = schema.length,
            available = bytes.len(),
            "field out of bounds"
        );
        return None;
    }

    let mut field = bytes[schema.offset..end].to_vec();
    if schema.endian == Endian::Little {
        field.reverse();
    }

    let value = match schema.decode {
        DecodeKind::Ascii => return Some(Value::Text(field.iter().map(|&b| b as char).collect())),
        DecodeKind::None => decode_integer(&field, schema.signed),
        DecodeKind::Bcd => decode_bcd(&field),
        DecodeKind::SignedHalfUnit => {
            if field.len() != 1 {
                tracing::warn!(length = field.len(), "signed_half_unit needs exactly one byte");
                return None;
            }
            decode_half_unit(field[0], schema.signed)
        }
    };

    Some(Value::Number(round_to(value, schema.precision)))
}

fn decode_integer(field: &[u8], signed: bool) -> f64 {
    let mut value = field.iter().fold(0f64, |acc, &b| acc * 256.0 + f64::from(b));
    if signed {
        let bits = (field.len() * 8) as i32;
        if value >= 2f64.powi(bits - 1) {
            value -= 2f64.powi(bits);
        }
    }
    value
}

fn decode_bcd(field: &[u8]) -> f64 {
    field.iter().fold(0f64, |acc, &b| {
        acc * 100.0 + f64::from(b >> 4) * 10.0 + f64::from(b & 0x0F)
    })
}

fn decode_half_unit(byte: u8, signed: bool) -> f64 {
    let mut value = f64::from(byte & half_unit_mask(signed));
    if byte & 0x80 != 0 {
        value += 0.5;
    }
    if signed && byte & 0x40 != 0 {
        value = -value;
    }
    value
}

// With a sign bit in play the magnitude is six bits wide.
fn half_unit_mask(signed: bool) -> u8 {
    if signed {
        0x3F
    } else {
        0x7F
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    if precision == 0 {
        return value;
    }
    let scale = 10f64.powi(precision as i32);
    (value * scale).round() / scale
}

/// Encode a value into field bytes.
///
/// Unsupported combinations (text with a numeric encoding, characters outside
/// one byte) produce an empty vector; the caller decides how loudly to fail.
pub fn encode(value: &Value, schema: &EncodeSchema) -> Vec<u8> {
    let mut out = match value {
        Value::Text(text) => {
            if schema.value_encode != EncodeKind::Ascii {
                return Vec::new();
            }
            match encode_ascii(text) {
                Some(bytes) => bytes,
                None => return Vec::new(),
            }
        }
        Value::Number(n) => encode_number(*n, schema),
    };

    if schema.endian == Endian::Little {
        out.reverse();
    }
    out
}

fn encode_ascii(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}

fn encode_number(mut n: f64, schema: &EncodeSchema) -> Vec<u8> {
    match schema.value_encode {
        EncodeKind::Multiply => n *= schema.multiply_factor.unwrap_or(1.0),
        EncodeKind::AddOffset => n += schema.add_offset.unwrap_or(0.0),
        _ => {}
    }

    match schema.value_encode {
        EncodeKind::Bcd => encode_bcd(n),
        EncodeKind::SignedHalfUnit => vec![encode_half_unit(n, schema.signed)],
        EncodeKind::Ascii => encode_ascii(&Value::Number(n).to_string()).unwrap_or_default(),
        EncodeKind::None | EncodeKind::Multiply | EncodeKind::AddOffset => {
            pack_integer(n, schema.length)
        }
    }
}

fn encode_bcd(n: f64) -> Vec<u8> {
    let mut remaining = n.abs().trunc() as u64;
    let mut out = Vec::new();
    loop {
        let pair = (remaining % 100) as u8;
        out.push(((pair / 10) << 4) | (pair % 10));
        remaining /= 100;
        if remaining == 0 {
            break;
        }
    }
    out.reverse();
    out
}

fn encode_half_unit(n: f64, signed: bool) -> u8 {
    let magnitude = n.abs();
    let whole = magnitude.floor();
    let mut byte = (whole as u8) & half_unit_mask(signed);
    if magnitude - whole == 0.5 {
        byte |= 0x80;
    }
    if signed && n < 0.0 {
        byte |= 0x40;
    }
    byte
}

fn pack_integer(n: f64, length: usize) -> Vec<u8> {
    let mut remaining = n.trunc() as i64;
    let mut out = Vec::with_capacity(length);
    for _ in 0..length {
        out.push((remaining & 0xFF) as u8);
        remaining >>= 8;
    }
    out.reverse();
    out
}
