//! Built-in and scripted frame checksums.
//!
//! Every algorithm works over `header ++ data` except the `_no_header` and
//! vendor variants, which only see `data`. Verification always re-derives the
//! checksum and compares; it never trusts bytes parsed out of the frame.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ChecksumError, ConfigError};

/// Width of a checksum slot in the channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumWidth {
    One,
    Two,
}

impl ChecksumWidth {
    pub fn bytes(self) -> usize {
        match self {
            ChecksumWidth::One => 1,
            ChecksumWidth::Two => 2,
        }
    }
}

/// Built-in checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `sum(header ++ data) & 0xFF`.
    Add,
    /// Running XOR over `header ++ data`.
    Xor,
    /// `sum(data) & 0xFF`.
    AddNoHeader,
    /// Running XOR over `data`.
    XorNoHeader,
    /// XOR seeded with `0xB0`, flipped by `0x80` when `data[0] < 0x7C`.
    VendorRx,
    /// XOR seeded with `0x00`, always flipped by `0x80`.
    VendorTx,
    /// No checksum bytes at all.
    None,
    /// Two bytes: `[xor, sum + xor]` over `header ++ data`.
    XorAdd,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        let builtin = match name {
            "add" => Builtin::Add,
            "xor" => Builtin::Xor,
            "add_no_header" => Builtin::AddNoHeader,
            "xor_no_header" => Builtin::XorNoHeader,
            "vendor_rx" | "samsung_rx" => Builtin::VendorRx,
            "vendor_tx" | "samsung_tx" => Builtin::VendorTx,
            "none" => Builtin::None,
            "xor_add" => Builtin::XorAdd,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Add => "add",
            Builtin::Xor => "xor",
            Builtin::AddNoHeader => "add_no_header",
            Builtin::XorNoHeader => "xor_no_header",
            Builtin::VendorRx => "vendor_rx",
            Builtin::VendorTx => "vendor_tx",
            Builtin::None => "none",
            Builtin::XorAdd => "xor_add",
        }
    }

    pub fn width(self) -> ChecksumWidth {
        match self {
            Builtin::XorAdd => ChecksumWidth::Two,
            _ => ChecksumWidth::One,
        }
    }

    fn compute(self, header: &[u8], data: &[u8]) -> ChecksumBytes {
        let all = || header.iter().chain(data).copied();
        match self {
            Builtin::Add => ChecksumBytes::one(all().fold(0u8, u8::wrapping_add)),
            Builtin::Xor => ChecksumBytes::one(all().fold(0u8, |acc, b| acc ^ b)),
            Builtin::AddNoHeader => {
                ChecksumBytes::one(data.iter().copied().fold(0u8, u8::wrapping_add))
            }
            Builtin::XorNoHeader => ChecksumBytes::one(data.iter().fold(0u8, |acc, b| acc ^ b)),
            Builtin::VendorRx => {
                let mut crc = data.iter().fold(0xB0u8, |acc, b| acc ^ b);
                if data.first().is_some_and(|&b| b < 0x7C) {
                    crc ^= 0x80;
                }
                ChecksumBytes::one(crc)
            }
            Builtin::VendorTx => ChecksumBytes::one(data.iter().fold(0u8, |acc, b| acc ^ b) ^ 0x80),
            Builtin::None => ChecksumBytes::empty(),
            Builtin::XorAdd => {
                let (sum, xor) = all().fold((0u32, 0u8), |(sum, xor), b| {
                    (sum.wrapping_add(u32::from(b)), xor ^ b)
                });
                let sum = sum.wrapping_add(u32::from(xor));
                ChecksumBytes::two(xor, (sum & 0xFF) as u8)
            }
        }
    }
}

/// Checksum bytes, at most two, without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumBytes {
    buf: [u8; 2],
    len: usize,
}

impl ChecksumBytes {
    pub fn empty() -> Self {
        Self { buf: [0; 2], len: 0 }
    }

    pub fn one(b: u8) -> Self {
        Self { buf: [b, 0], len: 1 }
    }

    pub fn two(a: u8, b: u8) -> Self {
        Self { buf: [a, b], len: 2 }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Checksum setting as it appears in a channel configuration.
///
/// Either a built-in name (`"add"`) or `{ "script": "<expression>" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChecksumSetting {
    Name(String),
    Script { script: String },
}

impl ChecksumSetting {
    pub fn name(name: impl Into<String>) -> Self {
        ChecksumSetting::Name(name.into())
    }

    pub fn script(expression: impl Into<String>) -> Self {
        ChecksumSetting::Script {
            script: expression.into(),
        }
    }
}

/// A resolved checksum algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumSpec {
    Builtin(Builtin),
    Script(String),
}

/// Input handed to a script checksum.
///
/// `data` is `header ++ data`, i.e. every frame byte before the checksum.
#[derive(Debug, Clone, Copy)]
pub struct ScriptInput<'a> {
    pub data: &'a [u8],
    pub len: usize,
    /// Read-only snapshot of live entity state, for checksums that depend on
    /// a device mode.
    pub state: Option<&'a serde_json::Value>,
}

impl ScriptInput<'_> {
    /// The input as a JSON object: `{"data": [...], "len": n, "state": ...}`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("data".to_string(), serde_json::Value::from(self.data.to_vec()));
        obj.insert("len".to_string(), serde_json::Value::from(self.len));
        if let Some(state) = self.state {
            obj.insert("state".to_string(), state.clone());
        }
        serde_json::Value::Object(obj)
    }
}

/// Evaluates user checksum expressions.
///
/// Implementations must be side-effect free. The return value must be a number
/// for 1-byte checksums or a two-element numeric array for 2-byte checksums;
/// anything else is treated as a mismatch.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(
        &self,
        expression: &str,
        input: &ScriptInput<'_>,
    ) -> std::result::Result<serde_json::Value, String>;
}

impl<F> ScriptEvaluator for F
where
    F: Fn(&str, &ScriptInput<'_>) -> std::result::Result<serde_json::Value, String> + Send + Sync,
{
    fn evaluate(
        &self,
        expression: &str,
        input: &ScriptInput<'_>,
    ) -> std::result::Result<serde_json::Value, String> {
        self(expression, input)
    }
}

/// A checksum bound to its slot width and, for scripts, its evaluator.
#[derive(Clone)]
pub struct Checksum {
    spec: ChecksumSpec,
    width: ChecksumWidth,
    evaluator: Option<Arc<dyn ScriptEvaluator>>,
}

impl Checksum {
    /// Resolve a configuration setting for a slot of the given width.
    pub fn resolve(
        setting: &ChecksumSetting,
        width: ChecksumWidth,
        evaluator: Option<&Arc<dyn ScriptEvaluator>>,
    ) -> std::result::Result<Self, ConfigError> {
        match setting {
            ChecksumSetting::Name(name) => {
                let builtin = Builtin::from_name(name)
                    .ok_or_else(|| ConfigError::UnknownChecksum(name.clone()))?;
                if builtin != Builtin::None && builtin.width() != width {
                    return Err(ConfigError::ChecksumWidth {
                        name: builtin.name(),
                        expected: width.bytes(),
                        actual: builtin.width().bytes(),
                    });
                }
                Ok(Self::builtin(builtin))
            }
            ChecksumSetting::Script { script } => {
                let evaluator = evaluator.ok_or(ConfigError::MissingEvaluator)?;
                Ok(Self::script(script.clone(), width, Arc::clone(evaluator)))
            }
        }
    }

    pub fn builtin(builtin: Builtin) -> Self {
        Self {
            spec: ChecksumSpec::Builtin(builtin),
            width: builtin.width(),
            evaluator: None,
        }
    }

    pub fn none() -> Self {
        Self::builtin(Builtin::None)
    }

    pub fn script(
        expression: impl Into<String>,
        width: ChecksumWidth,
        evaluator: Arc<dyn ScriptEvaluator>,
    ) -> Self {
        Self {
            spec: ChecksumSpec::Script(expression.into()),
            width,
            evaluator: Some(evaluator),
        }
    }

    pub fn spec(&self) -> &ChecksumSpec {
        &self.spec
    }

    pub fn is_script(&self) -> bool {
        matches!(self.spec, ChecksumSpec::Script(_))
    }

    pub fn is_none(&self) -> bool {
        self.spec == ChecksumSpec::Builtin(Builtin::None)
    }

    /// Number of checksum bytes on the wire.
    pub fn len(&self) -> usize {
        if self.is_none() {
            0
        } else {
            self.width.bytes()
        }
    }

    /// Compute the checksum for `header ++ data`.
    pub fn compute(
        &self,
        header: &[u8],
        data: &[u8],
        state: Option<&serde_json::Value>,
    ) -> std::result::Result<ChecksumBytes, ChecksumError> {
        match &self.spec {
            ChecksumSpec::Builtin(builtin) => Ok(builtin.compute(header, data)),
            ChecksumSpec::Script(expression) => self.run_script(expression, header, data, state),
        }
    }

    /// Re-derive the checksum and compare it to `expected`.
    ///
    /// Script failures count as a mismatch.
    pub fn verify(
        &self,
        header: &[u8],
        data: &[u8],
        expected: &[u8],
        state: Option<&serde_json::Value>,
    ) -> bool {
        match self.compute(header, data, state) {
            Ok(computed) => computed.as_slice() == expected,
            Err(err) => {
                tracing::debug!(error = %err, "checksum rejected");
                false
            }
        }
    }

    fn run_script(
        &self,
        expression: &str,
        header: &[u8],
        data: &[u8],
        state: Option<&serde_json::Value>,
    ) -> std::result::Result<ChecksumBytes, ChecksumError> {
        let evaluator = self
            .evaluator
            .as_ref()
            .ok_or_else(|| ChecksumError::Script("no evaluator".to_string()))?;

        let mut all = Vec::with_capacity(header.len() + data.len());
        all.extend_from_slice(header);
        all.extend_from_slice(data);
        let input = ScriptInput {
            data: &all,
            len: all.len(),
            state,
        };

        let result = evaluator
            .evaluate(expression, &input)
            .map_err(ChecksumError::Script)?;

        match self.width {
            ChecksumWidth::One => script_byte(&result)
                .map(ChecksumBytes::one)
                .ok_or_else(|| malformed(&result, "a number")),
            ChecksumWidth::Two => match result.as_array().map(Vec::as_slice) {
                Some([a, b]) => match (script_byte(a), script_byte(b)) {
                    (Some(a), Some(b)) => Ok(ChecksumBytes::two(a, b)),
                    _ => Err(malformed(&result, "two numbers")),
                },
                _ => Err(malformed(&result, "two numbers")),
            },
        }
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checksum")
            .field("spec", &self.spec)
            .field("width", &self.width)
            .field("evaluator", &self.evaluator.as_ref().map(|_| "<script>"))
            .finish()
    }
}

// Script results must already be a byte value: 0..=255, integral.
fn script_byte(value: &serde_json::Value) -> Option<u8> {
    if let Some(n) = value.as_u64() {
        return u8::try_from(n).ok();
    }
    if value.is_i64() {
        return None;
    }
    let n = value.as_f64()?;
    if n.is_finite() && n.fract() == 0.0 && (0.0..=255.0).contains(&n) {
        Some(n as u8)
    } else {
        None
    }
}

fn malformed(found: &serde_json::Value, expected: &'static str) -> ChecksumError {
    ChecksumError::MalformedResult {
        found: found.to_string(),
        expected,
    }
}
