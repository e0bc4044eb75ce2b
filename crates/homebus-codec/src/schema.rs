use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};

/// Widest integer field the plain decoder accepts.
pub const MAX_INTEGER_LENGTH: usize = 8;

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// How raw field bytes are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeKind {
    /// Unsigned big-endian integer, optionally two's complement.
    #[default]
    None,
    /// Two decimal digits per byte.
    Bcd,
    /// One character per byte.
    Ascii,
    /// Single byte: 7-bit magnitude, `0x80` adds one half, `0x40` is the sign.
    SignedHalfUnit,
}

impl DecodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecodeKind::None => "none",
            DecodeKind::Bcd => "bcd",
            DecodeKind::Ascii => "ascii",
            DecodeKind::SignedHalfUnit => "signed_half_unit",
        }
    }
}

/// How an application value is turned into field bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeKind {
    #[default]
    None,
    Bcd,
    Ascii,
    SignedHalfUnit,
    /// Scale by `multiply_factor`, then pack as a plain integer.
    Multiply,
    /// Shift by `add_offset`, then pack as a plain integer.
    AddOffset,
}

impl EncodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EncodeKind::None => "none",
            EncodeKind::Bcd => "bcd",
            EncodeKind::Ascii => "ascii",
            EncodeKind::SignedHalfUnit => "signed_half_unit",
            EncodeKind::Multiply => "multiply",
            EncodeKind::AddOffset => "add_offset",
        }
    }
}

fn default_length() -> usize {
    1
}

/// Where a value lives in a frame payload and how to read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSchema {
    /// Byte offset into the payload (header already stripped).
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_length")]
    pub length: usize,
    /// Decimal digits kept after decoding. Zero leaves the value untouched.
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub endian: Endian,
    #[serde(default)]
    pub decode: DecodeKind,
}

impl Default for ValueSchema {
    fn default() -> Self {
        Self {
            offset: 0,
            length: default_length(),
            precision: 0,
            signed: false,
            endian: Endian::Big,
            decode: DecodeKind::None,
        }
    }
}

impl ValueSchema {
    /// Schema for a single plain byte at `offset`.
    pub fn at(offset: usize) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn with_decode(mut self, decode: DecodeKind) -> Self {
        self.decode = decode;
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn little_endian(mut self) -> Self {
        self.endian = Endian::Little;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    /// Check the schema once at configuration time.
    pub fn validate(&self) -> Result<()> {
        let (min, max) = match self.decode {
            DecodeKind::None => (1, MAX_INTEGER_LENGTH),
            DecodeKind::SignedHalfUnit => (1, 1),
            DecodeKind::Bcd | DecodeKind::Ascii => (1, usize::MAX),
        };
        if self.length < min || self.length > max {
            return Err(CodecError::InvalidLength {
                kind: self.decode.as_str(),
                length: self.length,
                min,
                max,
            });
        }
        Ok(())
    }
}

/// How to turn a value into field bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeSchema {
    #[serde(default)]
    pub value_encode: EncodeKind,
    /// Output width for plain integer packing. BCD output is sized by magnitude.
    #[serde(default = "default_length")]
    pub length: usize,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub endian: Endian,
    #[serde(default)]
    pub multiply_factor: Option<f64>,
    #[serde(default)]
    pub add_offset: Option<f64>,
}

impl Default for EncodeSchema {
    fn default() -> Self {
        Self {
            value_encode: EncodeKind::None,
            length: default_length(),
            signed: false,
            endian: Endian::Big,
            multiply_factor: None,
            add_offset: None,
        }
    }
}

impl EncodeSchema {
    pub fn new(value_encode: EncodeKind) -> Self {
        Self {
            value_encode,
            ..Self::default()
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn little_endian(mut self) -> Self {
        self.endian = Endian::Little;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.multiply_factor = Some(factor);
        self
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.add_offset = Some(offset);
        self
    }

    /// Check the schema once at configuration time.
    pub fn validate(&self) -> Result<()> {
        match self.value_encode {
            EncodeKind::Multiply if self.multiply_factor.is_none() => {
                return Err(CodecError::MissingParameter("multiply", "multiply_factor"));
            }
            EncodeKind::AddOffset if self.add_offset.is_none() => {
                return Err(CodecError::MissingParameter("add_offset", "add_offset"));
            }
            EncodeKind::None | EncodeKind::Multiply | EncodeKind::AddOffset
                if self.length == 0 || self.length > MAX_INTEGER_LENGTH =>
            {
                return Err(CodecError::InvalidLength {
                    kind: self.value_encode.as_str(),
                    length: self.length,
                    min: 1,
                    max: MAX_INTEGER_LENGTH,
                });
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_schema_defaults_from_json() {
        let schema: ValueSchema = serde_json::from_str(r#"{"offset": 3}"#).unwrap();
        assert_eq!(schema.offset, 3);
        assert_eq!(schema.length, 1);
        assert_eq!(schema.endian, Endian::Big);
        assert_eq!(schema.decode, DecodeKind::None);
        assert!(!schema.signed);
    }

    #[test]
    fn value_schema_parses_snake_case_kinds() {
        let schema: ValueSchema = serde_json::from_str(
            r#"{"offset": 1, "decode": "signed_half_unit", "signed": true, "endian": "little"}"#,
        )
        .unwrap();
        assert_eq!(schema.decode, DecodeKind::SignedHalfUnit);
        assert_eq!(schema.endian, Endian::Little);
        assert!(schema.signed);
    }

    #[test]
    fn half_unit_must_be_one_byte() {
        let schema = ValueSchema::at(0)
            .with_decode(DecodeKind::SignedHalfUnit)
            .with_length(2);
        assert!(matches!(
            schema.validate(),
            Err(CodecError::InvalidLength { length: 2, .. })
        ));
    }

    #[test]
    fn integer_length_is_bounded() {
        assert!(ValueSchema::at(0).with_length(8).validate().is_ok());
        assert!(ValueSchema::at(0).with_length(9).validate().is_err());
        assert!(ValueSchema::at(0).with_length(0).validate().is_err());
        assert!(ValueSchema::at(0)
            .with_decode(DecodeKind::Ascii)
            .with_length(16)
            .validate()
            .is_ok());
    }

    #[test]
    fn multiply_requires_factor() {
        let err = EncodeSchema::new(EncodeKind::Multiply).validate().unwrap_err();
        assert!(matches!(err, CodecError::MissingParameter("multiply", _)));
        assert!(EncodeSchema::new(EncodeKind::Multiply)
            .with_factor(2.0)
            .validate()
            .is_ok());
    }

    #[test]
    fn add_offset_requires_offset() {
        assert!(EncodeSchema::new(EncodeKind::AddOffset).validate().is_err());
        assert!(EncodeSchema::new(EncodeKind::AddOffset)
            .with_offset(-40.0)
            .validate()
            .is_ok());
    }
}
