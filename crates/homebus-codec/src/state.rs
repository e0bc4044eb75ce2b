use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};

/// Mask applied before comparing pattern bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mask {
    /// One mask byte applied to every data byte.
    Byte(u8),
    /// A mask per data byte; missing trailing entries compare all bits.
    Bytes(Vec<u8>),
}

impl Mask {
    fn at(&self, index: usize) -> u8 {
        match self {
            Mask::Byte(m) => *m,
            Mask::Bytes(masks) => masks.get(index).copied().unwrap_or(0xFF),
        }
    }
}

/// Bit-masked byte pattern tested against a frame payload.
///
/// Used to recognize an entity's state frames and to spot a device's
/// acknowledgement of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSchema {
    pub data: Vec<u8>,
    #[serde(default)]
    pub mask: Option<Mask>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub inverted: bool,
}

impl StateSchema {
    pub fn new(offset: usize, data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            mask: None,
            offset,
            inverted: false,
        }
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    /// Test the pattern against a payload whose header is already stripped.
    ///
    /// A payload too short to hold the pattern never matches, inverted or not.
    pub fn matches(&self, payload: &[u8]) -> bool {
        let end = self.offset.saturating_add(self.data.len());
        if end > payload.len() {
            return false;
        }

        let window = &payload[self.offset..end];
        let equal = self
            .data
            .iter()
            .zip(window)
            .enumerate()
            .all(|(i, (&want, &got))| {
                let mask = self.mask.as_ref().map_or(0xFF, |m| m.at(i));
                want & mask == got & mask
            });

        equal != self.inverted
    }

    /// Check the pattern once at configuration time.
    pub fn validate(&self) -> Result<()> {
        if self.data.is_empty() {
            return Err(CodecError::EmptyPattern);
        }
        if let Some(Mask::Bytes(masks)) = &self.mask {
            if masks.len() > self.data.len() {
                return Err(CodecError::MaskTooLong {
                    mask: masks.len(),
                    data: self.data.len(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_at_offset() {
        let schema = StateSchema::new(1, [0x11, 0x01]);
        assert!(schema.matches(&[0x0E, 0x11, 0x01, 0x00]));
        assert!(!schema.matches(&[0x0E, 0x11, 0x02, 0x00]));
    }

    #[test]
    fn single_byte_mask_applies_everywhere() {
        let schema = StateSchema::new(0, [0x01, 0x10]).with_mask(Mask::Byte(0x0F));
        assert!(schema.matches(&[0xF1, 0x30]));
        assert!(!schema.matches(&[0xF2, 0x30]));
    }

    #[test]
    fn per_byte_mask_defaults_to_full_compare() {
        let schema = StateSchema::new(0, [0x80, 0x05]).with_mask(Mask::Bytes(vec![0x80]));
        assert!(schema.matches(&[0xFF, 0x05]));
        assert!(!schema.matches(&[0xFF, 0x06]));
        assert!(!schema.matches(&[0x7F, 0x05]));
    }

    #[test]
    fn inverted_negates_result() {
        let schema = StateSchema::new(0, [0x01]).inverted();
        assert!(!schema.matches(&[0x01]));
        assert!(schema.matches(&[0x00]));
    }

    #[test]
    fn short_payload_never_matches() {
        let schema = StateSchema::new(2, [0x01]);
        assert!(!schema.matches(&[0x01, 0x01]));
        assert!(!schema.clone().inverted().matches(&[0x01, 0x01]));
    }

    #[test]
    fn mask_deserializes_from_byte_or_list() {
        let single: StateSchema =
            serde_json::from_str(r#"{"data": [1], "mask": 15}"#).unwrap();
        assert_eq!(single.mask, Some(Mask::Byte(15)));

        let list: StateSchema =
            serde_json::from_str(r#"{"data": [1, 2], "mask": [15, 240], "offset": 2}"#).unwrap();
        assert_eq!(list.mask, Some(Mask::Bytes(vec![15, 240])));
        assert_eq!(list.offset, 2);
    }

    #[test]
    fn validate_rejects_bad_patterns() {
        assert!(matches!(
            StateSchema::new(0, Vec::<u8>::new()).validate(),
            Err(CodecError::EmptyPattern)
        ));
        assert!(matches!(
            StateSchema::new(0, [1])
                .with_mask(Mask::Bytes(vec![1, 2]))
                .validate(),
            Err(CodecError::MaskTooLong { .. })
        ));
    }
}
