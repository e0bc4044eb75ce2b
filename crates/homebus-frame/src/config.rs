use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checksum::{Checksum, ChecksumSetting, ChecksumWidth, ScriptEvaluator};
use crate::error::ConfigError;
use crate::tx::TxFraming;

/// Default idle gap after which a partial frame is discarded.
pub const DEFAULT_RX_TIMEOUT_MS: u64 = 10;

/// Default minimum interval between two outbound commands.
pub const DEFAULT_TX_DELAY_MS: u64 = 50;

/// Per-channel framing configuration as supplied by a configuration loader.
///
/// Resolve it once with [`ChannelConfig::resolve`]; the resolved
/// [`ChannelProfile`] is what the reassembler and dispatcher consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub rx_header: Vec<u8>,
    pub rx_footer: Vec<u8>,
    pub rx_checksum: Option<ChecksumSetting>,
    pub rx_checksum2: Option<ChecksumSetting>,
    /// Fixed total frame length, header and footer included.
    pub rx_length: Option<usize>,
    pub rx_min_length: Option<usize>,
    pub rx_max_length: Option<usize>,
    pub rx_timeout_ms: u64,
    /// Bytes that may start a frame, used to skip garbage quickly.
    pub rx_valid_headers: Option<Vec<u8>>,
    pub tx_header: Vec<u8>,
    pub tx_footer: Vec<u8>,
    pub tx_checksum: Option<ChecksumSetting>,
    pub tx_checksum2: Option<ChecksumSetting>,
    pub tx_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            rx_header: Vec::new(),
            rx_footer: Vec::new(),
            rx_checksum: None,
            rx_checksum2: None,
            rx_length: None,
            rx_min_length: None,
            rx_max_length: None,
            rx_timeout_ms: DEFAULT_RX_TIMEOUT_MS,
            rx_valid_headers: None,
            tx_header: Vec::new(),
            tx_footer: Vec::new(),
            tx_checksum: None,
            tx_checksum2: None,
            tx_delay_ms: DEFAULT_TX_DELAY_MS,
        }
    }
}

impl ChannelConfig {
    /// Resolve the configuration into an immutable profile.
    ///
    /// Unknown checksum names, width mismatches, script checksums without an
    /// evaluator and channels that cannot delimit frames are rejected here,
    /// never per frame.
    pub fn resolve(
        &self,
        evaluator: Option<Arc<dyn ScriptEvaluator>>,
    ) -> std::result::Result<ChannelProfile, ConfigError> {
        let evaluator = evaluator.as_ref();
        let rx_checksum = resolve_pair(&self.rx_checksum, &self.rx_checksum2, evaluator, "rx")?;
        let tx_checksum = resolve_pair(&self.tx_checksum, &self.tx_checksum2, evaluator, "tx")?;

        if let (Some(min), Some(max)) = (self.rx_min_length, self.rx_max_length) {
            if min > max {
                return Err(ConfigError::InvalidBounds { min, max });
            }
        }

        let extraction = match self.rx_length {
            Some(length) => {
                let minimum =
                    self.rx_header.len() + rx_checksum.len() + self.rx_footer.len() + 1;
                if length < minimum {
                    return Err(ConfigError::LengthTooSmall { length, minimum });
                }
                Extraction::FixedLength(length)
            }
            None if !self.rx_footer.is_empty() => Extraction::Footer,
            None if !rx_checksum.is_none() => Extraction::Checksum,
            None => return Err(ConfigError::Unframeable),
        };

        let rx = RxFraming {
            header: self.rx_header.clone(),
            footer: self.rx_footer.clone(),
            checksum: rx_checksum,
            extraction,
            min_length: self.rx_min_length,
            max_length: self.rx_max_length,
            timeout: Duration::from_millis(self.rx_timeout_ms),
            valid_headers: self.rx_valid_headers.as_deref().map(StartBytes::from_slice),
        };
        let tx = TxFraming::new(
            self.tx_header.clone(),
            self.tx_footer.clone(),
            tx_checksum,
            Duration::from_millis(self.tx_delay_ms),
        );

        Ok(ChannelProfile { rx, tx })
    }
}

fn resolve_pair(
    one: &Option<ChecksumSetting>,
    two: &Option<ChecksumSetting>,
    evaluator: Option<&Arc<dyn ScriptEvaluator>>,
    side: &'static str,
) -> std::result::Result<Checksum, ConfigError> {
    match (one, two) {
        (_, Some(two)) => {
            if one.is_some() {
                tracing::debug!(side, "both 1-byte and 2-byte checksums set, using 2-byte");
            }
            Checksum::resolve(two, ChecksumWidth::Two, evaluator)
        }
        (Some(one), None) => Checksum::resolve(one, ChecksumWidth::One, evaluator),
        (None, None) => Ok(Checksum::none()),
    }
}

/// How the reassembler decides where a frame ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// Every frame has exactly this many bytes.
    FixedLength(usize),
    /// A frame ends at the first footer occurrence whose checksum verifies.
    Footer,
    /// A frame ends at the first length whose trailing checksum verifies.
    Checksum,
}

/// Set of bytes that may start a frame.
#[derive(Clone, PartialEq, Eq)]
pub struct StartBytes([bool; 256]);

impl StartBytes {
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut set = [false; 256];
        for &b in bytes {
            set[usize::from(b)] = true;
        }
        Self(set)
    }

    pub fn contains(&self, byte: u8) -> bool {
        self.0[usize::from(byte)]
    }
}

impl std::fmt::Debug for StartBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries((0..=255u8).filter(|&b| self.contains(b)))
            .finish()
    }
}

/// Resolved receive-side framing.
#[derive(Debug, Clone)]
pub struct RxFraming {
    pub(crate) header: Vec<u8>,
    pub(crate) footer: Vec<u8>,
    pub(crate) checksum: Checksum,
    pub(crate) extraction: Extraction,
    pub(crate) min_length: Option<usize>,
    pub(crate) max_length: Option<usize>,
    pub(crate) timeout: Duration,
    pub(crate) valid_headers: Option<StartBytes>,
}

impl RxFraming {
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn footer(&self) -> &[u8] {
        &self.footer
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn extraction(&self) -> Extraction {
        self.extraction
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a framed length passes `rx_min_length`/`rx_max_length`.
    pub fn accepts_length(&self, len: usize) -> bool {
        self.min_length.is_none_or(|min| len >= min) && self.max_length.is_none_or(|max| len <= max)
    }

    /// Whether `byte` can begin a frame.
    pub(crate) fn is_start_byte(&self, byte: u8) -> bool {
        if let Some(&first) = self.header.first() {
            return byte == first;
        }
        self.valid_headers
            .as_ref()
            .is_none_or(|valid| valid.contains(byte))
    }
}

/// A fully resolved channel: how to read frames and how to write commands.
#[derive(Debug, Clone)]
pub struct ChannelProfile {
    pub rx: RxFraming,
    pub tx: TxFraming,
}

impl ChannelProfile {
    /// Whether any checksum on this channel is a script that may read entity state.
    pub fn uses_script(&self) -> bool {
        self.rx.checksum.is_script() || self.tx.checksum().is_script()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{Builtin, ChecksumSpec};

    fn parse(json: &str) -> ChannelConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config = parse(r#"{"rx_header": [247], "rx_checksum": "add"}"#);
        assert_eq!(config.rx_timeout_ms, DEFAULT_RX_TIMEOUT_MS);
        assert_eq!(config.tx_delay_ms, DEFAULT_TX_DELAY_MS);
        assert!(config.rx_footer.is_empty());
    }

    #[test]
    fn resolves_checksum_driven_channel() {
        let profile = parse(r#"{"rx_header": [247], "rx_checksum": "add"}"#)
            .resolve(None)
            .unwrap();
        assert_eq!(profile.rx.extraction(), Extraction::Checksum);
        assert_eq!(profile.rx.checksum().len(), 1);
        assert_eq!(profile.rx.timeout(), Duration::from_millis(10));
    }

    #[test]
    fn two_byte_checksum_wins() {
        let profile = parse(
            r#"{"rx_header": [247], "rx_checksum": "add", "rx_checksum2": "xor_add", "rx_footer": [238]}"#,
        )
        .resolve(None)
        .unwrap();
        assert_eq!(
            profile.rx.checksum().spec(),
            &ChecksumSpec::Builtin(Builtin::XorAdd)
        );
        assert_eq!(profile.rx.checksum().len(), 2);
        assert_eq!(profile.rx.extraction(), Extraction::Footer);
    }

    #[test]
    fn fixed_length_takes_precedence() {
        let profile = parse(r#"{"rx_header": [176], "rx_footer": [13], "rx_length": 8}"#)
            .resolve(None)
            .unwrap();
        assert_eq!(profile.rx.extraction(), Extraction::FixedLength(8));
    }

    #[test]
    fn fixed_length_must_fit_frame_parts() {
        let err = parse(r#"{"rx_header": [176, 1], "rx_checksum": "add", "rx_length": 3}"#)
            .resolve(None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::LengthTooSmall { length: 3, minimum: 4 }));
    }

    #[test]
    fn unknown_checksum_fails_fast() {
        let err = parse(r#"{"rx_header": [247], "rx_checksum": "crc64"}"#)
            .resolve(None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownChecksum(_)));

        let err = parse(r#"{"rx_header": [247], "rx_checksum": "add", "tx_checksum": "nope"}"#)
            .resolve(None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownChecksum(_)));
    }

    #[test]
    fn channel_without_delimiter_is_rejected() {
        let err = parse(r#"{"rx_header": [247]}"#).resolve(None).unwrap_err();
        assert!(matches!(err, ConfigError::Unframeable));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = parse(r#"{"rx_checksum": "xor", "rx_min_length": 9, "rx_max_length": 4}"#)
            .resolve(None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBounds { min: 9, max: 4 }));
    }

    #[test]
    fn accepts_length_honors_bounds() {
        let profile = parse(r#"{"rx_checksum": "xor", "rx_min_length": 4, "rx_max_length": 6}"#)
            .resolve(None)
            .unwrap();
        assert!(!profile.rx.accepts_length(3));
        assert!(profile.rx.accepts_length(4));
        assert!(profile.rx.accepts_length(6));
        assert!(!profile.rx.accepts_length(7));
    }

    #[test]
    fn start_bytes_follow_header_then_valid_set() {
        let with_header = parse(r#"{"rx_header": [247], "rx_checksum": "add"}"#)
            .resolve(None)
            .unwrap();
        assert!(with_header.rx.is_start_byte(0xF7));
        assert!(!with_header.rx.is_start_byte(0x00));

        let with_set = parse(r#"{"rx_checksum": "add", "rx_valid_headers": [176, 177]}"#)
            .resolve(None)
            .unwrap();
        assert!(with_set.rx.is_start_byte(0xB0));
        assert!(!with_set.rx.is_start_byte(0xB2));

        let open = parse(r#"{"rx_checksum": "add"}"#).resolve(None).unwrap();
        assert!(open.rx.is_start_byte(0x42));
    }
}
