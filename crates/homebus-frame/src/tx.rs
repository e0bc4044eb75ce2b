use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum::Checksum;
use crate::error::ChecksumError;

/// Resolved transmit-side framing.
///
/// Wire format of an outbound command:
/// ```text
/// ┌─────────────┬──────────────┬───────────────┬─────────────┐
/// │ tx_header   │ data         │ checksum      │ tx_footer   │
/// │ (0..n B)    │ (from codec) │ (0, 1 or 2 B) │ (0..n B)    │
/// └─────────────┴──────────────┴───────────────┴─────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct TxFraming {
    header: Vec<u8>,
    footer: Vec<u8>,
    checksum: Checksum,
    delay: Duration,
}

impl TxFraming {
    pub fn new(header: Vec<u8>, footer: Vec<u8>, checksum: Checksum, delay: Duration) -> Self {
        Self {
            header,
            footer,
            checksum,
            delay,
        }
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn footer(&self) -> &[u8] {
        &self.footer
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Minimum interval between two outbound commands.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wrap command data into a complete outbound frame.
    pub fn frame(
        &self,
        data: &[u8],
        state: Option<&serde_json::Value>,
    ) -> std::result::Result<Bytes, ChecksumError> {
        let mut dst = BytesMut::new();
        self.encode_into(data, state, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Encode into an existing buffer, as the stream codec does.
    pub fn encode_into(
        &self,
        data: &[u8],
        state: Option<&serde_json::Value>,
        dst: &mut BytesMut,
    ) -> std::result::Result<(), ChecksumError> {
        let checksum = self.checksum.compute(&self.header, data, state)?;
        dst.reserve(self.header.len() + data.len() + checksum.as_slice().len() + self.footer.len());
        dst.put_slice(&self.header);
        dst.put_slice(data);
        dst.put_slice(checksum.as_slice());
        dst.put_slice(&self.footer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Builtin;

    fn framing(checksum: Checksum) -> TxFraming {
        TxFraming::new(vec![0xF7], vec![0xEE], checksum, Duration::from_millis(50))
    }

    #[test]
    fn frame_wraps_header_checksum_footer() {
        let tx = framing(Checksum::builtin(Builtin::XorAdd));
        let frame = tx
            .frame(&[0x0E, 0x11, 0x81, 0x00, 0x00, 0x01], None)
            .unwrap();
        assert_eq!(
            frame.as_ref(),
            &[0xF7, 0x0E, 0x11, 0x81, 0x00, 0x00, 0x01, 0x68, 0x00, 0xEE]
        );
    }

    #[test]
    fn frame_without_checksum() {
        let tx = framing(Checksum::none());
        assert_eq!(tx.frame(&[0x01], None).unwrap().as_ref(), &[0xF7, 0x01, 0xEE]);
    }

    #[test]
    fn encode_into_matches_frame() {
        let tx = framing(Checksum::builtin(Builtin::Add));
        let mut dst = BytesMut::new();
        tx.encode_into(&[0x01, 0x02], None, &mut dst).unwrap();
        assert_eq!(dst.as_ref(), tx.frame(&[0x01, 0x02], None).unwrap().as_ref());
    }
}
