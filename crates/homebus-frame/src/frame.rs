use std::fmt;

use bytes::Bytes;

/// A complete, checksum-verified frame as it appeared on the wire.
///
/// Holds every byte including header, checksum and footer. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
    header_len: usize,
}

impl Frame {
    /// Create a frame whose first `header_len` bytes are the channel header.
    pub fn new(bytes: impl Into<Bytes>, header_len: usize) -> Self {
        let bytes = bytes.into();
        let header_len = header_len.min(bytes.len());
        Self { bytes, header_len }
    }

    /// The full wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Everything after the header. Field offsets are relative to this.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.header_len..]
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.bytes, f)
    }
}

/// Write bytes as space-separated upper-case hex (`F7 01 02 FA`).
pub fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{b:02X}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_strips_header() {
        let frame = Frame::new(vec![0xF7, 0x0E, 0x11, 0x68], 1);
        assert_eq!(frame.payload(), &[0x0E, 0x11, 0x68]);
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.header_len(), 1);
    }

    #[test]
    fn header_len_is_clamped() {
        let frame = Frame::new(vec![0xF7], 3);
        assert_eq!(frame.header_len(), 1);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn display_is_spaced_hex() {
        let frame = Frame::new(Bytes::from_static(&[0xF7, 0x01, 0x02, 0xFA]), 1);
        assert_eq!(frame.to_string(), "F7 01 02 FA");
    }
}
