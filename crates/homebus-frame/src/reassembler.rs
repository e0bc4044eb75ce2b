use std::time::Instant;

use bytes::{Buf, BytesMut};

use crate::config::{Extraction, RxFraming};
use crate::frame::Frame;

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Extra loop iterations allowed beyond the buffered byte count.
const SAFETY_MARGIN: usize = 16;

/// Longest candidate a frame search considers before giving up on the head
/// byte and resyncing.
pub const MAX_CANDIDATE_LENGTH: usize = 256;

enum Step {
    Emit(usize),
    Skip(usize),
    Wait,
}

/// Turns an arbitrary-sized byte stream into checksum-verified frames.
///
/// Owns the accumulation buffer for one channel. Bytes that do not yet form a
/// complete frame stay buffered until the next `feed`, or until an idle gap
/// longer than `rx_timeout` discards them.
pub struct FrameReassembler {
    framing: RxFraming,
    buf: BytesMut,
    last_byte_at: Option<Instant>,
    state: Option<serde_json::Value>,
}

impl FrameReassembler {
    pub fn new(framing: RxFraming) -> Self {
        Self {
            framing,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            last_byte_at: None,
            state: None,
        }
    }

    /// Consume a chunk and return every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.feed_at(chunk, Instant::now())
    }

    /// Like [`feed`](Self::feed) with an explicit arrival time.
    pub fn feed_at(&mut self, chunk: &[u8], now: Instant) -> Vec<Frame> {
        if let Some(last) = self.last_byte_at {
            if !self.buf.is_empty() && now.saturating_duration_since(last) > self.framing.timeout {
                tracing::debug!(
                    discarded = self.buf.len(),
                    "idle gap exceeded, dropping partial frame"
                );
                self.buf.clear();
            }
        }
        self.last_byte_at = Some(now);
        self.buf.extend_from_slice(chunk);
        self.extract()
    }

    /// Put bytes in front of anything already buffered, without extracting.
    ///
    /// Used to hand over a partial frame buffered elsewhere.
    pub fn seed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut seeded = BytesMut::with_capacity(bytes.len() + self.buf.len());
        seeded.extend_from_slice(bytes);
        seeded.extend_from_slice(&self.buf);
        self.buf = seeded;
    }

    /// Like [`seed`](Self::seed), with the bytes last received at `at`.
    ///
    /// The next chunk is then subject to the idle-gap check as if the seeded
    /// bytes had been fed here.
    pub fn seed_at(&mut self, bytes: &[u8], at: Instant) {
        self.seed(bytes);
        self.last_byte_at = Some(self.last_byte_at.map_or(at, |last| last.max(at)));
    }

    /// Arrival time of the most recent chunk.
    pub fn last_byte_at(&self) -> Option<Instant> {
        self.last_byte_at
    }

    /// Bytes buffered but not yet part of a frame.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Install the entity state snapshot handed to script checksums.
    pub fn set_state(&mut self, state: Option<serde_json::Value>) {
        self.state = state;
    }

    pub fn framing(&self) -> &RxFraming {
        &self.framing
    }

    fn extract(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let cap = self.buf.len() + SAFETY_MARGIN;
        let mut iterations = 0usize;

        while !self.buf.is_empty() {
            iterations += 1;
            if iterations > cap {
                tracing::debug!("iteration cap reached, discarding one byte");
                self.buf.advance(1);
                break;
            }

            match self.step() {
                Step::Emit(len) => {
                    let frame = Frame::new(self.buf.split_to(len).freeze(), self.framing.header.len());
                    tracing::trace!(%frame, "frame extracted");
                    frames.push(frame);
                }
                Step::Skip(n) => self.buf.advance(n),
                Step::Wait => break,
            }
        }

        frames
    }

    fn step(&self) -> Step {
        let buf = &self.buf[..];
        let framing = &self.framing;
        let header = framing.header.as_slice();

        if !framing.is_start_byte(buf[0]) {
            return Step::Skip(self.next_start(buf));
        }
        if !header.is_empty() {
            let n = header.len().min(buf.len());
            if buf[..n] != header[..n] {
                tracing::debug!("header mismatch, resyncing");
                return Step::Skip(self.next_start(buf));
            }
            if buf.len() < header.len() {
                return Step::Wait;
            }
        }

        let checksum_len = framing.checksum.len();
        match framing.extraction {
            Extraction::FixedLength(len) => {
                if buf.len() < len {
                    return Step::Wait;
                }
                if self.verifies(&buf[..len]) {
                    Step::Emit(len)
                } else {
                    tracing::debug!(len, "fixed-length frame rejected, resyncing");
                    Step::Skip(1)
                }
            }
            Extraction::Footer => {
                let shortest = (header.len() + checksum_len + framing.footer.len() + 1)
                    .max(framing.min_length.unwrap_or(0));
                self.scan(buf, shortest)
            }
            Extraction::Checksum => self.scan(buf, header.len() + checksum_len + 1),
        }
    }

    // Shortest verifying candidate wins.
    fn scan(&self, buf: &[u8], shortest: usize) -> Step {
        let longest = buf.len().min(MAX_CANDIDATE_LENGTH);
        for len in shortest..=longest {
            if self.verifies(&buf[..len]) {
                return Step::Emit(len);
            }
        }

        if buf.len() > MAX_CANDIDATE_LENGTH {
            tracing::debug!("no frame within scan window, resyncing");
            Step::Skip(1)
        } else {
            Step::Wait
        }
    }

    fn verifies(&self, candidate: &[u8]) -> bool {
        let framing = &self.framing;
        let header_len = framing.header.len();
        let footer = framing.footer.as_slice();
        let checksum_len = framing.checksum.len();

        if candidate.len() < header_len + checksum_len + footer.len() + 1 {
            return false;
        }

        let body_end = candidate.len() - footer.len();
        if &candidate[body_end..] != footer {
            return false;
        }
        let data_end = body_end - checksum_len;

        framing.checksum.verify(
            &candidate[..header_len],
            &candidate[header_len..data_end],
            &candidate[data_end..body_end],
            self.state.as_ref(),
        )
    }

    fn next_start(&self, buf: &[u8]) -> usize {
        buf[1..]
            .iter()
            .position(|&b| self.framing.is_start_byte(b))
            .map_or(buf.len(), |i| i + 1)
    }
}

impl std::fmt::Debug for FrameReassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReassembler")
            .field("framing", &self.framing)
            .field("pending", &self.buf.len())
            .finish()
    }
}
