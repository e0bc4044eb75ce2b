//! `tokio-util` codec driving a [`FrameReassembler`] from an async byte stream.

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::ChannelProfile;
use crate::error::{FrameError, Result};
use crate::frame::Frame;
use crate::reassembler::FrameReassembler;
use crate::tx::TxFraming;

/// Decodes verified frames and encodes outbound command data for one channel.
///
/// Use with `FramedRead`/`FramedWrite` or `Framed` over a serial port or any
/// other `AsyncRead + AsyncWrite`.
#[derive(Debug)]
pub struct ReassemblerCodec {
    reassembler: FrameReassembler,
    tx: TxFraming,
    ready: VecDeque<Frame>,
}

impl ReassemblerCodec {
    pub fn new(profile: ChannelProfile) -> Self {
        Self {
            reassembler: FrameReassembler::new(profile.rx),
            tx: profile.tx,
            ready: VecDeque::new(),
        }
    }

    pub fn reassembler_mut(&mut self) -> &mut FrameReassembler {
        &mut self.reassembler
    }
}

impl Decoder for ReassemblerCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if !src.is_empty() {
            let chunk = src.split();
            self.ready.extend(self.reassembler.feed(&chunk));
        }
        Ok(self.ready.pop_front())
    }
}

impl<'a> Encoder<&'a [u8]> for ReassemblerCodec {
    type Error = FrameError;

    fn encode(&mut self, data: &'a [u8], dst: &mut BytesMut) -> Result<()> {
        self.tx.encode_into(data, None, dst)?;
        Ok(())
    }
}
