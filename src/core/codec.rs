//! # Frame Codec
//!
//! Tokio codec turning a byte stream into length-delimited frames and back.
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [Body(Length)]
//! ```
//!
//! Decoding is a two-state machine: the header state waits for exactly four
//! bytes, the body state waits for exactly `Length` bytes. Partial input is
//! left in the buffer and the state is kept across calls, so the codec can be
//! fed arbitrary chunks.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};

/// Size of the big-endian length prefix
pub const HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingHeader,
    AwaitingBody(usize),
}

/// Length-prefix codec for CASTV2 frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    state: DecodeState,
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::AwaitingHeader,
            max_frame_size,
        }
    }

    /// Largest frame body this codec accepts in either direction.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// True while a header has been consumed and its body is still incomplete.
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.state, DecodeState::AwaitingBody(_))
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size || size > u32::MAX as usize {
            return Err(ProtocolError::OversizedFrame {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.state {
                DecodeState::AwaitingHeader => {
                    if src.len() < HEADER_SIZE {
                        return Ok(None);
                    }
                    let length = src.get_u32() as usize;
                    self.check_size(length)?;
                    src.reserve(length);
                    self.state = DecodeState::AwaitingBody(length);
                }
                DecodeState::AwaitingBody(length) => {
                    if src.len() < length {
                        return Ok(None);
                    }
                    self.state = DecodeState::AwaitingHeader;
                    return Ok(Some(src.split_to(length).freeze()));
                }
            }
        }
    }

    // A peer that disconnects mid-frame leaves a truncated frame behind; it is dropped.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() || self.is_mid_frame() {
            trace!(buffered = src.len(), "discarding truncated frame at end of stream");
            src.clear();
            self.state = DecodeState::AwaitingHeader;
        }
        Ok(None)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<()> {
        <Self as Encoder<&[u8]>>::encode(self, frame.as_ref(), dst)
    }
}

impl<'a> Encoder<&'a [u8]> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: &'a [u8], dst: &mut BytesMut) -> Result<()> {
        self.check_size(frame.len())?;
        let length = length_prefix(frame.len())?;
        dst.reserve(HEADER_SIZE + frame.len());
        dst.put_u32(length);
        dst.put_slice(frame);
        Ok(())
    }
}

fn length_prefix(size: usize) -> Result<u32> {
    u32::try_from(size).map_err(|_| ProtocolError::OversizedFrame {
        size,
        max: u32::MAX as usize,
    })
}

/// Frame a single body into a standalone buffer. Fails for bodies the 32-bit
/// length prefix cannot describe.
pub fn frame_bytes(body: &[u8]) -> Result<Bytes> {
    let length = length_prefix(body.len())?;
    let mut dst = BytesMut::with_capacity(HEADER_SIZE + body.len());
    dst.put_u32(length);
    dst.put_slice(body);
    Ok(dst.freeze())
}
