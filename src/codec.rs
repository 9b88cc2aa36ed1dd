use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{self, Frame, Scanner, DEFAULT_MAX_DEPTH};
use crate::Error;

/// Default upper bound for the bytes buffered while waiting for a single frame to complete.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Incremental RESP codec. Decoding never blocks: when the buffer does not yet hold a whole frame
/// it returns `Ok(None)` and leaves the buffer untouched, so the caller can read more and retry.
///
/// Retries pick up where the previous attempt stopped. The frame itself is only built once all of
/// it has arrived.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    max_depth: usize,
    scanner: Scanner,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize, max_depth: usize) -> FrameCodec {
        FrameCodec {
            max_frame_size,
            max_depth,
            scanner: Scanner::default(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_DEPTH)
    }
}

impl FrameCodec {
    // The scanner does not know which array element failed, a full parse of what was received
    // reports the same error with its position.
    fn parse_error(&self, src: &[u8], scanned: frame::Error) -> frame::Error {
        let mut cursor = Cursor::new(src);
        match Frame::parse_with_depth(&mut cursor, self.max_depth) {
            Err(frame::Error::Incomplete) | Ok(_) => scanned,
            Err(err) => err,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let length = match self.scanner.scan(&src[..], self.max_depth, self.max_frame_size) {
            Ok(Some(length)) => length,
            // Not enough data to parse a frame. A client that keeps sending without ever
            // completing one would otherwise grow the buffer forever.
            Ok(None) if src.len() > self.max_frame_size => {
                self.scanner.reset();
                return Err(frame::Error::FrameTooLarge {
                    limit: self.max_frame_size,
                }
                .into());
            }
            Ok(None) => return Ok(None),
            Err(err) => {
                self.scanner.reset();
                return Err(self.parse_error(&src[..], err).into());
            }
        };

        let mut cursor = Cursor::new(&src[..length]);
        let frame = Frame::parse_with_depth(&mut cursor, self.max_depth)?;

        // Remove the parsed frame from the buffer.
        src.advance(length);

        Ok(Some(frame))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // The peer went away in the middle of a frame.
            None => Err(frame::Error::UnexpectedEof(src.len()).into()),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.encode(dst);
        Ok(())
    }
}
