use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::frame::{self, Frame};

/// Writes replies to a byte sink, one method per value kind.
///
/// Every method encodes its value into an internal buffer and then writes the whole buffer to the
/// sink. I/O errors are returned as they come from the sink and are never retried; some bytes of
/// the value may already have been written when that happens.
pub struct Writer<W> {
    inner: W,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub fn new(inner: W) -> Writer<W> {
        Writer {
            inner,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    pub async fn write_simple_string(&mut self, value: &[u8]) -> io::Result<()> {
        frame::put_simple(&mut self.buffer, value);
        self.flush_buffer().await
    }

    pub async fn write_error(&mut self, message: &str) -> io::Result<()> {
        frame::put_error(&mut self.buffer, message.as_bytes());
        self.flush_buffer().await
    }

    pub async fn write_bulk_string(&mut self, value: &[u8]) -> io::Result<()> {
        frame::put_bulk(&mut self.buffer, value);
        self.flush_buffer().await
    }

    /// Writes the nil bulk string, which is how a missing value is reported.
    pub async fn write_nil(&mut self) -> io::Result<()> {
        frame::put_null(&mut self.buffer);
        self.flush_buffer().await
    }

    pub async fn write_integer(&mut self, value: i64) -> io::Result<()> {
        frame::put_integer(&mut self.buffer, value);
        self.flush_buffer().await
    }

    /// Writes `values` as an array, or the nil array for `None`. Elements are encoded by kind and
    /// may themselves be arrays.
    pub async fn write_array(&mut self, values: Option<&[Frame]>) -> io::Result<()> {
        match values {
            Some(values) => {
                frame::put_array_header(&mut self.buffer, values.len());
                for value in values {
                    value.encode(&mut self.buffer);
                }
            }
            None => frame::put_null_array(&mut self.buffer),
        }
        self.flush_buffer().await
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        match frame {
            Frame::Simple(s) => self.write_simple_string(s.as_bytes()).await,
            Frame::Error(s) => self.write_error(s).await,
            Frame::Integer(i) => self.write_integer(*i).await,
            Frame::Bulk(bytes) => self.write_bulk_string(bytes).await,
            Frame::Null => self.write_nil().await,
            Frame::Array(arr) => self.write_array(Some(arr.as_slice())).await,
            Frame::NullArray => self.write_array(None).await,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    async fn flush_buffer(&mut self) -> io::Result<()> {
        let res = self.inner.write_all(&self.buffer).await;
        // Whatever happened, the buffered value is done with.
        self.buffer.clear();
        res?;
        self.inner.flush().await
    }
}
