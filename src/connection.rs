use futures::StreamExt;
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::frame::Frame;
use crate::writer::Writer;
use crate::Result;

/// One client socket, split into a framed reader and a reply writer.
pub struct Connection {
    pub id: Uuid,
    pub client_address: SocketAddr,
    // Data is read from the socket into the codec's read buffer. When a frame is parsed, the
    // corresponding data is removed from the buffer.
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: Writer<OwnedWriteHalf>,
}

impl Connection {
    pub fn new(stream: TcpStream, client_address: SocketAddr) -> Connection {
        Self::with_codec(stream, client_address, FrameCodec::default())
    }

    pub fn with_codec(stream: TcpStream, client_address: SocketAddr, codec: FrameCodec) -> Connection {
        let (read_half, write_half) = stream.into_split();

        Connection {
            id: Uuid::new_v4(),
            client_address,
            // Allocate the buffer with 4kb of capacity.
            reader: FramedRead::with_capacity(read_half, codec, 4096),
            writer: Writer::new(write_half),
        }
    }

    /// Waits for the next complete frame. `None` means the peer closed the connection cleanly,
    /// between two frames.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.reader.next().await.transpose()
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.writer.write_frame(frame).await?;
        Ok(())
    }
}
