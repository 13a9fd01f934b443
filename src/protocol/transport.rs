use super::error::ProtocolError;
use super::message::Message;
use crate::constants::MAX_FRAME_SIZE;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Splits a tracker connection into independently owned frame halves.
pub fn split(stream: TcpStream) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (FrameReader::new(read), FrameWriter::new(write))
}

/// Reads length-prefixed [`Message`] frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    read_buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            read_buf: BytesMut::with_capacity(32 * 1024),
        }
    }

    async fn fill_to(&mut self, len: usize) -> Result<(), ProtocolError> {
        while self.read_buf.len() < len {
            let n = self.inner.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
        }
        Ok(())
    }

    /// Waits for the next complete frame and decodes it.
    ///
    /// A frame that fails to decode is consumed, so the caller may log the
    /// error and keep reading.
    pub async fn receive(&mut self) -> Result<Message, ProtocolError> {
        self.fill_to(4).await?;

        let length = u32::from_le_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        self.fill_to(4 + length).await?;

        let mut frame = self.read_buf.split_to(4 + length);
        let payload = frame.split_off(4);
        Message::decode(payload.freeze())
    }
}

/// Writes [`Message`] frames to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let data = message.encode();
        timeout(WRITE_TIMEOUT, self.inner.write_all(&data))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "frame write timed out",
                ))
            })??;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
