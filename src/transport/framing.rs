//! Message framing
//!
//! A frame is the JSON encoding of a `Message` followed by `END_OF_MESSAGE`.
//! Peers may write a lone `HEARTBEAT` byte between frames to keep idle
//! connections alive; readers drop those bytes.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::message::Message;
use crate::utils::{Error, Result};

pub const END_OF_MESSAGE: u8 = 0x04;
pub const HEARTBEAT: u8 = 0x05;

pub struct FrameReader<R> {
    reader: BufReader<R>,
    byte_limit: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// `byte_limit` of 0 accepts frames of any size.
    pub fn new(reader: R, byte_limit: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            byte_limit,
        }
    }

    /// Read the next non-empty frame without its terminator.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut frame = Vec::new();
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Err(Error::ConnectionClosed);
            }
            let (consumed, complete) = match available.iter().position(|b| *b == END_OF_MESSAGE)
            {
                Some(end) => {
                    frame.extend_from_slice(&available[..end]);
                    (end + 1, true)
                }
                None => {
                    frame.extend_from_slice(available);
                    (available.len(), false)
                }
            };
            self.reader.consume(consumed);

            frame.retain(|b| *b != HEARTBEAT);
            if self.byte_limit > 0 && frame.len() > self.byte_limit {
                return Err(Error::FrameTooLarge {
                    limit: self.byte_limit,
                });
            }
            if complete && !frame.is_empty() {
                return Ok(frame);
            }
        }
    }

    /// Read the next frame and decode it. A frame that is not a valid message
    /// yields `Error::Serialization` and leaves the reader usable.
    pub async fn read_message(&mut self) -> Result<Message> {
        let frame = self.read_frame().await?;
        Message::deserialize(&frame)
    }
}

pub struct FrameWriter<W> {
    writer: W,
    timeout: Duration,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, timeout: Duration) -> Self {
        Self { writer, timeout }
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        let mut frame = message.serialize()?;
        frame.push(END_OF_MESSAGE);
        self.write_bytes(&frame).await
    }

    pub async fn write_heartbeat(&mut self) -> Result<()> {
        self.write_bytes(&[HEARTBEAT]).await
    }

    pub async fn shutdown(&mut self) {
        let _ = tokio::time::timeout(self.timeout, self.writer.shutdown()).await;
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(bytes).await?;
            writer.flush().await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }
}
