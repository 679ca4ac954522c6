//! Opening the serial link to the coordinator radio.

use std::io;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use super::LinkError;
use super::frame::{RadioFrame, XBeeCodec};
use super::port::PortInfo;

/// Stream of decoded frames from an open link.
pub type FrameStream = BoxStream<'static, Result<RadioFrame, io::Error>>;

/// Decode API frames from any byte source.
pub fn frame_stream<T>(io: T) -> FrameStream
where
    T: AsyncRead + Send + 'static,
{
    FramedRead::new(io, XBeeCodec).boxed()
}

/// Opens a port and yields its frames.
#[async_trait]
pub trait LinkOpener: Send + Sync {
    async fn open(&self, port: &PortInfo) -> Result<FrameStream, LinkError>;
}

/// Serial opener at a fixed baud rate, 8N1.
#[derive(Debug, Clone, Copy)]
pub struct SerialLinkOpener {
    baud_rate: u32,
}

impl SerialLinkOpener {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

#[async_trait]
impl LinkOpener for SerialLinkOpener {
    async fn open(&self, port: &PortInfo) -> Result<FrameStream, LinkError> {
        let builder = tokio_serial::new(&port.name, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One);

        let serial = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| LinkError::Io(io::Error::other(format!("{}: {e}", port.name))))?;

        Ok(frame_stream(serial))
    }
}
