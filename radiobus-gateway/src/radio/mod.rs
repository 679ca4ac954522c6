//! Radio ingestion: frame codec, port discovery and the reconnecting bridge.

pub mod bridge;
pub mod frame;
pub mod link;
pub mod port;

pub use bridge::{Backoff, RadioBridge, ReconnectPolicy};
pub use frame::{RadioFrame, XBeeCodec};
pub use link::{FrameStream, LinkOpener, SerialLinkOpener, frame_stream};
pub use port::{PortInfo, PortResolver, SerialPortResolver};

/// Radio link errors.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("no serial port matches hardware id {0:?}")]
    NotFound(String),

    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link closed")]
    Closed,
}
