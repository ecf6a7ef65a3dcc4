//! Packet capture: backend abstraction, the libpcap adapter, and the
//! producer thread that streams rendered packets to a session.
//!
//! The native side is reached only through [`CaptureBackend`] (device
//! listing and opening) and [`CaptureSource`] (blocking poll and close), so
//! everything above this module can be exercised with fake sources.

pub mod engine;
pub mod render;
pub mod stream;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;

use crate::packet::Packet;

pub use engine::PcapBackend;
pub use stream::{CaptureEvent, CaptureStream, Capturer};

/// Errors from the capture layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Failed to find a suitable network device.
    NoDevice(String),
    /// The native capture handle could not be opened.
    Open { device: String, reason: String },
    /// The native source failed while capturing.
    Runtime(String),
    /// Device enumeration failed.
    List(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NoDevice(msg) => write!(f, "no capture device: {}", msg),
            CaptureError::Open { device, reason } => {
                write!(f, "cannot open capture on '{}': {}", device, reason)
            }
            CaptureError::Runtime(msg) => write!(f, "capture error: {}", msg),
            CaptureError::List(msg) => write!(f, "cannot list interfaces: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Options used when opening a capture handle.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub promiscuous: bool,
    pub snaplen: i32,
    /// Read timeout of the native poll. Also bounds how long a stop request
    /// can take to be noticed by the producer.
    pub timeout_ms: i32,
    /// Capacity of the producer → session channel.
    pub channel_capacity: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            promiscuous: true,
            snaplen: 1600,
            timeout_ms: 100,
            channel_capacity: 128,
        }
    }
}

/// Result of one blocking poll on a capture source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPacket {
    Packet(Packet),
    /// No packet arrived within the read timeout. Not end-of-stream.
    Timeout,
    /// The source has nothing more to deliver (end of a capture file).
    Exhausted,
}

/// Device enumeration and opening.
pub trait CaptureBackend: Send + Sync {
    fn list_interfaces(&self) -> Result<Vec<String>, CaptureError>;

    fn open(
        &self,
        device: &str,
        options: &OpenOptions,
    ) -> Result<Box<dyn CaptureSource>, CaptureError>;
}

/// An opened native capture handle.
pub trait CaptureSource: Send {
    /// Block for at most the read timeout waiting for the next packet.
    fn next_packet(&mut self) -> Result<NextPacket, CaptureError>;

    /// Release the native resource. Must be idempotent.
    fn close(&mut self);
}
