//! Seam between a session connector and the remote-display library.
//!
//! The display protocol itself (handshake, framebuffer encoding) lives behind
//! [`TransportFactory`]. A connector only sees the lifecycle and clipboard
//! events a transport emits and the handful of outbound calls below.

use portal_core::geometry::{Size, Transform};
use portal_core::transfer::{FrameSink, TransferError, TransferFrame};
use tokio::sync::mpsc;

/// Identifier of a clipboard (or other) stream within one transport.
pub type StreamId = u32;

/// Pointer state in remote-display pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseState {
    pub x: i32,
    pub y: i32,
    pub buttons: Buttons,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buttons {
    pub left: bool,
    pub middle: bool,
    pub right: bool,
    pub scroll_up: bool,
    pub scroll_down: bool,
}

/// Signals a transport emits towards its connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error(String),
    /// The remote framebuffer changed size.
    DisplayResized(Size),
    ClipboardOpened { stream: StreamId, mimetype: String },
    ClipboardText { stream: StreamId, text: String },
    ClipboardEnded { stream: StreamId },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open tunnel {url}: {reason}")]
    Open { url: String, reason: String },

    #[error("transport is closed")]
    Closed,

    #[error("remote error: {0}")]
    Remote(String),
}

/// Outbound half of an open transport. Owned by exactly one connector.
pub trait RemoteDisplay: Send {
    fn send_mouse(&mut self, state: MouseState);

    /// `pressed` is the down/up discriminator.
    fn send_key(&mut self, pressed: bool, keysym: u32);

    /// Ask the remote side to match the local container size.
    fn send_size(&mut self, size: Size);

    /// Current remote framebuffer size; empty until the first frame arrives.
    fn display_size(&self) -> Size;

    /// Apply the rendering transform to the local display surface.
    fn apply_transform(&mut self, transform: Transform);

    fn open_clipboard_stream(&mut self, mimetype: &str) -> StreamId;

    fn write_stream(&mut self, stream: StreamId, text: &str);

    fn end_stream(&mut self, stream: StreamId);

    /// Raw file-transfer frame on the session channel.
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    fn disconnect(&mut self);
}

/// A transport that has been asked to connect. `Connected` (or a failure)
/// arrives later on `events`.
pub struct OpenedTransport {
    pub display: Box<dyn RemoteDisplay>,
    pub events: mpsc::Receiver<TransportEvent>,
}

pub trait TransportFactory: Send + Sync {
    /// Start connecting to `tunnel_url` with the given connection string.
    fn open(&self, tunnel_url: &str, query: &str) -> Result<OpenedTransport, TransportError>;
}

/// Adapts a display's raw frame channel to the transfer protocol's sink.
pub struct FrameChannel<'a>(pub &'a mut dyn RemoteDisplay);

impl FrameSink for FrameChannel<'_> {
    fn send_frame(&mut self, frame: &TransferFrame) -> Result<(), TransferError> {
        let bytes = frame.encode()?;
        self.0
            .send_frame(bytes)
            .map_err(|err| TransferError::Channel(err.to_string()))
    }
}
