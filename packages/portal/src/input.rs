//! Local input routed to a session's display surface.

use portal_core::geometry::Size;

use crate::transport::Buttons;

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    /// Pointer position in local container pixels.
    Pointer { x: f64, y: f64, buttons: Buttons },
    Key { keysym: u32, pressed: bool },
    /// Text captured from a paste event on the surface.
    Paste(String),
    /// The top-level window changed size.
    WindowResized,
    /// The session's container was laid out at a new size.
    ContainerResized(Size),
}
