//! Concurrent remote sessions over display tunnels.
//!
//! A session hub ([`hub::spawn_hub`]) owns the session store and keeps one
//! [`connector`] actor alive per session. Connectors drive the remote
//! display through a [`transport::RemoteDisplay`], keep the coordinate
//! transform current, bridge the clipboard and stream file saves.

pub mod catalog;
pub mod clipboard;
pub mod config;
pub mod connector;
pub mod editor;
pub mod file_source;
pub mod hub;
pub mod input;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use catalog::StaticCatalog;
pub use config::PortalConfig;
pub use connector::{ConnectorConfig, ConnectorDeps, ConnectorHandle, ConnectorState};
pub use hub::{HubHandle, SharedCatalog, spawn_hub};
pub use input::SurfaceEvent;
pub use transport::{RemoteDisplay, TransportEvent, TransportFactory};
