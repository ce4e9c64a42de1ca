//! Deep-link resolution.
//!
//! An inbound link names either a plain server (`42`) or a container under a
//! virtualization host (`7-3`). Resolution consults a [`Catalog`] and yields
//! at most one new session; every failure leaves the store untouched.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::store::{SessionId, SessionStore};
use crate::target::{SessionKind, SessionTarget};

const COMPOSITE_SEPARATOR: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerProtocol {
    Ssh,
    Vnc,
    Rdp,
}

impl ServerProtocol {
    pub fn session_kind(self) -> SessionKind {
        match self {
            Self::Ssh => SessionKind::Terminal,
            Self::Vnc | Self::Rdp => SessionKind::RemoteDesktop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub protocol: ServerProtocol,
    /// Identity ids in configured order; the first one is used for deep links.
    #[serde(default)]
    pub identities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Paused,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// System container, reached through a console terminal.
    Lxc,
    /// Full VM, reached through its display.
    Qemu,
}

impl ContainerKind {
    pub fn session_kind(self) -> SessionKind {
        match self {
            Self::Lxc => SessionKind::Terminal,
            Self::Qemu => SessionKind::RemoteDesktop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub status: ContainerStatus,
    pub kind: ContainerKind,
}

/// Existence and status lookups for link targets.
pub trait Catalog {
    fn server(&self, id: &str) -> Option<&ServerRecord>;

    fn has_container_host(&self, host: &str) -> bool;

    fn container(&self, host: &str, container: &str) -> Option<&ContainerRecord>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("link {0:?} names no known server or container")]
    Unresolved(String),

    #[error("server {0} has no identities")]
    NoIdentity(String),

    #[error("malformed composite link {0:?}")]
    Malformed(String),

    #[error("unknown container host {0}")]
    UnknownHost(String),

    #[error("no container {container} on host {host}")]
    UnknownContainer { host: String, container: String },

    #[error("container {container} on host {host} is {status:?}")]
    NotRunning {
        host: String,
        container: String,
        status: ContainerStatus,
    },
}

/// What a deep link resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub target: SessionTarget,
    pub kind: SessionKind,
}

/// Resolve a link against the catalog without touching any store.
///
/// A server id with at least one identity always wins over a composite
/// reading of the same string.
pub fn resolve<C: Catalog + ?Sized>(catalog: &C, link: &str) -> Result<Resolved, ResolveError> {
    let server_miss = match catalog.server(link) {
        Some(server) => match server.identities.first() {
            Some(identity) => {
                return Ok(Resolved {
                    target: SessionTarget::direct(&server.id, identity),
                    kind: server.protocol.session_kind(),
                });
            }
            None => ResolveError::NoIdentity(server.id.clone()),
        },
        None => ResolveError::Unresolved(link.to_string()),
    };

    if !link.contains(COMPOSITE_SEPARATOR) {
        return Err(server_miss);
    }

    // Only the first two segments name the target; anything after is ignored.
    let mut segments = link.split(COMPOSITE_SEPARATOR);
    let (host, container) = match (segments.next(), segments.next()) {
        (Some(host), Some(container)) if !host.is_empty() && !container.is_empty() => {
            (host, container)
        }
        _ => return Err(ResolveError::Malformed(link.to_string())),
    };

    if !catalog.has_container_host(host) {
        return Err(ResolveError::UnknownHost(host.to_string()));
    }

    let record = catalog
        .container(host, container)
        .ok_or_else(|| ResolveError::UnknownContainer {
            host: host.to_string(),
            container: container.to_string(),
        })?;

    if record.status != ContainerStatus::Running {
        return Err(ResolveError::NotRunning {
            host: host.to_string(),
            container: container.to_string(),
            status: record.status,
        });
    }

    Ok(Resolved {
        target: SessionTarget::container(host, container),
        kind: record.kind.session_kind(),
    })
}

/// Resolve `link` and, on success, create and focus one session for it.
///
/// Failures are logged and otherwise invisible: the store is left as it was.
pub fn open_link<C: Catalog + ?Sized>(
    store: &mut SessionStore,
    catalog: &C,
    link: &str,
) -> Option<SessionId> {
    match resolve(catalog, link) {
        Ok(resolved) => {
            let id = store.create(resolved.target, resolved.kind);
            info!(%link, session = %id, "opened session from deep link");
            Some(id)
        }
        Err(err) => {
            debug!(%link, error = %err, "deep link not resolved");
            None
        }
    }
}
