//! Session targets and the connection string handed to a display tunnel.

use serde::{Deserialize, Serialize};

/// What a session renders once its tunnel is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Terminal,
    FileTransfer,
    RemoteDesktop,
}

/// The remote endpoint a session connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionTarget {
    /// A plain server reached with one of its configured identities.
    Direct { server: String, identity: String },
    /// A container running under a virtualization host.
    Container { host: String, container: String },
}

impl SessionTarget {
    pub fn direct(server: impl Into<String>, identity: impl Into<String>) -> Self {
        Self::Direct {
            server: server.into(),
            identity: identity.into(),
        }
    }

    /// Build a container target from catalog-style ids.
    ///
    /// Host ids may carry a `pve-` prefix and container ids may be given in
    /// their composite `host-container` form; both are normalized to the bare
    /// numeric ids the tunnel expects.
    pub fn container(host: &str, container: &str) -> Self {
        let host = host.strip_prefix("pve-").unwrap_or(host);
        let container = container.rsplit('-').next().unwrap_or(container);
        Self::Container {
            host: host.to_string(),
            container: container.to_string(),
        }
    }

    /// The server (or virtualization host) id this target lives on.
    pub fn server(&self) -> &str {
        match self {
            Self::Direct { server, .. } => server,
            Self::Container { host, .. } => host,
        }
    }

    /// Query string passed to the tunnel when connecting.
    pub fn connect_query(&self, session_token: &str) -> String {
        match self {
            Self::Direct { server, identity } => {
                format!("sessionToken={session_token}&serverId={server}&identity={identity}")
            }
            Self::Container { host, container } => {
                format!("sessionToken={session_token}&serverId={host}&containerId={container}")
            }
        }
    }
}

/// Name of the tunnel endpoint serving a target of the given kind.
pub fn tunnel_name(target: &SessionTarget, kind: SessionKind) -> &'static str {
    match (target, kind) {
        (SessionTarget::Container { .. }, SessionKind::Terminal) => "pve-lxc",
        (SessionTarget::Container { .. }, _) => "pve-qemu",
        (SessionTarget::Direct { .. }, SessionKind::Terminal) => "ssh",
        (SessionTarget::Direct { .. }, SessionKind::FileTransfer) => "sftp",
        (SessionTarget::Direct { .. }, SessionKind::RemoteDesktop) => "guacd",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_query() {
        let target = SessionTarget::direct("42", "5");
        assert_eq!(
            target.connect_query("tok"),
            "sessionToken=tok&serverId=42&identity=5"
        );
    }

    #[test]
    fn container_query() {
        let target = SessionTarget::container("7", "3");
        assert_eq!(
            target.connect_query("tok"),
            "sessionToken=tok&serverId=7&containerId=3"
        );
    }

    #[test]
    fn container_ids_are_normalized() {
        let target = SessionTarget::container("pve-7", "7-3");
        assert_eq!(
            target,
            SessionTarget::Container {
                host: "7".to_string(),
                container: "3".to_string(),
            }
        );
        assert_eq!(target.server(), "7");
    }

    #[test]
    fn tunnel_names() {
        let direct = SessionTarget::direct("1", "1");
        let container = SessionTarget::container("1", "2");
        assert_eq!(tunnel_name(&direct, SessionKind::Terminal), "ssh");
        assert_eq!(tunnel_name(&direct, SessionKind::FileTransfer), "sftp");
        assert_eq!(tunnel_name(&direct, SessionKind::RemoteDesktop), "guacd");
        assert_eq!(tunnel_name(&container, SessionKind::Terminal), "pve-lxc");
        assert_eq!(tunnel_name(&container, SessionKind::RemoteDesktop), "pve-qemu");
    }

    #[test]
    fn target_serde() {
        let target = SessionTarget::direct("42", "5");
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["type"], "direct");
        assert_eq!(json["server"], "42");
        let rt: SessionTarget = serde_json::from_value(json).unwrap();
        assert_eq!(rt, target);
    }
}
