//! TOML-backed catalog of servers and container hosts.
//!
//! ```toml
//! [[servers]]
//! id = "42"
//! protocol = "ssh"
//! identities = ["9"]
//!
//! [[hosts]]
//! id = "pve-7"
//!
//! [[hosts.containers]]
//! id = "7-3"
//! status = "running"
//! kind = "lxc"
//! ```
//!
//! Host ids may carry the `pve-` prefix and container ids their composite
//! `host-container` form; lookups match on the normalized ids.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use portal_core::deeplink::{Catalog, ContainerRecord, ServerRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: String,
    #[serde(default)]
    pub containers: Vec<ContainerRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    pub servers: Vec<ServerRecord>,
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
}

fn host_key(id: &str) -> &str {
    id.strip_prefix("pve-").unwrap_or(id)
}

fn container_key(id: &str) -> &str {
    id.rsplit('-').next().unwrap_or(id)
}

impl StaticCatalog {
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog: {:?}", path))?;
        Self::from_toml(&source).with_context(|| format!("Failed to parse catalog: {:?}", path))
    }

    fn host(&self, host: &str) -> Option<&HostRecord> {
        let key = host_key(host);
        self.hosts.iter().find(|h| host_key(&h.id) == key)
    }
}

impl Catalog for StaticCatalog {
    fn server(&self, id: &str) -> Option<&ServerRecord> {
        self.servers.iter().find(|s| s.id == id)
    }

    fn has_container_host(&self, host: &str) -> bool {
        self.host(host).is_some()
    }

    fn container(&self, host: &str, container: &str) -> Option<&ContainerRecord> {
        let key = container_key(container);
        self.host(host)?
            .containers
            .iter()
            .find(|c| container_key(&c.id) == key)
    }
}
