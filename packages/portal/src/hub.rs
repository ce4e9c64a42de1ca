//! Session hub: single owner of the session store.
//!
//! Every store mutation is followed by a reconcile pass that keeps exactly one
//! connector per live descriptor, marks the focused one active, and publishes
//! a fresh [`StoreSnapshot`]. Connectors that reach a terminal state report
//! back on the retire channel and the hub removes their descriptor.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use portal_core::deeplink::{Catalog, open_link};
use portal_core::store::{SessionId, SessionStore, StoreSnapshot};
use portal_core::target::{SessionKind, SessionTarget};
use portal_core::transfer::UploadSummary;

use crate::connector::{ConnectorDeps, ConnectorHandle, spawn_connector};
use crate::input::SurfaceEvent;

/// Catalog shared with the hub task for deep-link resolution.
pub type SharedCatalog = Arc<dyn Catalog + Send + Sync>;

enum HubCommand {
    Create {
        target: SessionTarget,
        kind: SessionKind,
        respond_to: oneshot::Sender<SessionId>,
    },
    Focus {
        id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },
    Remove {
        id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },
    Close {
        id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },
    /// `None` means the focused session.
    Connector {
        id: Option<SessionId>,
        respond_to: oneshot::Sender<Option<ConnectorHandle>>,
    },
    OpenLink {
        catalog: SharedCatalog,
        link: String,
        respond_to: oneshot::Sender<Option<SessionId>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    snapshot: watch::Receiver<StoreSnapshot>,
}

impl HubHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| anyhow::anyhow!("Session hub is gone"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("Session hub didn't respond"))
    }

    /// New session, focused. Its connector starts immediately.
    pub async fn create(&self, target: SessionTarget, kind: SessionKind) -> Result<SessionId> {
        self.request(|respond_to| HubCommand::Create {
            target,
            kind,
            respond_to,
        })
        .await
    }

    pub async fn focus(&self, id: &SessionId) -> Result<bool> {
        let id = id.clone();
        self.request(|respond_to| HubCommand::Focus { id, respond_to })
            .await
    }

    /// Remove a session; its connector is torn down.
    pub async fn remove(&self, id: &SessionId) -> Result<bool> {
        let id = id.clone();
        self.request(|respond_to| HubCommand::Remove { id, respond_to })
            .await
    }

    /// Ask a session's connector to close. The descriptor goes away once the
    /// connector has torn down.
    pub async fn close(&self, id: &SessionId) -> Result<bool> {
        let id = id.clone();
        self.request(|respond_to| HubCommand::Close { id, respond_to })
            .await
    }

    pub async fn connector(&self, id: &SessionId) -> Result<Option<ConnectorHandle>> {
        let id = Some(id.clone());
        self.request(|respond_to| HubCommand::Connector { id, respond_to })
            .await
    }

    pub async fn focused_connector(&self) -> Result<Option<ConnectorHandle>> {
        self.request(|respond_to| HubCommand::Connector {
            id: None,
            respond_to,
        })
        .await
    }

    /// Route local input to the focused session. Dropped if nothing is focused.
    pub async fn surface(&self, event: SurfaceEvent) -> Result<()> {
        match self.focused_connector().await? {
            Some(connector) => connector.surface(event).await,
            None => {
                debug!("no focused session, input dropped");
                Ok(())
            }
        }
    }

    pub async fn surface_to(&self, id: &SessionId, event: SurfaceEvent) -> Result<()> {
        match self.connector(id).await? {
            Some(connector) => connector.surface(event).await,
            None => Err(anyhow::anyhow!("No such session: {}", id)),
        }
    }

    /// Save a file over a session's channel.
    pub async fn save(&self, id: &SessionId, path: &str, text: &str) -> Result<UploadSummary> {
        let connector = self
            .connector(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No such session: {}", id))?;
        Ok(connector.save(path, text).await?)
    }

    /// Resolve a deep link and open at most one session for it.
    pub async fn open_link(&self, catalog: SharedCatalog, link: &str) -> Result<Option<SessionId>> {
        let link = link.to_string();
        self.request(|respond_to| HubCommand::OpenLink {
            catalog,
            link,
            respond_to,
        })
        .await
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot.clone()
    }

    /// Close every session and stop the hub.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|respond_to| HubCommand::Shutdown { respond_to })
            .await
    }
}

struct SessionHub {
    store: SessionStore,
    connectors: HashMap<SessionId, ConnectorHandle>,
    active: Option<SessionId>,
    deps: ConnectorDeps,
    retire_tx: mpsc::UnboundedSender<SessionId>,
    snapshot_tx: watch::Sender<StoreSnapshot>,
}

pub fn spawn_hub(deps: ConnectorDeps) -> HubHandle {
    let (sender, commands) = mpsc::channel(64);
    let (retire_tx, retired) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot) = watch::channel(StoreSnapshot::default());

    let hub = SessionHub {
        store: SessionStore::new(),
        connectors: HashMap::new(),
        active: None,
        deps,
        retire_tx,
        snapshot_tx,
    };
    tokio::spawn(hub.run(commands, retired));

    HubHandle { sender, snapshot }
}

impl SessionHub {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<HubCommand>,
        mut retired: mpsc::UnboundedReceiver<SessionId>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.command(command).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(id) = retired.recv() => self.retire(id).await,
            }
        }
        debug!("session hub stopped");
    }

    /// Returns false once the hub should stop.
    async fn command(&mut self, command: HubCommand) -> bool {
        match command {
            HubCommand::Create {
                target,
                kind,
                respond_to,
            } => {
                let id = self.store.create(target, kind);
                info!(session = %id, ?kind, "session created");
                self.reconcile().await;
                let _ = respond_to.send(id);
            }
            HubCommand::Focus { id, respond_to } => {
                let found = self.store.focus(&id);
                if found {
                    self.reconcile().await;
                }
                let _ = respond_to.send(found);
            }
            HubCommand::Remove { id, respond_to } => {
                let removed = self.store.remove(&id).is_some();
                if removed {
                    info!(session = %id, "session removed");
                    self.reconcile().await;
                }
                let _ = respond_to.send(removed);
            }
            HubCommand::Close { id, respond_to } => {
                let found = match self.connectors.get(&id) {
                    Some(connector) => {
                        connector.close();
                        true
                    }
                    None => false,
                };
                let _ = respond_to.send(found);
            }
            HubCommand::Connector { id, respond_to } => {
                let id = id.or_else(|| self.store.focused().cloned());
                let connector = id.and_then(|id| self.connectors.get(&id).cloned());
                let _ = respond_to.send(connector);
            }
            HubCommand::OpenLink {
                catalog,
                link,
                respond_to,
            } => {
                let id = open_link(&mut self.store, catalog.as_ref(), &link);
                if id.is_some() {
                    self.reconcile().await;
                }
                let _ = respond_to.send(id);
            }
            HubCommand::Shutdown { respond_to } => {
                self.shutdown();
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    async fn retire(&mut self, id: SessionId) {
        if self.store.remove(&id).is_some() {
            info!(session = %id, "session ended, removed");
        }
        self.reconcile().await;
    }

    /// Bring connectors and focus in line with the store, then publish.
    async fn reconcile(&mut self) {
        let store = &self.store;
        self.connectors.retain(|id, connector| {
            let live = store.contains(id);
            if !live {
                connector.close();
            }
            live
        });

        for descriptor in self.store.sessions() {
            if !self.connectors.contains_key(&descriptor.id) {
                debug!(
                    session = %descriptor.id,
                    tunnel = descriptor.tunnel(),
                    "spawning connector"
                );
                let connector =
                    spawn_connector(descriptor.clone(), self.deps.clone(), self.retire_tx.clone());
                self.connectors.insert(descriptor.id.clone(), connector);
            }
        }

        let focused = self.store.focused().cloned();
        if focused != self.active {
            let previous = self.active.as_ref().and_then(|id| self.connectors.get(id)).cloned();
            let next = focused.as_ref().and_then(|id| self.connectors.get(id)).cloned();
            if let Some(previous) = previous {
                let _ = previous.set_active(false).await;
            }
            if let Some(next) = next {
                let _ = next.set_active(true).await;
            }
            self.active = focused;
        }

        self.snapshot_tx.send_replace(self.store.snapshot());
    }

    /// Close every connector and drop every descriptor with it.
    fn shutdown(&mut self) {
        info!(sessions = self.store.len(), "session hub shutting down");
        for connector in self.connectors.values() {
            connector.close();
        }
        self.connectors.clear();
        self.store = SessionStore::new();
        self.active = None;
        self.snapshot_tx.send_replace(self.store.snapshot());
    }
}
