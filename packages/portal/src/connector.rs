//! Session connector: one actor per live session descriptor.
//!
//! The lifecycle is a pure state machine ([`Lifecycle`]) that turns typed
//! events into at most one [`Effect`]. The actor owns the transport handle and
//! performs those effects, so teardown happens exactly once no matter how many
//! terminal signals race in (disconnect, error, explicit close, cancellation).

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use portal_core::geometry::{Size, Transform};
use portal_core::store::{SessionDescriptor, SessionId};
use portal_core::transfer::{TransferError, UploadSummary, upload};

use crate::clipboard::{ClipboardBridge, LocalClipboard};
use crate::input::SurfaceEvent;
use crate::transport::{FrameChannel, MouseState, RemoteDisplay, TransportEvent, TransportFactory};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    TokenAvailable(String),
    TokenRevoked,
    TransportConnected,
    TransportDisconnected,
    TransportFailed(String),
    CloseRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open the transport with this token.
    Open { token: String },
    /// Start resize polling and the clipboard bridge.
    StartServices,
    /// Release the transport, stop timers, request descriptor removal.
    Teardown,
}

#[derive(Debug, Default)]
pub struct Lifecycle {
    state: ConnectorState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    /// Apply one event. Terminal states absorb everything.
    pub fn apply(&mut self, event: LifecycleEvent) -> Option<Effect> {
        use ConnectorState::*;
        use LifecycleEvent::*;

        let (next, effect) = match (self.state, event) {
            (Disconnected | Failed, _) => return None,

            (Idle, TokenAvailable(token)) => (Connecting, Effect::Open { token }),
            (Idle, CloseRequested) => (Disconnected, Effect::Teardown),
            (Idle, _) => return None,

            (Connecting, TransportConnected) => (Connected, Effect::StartServices),
            (Connected, TransportConnected) => return None,

            (Connecting | Connected, TransportDisconnected | CloseRequested) => {
                (Disconnected, Effect::Teardown)
            }
            (Connecting | Connected, TransportFailed(_)) => (Failed, Effect::Teardown),

            // Token changes never affect a transport that is already open.
            (Connecting | Connected, TokenAvailable(_) | TokenRevoked) => return None,
        };

        self.state = next;
        Some(effect)
    }
}

/// Per-connector tunables.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Tunnel base URL; the tunnel name is appended.
    pub tunnel_base: String,
    pub resize_poll: Duration,
    pub clipboard_poll: Duration,
    pub clipboard_enabled: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            tunnel_base: "ws://localhost:6989/api/servers/".to_string(),
            resize_poll: Duration::from_millis(500),
            clipboard_poll: Duration::from_millis(500),
            clipboard_enabled: true,
        }
    }
}

/// Collaborators shared by every connector.
#[derive(Clone)]
pub struct ConnectorDeps {
    pub factory: Arc<dyn TransportFactory>,
    pub clipboard: Arc<dyn LocalClipboard>,
    pub token: watch::Receiver<Option<String>>,
    pub config: Arc<ConnectorConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("session connector is gone")]
    Gone,

    #[error("session is not connected ({0:?})")]
    NotConnected(ConnectorState),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

#[derive(Debug)]
enum ConnectorCommand {
    Surface(SurfaceEvent),
    SetActive(bool),
    Save {
        path: String,
        text: String,
        respond_to: oneshot::Sender<Result<UploadSummary, ConnectorError>>,
    },
}

/// Cloneable handle to a running connector.
#[derive(Clone)]
pub struct ConnectorHandle {
    id: SessionId,
    sender: mpsc::Sender<ConnectorCommand>,
    state: watch::Receiver<ConnectorState>,
    cancel: CancellationToken,
}

impl ConnectorHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> ConnectorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectorState> {
        self.state.clone()
    }

    pub async fn surface(&self, event: SurfaceEvent) -> Result<()> {
        self.sender
            .send(ConnectorCommand::Surface(event))
            .await
            .map_err(|_| anyhow::anyhow!("Connector actor is gone"))
    }

    pub async fn set_active(&self, active: bool) -> Result<()> {
        self.sender
            .send(ConnectorCommand::SetActive(active))
            .await
            .map_err(|_| anyhow::anyhow!("Connector actor is gone"))
    }

    /// Push `text` to `path` on the remote host over this session's channel.
    /// Saves on one connector are serialized by its command queue.
    pub async fn save(&self, path: &str, text: &str) -> Result<UploadSummary, ConnectorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectorCommand::Save {
                path: path.to_string(),
                text: text.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| ConnectorError::Gone)?;
        rx.await.map_err(|_| ConnectorError::Gone)?
    }

    /// Request an explicit close. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The open transport and everything bound to it.
struct TransportHandle {
    display: Box<dyn RemoteDisplay>,
    events: mpsc::Receiver<TransportEvent>,
    /// Mapping for pointer input. `None` while the remote surface has no
    /// size; pointer input is dropped.
    transform: Option<Transform>,
    /// Last transform rendered on the display surface.
    applied: Option<Transform>,
    sent_size: Option<Size>,
    clipboard: Option<ClipboardBridge>,
    resize_poll: Option<Interval>,
    clipboard_poll: Option<Interval>,
}

enum TransportSignal {
    Event(Option<TransportEvent>),
    ResizePoll,
    ClipboardPoll,
}

impl TransportHandle {
    fn new(display: Box<dyn RemoteDisplay>, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            display,
            events,
            transform: Some(Transform::IDENTITY),
            applied: None,
            sent_size: None,
            clipboard: None,
            resize_poll: None,
            clipboard_poll: None,
        }
    }

    async fn next(&mut self) -> TransportSignal {
        tokio::select! {
            event = self.events.recv() => TransportSignal::Event(event),
            _ = tick(&mut self.resize_poll) => TransportSignal::ResizePoll,
            _ = tick(&mut self.clipboard_poll) => TransportSignal::ClipboardPoll,
        }
    }

    fn release(mut self) {
        self.resize_poll = None;
        self.clipboard_poll = None;
        self.events.close();
        self.display.disconnect();
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_signal(transport: &mut Option<TransportHandle>) -> TransportSignal {
    match transport {
        Some(transport) => transport.next().await,
        None => std::future::pending().await,
    }
}

fn poll_interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

struct Connector {
    descriptor: SessionDescriptor,
    deps: ConnectorDeps,
    lifecycle: Lifecycle,
    state_tx: watch::Sender<ConnectorState>,
    transport: Option<TransportHandle>,
    active: bool,
    container: Size,
    retire: mpsc::UnboundedSender<SessionId>,
}

/// Spawn a connector for `descriptor`. It reports its own id on `retire` once
/// it reaches a terminal state.
pub fn spawn_connector(
    descriptor: SessionDescriptor,
    deps: ConnectorDeps,
    retire: mpsc::UnboundedSender<SessionId>,
) -> ConnectorHandle {
    let (sender, commands) = mpsc::channel(64);
    let (state_tx, state_rx) = watch::channel(ConnectorState::Idle);
    let cancel = CancellationToken::new();
    let id = descriptor.id.clone();

    let connector = Connector {
        descriptor,
        deps,
        lifecycle: Lifecycle::new(),
        state_tx,
        transport: None,
        active: false,
        container: Size::default(),
        retire,
    };
    tokio::spawn(connector.run(commands, cancel.clone()));

    ConnectorHandle {
        id,
        sender,
        state: state_rx,
        cancel,
    }
}

impl Connector {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ConnectorCommand>,
        cancel: CancellationToken,
    ) {
        let mut token = self.deps.token.clone();
        let mut watching_token = true;

        let initial = token.borrow_and_update().clone();
        self.token_changed(initial);

        while !self.lifecycle.state().is_terminal() {
            let idle = self.lifecycle.state() == ConnectorState::Idle;
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.handle(LifecycleEvent::CloseRequested);
                }
                changed = token.changed(), if idle && watching_token => {
                    if changed.is_ok() {
                        let current = token.borrow_and_update().clone();
                        self.token_changed(current);
                    } else {
                        debug!(session = %self.descriptor.id, "token source closed");
                        watching_token = false;
                    }
                }
                command = commands.recv() => match command {
                    Some(command) => self.command(command),
                    None => self.handle(LifecycleEvent::CloseRequested),
                },
                signal = next_signal(&mut self.transport) => self.transport_signal(signal),
            }
        }

        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let ConnectorCommand::Save { respond_to, .. } = command {
                let _ = respond_to.send(Err(ConnectorError::NotConnected(self.lifecycle.state())));
            }
        }
        debug!(session = %self.descriptor.id, state = ?self.lifecycle.state(), "connector stopped");
    }

    fn token_changed(&mut self, token: Option<String>) {
        match token.filter(|t| !t.is_empty()) {
            Some(token) => self.handle(LifecycleEvent::TokenAvailable(token)),
            None => self.handle(LifecycleEvent::TokenRevoked),
        }
    }

    fn handle(&mut self, event: LifecycleEvent) {
        let before = self.lifecycle.state();
        if let LifecycleEvent::TransportFailed(reason) = &event {
            warn!(session = %self.descriptor.id, %reason, "transport failed");
        }
        let Some(effect) = self.lifecycle.apply(event) else {
            return;
        };
        let after = self.lifecycle.state();
        debug!(session = %self.descriptor.id, from = ?before, to = ?after, "connector transition");
        self.state_tx.send_replace(after);

        match effect {
            Effect::Open { token } => self.open(&token),
            Effect::StartServices => self.start_services(),
            Effect::Teardown => self.teardown(),
        }
    }

    fn open(&mut self, token: &str) {
        let url = format!("{}{}", self.deps.config.tunnel_base, self.descriptor.tunnel());
        let query = self.descriptor.target.connect_query(token);
        info!(session = %self.descriptor.id, tunnel = %url, "opening transport");

        match self.deps.factory.open(&url, &query) {
            Ok(opened) => {
                self.transport = Some(TransportHandle::new(opened.display, opened.events));
            }
            Err(err) => self.handle(LifecycleEvent::TransportFailed(err.to_string())),
        }
    }

    fn start_services(&mut self) {
        let config = self.deps.config.clone();
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        info!(session = %self.descriptor.id, "session connected");

        transport.resize_poll = Some(poll_interval(config.resize_poll));
        if config.clipboard_enabled && transport.clipboard.is_none() {
            let bridge = ClipboardBridge::start(self.deps.clipboard.clone());
            if bridge.polling() {
                transport.clipboard_poll = Some(poll_interval(config.clipboard_poll));
            }
            transport.clipboard = Some(bridge);
        }
        self.resize();
    }

    fn teardown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.release();
        }
        info!(session = %self.descriptor.id, state = ?self.lifecycle.state(), "session closed");
        if self.retire.send(self.descriptor.id.clone()).is_err() {
            debug!(session = %self.descriptor.id, "session hub already gone");
        }
    }

    fn command(&mut self, command: ConnectorCommand) {
        match command {
            ConnectorCommand::Surface(event) => self.surface(event),
            ConnectorCommand::SetActive(active) => {
                self.active = active;
                if active {
                    self.resize();
                }
            }
            ConnectorCommand::Save {
                path,
                text,
                respond_to,
            } => {
                let _ = respond_to.send(self.save(&path, &text));
            }
        }
    }

    fn surface(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::ContainerResized(size) => {
                self.container = size;
                self.resize();
            }
            SurfaceEvent::WindowResized => self.resize(),
            event => self.input(event),
        }
    }

    fn input(&mut self, event: SurfaceEvent) {
        if self.lifecycle.state() != ConnectorState::Connected {
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        match event {
            SurfaceEvent::Pointer { x, y, buttons } => match transport.transform {
                Some(transform) => {
                    let (x, y) = transform.to_remote(x, y);
                    transport.display.send_mouse(MouseState { x, y, buttons });
                }
                None => {
                    debug!(session = %self.descriptor.id, "no display transform, pointer dropped")
                }
            },
            SurfaceEvent::Key { keysym, pressed } => transport.display.send_key(pressed, keysym),
            SurfaceEvent::Paste(text) => {
                if let Some(bridge) = transport.clipboard.as_mut() {
                    bridge.paste(transport.display.as_mut(), &text);
                }
            }
            SurfaceEvent::ContainerResized(_) | SurfaceEvent::WindowResized => {}
        }
    }

    /// Recompute the transform from current container and remote sizes.
    ///
    /// The input mapping is refreshed on every trigger, active or not. Only
    /// the active session pushes its size and transform to the display.
    fn resize(&mut self) {
        if self.container.is_empty() {
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        let fitted = Transform::fit(self.container, transport.display.display_size());
        transport.transform = fitted;
        if !self.active {
            return;
        }

        if transport.sent_size != Some(self.container) {
            transport.display.send_size(self.container);
            transport.sent_size = Some(self.container);
        }
        if fitted != transport.applied {
            if let Some(transform) = fitted {
                transport.display.apply_transform(transform);
            }
            transport.applied = fitted;
        }
    }

    fn transport_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Event(Some(event)) => self.transport_event(event),
            TransportSignal::Event(None) => self.handle(LifecycleEvent::TransportDisconnected),
            TransportSignal::ResizePoll => self.resize(),
            TransportSignal::ClipboardPoll => {
                if let Some(transport) = self.transport.as_mut() {
                    if let Some(bridge) = transport.clipboard.as_mut() {
                        bridge.poll(transport.display.as_mut());
                    }
                }
            }
        }
    }

    fn transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.handle(LifecycleEvent::TransportConnected),
            TransportEvent::Disconnected => self.handle(LifecycleEvent::TransportDisconnected),
            TransportEvent::Error(reason) => self.handle(LifecycleEvent::TransportFailed(reason)),
            TransportEvent::DisplayResized(size) => {
                debug!(
                    session = %self.descriptor.id,
                    width = size.width,
                    height = size.height,
                    "remote display resized"
                );
                self.resize();
            }
            TransportEvent::ClipboardOpened { stream, mimetype } => {
                if let Some(bridge) = self.bridge() {
                    bridge.stream_opened(stream, &mimetype);
                }
            }
            TransportEvent::ClipboardText { stream, text } => {
                if let Some(bridge) = self.bridge() {
                    bridge.stream_text(stream, &text);
                }
            }
            TransportEvent::ClipboardEnded { stream } => {
                if let Some(bridge) = self.bridge() {
                    bridge.stream_ended(stream);
                }
            }
        }
    }

    fn bridge(&mut self) -> Option<&mut ClipboardBridge> {
        self.transport.as_mut()?.clipboard.as_mut()
    }

    fn save(&mut self, path: &str, text: &str) -> Result<UploadSummary, ConnectorError> {
        let state = self.lifecycle.state();
        if state != ConnectorState::Connected {
            return Err(ConnectorError::NotConnected(state));
        }
        let transport = self
            .transport
            .as_mut()
            .ok_or(ConnectorError::NotConnected(state))?;

        let summary = upload(&mut FrameChannel(transport.display.as_mut()), path, text)?;
        info!(
            session = %self.descriptor.id,
            %path,
            chunks = summary.chunks,
            bytes = summary.bytes,
            "file saved"
        );
        Ok(summary)
    }
}
