use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use portal_core::geometry::{Size, Transform};
use portal_core::transfer::TransferFrame;

use crate::clipboard::{ClipboardError, LocalClipboard};
use crate::transport::{
    MouseState, OpenedTransport, RemoteDisplay, StreamId, TransportError, TransportEvent,
    TransportFactory,
};

/// Everything a fake display was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Mouse(MouseState),
    Key { pressed: bool, keysym: u32 },
    Size(Size),
    Transform(Transform),
    OpenStream { stream: StreamId, mimetype: String },
    Write { stream: StreamId, text: String },
    End { stream: StreamId },
    Frame(TransferFrame),
    Disconnect,
}

#[derive(Clone, Default)]
pub struct DisplayProbe {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub size: Arc<Mutex<Size>>,
    /// Frames accepted before `send_frame` starts failing.
    pub frame_budget: Arc<Mutex<Option<usize>>>,
}

impl DisplayProbe {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn set_size(&self, size: Size) {
        *self.size.lock().unwrap() = size;
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn frames(&self) -> Vec<TransferFrame> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Frame(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Text sent to the remote clipboard, one entry per completed stream.
    pub fn clipboard_sends(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Write { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

pub struct FakeDisplay {
    probe: DisplayProbe,
    next_stream: StreamId,
}

impl FakeDisplay {
    fn record(&self, call: Call) {
        self.probe.calls.lock().unwrap().push(call);
    }
}

impl RemoteDisplay for FakeDisplay {
    fn send_mouse(&mut self, state: MouseState) {
        self.record(Call::Mouse(state));
    }

    fn send_key(&mut self, pressed: bool, keysym: u32) {
        self.record(Call::Key { pressed, keysym });
    }

    fn send_size(&mut self, size: Size) {
        self.record(Call::Size(size));
    }

    fn display_size(&self) -> Size {
        *self.probe.size.lock().unwrap()
    }

    fn apply_transform(&mut self, transform: Transform) {
        self.record(Call::Transform(transform));
    }

    fn open_clipboard_stream(&mut self, mimetype: &str) -> StreamId {
        self.next_stream += 1;
        let stream = self.next_stream;
        self.record(Call::OpenStream {
            stream,
            mimetype: mimetype.to_string(),
        });
        stream
    }

    fn write_stream(&mut self, stream: StreamId, text: &str) {
        self.record(Call::Write {
            stream,
            text: text.to_string(),
        });
    }

    fn end_stream(&mut self, stream: StreamId) {
        self.record(Call::End { stream });
    }

    fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let mut budget = self.probe.frame_budget.lock().unwrap();
        if let Some(left) = budget.as_mut() {
            if *left == 0 {
                return Err(TransportError::Closed);
            }
            *left -= 1;
        }
        drop(budget);
        let frame =
            TransferFrame::decode(&frame).map_err(|e| TransportError::Remote(e.to_string()))?;
        self.record(Call::Frame(frame));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.record(Call::Disconnect);
    }
}

/// One `open` call seen by the fake factory.
pub struct FakeLink {
    pub url: String,
    pub query: String,
    pub probe: DisplayProbe,
    pub events: mpsc::Sender<TransportEvent>,
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    pub links: Arc<Mutex<Vec<FakeLink>>>,
    pub refuse: Arc<Mutex<bool>>,
    /// Remote size new displays start with.
    pub initial_size: Arc<Mutex<Size>>,
}

impl FakeFactory {
    pub fn opened(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn probe(&self, index: usize) -> DisplayProbe {
        self.links.lock().unwrap()[index].probe.clone()
    }

    pub fn events(&self, index: usize) -> mpsc::Sender<TransportEvent> {
        self.links.lock().unwrap()[index].events.clone()
    }

    pub fn target(&self, index: usize) -> (String, String) {
        let links = self.links.lock().unwrap();
        (links[index].url.clone(), links[index].query.clone())
    }
}

impl TransportFactory for FakeFactory {
    fn open(&self, tunnel_url: &str, query: &str) -> Result<OpenedTransport, TransportError> {
        if *self.refuse.lock().unwrap() {
            return Err(TransportError::Open {
                url: tunnel_url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let probe = DisplayProbe::default();
        probe.set_size(*self.initial_size.lock().unwrap());
        let (tx, rx) = mpsc::channel(32);
        self.links.lock().unwrap().push(FakeLink {
            url: tunnel_url.to_string(),
            query: query.to_string(),
            probe: probe.clone(),
            events: tx,
        });
        Ok(OpenedTransport {
            display: Box::new(FakeDisplay {
                probe,
                next_stream: 0,
            }),
            events: rx,
        })
    }
}

#[derive(Default)]
pub struct FakeClipboard {
    pub permitted: bool,
    pub contents: Mutex<String>,
    pub writes: Mutex<Vec<String>>,
    pub fail_writes: bool,
    pub permission_checks: Mutex<usize>,
}

impl FakeClipboard {
    pub fn permitted() -> Self {
        Self {
            permitted: true,
            ..Default::default()
        }
    }

    pub fn set(&self, text: &str) {
        *self.contents.lock().unwrap() = text.to_string();
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

impl LocalClipboard for FakeClipboard {
    fn read_permitted(&self) -> bool {
        *self.permission_checks.lock().unwrap() += 1;
        self.permitted
    }

    fn read_text(&self) -> Result<String, ClipboardError> {
        if !self.permitted {
            return Err(ClipboardError::PermissionDenied);
        }
        Ok(self.contents.lock().unwrap().clone())
    }

    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        if self.fail_writes {
            return Err(ClipboardError::PermissionDenied);
        }
        self.writes.lock().unwrap().push(text.to_string());
        *self.contents.lock().unwrap() = text.to_string();
        Ok(())
    }
}

/// Token channel pre-loaded with `token`.
pub fn token_channel(
    token: Option<&str>,
) -> (watch::Sender<Option<String>>, watch::Receiver<Option<String>>) {
    watch::channel(token.map(str::to_string))
}

/// Let spawned actors drain their queues without moving past any poll interval.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
}

/// A standalone fake display for synchronous tests.
pub fn fake_display() -> (Box<dyn RemoteDisplay>, DisplayProbe) {
    let probe = DisplayProbe::default();
    (
        Box::new(FakeDisplay {
            probe: probe.clone(),
            next_stream: 0,
        }),
        probe,
    )
}
