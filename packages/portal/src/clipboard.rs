//! Clipboard sync between the local machine and one remote session.
//!
//! Remote → local: `text/plain` clipboard streams are accumulated until they
//! end, then written to the local clipboard. Write failures are swallowed.
//!
//! Local → remote: paste events are always forwarded. If read permission was
//! granted when the bridge started, a poll also forwards clipboard content
//! that differs from what was last synced.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::transport::{RemoteDisplay, StreamId};

pub const TEXT_PLAIN: &str = "text/plain";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClipboardError {
    #[error("clipboard access denied")]
    PermissionDenied,
}

/// The local system clipboard.
pub trait LocalClipboard: Send + Sync {
    /// Whether background reads are allowed. Asked once per bridge.
    fn read_permitted(&self) -> bool;

    fn read_text(&self) -> Result<String, ClipboardError>;

    fn write_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// Send `text` to the remote clipboard: open a stream, write, end it.
/// Empty text is not sent.
pub fn send_clipboard_text(display: &mut dyn RemoteDisplay, text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let stream = display.open_clipboard_stream(TEXT_PLAIN);
    display.write_stream(stream, text);
    display.end_stream(stream);
    true
}

pub struct ClipboardBridge {
    local: Arc<dyn LocalClipboard>,
    inbound: HashMap<StreamId, String>,
    polling: bool,
    /// Last value known to be on both sides.
    last_synced: Option<String>,
}

impl ClipboardBridge {
    /// Bind a bridge to a session. Checks read permission exactly once.
    pub fn start(local: Arc<dyn LocalClipboard>) -> Self {
        let polling = local.read_permitted();
        if !polling {
            debug!("clipboard read not permitted, polling disabled");
        }
        Self {
            local,
            inbound: HashMap::new(),
            polling,
            last_synced: None,
        }
    }

    pub fn polling(&self) -> bool {
        self.polling
    }

    /// Only one inbound text stream is buffered at a time; a new one
    /// replaces any stream that never ended.
    pub fn stream_opened(&mut self, stream: StreamId, mimetype: &str) {
        if mimetype == TEXT_PLAIN {
            if !self.inbound.is_empty() {
                debug!(
                    stream,
                    dropped = self.inbound.len(),
                    "discarding unfinished clipboard stream"
                );
                self.inbound.clear();
            }
            self.inbound.insert(stream, String::new());
        } else {
            debug!(stream, mimetype, "ignoring non-text clipboard stream");
        }
    }

    pub fn stream_text(&mut self, stream: StreamId, text: &str) {
        if let Some(buf) = self.inbound.get_mut(&stream) {
            buf.push_str(text);
        }
    }

    pub fn stream_ended(&mut self, stream: StreamId) {
        let Some(text) = self.inbound.remove(&stream) else {
            return;
        };
        match self.local.write_text(&text) {
            Ok(()) => self.last_synced = Some(text),
            Err(err) => debug!(error = %err, "dropping remote clipboard update"),
        }
    }

    /// Forward text from a paste event.
    pub fn paste(&mut self, display: &mut dyn RemoteDisplay, text: &str) {
        if send_clipboard_text(display, text) {
            self.last_synced = Some(text.to_string());
        }
    }

    /// One poll tick. Returns true if something was sent.
    pub fn poll(&mut self, display: &mut dyn RemoteDisplay) -> bool {
        if !self.polling {
            return false;
        }
        let text = match self.local.read_text() {
            Ok(text) => text,
            Err(err) => {
                debug!(error = %err, "clipboard poll read failed");
                return false;
            }
        };
        if self.last_synced.as_deref() == Some(text.as_str()) {
            return false;
        }
        let sent = send_clipboard_text(display, &text);
        self.last_synced = Some(text);
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Call, FakeClipboard, fake_display};

    #[test]
    fn send_opens_writes_and_ends() {
        let (mut display, probe) = fake_display();
        assert!(send_clipboard_text(display.as_mut(), "hello"));
        assert_eq!(
            probe.calls(),
            vec![
                Call::OpenStream {
                    stream: 1,
                    mimetype: TEXT_PLAIN.to_string()
                },
                Call::Write {
                    stream: 1,
                    text: "hello".to_string()
                },
                Call::End { stream: 1 },
            ]
        );
        assert!(!send_clipboard_text(display.as_mut(), ""));
        assert_eq!(probe.calls().len(), 3);
    }

    #[test]
    fn remote_text_is_accumulated_until_end() {
        let local = Arc::new(FakeClipboard::permitted());
        let mut bridge = ClipboardBridge::start(local.clone());

        bridge.stream_opened(4, TEXT_PLAIN);
        bridge.stream_text(4, "foo ");
        bridge.stream_text(4, "bar");
        assert!(local.writes().is_empty());
        bridge.stream_ended(4);
        assert_eq!(local.writes(), vec!["foo bar".to_string()]);
    }

    #[test]
    fn unfinished_stream_is_replaced() {
        let local = Arc::new(FakeClipboard::permitted());
        let mut bridge = ClipboardBridge::start(local.clone());

        bridge.stream_opened(1, TEXT_PLAIN);
        bridge.stream_text(1, "lost");
        bridge.stream_opened(2, TEXT_PLAIN);
        bridge.stream_text(1, "late");
        bridge.stream_text(2, "kept");
        assert_eq!(bridge.inbound.len(), 1);

        bridge.stream_ended(1);
        bridge.stream_ended(2);
        assert_eq!(local.writes(), vec!["kept".to_string()]);
    }

    #[test]
    fn non_text_streams_are_ignored() {
        let local = Arc::new(FakeClipboard::permitted());
        let mut bridge = ClipboardBridge::start(local.clone());

        bridge.stream_opened(1, "image/png");
        bridge.stream_text(1, "binary");
        bridge.stream_ended(1);
        assert!(local.writes().is_empty());
    }

    #[test]
    fn write_failures_are_swallowed() {
        let local = Arc::new(FakeClipboard {
            permitted: true,
            fail_writes: true,
            ..Default::default()
        });
        let mut bridge = ClipboardBridge::start(local.clone());
        bridge.stream_opened(1, TEXT_PLAIN);
        bridge.stream_text(1, "x");
        bridge.stream_ended(1);
        assert!(local.writes().is_empty());
    }

    #[test]
    fn poll_forwards_only_changes() {
        let local = Arc::new(FakeClipboard::permitted());
        let (mut display, probe) = fake_display();
        let mut bridge = ClipboardBridge::start(local.clone());
        assert!(bridge.polling());

        local.set("one");
        assert!(bridge.poll(display.as_mut()));
        assert!(!bridge.poll(display.as_mut()));
        local.set("two");
        assert!(bridge.poll(display.as_mut()));
        assert_eq!(probe.clipboard_sends(), vec!["one", "two"]);
    }

    #[test]
    fn poll_does_not_echo_remote_updates_or_pastes() {
        let local = Arc::new(FakeClipboard::permitted());
        let (mut display, probe) = fake_display();
        let mut bridge = ClipboardBridge::start(local.clone());

        bridge.stream_opened(9, TEXT_PLAIN);
        bridge.stream_text(9, "from remote");
        bridge.stream_ended(9);
        assert!(!bridge.poll(display.as_mut()));

        bridge.paste(display.as_mut(), "pasted");
        local.set("pasted");
        assert!(!bridge.poll(display.as_mut()));
        assert_eq!(probe.clipboard_sends(), vec!["pasted"]);
    }

    #[test]
    fn denied_permission_disables_poll_but_not_paste() {
        let local = Arc::new(FakeClipboard::default());
        let (mut display, probe) = fake_display();
        let mut bridge = ClipboardBridge::start(local.clone());
        assert!(!bridge.polling());
        assert_eq!(*local.permission_checks.lock().unwrap(), 1);

        local.set("secret");
        assert!(!bridge.poll(display.as_mut()));
        bridge.paste(display.as_mut(), "typed");
        assert_eq!(probe.clipboard_sends(), vec!["typed"]);
        assert_eq!(*local.permission_checks.lock().unwrap(), 1);
    }
}
