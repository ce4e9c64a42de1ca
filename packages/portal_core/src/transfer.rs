//! Chunked file transfer over an open session channel.
//!
//! A save is one OPEN frame carrying the destination path, one CHUNK frame per
//! 1024-byte slice of the UTF-8 file text (base64, padded), and one CLOSE
//! frame. Frames are fire-and-forget; the channel must preserve order and the
//! receiver must only commit the file once CLOSE arrives.
//!
//! Wire format per frame: `[opcode byte][JSON payload]`
//!
//! | opcode | frame | payload              |
//! |--------|-------|----------------------|
//! | `0x2`  | OPEN  | `{"path": "..."}`    |
//! | `0x3`  | CHUNK | `{"chunk": "<b64>"}` |
//! | `0x4`  | CLOSE | empty                |

use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use std::iter;

/// Maximum number of source bytes carried by one CHUNK frame.
pub const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Open = 0x2,
    Chunk = 0x3,
    Close = 0x4,
}

impl TryFrom<u8> for Opcode {
    type Error = TransferError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x2 => Ok(Self::Open),
            0x3 => Ok(Self::Chunk),
            0x4 => Ok(Self::Close),
            other => Err(TransferError::UnknownOpcode(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("unknown transfer opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("empty frame")]
    EmptyFrame,

    #[error("malformed {opcode:?} payload: {source}")]
    MalformedPayload {
        opcode: Opcode,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode frame payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("invalid chunk encoding: {0}")]
    InvalidChunk(#[from] data_encoding::DecodeError),

    #[error("{0:?} frame without a preceding OPEN")]
    NotOpen(Opcode),

    #[error("OPEN for {path} while a transfer is already in progress")]
    AlreadyOpen { path: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("transfer interrupted after {chunks_sent} chunk(s): {reason}")]
    Interrupted { chunks_sent: usize, reason: String },
}

#[derive(Serialize, Deserialize)]
struct OpenPayload {
    path: String,
}

#[derive(Serialize, Deserialize)]
struct ChunkPayload {
    chunk: String,
}

/// One opcode-tagged unit of the transfer protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFrame {
    Open { path: String },
    /// Base64 of at most [`CHUNK_SIZE`] source bytes.
    Chunk { data: String },
    Close,
}

impl TransferFrame {
    /// Encode one slice of file bytes as a CHUNK frame.
    pub fn chunk(slice: &[u8]) -> Self {
        Self::Chunk {
            data: BASE64.encode(slice),
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Open { .. } => Opcode::Open,
            Self::Chunk { .. } => Opcode::Chunk,
            Self::Close => Opcode::Close,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TransferError> {
        let payload = match self {
            Self::Open { path } => serde_json::to_vec(&OpenPayload { path: path.clone() })
                .map_err(TransferError::Encode)?,
            Self::Chunk { data } => serde_json::to_vec(&ChunkPayload {
                chunk: data.clone(),
            })
            .map_err(TransferError::Encode)?,
            Self::Close => Vec::new(),
        };

        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(self.opcode() as u8);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransferError> {
        let (&first, payload) = bytes.split_first().ok_or(TransferError::EmptyFrame)?;
        let opcode = Opcode::try_from(first)?;
        let malformed = |source| TransferError::MalformedPayload { opcode, source };

        match opcode {
            Opcode::Open => {
                let p: OpenPayload = serde_json::from_slice(payload).map_err(malformed)?;
                Ok(Self::Open { path: p.path })
            }
            Opcode::Chunk => {
                let p: ChunkPayload = serde_json::from_slice(payload).map_err(malformed)?;
                Ok(Self::Chunk { data: p.chunk })
            }
            Opcode::Close => Ok(Self::Close),
        }
    }

    /// Decoded source bytes of a CHUNK frame; `None` for other frames.
    pub fn chunk_bytes(&self) -> Result<Option<Vec<u8>>, TransferError> {
        match self {
            Self::Chunk { data } => Ok(Some(BASE64.decode(data.as_bytes())?)),
            _ => Ok(None),
        }
    }
}

/// Frames for saving `text` to `path`, in emission order.
///
/// An empty file yields only OPEN and CLOSE.
pub fn upload_frames<'a>(path: &str, text: &'a str) -> impl Iterator<Item = TransferFrame> + 'a {
    iter::once(TransferFrame::Open {
        path: path.to_string(),
    })
    .chain(text.as_bytes().chunks(CHUNK_SIZE).map(TransferFrame::chunk))
    .chain(iter::once(TransferFrame::Close))
}

/// Ordered, reliable channel that transfer frames are written to.
pub trait FrameSink {
    fn send_frame(&mut self, frame: &TransferFrame) -> Result<(), TransferError>;
}

impl FrameSink for Vec<TransferFrame> {
    fn send_frame(&mut self, frame: &TransferFrame) -> Result<(), TransferError> {
        self.push(frame.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub chunks: usize,
    pub bytes: usize,
}

/// Send a whole file through `sink` as OPEN, CHUNK*, CLOSE.
///
/// Taking the sink by `&mut` keeps two uploads on one channel from
/// interleaving. A sink failure stops the upload and reports how far it got;
/// the receiver sees an OPEN with no CLOSE and must discard it.
pub fn upload<S: FrameSink + ?Sized>(
    sink: &mut S,
    path: &str,
    text: &str,
) -> Result<UploadSummary, TransferError> {
    let mut chunks = 0;
    for frame in upload_frames(path, text) {
        sink.send_frame(&frame)
            .map_err(|err| TransferError::Interrupted {
                chunks_sent: chunks,
                reason: err.to_string(),
            })?;
        if frame.opcode() == Opcode::Chunk {
            chunks += 1;
        }
    }

    Ok(UploadSummary {
        chunks,
        bytes: text.len(),
    })
}

/// A file received in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub path: String,
    pub contents: Vec<u8>,
}

#[derive(Debug)]
struct PendingFile {
    path: String,
    contents: Vec<u8>,
}

/// Receiving side of the protocol.
///
/// Buffers everything between OPEN and CLOSE and only hands out the file on
/// CLOSE, so an interrupted sequence is never committed.
#[derive(Debug, Default)]
pub struct TransferAssembler {
    pending: Option<PendingFile>,
}

impl TransferAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.pending.is_some()
    }

    /// Path of the transfer in progress, if any.
    pub fn pending_path(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.path.as_str())
    }

    pub fn accept_bytes(&mut self, bytes: &[u8]) -> Result<Option<CompletedFile>, TransferError> {
        let frame = TransferFrame::decode(bytes)?;
        self.accept(frame)
    }

    /// Feed one frame. Returns the completed file on CLOSE.
    ///
    /// A second OPEN or an undecodable chunk discards the transfer in progress.
    pub fn accept(&mut self, frame: TransferFrame) -> Result<Option<CompletedFile>, TransferError> {
        match frame {
            TransferFrame::Open { path } => {
                if self.pending.take().is_some() {
                    return Err(TransferError::AlreadyOpen { path });
                }
                self.pending = Some(PendingFile {
                    path,
                    contents: Vec::new(),
                });
                Ok(None)
            }
            TransferFrame::Chunk { data } => {
                let pending = self
                    .pending
                    .as_mut()
                    .ok_or(TransferError::NotOpen(Opcode::Chunk))?;
                match BASE64.decode(data.as_bytes()) {
                    Ok(bytes) => {
                        pending.contents.extend_from_slice(&bytes);
                        Ok(None)
                    }
                    Err(err) => {
                        self.pending = None;
                        Err(err.into())
                    }
                }
            }
            TransferFrame::Close => {
                let pending = self
                    .pending
                    .take()
                    .ok_or(TransferError::NotOpen(Opcode::Close))?;
                Ok(Some(CompletedFile {
                    path: pending.path,
                    contents: pending.contents,
                }))
            }
        }
    }

    /// Drop a partial transfer (e.g. the channel closed mid-save).
    /// Returns the path that was being written.
    pub fn abort(&mut self) -> Option<String> {
        self.pending.take().map(|p| p.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink {
        accepted: usize,
        sent: Vec<TransferFrame>,
    }

    impl FrameSink for FailingSink {
        fn send_frame(&mut self, frame: &TransferFrame) -> Result<(), TransferError> {
            if self.sent.len() == self.accepted {
                return Err(TransferError::Channel("socket closed".to_string()));
            }
            self.sent.push(frame.clone());
            Ok(())
        }
    }

    #[test]
    fn opcode_wire_values() {
        assert_eq!(Opcode::Open as u8, 0x2);
        assert_eq!(Opcode::Chunk as u8, 0x3);
        assert_eq!(Opcode::Close as u8, 0x4);
        assert!(matches!(
            Opcode::try_from(0x5),
            Err(TransferError::UnknownOpcode(0x5))
        ));
    }

    #[test]
    fn encode_layout() {
        let open = TransferFrame::Open {
            path: "/etc/motd".to_string(),
        }
        .encode()
        .unwrap();
        assert_eq!(open[0], 0x2);
        assert_eq!(&open[1..], br#"{"path":"/etc/motd"}"#);

        let chunk = TransferFrame::chunk(b"hi").encode().unwrap();
        assert_eq!(chunk[0], 0x3);
        assert_eq!(&chunk[1..], br#"{"chunk":"aGk="}"#);

        assert_eq!(TransferFrame::Close.encode().unwrap(), vec![0x4]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            TransferFrame::decode(&[]),
            Err(TransferError::EmptyFrame)
        ));
        assert!(matches!(
            TransferFrame::decode(&[0x9]),
            Err(TransferError::UnknownOpcode(0x9))
        ));
        assert!(matches!(
            TransferFrame::decode(b"\x02{\"nope\":1}"),
            Err(TransferError::MalformedPayload {
                opcode: Opcode::Open,
                ..
            })
        ));
    }

    #[test]
    fn save_2500_bytes_emits_three_chunks() {
        let text = "x".repeat(2500);
        let mut sink = Vec::new();
        let summary = upload(&mut sink, "/srv/a.txt", &text).unwrap();
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.bytes, 2500);
        assert_eq!(sink.len(), 5);
        assert_eq!(sink[0].opcode(), Opcode::Open);
        assert_eq!(sink[4], TransferFrame::Close);

        let sizes: Vec<usize> = sink[1..4]
            .iter()
            .map(|f| f.chunk_bytes().unwrap().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![1024, 1024, 452]);
    }

    #[test]
    fn empty_file_has_no_chunks() {
        let frames: Vec<_> = upload_frames("/tmp/empty", "").collect();
        assert_eq!(
            frames,
            vec![
                TransferFrame::Open {
                    path: "/tmp/empty".to_string()
                },
                TransferFrame::Close
            ]
        );
    }

    #[test]
    fn multibyte_text_is_split_by_bytes() {
        // 3-byte characters: slices may end mid-character, bytes still reassemble.
        let text = "€".repeat(400);
        let mut sink = Vec::new();
        upload(&mut sink, "/x", &text).unwrap();
        assert_eq!(sink.len(), 2 + 2);

        let mut assembler = TransferAssembler::new();
        let mut done = None;
        for frame in sink {
            done = assembler.accept(frame).unwrap();
        }
        assert_eq!(done.unwrap().contents, text.as_bytes());
    }

    #[test]
    fn interrupted_upload_reports_progress() {
        let mut sink = FailingSink {
            accepted: 2,
            sent: Vec::new(),
        };
        let err = upload(&mut sink, "/x", &"a".repeat(3000)).unwrap_err();
        assert!(matches!(err, TransferError::Interrupted { chunks_sent: 1, .. }));
        assert_eq!(sink.sent.len(), 2);
    }

    #[test]
    fn assembler_rejects_chunk_without_open() {
        let mut assembler = TransferAssembler::new();
        assert!(matches!(
            assembler.accept(TransferFrame::chunk(b"x")),
            Err(TransferError::NotOpen(Opcode::Chunk))
        ));
        assert!(matches!(
            assembler.accept(TransferFrame::Close),
            Err(TransferError::NotOpen(Opcode::Close))
        ));
    }

    #[test]
    fn assembler_discards_on_second_open() {
        let mut assembler = TransferAssembler::new();
        assembler
            .accept(TransferFrame::Open {
                path: "/a".to_string(),
            })
            .unwrap();
        assembler.accept(TransferFrame::chunk(b"partial")).unwrap();
        let err = assembler
            .accept(TransferFrame::Open {
                path: "/b".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, TransferError::AlreadyOpen { .. }));
        assert!(!assembler.is_open());
    }

    #[test]
    fn assembler_abort_never_commits() {
        let mut assembler = TransferAssembler::new();
        assembler
            .accept_bytes(
                &TransferFrame::Open {
                    path: "/a".to_string(),
                }
                .encode()
                .unwrap(),
            )
            .unwrap();
        assembler
            .accept_bytes(&TransferFrame::chunk(b"half").encode().unwrap())
            .unwrap();
        assert_eq!(assembler.pending_path(), Some("/a"));
        assert_eq!(assembler.abort(), Some("/a".to_string()));
        assert!(matches!(
            assembler.accept(TransferFrame::Close),
            Err(TransferError::NotOpen(Opcode::Close))
        ));
    }

    #[test]
    fn assembler_drops_transfer_on_bad_chunk() {
        let mut assembler = TransferAssembler::new();
        assembler
            .accept(TransferFrame::Open {
                path: "/a".to_string(),
            })
            .unwrap();
        let err = assembler
            .accept(TransferFrame::Chunk {
                data: "!!not base64!!".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidChunk(_)));
        assert!(!assembler.is_open());
    }
}
