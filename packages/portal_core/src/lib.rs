//! Session bookkeeping, display geometry, deep-link resolution and the
//! chunked file transfer protocol. Everything here is synchronous and free
//! of I/O; the `portal` crate drives it from async tasks.

pub mod deeplink;
pub mod geometry;
pub mod store;
pub mod target;
pub mod transfer;

pub use deeplink::{
    Catalog, ContainerKind, ContainerRecord, ContainerStatus, ResolveError, Resolved,
    ServerProtocol, ServerRecord, open_link, resolve,
};
pub use geometry::{Size, Transform};
pub use store::{SessionDescriptor, SessionId, SessionStore, StoreSnapshot};
pub use target::{SessionKind, SessionTarget, tunnel_name};
pub use transfer::{
    CHUNK_SIZE, CompletedFile, FrameSink, Opcode, TransferAssembler, TransferError,
    TransferFrame, UploadSummary, upload, upload_frames,
};
