pub mod config;
pub mod error;
pub mod events;
pub mod context;
pub mod frame;
pub mod hardware;
pub mod policy;
pub mod detect;
pub mod queue;
pub mod remote;
pub mod sync;
pub mod capture;
pub mod poller;
pub mod connectivity;
pub mod scheduler;

pub use capture::{CaptureOutcome, CaptureProducer, SkipCause};
pub use config::{CaptureMode, SentrycamConfig};
pub use connectivity::ConnectivityMonitor;
pub use context::SystemContext;
pub use detect::{Detection, DetectionGate, Detector, GateDecision};
pub use error::{Result, SentrycamError};
pub use events::{EventBus, SentrycamEvent};
pub use frame::{Frame, FrameSource, StubFrameSource};
pub use hardware::{AuxLight, AuxSupport, NullAuxLight, NullWakeLock, WakeLock};
pub use poller::{Command, CommandPoller};
pub use queue::{
    BlobStore, CaptureRecord, FileBlobStore, MemoryBlobStore, NewRecord, OfflineQueue, RecordKind,
};
pub use remote::{RemoteCommand, RemoteTransport, TelegramTransport};
pub use scheduler::Scheduler;
pub use sync::{ArchivePacker, DeliveryReport, SkipReason, SyncEngine, ZipPacker, BATCH_THRESHOLD};
