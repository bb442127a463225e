//! Shotline Engine
//!
//! Keeps ordered shot timelines in sync between a client cache and a remote
//! store, applying every change optimistically.
//!
//! Layered architecture:
//! - models, position: records and the pure key allocator
//! - cache, reconcile: the projection store and in-place identity swaps
//! - remote, notify: collaborators the engine talks to
//! - orchestrator: the mutation lifecycle tying them together

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod position;
pub mod reconcile;
pub mod remote;

pub use cache::{CacheKey, CacheStore, Projection, SharedCache};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, FailureKind, RemoteError, RemoteErrorKind, RemoteResult};
pub use models::{Entry, Generation, GenerationKind, Placement, RecordId, Shot, ShotView};
pub use notify::{LogSink, NotificationSink, Notice, RecordingSink};
pub use orchestrator::{MutationRecord, MutationState, Orchestrator};
pub use position::{allocate, AllocationError, Intent, PositionPolicy};
pub use remote::{GenerationProvider, MemoryStore, RemoteStore, ShotDraft};
