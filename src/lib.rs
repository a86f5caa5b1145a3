//! Elohim SCORM - SCORM 1.2 / 2004 interoperability for Elohim courses
//!
//! Two jobs:
//!
//! - **Run-time**: host the SCORM RTE API for a launched SCO. Each launch gets
//!   an explicit [`RteSession`] backed by a validated CMI [`DataModel`]; a
//!   per-session commit worker makes its state durable.
//! - **Import**: turn a SCORM ZIP into a native [`Course`] draft.
//!
//! ## Architecture
//!
//! ```text
//!   SCO ──► window.API ──► RteSession ──► DataModel (cmi.*)
//!                              │
//!                              └── CommitJob ──► commit worker ──► Persistence (sled | memory)
//!
//!   ZIP ──► package::import_archive ──► convert::convert ──► Course draft + warnings
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/elohim-scorm/
//! ├── sessions.sled/         # Session snapshots (rmp-serde records)
//! └── config.toml            # Configuration
//! ```

pub mod cmi;
pub mod commit;
pub mod config;
pub mod convert;
pub mod debug_stream;
pub mod error;
pub mod http;
pub mod package;
pub mod persistence;
pub mod rte;

// Re-exports
pub use cmi::{DataModel, DataModelError, ScormVersion};
pub use commit::{FlushAck, FlushPayload, PipelineConfig, SessionSnapshot};
pub use config::Config;
pub use convert::{
    convert, import_package, import_package_with_limit, Block, Course, CourseMetadata, ImportOutcome,
    QuizItem,
};
pub use debug_stream::{DebugBroadcaster, DebugEvent};
pub use error::ScormError;
pub use http::HttpServer;
pub use package::{
    import_archive, import_archive_with_limit, ImportError, ImportFailure, ImportWarning,
    ScormPackage,
};
pub use persistence::{MemoryPersistence, Persistence, SledPersistence};
pub use rte::{LaunchRequest, Rollup, RteEngine, RteSession, SessionState};
