//! Hosting for check-in sessions: configuration, the SQLite-backed remote
//! store, session bootstrap, the frame worker thread and attendance
//! submission.

pub mod attendance;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod store;

pub use attendance::{submit, AttendanceError, SubmitGate, Submission};
pub use bootstrap::{open_session, OpenedSession};
pub use config::{Config, ConfigError};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use store::{SqliteStore, StoreError};
