//! Liveness-gated face verification for location-gated attendance check-in.
//!
//! Camera frames flow through [`VerificationOrchestrator::process_frame`]:
//! spoof screening, a randomised gesture challenge and then consecutive
//! embedding matches against the user's enrollment photo. A session may
//! submit attendance once both the face and the geofence are verified.

pub mod collab;
pub mod config;
pub mod detector;
pub mod embedder;
pub mod frame;
pub mod geofence;
pub mod liveness;
pub mod matcher;
pub mod orchestrator;
pub mod records;
pub mod session;
pub mod spoof;
pub mod throttle;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use collab::{BlobStore, CollabError, LocationProvider, RemoteStore};
pub use config::PipelineConfig;
pub use detector::{DetectorError, DetectorInput, FaceLocator};
pub use embedder::{EmbedderConfig, EmbedderError, FaceEmbedder, TensorLayout};
pub use frame::{Frame, FrameDecoder, FrameError, Plane};
pub use geofence::{Coordinates, GeofenceVerdict};
pub use liveness::{LivenessChallenge, LivenessChallengeEngine};
pub use matcher::MatchAccumulator;
pub use orchestrator::{FrameOutcome, SharedEmbedder, VerificationOrchestrator};
pub use records::{AttendanceRecord, Group, Profile};
pub use session::{LocationStatus, SessionError, SessionSnapshot, SessionState, VerificationSession};
pub use spoof::{SpoofGuard, SpoofReason};
pub use types::{Embedding, FaceBox, FaceObservation};
