use std::fmt;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::collab::{CollabError, LocationProvider};
use crate::config::PipelineConfig;
use crate::detector::DetectorError;
use crate::embedder::EmbedderError;
use crate::geofence::{self, GeofenceVerdict};
use crate::liveness::{LivenessChallenge, LivenessChallengeEngine};
use crate::matcher::MatchAccumulator;
use crate::records::Group;
use crate::types::Embedding;

/// Errors that stop a session from reaching the frame loop.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no signed-in user")]
    NotSignedIn,
    #[error("profile not found for user {0}")]
    ProfileNotFound(String),
    #[error("profile has no enrollment photo")]
    NoProfileImage,
    #[error("enrollment photo could not be decoded: {0}")]
    PhotoDecode(String),
    #[error("no face found in enrollment photo")]
    NoFaceInPhoto,
    #[error("face crop of enrollment photo is empty")]
    EmptyCrop,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error(transparent)]
    Collab(#[from] CollabError),
    #[error("reference embedding worker failed: {0}")]
    Worker(String),
}

impl SessionError {
    /// Text for the host UI.
    pub fn status_message(&self) -> String {
        match self {
            SessionError::NotSignedIn => "User not logged in.".to_string(),
            SessionError::ProfileNotFound(_) => "Profile not found.".to_string(),
            SessionError::NoProfileImage => "Profile image not found.".to_string(),
            SessionError::PhotoDecode(_) => "Profile image is not a valid bitmap.".to_string(),
            SessionError::NoFaceInPhoto => "No face found in profile picture.".to_string(),
            SessionError::EmptyCrop => "Could not crop face from profile.".to_string(),
            SessionError::Detector(_) => "Failed to process profile image.".to_string(),
            SessionError::Embedder(EmbedderError::ModelUnavailable(_)) => {
                "Error: face recognition model is not available.".to_string()
            }
            SessionError::Embedder(e) => format!("Error generating embedding: {e}"),
            SessionError::Collab(CollabError::Blob { .. }) => {
                "Failed to load profile image.".to_string()
            }
            SessionError::Collab(e) => format!("Error: {e}"),
            SessionError::Worker(e) => format!("Error generating embedding: {e}"),
        }
    }

    /// Configuration errors are not worth retrying within the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Embedder(EmbedderError::ModelUnavailable(_)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for the reference embedding.
    Initializing,
    /// Evaluating frames.
    Ready,
    /// Identity confirmed; frame processing stops.
    FaceVerified,
    /// Attendance written; the session is finished.
    Submitted,
}

/// Outcome of the geofence check. Set independently of face verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationStatus {
    Pending,
    /// The group has no geofence.
    Unrestricted,
    Verified(GeofenceVerdict),
    TooFar(GeofenceVerdict),
    Unavailable,
}

impl LocationStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, LocationStatus::Unrestricted | LocationStatus::Verified(_))
    }

    pub fn message(&self) -> String {
        match self {
            LocationStatus::Pending => "Checking location...".to_string(),
            LocationStatus::Unrestricted => "Location Check Skipped (Unrestricted)".to_string(),
            LocationStatus::Verified(v) | LocationStatus::TooFar(v) => v.message(),
            LocationStatus::Unavailable => "Could not fetch location".to_string(),
        }
    }
}

impl From<GeofenceVerdict> for LocationStatus {
    fn from(v: GeofenceVerdict) -> Self {
        if v.within {
            LocationStatus::Verified(v)
        } else {
            LocationStatus::TooFar(v)
        }
    }
}

impl fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Run the geofence check for `group` against a one-shot fix.
///
/// Provider errors are logged and reported as [`LocationStatus::Unavailable`]
/// so the caller can retry once a fix is obtainable.
pub async fn check_location<L: LocationProvider>(group: &Group, provider: &L) -> LocationStatus {
    if !group.location_restricted {
        return LocationStatus::Unrestricted;
    }

    match provider.current_location().await {
        Ok(Some(device)) => {
            let verdict = geofence::check(device, group.target(), group.radius);
            tracing::info!(
                group = %group.id,
                distance_m = verdict.distance_m,
                radius_m = verdict.radius_m,
                within = verdict.within,
                "geofence checked"
            );
            verdict.into()
        }
        Ok(None) => LocationStatus::Unavailable,
        Err(e) => {
            tracing::warn!(error = %e, "location fix failed");
            LocationStatus::Unavailable
        }
    }
}

/// All mutable verification state of one check-in screen.
pub struct VerificationSession {
    pub(crate) reference: Option<Embedding>,
    pub(crate) liveness: LivenessChallengeEngine,
    pub(crate) matcher: MatchAccumulator,
    pub(crate) location: LocationStatus,
    pub(crate) state: SessionState,
    pub(crate) face_status: String,
}

impl VerificationSession {
    pub fn new(config: &PipelineConfig, liveness: LivenessChallengeEngine) -> Self {
        Self {
            reference: None,
            liveness,
            matcher: MatchAccumulator::new(config),
            location: LocationStatus::Pending,
            state: SessionState::Initializing,
            face_status: "Initializing...".to_string(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_face_verified(&self) -> bool {
        matches!(self.state, SessionState::FaceVerified | SessionState::Submitted)
    }

    pub fn is_location_verified(&self) -> bool {
        self.location.is_verified()
    }

    /// The only gate for attendance submission.
    pub fn can_submit(&self) -> bool {
        self.state == SessionState::FaceVerified && self.is_location_verified()
    }

    pub fn reference(&self) -> Option<&Embedding> {
        self.reference.as_ref()
    }

    pub fn location(&self) -> &LocationStatus {
        &self.location
    }

    pub fn set_location(&mut self, status: LocationStatus) {
        self.location = status;
    }

    pub fn face_status(&self) -> &str {
        &self.face_status
    }

    pub fn current_challenge(&self) -> Option<LivenessChallenge> {
        self.liveness.current()
    }

    pub fn is_liveness_complete(&self) -> bool {
        self.liveness.is_complete()
    }

    pub fn match_count(&self) -> u32 {
        self.matcher.count()
    }

    pub(crate) fn install_reference(&mut self, reference: Embedding, now: Instant) {
        self.reference = Some(reference);
        self.liveness.start_sequence(now);
        self.matcher.reset();
        self.state = SessionState::Ready;
        self.face_status = "Ready. Please look at the camera.".to_string();
    }

    /// Mark the session finished after attendance was written.
    pub fn mark_submitted(&mut self) {
        if self.state == SessionState::FaceVerified {
            self.state = SessionState::Submitted;
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            face_verified: self.is_face_verified(),
            location_verified: self.is_location_verified(),
            liveness_complete: self.is_liveness_complete(),
            current_challenge: self.current_challenge(),
            match_count: self.matcher.count(),
            face_status: self.face_status.clone(),
            location_status: self.location.message(),
        }
    }
}

/// Read-only view of a session for the host UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub face_verified: bool,
    pub location_verified: bool,
    pub liveness_complete: bool,
    pub current_challenge: Option<LivenessChallenge>,
    pub match_count: u32,
    pub face_status: String,
    pub location_status: String,
}

impl SessionSnapshot {
    pub fn can_submit(&self) -> bool {
        self.state == SessionState::FaceVerified && self.location_verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::Coordinates;

    struct Fix(Option<Coordinates>);

    impl LocationProvider for Fix {
        async fn current_location(&self) -> Result<Option<Coordinates>, CollabError> {
            Ok(self.0)
        }
    }

    struct Broken;

    impl LocationProvider for Broken {
        async fn current_location(&self) -> Result<Option<Coordinates>, CollabError> {
            Err(CollabError::Location("permission denied".into()))
        }
    }

    fn group(restricted: bool) -> Group {
        Group {
            id: "g1".into(),
            name: "HQ".into(),
            latitude: 33.6844,
            longitude: 73.0479,
            start_time: "00:00".into(),
            end_time: "23:59".into(),
            radius: 100.0,
            location_restricted: restricted,
        }
    }

    #[tokio::test]
    async fn test_unrestricted_group_skips_fix() {
        let status = check_location(&group(false), &Broken).await;
        assert_eq!(status, LocationStatus::Unrestricted);
        assert!(status.is_verified());
    }

    #[tokio::test]
    async fn test_fix_inside_radius_verifies() {
        let status = check_location(&group(true), &Fix(Some(Coordinates::new(33.6845, 73.0479)))).await;
        assert!(status.is_verified());
        assert!(status.message().starts_with("Location Verified"));
    }

    #[tokio::test]
    async fn test_fix_outside_radius_fails() {
        let status = check_location(&group(true), &Fix(Some(Coordinates::new(33.70, 73.0479)))).await;
        assert!(matches!(status, LocationStatus::TooFar(_)));
        assert!(!status.is_verified());
    }

    #[tokio::test]
    async fn test_missing_fix_is_unavailable() {
        assert_eq!(check_location(&group(true), &Fix(None)).await, LocationStatus::Unavailable);
        assert_eq!(check_location(&group(true), &Broken).await, LocationStatus::Unavailable);
    }

    #[test]
    fn test_submit_gate_needs_both_flags() {
        let cfg = PipelineConfig::default();
        let mut s = VerificationSession::new(&cfg, LivenessChallengeEngine::new(cfg.clone(), Instant::now()));
        assert!(!s.can_submit());

        s.state = SessionState::FaceVerified;
        assert!(!s.can_submit());

        s.set_location(LocationStatus::Unrestricted);
        assert!(s.can_submit());
        assert!(s.snapshot().can_submit());

        s.mark_submitted();
        assert_eq!(s.state(), SessionState::Submitted);
        assert!(!s.can_submit());
        assert!(s.is_face_verified());
    }

    #[test]
    fn test_fatal_only_for_missing_model() {
        assert!(SessionError::Embedder(EmbedderError::ModelUnavailable("x".into())).is_fatal());
        assert!(!SessionError::NoFaceInPhoto.is_fatal());
    }
}
