//! Per-frame verification pipeline.
//!
//! Every camera frame goes through the same gates in order: throttle, state
//! check, detection, spoof screening, the liveness challenge and finally
//! embedding and matching against the enrollment reference. A frame that
//! fails any gate ends there. Failures are converted into a
//! [`FrameOutcome`] so the loop keeps running; nothing propagates out of
//! [`VerificationOrchestrator::process_frame`].
//!
//! Decoding, cropping and inference run on Tokio's blocking pool. The
//! embedder sits behind a shared mutex so the blocking task can own a handle
//! to it.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;

use crate::collab::LocationProvider;
use crate::config::PipelineConfig;
use crate::detector::{DetectorError, DetectorInput, FaceLocator};
use crate::embedder::{self, EmbedderError, FaceEmbedder};
use crate::frame::{Frame, FrameDecoder, FrameError};
use crate::liveness::{ChallengeEvaluation, LivenessChallenge, LivenessChallengeEngine};
use crate::records::Group;
use crate::session::{
    check_location, LocationStatus, SessionError, SessionSnapshot, SessionState,
    VerificationSession,
};
use crate::spoof::{Screening, SpoofGuard, SpoofReason};
use crate::throttle::FrameThrottle;
use crate::types::{Embedding, FaceBox};

/// The embedder is shared with blocking tasks.
pub type SharedEmbedder = Arc<Mutex<FaceEmbedder>>;

/// Failures inside the offloaded decode/crop/embed step.
#[derive(Error, Debug)]
enum EmbedStepError {
    #[error(transparent)]
    Decode(#[from] FrameError),
    #[error("face crop is empty")]
    EmptyCrop,
    #[error(transparent)]
    Embed(#[from] EmbedderError),
    #[error("embedder lock poisoned")]
    Poisoned,
}

/// What happened to one delivered frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Dropped by the throttle.
    Throttled,
    /// The reference embedding is not ready yet.
    NotReady,
    /// Identity already confirmed; frames are ignored.
    AlreadyVerified,
    NoFace,
    DetectionFailed(String),
    Rejected(SpoofReason),
    ChallengePending(LivenessChallenge),
    /// The previous gesture was performed; this one is now active.
    ChallengeAdvanced(LivenessChallenge),
    /// A step took too long. A fresh sequence starting with `restart_with` is active.
    ChallengeTimedOut { restart_with: Option<LivenessChallenge> },
    /// The last gesture was performed. Matching starts with the next frame.
    LivenessComplete,
    Matched { count: u32, required: u32, distance: f32 },
    NotRecognized { distance: f32 },
    FaceVerified { distance: f32 },
    Failed(String),
}

impl FrameOutcome {
    /// Status line for the host UI. `None` when the frame changes nothing visible.
    pub fn status_text(&self) -> Option<String> {
        let text = match self {
            FrameOutcome::Throttled | FrameOutcome::NotReady | FrameOutcome::AlreadyVerified => {
                return None
            }
            FrameOutcome::NoFace => "No face detected".to_string(),
            FrameOutcome::DetectionFailed(e) => format!("Detection failed: {e}"),
            FrameOutcome::Rejected(reason) => reason.message().to_string(),
            FrameOutcome::ChallengePending(LivenessChallenge::ZoomIn) => {
                "Move Closer... Closer...".to_string()
            }
            FrameOutcome::ChallengePending(c) => c.instruction().to_string(),
            FrameOutcome::ChallengeAdvanced(next) => next.follow_up().to_string(),
            FrameOutcome::ChallengeTimedOut { .. } => {
                "Too Slow! Restarting verification.".to_string()
            }
            FrameOutcome::LivenessComplete => "Liveness Verified!".to_string(),
            FrameOutcome::Matched {
                count, required, ..
            } => format!("Verifying... ({count}/{required})"),
            FrameOutcome::NotRecognized { distance } => {
                format!("Not Recognized (Dist: {distance:.2})")
            }
            FrameOutcome::FaceVerified { .. } => "Face Verified!".to_string(),
            FrameOutcome::Failed(e) => format!("Error: {e}"),
        };
        Some(text)
    }

    /// Whether the frame reached the matcher.
    pub fn reached_matcher(&self) -> bool {
        matches!(
            self,
            FrameOutcome::Matched { .. }
                | FrameOutcome::NotRecognized { .. }
                | FrameOutcome::FaceVerified { .. }
        )
    }
}

/// Compute the reference embedding from an encoded enrollment photo.
///
/// Decode, detect, take the first face, crop with `margin`, embed. The same
/// crop and embedding path as live frames.
pub async fn reference_embedding<D: FaceLocator>(
    detector: &D,
    embedder: &SharedEmbedder,
    photo: &[u8],
    margin: f32,
) -> Result<Embedding, SessionError> {
    let image = image::load_from_memory(photo)
        .map_err(|e| SessionError::PhotoDecode(e.to_string()))?
        .to_rgb8();

    let faces = detector.detect(DetectorInput::Still(&image)).await?;
    let face_box = faces
        .first()
        .map(|f| f.bounding_box)
        .ok_or(SessionError::NoFaceInPhoto)?;

    let embedder = Arc::clone(embedder);
    let task = tokio::task::spawn_blocking(move || {
        crop_and_embed(&embedder, &FrameDecoder, &image, &face_box, margin)
    });

    match task.await {
        Ok(Ok(embedding)) => Ok(embedding),
        Ok(Err(EmbedStepError::EmptyCrop)) => Err(SessionError::EmptyCrop),
        Ok(Err(EmbedStepError::Embed(e))) => Err(SessionError::Embedder(e)),
        Ok(Err(e)) => Err(SessionError::Worker(e.to_string())),
        Err(e) => Err(SessionError::Worker(e.to_string())),
    }
}

fn crop_and_embed(
    embedder: &Mutex<FaceEmbedder>,
    decoder: &FrameDecoder,
    image: &RgbImage,
    face_box: &FaceBox,
    margin: f32,
) -> Result<Embedding, EmbedStepError> {
    let crop = decoder
        .crop_face(image, face_box, margin)
        .ok_or(EmbedStepError::EmptyCrop)?;
    let mut embedder = embedder.lock().map_err(|_| EmbedStepError::Poisoned)?;
    Ok(embedder.embed(&crop)?)
}

fn embed_frame(
    embedder: &Mutex<FaceEmbedder>,
    decoder: FrameDecoder,
    frame: Frame,
    face_box: FaceBox,
    margin: f32,
) -> Result<Embedding, EmbedStepError> {
    let image = decoder.decode(&frame)?;
    // Release the camera buffer before inference.
    drop(frame);
    crop_and_embed(embedder, &decoder, &image, &face_box, margin)
}

/// Drives one verification session.
pub struct VerificationOrchestrator<D> {
    detector: D,
    embedder: SharedEmbedder,
    decoder: FrameDecoder,
    guard: SpoofGuard,
    throttle: FrameThrottle,
    config: PipelineConfig,
    session: VerificationSession,
}

impl<D: FaceLocator> VerificationOrchestrator<D> {
    pub fn new(detector: D, embedder: FaceEmbedder, config: PipelineConfig, now: Instant) -> Self {
        let liveness = LivenessChallengeEngine::new(config.clone(), now);
        Self::with_liveness(detector, embedder, config, liveness)
    }

    /// Use a prepared liveness engine, e.g. one with a seeded RNG.
    pub fn with_liveness(
        detector: D,
        embedder: FaceEmbedder,
        config: PipelineConfig,
        liveness: LivenessChallengeEngine,
    ) -> Self {
        Self {
            detector,
            embedder: Arc::new(Mutex::new(embedder)),
            decoder: FrameDecoder,
            guard: SpoofGuard::new(&config),
            throttle: FrameThrottle::new(config.frame_interval),
            session: VerificationSession::new(&config, liveness),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn session(&self) -> &VerificationSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut VerificationSession {
        &mut self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Compute the reference embedding from the enrollment photo and move to `Ready`.
    ///
    /// The first liveness step starts at `now`. On failure the session stays in
    /// `Initializing` with the error's status message.
    pub async fn load_reference(&mut self, photo: &[u8], now: Instant) -> Result<(), SessionError> {
        self.session.face_status = "Generating reference embedding...".to_string();

        match reference_embedding(&self.detector, &self.embedder, photo, self.config.crop_margin)
            .await
        {
            Ok(reference) => {
                tracing::info!(dim = reference.dim(), "reference embedding ready");
                self.session.install_reference(reference, now);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "reference embedding failed");
                self.session.face_status = e.status_message();
                Err(e)
            }
        }
    }

    /// Use an already computed reference embedding.
    pub fn set_reference(&mut self, reference: Embedding, now: Instant) {
        self.session.install_reference(reference, now);
    }

    /// Run the geofence check for `group`. May be called again at any time.
    pub async fn retry_location<L: LocationProvider>(
        &mut self,
        group: &Group,
        provider: &L,
    ) -> &LocationStatus {
        let status = check_location(group, provider).await;
        self.session.set_location(status);
        self.session.location()
    }

    /// Feed one camera frame. The frame's capture time is the clock for
    /// throttling and liveness deadlines. The frame is released on every path.
    pub async fn process_frame(&mut self, frame: Frame) -> FrameOutcome {
        let now = frame.captured_at;
        if !self.throttle.admit(now) {
            return FrameOutcome::Throttled;
        }

        match self.session.state {
            SessionState::Initializing => return FrameOutcome::NotReady,
            SessionState::FaceVerified | SessionState::Submitted => {
                return FrameOutcome::AlreadyVerified
            }
            SessionState::Ready => {}
        }

        let outcome = self.evaluate(frame, now).await;
        tracing::debug!(?outcome, "frame processed");
        if let Some(text) = outcome.status_text() {
            self.session.face_status = text;
        }
        outcome
    }

    async fn evaluate(&mut self, frame: Frame, now: Instant) -> FrameOutcome {
        let width = frame.upright_width();

        let faces = match self.detector.detect(DetectorInput::Frame(&frame)).await {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                self.session.matcher.reset();
                let reason = match e {
                    DetectorError::Failed(reason) => reason,
                    other => other.to_string(),
                };
                return FrameOutcome::DetectionFailed(reason);
            }
        };

        let face = match self.guard.screen(&faces, width) {
            Screening::Accept(face) => face.clone(),
            Screening::NoFace => {
                self.session.matcher.reset();
                return FrameOutcome::NoFace;
            }
            Screening::Reject(reason) => {
                tracing::debug!(%reason, faces = faces.len(), "frame rejected");
                self.session.matcher.reset();
                return FrameOutcome::Rejected(reason);
            }
        };

        if !self.session.liveness.is_complete() {
            match self.session.liveness.evaluate(&face, width, now) {
                ChallengeEvaluation::Pending(c) => return FrameOutcome::ChallengePending(c),
                ChallengeEvaluation::Advanced(next) => {
                    return FrameOutcome::ChallengeAdvanced(next)
                }
                ChallengeEvaluation::TimedOut => {
                    self.session.liveness.start_sequence(now);
                    self.session.matcher.reset();
                    return FrameOutcome::ChallengeTimedOut {
                        restart_with: self.session.liveness.current(),
                    };
                }
                ChallengeEvaluation::Completed => return FrameOutcome::LivenessComplete,
            }
        }

        let embedder = Arc::clone(&self.embedder);
        let decoder = self.decoder;
        let face_box = face.bounding_box;
        let margin = self.config.crop_margin;
        let task = tokio::task::spawn_blocking(move || {
            embed_frame(&embedder, decoder, frame, face_box, margin)
        });

        let live = match task.await {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "embedding failed");
                self.session.matcher.reset();
                return FrameOutcome::Failed(e.to_string());
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding task aborted");
                self.session.matcher.reset();
                return FrameOutcome::Failed(format!("embedding task aborted: {e}"));
            }
        };

        let Some(reference) = self.session.reference.as_ref() else {
            return FrameOutcome::NotReady;
        };
        let distance = match embedder::distance(&live, reference) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "embedding comparison failed");
                self.session.matcher.reset();
                return FrameOutcome::Failed(e.to_string());
            }
        };

        let progress = self.session.matcher.consider(distance);
        if progress.verified {
            self.session.state = SessionState::FaceVerified;
            tracing::info!(distance, matches = progress.count, "face verified");
            FrameOutcome::FaceVerified { distance }
        } else if progress.is_match() {
            FrameOutcome::Matched {
                count: progress.count,
                required: self.session.matcher.required(),
                distance,
            }
        } else {
            FrameOutcome::NotRecognized { distance }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{EmbedderConfig, EmbeddingModel, TensorLayout};
    use crate::geofence::Coordinates;
    use crate::testing::{FixedLocation, FixedModel, ScriptedLocator};
    use crate::types::FaceObservation;
    use image::Rgb;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const WIDTH: u32 = 64;

    fn embedder_config() -> EmbedderConfig {
        EmbedderConfig {
            input_size: 8,
            embedding_dim: 4,
            mean: 127.5,
            std: 128.0,
            layout: TensorLayout::Nhwc,
            model_version: "test".into(),
        }
    }

    fn embedder(model: impl EmbeddingModel + 'static) -> FaceEmbedder {
        FaceEmbedder::new(Box::new(model), embedder_config())
    }

    fn reference() -> Embedding {
        Embedding {
            values: vec![1.0, 0.0, 0.0, 0.0],
            model_version: Some("test".into()),
        }
    }

    /// Centred face, big enough for the spoof guard but short of zoom-in.
    fn neutral() -> FaceObservation {
        FaceObservation::new(FaceBox::new(22.0, 22.0, 20.0, 20.0))
            .with_eyes(0.9, 0.9)
            .with_smile(0.1)
            .with_yaw(0.0)
    }

    fn performing(c: LivenessChallenge) -> FaceObservation {
        match c {
            LivenessChallenge::Blink => neutral().with_eyes(0.05, 0.05),
            LivenessChallenge::Smile => neutral().with_smile(0.95),
            LivenessChallenge::TurnLeft => neutral().with_yaw(30.0),
            LivenessChallenge::TurnRight => neutral().with_yaw(-30.0),
            LivenessChallenge::ZoomIn => {
                FaceObservation::new(FaceBox::new(2.0, 2.0, 60.0, 60.0)).with_eyes(0.9, 0.9)
            }
        }
    }

    fn frame_at(t0: Instant, ms: u64) -> Frame {
        let image = RgbImage::from_pixel(WIDTH, WIDTH, Rgb([120, 110, 100]));
        Frame::from_rgb(&image, 0, t0 + Duration::from_millis(ms))
    }

    fn orchestrator(
        locator: ScriptedLocator,
        model: FixedModel,
        t0: Instant,
    ) -> VerificationOrchestrator<ScriptedLocator> {
        let config = PipelineConfig::default();
        let liveness =
            LivenessChallengeEngine::with_rng(config.clone(), StdRng::seed_from_u64(7), t0);
        let mut orch =
            VerificationOrchestrator::with_liveness(locator, embedder(model), config, liveness);
        orch.set_reference(reference(), t0);
        orch
    }

    /// Walk the seeded sequence to completion, one admitted frame per step.
    /// Returns the next free timestamp.
    async fn pass_liveness(
        orch: &mut VerificationOrchestrator<ScriptedLocator>,
        t0: Instant,
        mut ms: u64,
    ) -> u64 {
        let steps = orch.session().liveness.sequence().steps().to_vec();
        for (i, step) in steps.iter().enumerate() {
            orch.detector().push_faces(vec![performing(*step)]);
            let outcome = orch.process_frame(frame_at(t0, ms)).await;
            if i + 1 < steps.len() {
                assert_eq!(outcome, FrameOutcome::ChallengeAdvanced(steps[i + 1]));
            } else {
                assert_eq!(outcome, FrameOutcome::LivenessComplete);
                assert_eq!(orch.session().face_status(), "Liveness Verified!");
            }
            ms += 500;
        }
        assert!(orch.session().is_liveness_complete());
        ms
    }

    #[tokio::test]
    async fn test_frames_before_reference_are_not_ready() {
        let t0 = Instant::now();
        let config = PipelineConfig::default();
        let mut orch = VerificationOrchestrator::new(
            ScriptedLocator::new(),
            embedder(FixedModel::repeating(vec![1.0, 0.0, 0.0, 0.0])),
            config,
            t0,
        );
        assert_eq!(orch.process_frame(frame_at(t0, 0)).await, FrameOutcome::NotReady);
        assert_eq!(orch.session().state(), SessionState::Initializing);
    }

    #[tokio::test]
    async fn test_happy_path_verifies_after_three_matches() {
        let t0 = Instant::now();
        let mut orch = orchestrator(
            ScriptedLocator::new(),
            FixedModel::repeating(vec![1.0, 0.05, 0.0, 0.0]),
            t0,
        );

        let mut ms = pass_liveness(&mut orch, t0, 0).await;
        assert_eq!(orch.session().match_count(), 0);

        for expected in [1, 2] {
            orch.detector().push_faces(vec![neutral()]);
            let outcome = orch.process_frame(frame_at(t0, ms)).await;
            assert!(
                matches!(outcome, FrameOutcome::Matched { count, required: 3, .. } if count == expected),
                "{outcome:?}"
            );
            assert!(!orch.session().is_face_verified());
            ms += 500;
        }
        assert_eq!(orch.session().face_status(), "Verifying... (2/3)");

        orch.detector().push_faces(vec![neutral()]);
        let outcome = orch.process_frame(frame_at(t0, ms)).await;
        assert!(matches!(outcome, FrameOutcome::FaceVerified { .. }));
        assert!(orch.session().is_face_verified());
        assert_eq!(orch.session().face_status(), "Face Verified!");
        ms += 500;

        // Terminal: further frames are ignored without detection.
        let calls = orch.detector().calls();
        assert_eq!(
            orch.process_frame(frame_at(t0, ms)).await,
            FrameOutcome::AlreadyVerified
        );
        assert_eq!(orch.detector().calls(), calls);
    }

    #[tokio::test]
    async fn test_enrollment_photo_to_face_verified() {
        let t0 = Instant::now();
        let locator = ScriptedLocator::new();
        locator.push_faces(vec![FaceObservation::new(FaceBox::new(4.0, 4.0, 24.0, 24.0))]);
        // Reference first, then a live vector at distance 0.3 from it.
        let model = FixedModel::sequence(vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.955, 0.296_606, 0.0, 0.0],
        ]);
        let config = PipelineConfig::default();
        let liveness =
            LivenessChallengeEngine::with_rng(config.clone(), StdRng::seed_from_u64(11), t0);
        let mut orch =
            VerificationOrchestrator::with_liveness(locator, embedder(model), config, liveness);

        let photo = crate::testing::encoded_photo(32, 32);
        orch.load_reference(&photo, t0).await.unwrap();
        assert_eq!(orch.session().state(), SessionState::Ready);
        assert_eq!(orch.session().reference().unwrap().values, vec![1.0, 0.0, 0.0, 0.0]);

        let mut ms = pass_liveness(&mut orch, t0, 0).await;
        assert_eq!(orch.session().match_count(), 0);

        for expected in [1, 2] {
            orch.detector().push_faces(vec![neutral()]);
            let outcome = orch.process_frame(frame_at(t0, ms)).await;
            assert!(
                matches!(
                    outcome,
                    FrameOutcome::Matched { count, distance, .. }
                        if count == expected && (distance - 0.3).abs() < 1e-3
                ),
                "{outcome:?}"
            );
            assert!(!orch.session().is_face_verified());
            ms += 500;
        }

        orch.detector().push_faces(vec![neutral()]);
        let outcome = orch.process_frame(frame_at(t0, ms)).await;
        assert!(
            matches!(outcome, FrameOutcome::FaceVerified { distance } if (distance - 0.3).abs() < 1e-3),
            "{outcome:?}"
        );
        assert!(orch.session().is_face_verified());
        // One detection for the photo, four gestures, three matches.
        assert_eq!(orch.detector().calls(), 8);
    }

    #[tokio::test]
    async fn test_mismatch_resets_consecutive_run() {
        let t0 = Instant::now();
        // One match, a far embedding, then matches again.
        let model = FixedModel::sequence(vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0, 0.0],
        ]);
        let mut orch = orchestrator(ScriptedLocator::new(), model, t0);
        let mut ms = pass_liveness(&mut orch, t0, 0).await;

        orch.detector().push_faces(vec![neutral()]);
        let outcome = orch.process_frame(frame_at(t0, ms)).await;
        assert!(matches!(outcome, FrameOutcome::Matched { count: 1, .. }));
        ms += 500;

        orch.detector().push_faces(vec![neutral()]);
        let outcome = orch.process_frame(frame_at(t0, ms)).await;
        assert!(matches!(outcome, FrameOutcome::NotRecognized { .. }));
        assert_eq!(
            orch.session().face_status(),
            "Not Recognized (Dist: 1.41)"
        );
        assert_eq!(orch.session().match_count(), 0);
        ms += 500;

        for expected in [1, 2] {
            orch.detector().push_faces(vec![neutral()]);
            let outcome = orch.process_frame(frame_at(t0, ms)).await;
            assert!(
                matches!(outcome, FrameOutcome::Matched { count, .. } if count == expected),
                "{outcome:?}"
            );
            ms += 500;
        }
        assert!(!orch.session().is_face_verified());
    }

    #[tokio::test]
    async fn test_slow_step_restarts_sequence() {
        let t0 = Instant::now();
        let mut orch = orchestrator(
            ScriptedLocator::new(),
            FixedModel::repeating(vec![1.0, 0.0, 0.0, 0.0]),
            t0,
        );
        let first = orch.session().current_challenge();

        orch.detector().push_faces(vec![neutral()]);
        assert_eq!(
            orch.process_frame(frame_at(t0, 500)).await,
            FrameOutcome::ChallengePending(first.unwrap())
        );

        // 3.5 s after the step began: timed out even though the gesture is performed.
        orch.detector().push_faces(vec![performing(first.unwrap())]);
        let outcome = orch.process_frame(frame_at(t0, 3500)).await;
        assert!(matches!(outcome, FrameOutcome::ChallengeTimedOut { restart_with: Some(_) }));
        assert_eq!(
            orch.session().face_status(),
            "Too Slow! Restarting verification."
        );
        assert_eq!(orch.session().liveness.progress().index, 0);
        assert!(!orch.session().is_liveness_complete());
        assert_eq!(orch.session().match_count(), 0);
    }

    #[tokio::test]
    async fn test_spoof_frames_make_no_progress() {
        let t0 = Instant::now();
        let mut orch = orchestrator(
            ScriptedLocator::new(),
            FixedModel::repeating(vec![1.0, 0.0, 0.0, 0.0]),
            t0,
        );
        let first = orch.session().current_challenge().unwrap();

        orch.detector()
            .push_faces(vec![performing(first), performing(first)]);
        assert_eq!(
            orch.process_frame(frame_at(t0, 0)).await,
            FrameOutcome::Rejected(SpoofReason::MultipleFaces)
        );
        assert_eq!(
            orch.session().face_status(),
            "Multiple faces detected. Only one person allowed."
        );

        let tiny = FaceObservation::new(FaceBox::new(0.0, 0.0, 6.0, 6.0)).with_eyes(0.0, 0.0);
        orch.detector().push_faces(vec![tiny]);
        assert_eq!(
            orch.process_frame(frame_at(t0, 500)).await,
            FrameOutcome::Rejected(SpoofReason::FaceTooSmall)
        );

        orch.detector().push_faces(vec![]);
        assert_eq!(orch.process_frame(frame_at(t0, 1000)).await, FrameOutcome::NoFace);
        assert_eq!(orch.session().face_status(), "No face detected");

        assert_eq!(orch.session().liveness.progress().index, 0);
    }

    #[tokio::test]
    async fn test_throttle_admits_one_frame_per_interval() {
        let t0 = Instant::now();
        let mut orch = orchestrator(
            ScriptedLocator::new(),
            FixedModel::repeating(vec![1.0, 0.0, 0.0, 0.0]),
            t0,
        );

        let released = Arc::new(AtomicUsize::new(0));
        let mut admitted = 0;
        for i in 0..20u64 {
            let counter = Arc::clone(&released);
            let frame = frame_at(t0, i * 100).with_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            if orch.process_frame(frame).await != FrameOutcome::Throttled {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 4);
        assert_eq!(orch.detector().calls(), 4);
        assert_eq!(released.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_detector_error_is_a_status_not_a_crash() {
        let t0 = Instant::now();
        let mut orch = orchestrator(
            ScriptedLocator::new(),
            FixedModel::repeating(vec![1.0, 0.0, 0.0, 0.0]),
            t0,
        );
        orch.detector().push_error("camera busy");
        let outcome = orch.process_frame(frame_at(t0, 0)).await;
        assert_eq!(outcome, FrameOutcome::DetectionFailed("camera busy".into()));
        assert_eq!(
            outcome.status_text().as_deref(),
            Some("Detection failed: camera busy")
        );
        assert_eq!(orch.session().state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_embedding_failure_resets_and_continues() {
        let t0 = Instant::now();
        // Wrong output dimension on every call.
        let mut orch = orchestrator(
            ScriptedLocator::new(),
            FixedModel::repeating(vec![1.0, 0.0]),
            t0,
        );
        let ms = pass_liveness(&mut orch, t0, 0).await;

        orch.detector().push_faces(vec![neutral()]);
        let outcome = orch.process_frame(frame_at(t0, ms)).await;
        assert!(matches!(outcome, FrameOutcome::Failed(_)), "{outcome:?}");
        assert_eq!(orch.session().match_count(), 0);
        assert_eq!(orch.session().state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_reference_from_enrollment_photo() {
        let t0 = Instant::now();
        let locator = ScriptedLocator::new();
        locator.push_faces(vec![FaceObservation::new(FaceBox::new(4.0, 4.0, 24.0, 24.0))]);
        let config = PipelineConfig::default();
        let mut orch = VerificationOrchestrator::new(
            locator,
            embedder(FixedModel::repeating(vec![3.0, 4.0, 0.0, 0.0])),
            config,
            t0,
        );

        let photo = crate::testing::encoded_photo(32, 32);
        orch.load_reference(&photo, t0).await.unwrap();

        assert_eq!(orch.session().state(), SessionState::Ready);
        assert_eq!(orch.session().face_status(), "Ready. Please look at the camera.");
        let values = &orch.session().reference().unwrap().values;
        assert!((values[0] - 0.6).abs() < 1e-6);
        assert!((values[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_enrollment_photo_errors_have_distinct_statuses() {
        let t0 = Instant::now();
        let config = PipelineConfig::default();
        let mut orch = VerificationOrchestrator::new(
            ScriptedLocator::new(),
            embedder(FixedModel::repeating(vec![1.0, 0.0, 0.0, 0.0])),
            config,
            t0,
        );

        let err = orch.load_reference(b"not an image", t0).await.unwrap_err();
        assert!(matches!(err, SessionError::PhotoDecode(_)));

        orch.detector().push_faces(vec![]);
        let photo = crate::testing::encoded_photo(32, 32);
        let err = orch.load_reference(&photo, t0).await.unwrap_err();
        assert!(matches!(err, SessionError::NoFaceInPhoto));
        assert_eq!(orch.session().face_status(), "No face found in profile picture.");

        orch.detector()
            .push_faces(vec![FaceObservation::new(FaceBox::new(40.0, 40.0, 10.0, 10.0))]);
        let err = orch.load_reference(&photo, t0).await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyCrop));

        assert_eq!(orch.session().state(), SessionState::Initializing);
    }

    #[tokio::test]
    async fn test_location_is_tracked_independently() {
        let t0 = Instant::now();
        let mut orch = orchestrator(
            ScriptedLocator::new(),
            FixedModel::repeating(vec![1.0, 0.0, 0.0, 0.0]),
            t0,
        );
        let group = Group {
            id: "g1".into(),
            name: "HQ".into(),
            latitude: 33.6844,
            longitude: 73.0479,
            start_time: "00:00".into(),
            end_time: "23:59:59".into(),
            radius: 100.0,
            location_restricted: true,
        };

        let status = orch.retry_location(&group, &FixedLocation::none()).await;
        assert_eq!(*status, LocationStatus::Unavailable);
        assert!(!orch.session().is_location_verified());

        let here = FixedLocation::at(Coordinates::new(33.6845, 73.0479));
        assert!(orch.retry_location(&group, &here).await.is_verified());

        // Location alone never enables submission.
        assert!(!orch.session().can_submit());
        assert_eq!(orch.session().state(), SessionState::Ready);
    }
}
