//! Active liveness detection via a randomised gesture challenge.
//!
//! A replayed video or a photo held up to the camera cannot predict which
//! gestures will be requested, nor in which order. Each session draws three
//! distinct gestures from {blink, smile, turn left, turn right}, appends a
//! mandatory zoom-in step and shuffles the four. The subject must satisfy the
//! active gesture within a fixed latency budget; any step that takes too long
//! invalidates the whole sequence and a fresh one must be generated.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs, static screens, pre-recorded clips that
//!   do not happen to perform the requested gestures in order.
//! - **Latency trap:** A remote operator relaying instructions over a video
//!   call adds enough round-trip delay to miss the per-step deadline.
//! - **Does not block:** A live accomplice wearing a high-quality 3D mask.

use std::fmt;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::types::FaceObservation;

/// Number of gestures drawn from [`LivenessChallenge::GESTURES`] per sequence.
const DRAWN_GESTURES: usize = 3;

/// Total steps in a sequence: the drawn gestures plus the mandatory zoom-in.
pub const SEQUENCE_LEN: usize = DRAWN_GESTURES + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivenessChallenge {
    Blink,
    Smile,
    TurnLeft,
    TurnRight,
    ZoomIn,
}

impl LivenessChallenge {
    /// The gestures a sequence draws from. `ZoomIn` is added separately.
    pub const GESTURES: [LivenessChallenge; 4] = [
        LivenessChallenge::Blink,
        LivenessChallenge::Smile,
        LivenessChallenge::TurnLeft,
        LivenessChallenge::TurnRight,
    ];

    /// Prompt shown while this gesture is pending.
    pub fn instruction(self) -> &'static str {
        match self {
            LivenessChallenge::Blink => "Please Blink",
            LivenessChallenge::Smile => "Please Smile",
            LivenessChallenge::TurnLeft => "Turn Head Left",
            LivenessChallenge::TurnRight => "Turn Head Right",
            LivenessChallenge::ZoomIn => "Zoom In (Move Closer)",
        }
    }

    /// Prompt shown right after the previous step was satisfied and this one became active.
    pub fn follow_up(self) -> &'static str {
        match self {
            LivenessChallenge::Blink => "Great! Now Blink",
            LivenessChallenge::Smile => "Good! Now Smile",
            LivenessChallenge::TurnLeft => "Okay, Turn Left",
            LivenessChallenge::TurnRight => "Okay, Turn Right",
            LivenessChallenge::ZoomIn => "Zoom In (Move Closer)",
        }
    }

    /// Whether `face` performs this gesture.
    ///
    /// Missing detector signals never satisfy a gesture that depends on them.
    pub fn is_satisfied_by(
        self,
        face: &FaceObservation,
        frame_width: u32,
        config: &PipelineConfig,
    ) -> bool {
        match self {
            LivenessChallenge::Blink => match (face.left_eye_open, face.right_eye_open) {
                (Some(left), Some(right)) => {
                    left < config.blink_eye_open_max && right < config.blink_eye_open_max
                }
                _ => false,
            },
            LivenessChallenge::Smile => face.smiling.is_some_and(|p| p > config.smile_min),
            LivenessChallenge::TurnLeft => {
                face.head_yaw.is_some_and(|yaw| yaw > config.turn_yaw_degrees)
            }
            LivenessChallenge::TurnRight => {
                face.head_yaw.is_some_and(|yaw| yaw < -config.turn_yaw_degrees)
            }
            LivenessChallenge::ZoomIn => {
                face.bounding_box.width_ratio(frame_width) > config.zoom_face_ratio
            }
        }
    }
}

impl fmt::Display for LivenessChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LivenessChallenge::Blink => "BLINK",
            LivenessChallenge::Smile => "SMILE",
            LivenessChallenge::TurnLeft => "TURN_LEFT",
            LivenessChallenge::TurnRight => "TURN_RIGHT",
            LivenessChallenge::ZoomIn => "ZOOM_IN",
        };
        f.write_str(name)
    }
}

/// An ordered list of [`SEQUENCE_LEN`] gestures.
///
/// Always contains `ZoomIn` exactly once; the other entries are pairwise
/// distinct members of [`LivenessChallenge::GESTURES`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSequence {
    steps: Vec<LivenessChallenge>,
}

impl ChallengeSequence {
    /// Draw a new random sequence.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut steps: Vec<LivenessChallenge> = LivenessChallenge::GESTURES
            .choose_multiple(rng, DRAWN_GESTURES)
            .copied()
            .collect();
        steps.push(LivenessChallenge::ZoomIn);
        steps.shuffle(rng);
        Self { steps }
    }

    pub fn steps(&self) -> &[LivenessChallenge] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<LivenessChallenge> {
        self.steps.get(index).copied()
    }
}

/// Cursor into the active [`ChallengeSequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeProgress {
    pub index: usize,
    /// When the current step became active. The deadline is this plus the timeout.
    pub step_started: Instant,
    pub completed: bool,
}

/// Result of evaluating one frame against the active gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeEvaluation {
    /// Gesture not performed yet; the cursor did not move.
    Pending(LivenessChallenge),
    /// Gesture performed; the cursor moved to the contained next step.
    Advanced(LivenessChallenge),
    /// The last gesture was performed (or had been already).
    Completed,
    /// The step took longer than the allowed latency. Call
    /// [`LivenessChallengeEngine::start_sequence`] to restart from scratch.
    TimedOut,
}

/// Sequencer for the gesture challenge.
pub struct LivenessChallengeEngine<R = StdRng> {
    rng: R,
    config: PipelineConfig,
    sequence: ChallengeSequence,
    progress: ChallengeProgress,
}

impl LivenessChallengeEngine<StdRng> {
    /// Engine seeded from OS entropy, with a sequence already started at `now`.
    pub fn new(config: PipelineConfig, now: Instant) -> Self {
        Self::with_rng(config, StdRng::from_entropy(), now)
    }
}

impl<R: Rng> LivenessChallengeEngine<R> {
    pub fn with_rng(config: PipelineConfig, mut rng: R, now: Instant) -> Self {
        let sequence = ChallengeSequence::generate(&mut rng);
        Self {
            rng,
            config,
            sequence,
            progress: ChallengeProgress {
                index: 0,
                step_started: now,
                completed: false,
            },
        }
    }

    /// Discard any progress and draw a fresh sequence whose first step starts at `now`.
    pub fn start_sequence(&mut self, now: Instant) -> &ChallengeSequence {
        self.sequence = ChallengeSequence::generate(&mut self.rng);
        self.progress = ChallengeProgress {
            index: 0,
            step_started: now,
            completed: false,
        };
        tracing::debug!(sequence = ?self.sequence.steps(), "liveness sequence started");
        &self.sequence
    }

    pub fn sequence(&self) -> &ChallengeSequence {
        &self.sequence
    }

    pub fn progress(&self) -> ChallengeProgress {
        self.progress
    }

    pub fn is_complete(&self) -> bool {
        self.progress.completed
    }

    /// The gesture currently requested, or `None` once the sequence is complete.
    pub fn current(&self) -> Option<LivenessChallenge> {
        if self.progress.completed {
            return None;
        }
        self.sequence.get(self.progress.index)
    }

    /// Time left on the active step at `now`.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.config
            .challenge_timeout
            .saturating_sub(now.saturating_duration_since(self.progress.step_started))
    }

    /// Evaluate one face against the active gesture.
    ///
    /// The latency budget is checked first: a late frame times out even if it
    /// performs the gesture. A satisfied gesture moves the cursor exactly one
    /// step and re-arms the step timer at `now`.
    pub fn evaluate(
        &mut self,
        face: &FaceObservation,
        frame_width: u32,
        now: Instant,
    ) -> ChallengeEvaluation {
        if self.progress.completed {
            return ChallengeEvaluation::Completed;
        }

        let elapsed = now.saturating_duration_since(self.progress.step_started);
        if elapsed > self.config.challenge_timeout {
            tracing::debug!(
                step = self.progress.index,
                elapsed_ms = elapsed.as_millis() as u64,
                "liveness step timed out"
            );
            return ChallengeEvaluation::TimedOut;
        }

        let Some(active) = self.sequence.get(self.progress.index) else {
            return ChallengeEvaluation::TimedOut;
        };

        if !active.is_satisfied_by(face, frame_width, &self.config) {
            return ChallengeEvaluation::Pending(active);
        }

        if self.progress.index + 1 >= self.sequence.len() {
            self.progress.completed = true;
            tracing::info!("liveness sequence completed");
            return ChallengeEvaluation::Completed;
        }

        self.progress.index += 1;
        self.progress.step_started = now;
        match self.sequence.get(self.progress.index) {
            Some(next) => ChallengeEvaluation::Advanced(next),
            None => ChallengeEvaluation::Completed,
        }
    }
}
