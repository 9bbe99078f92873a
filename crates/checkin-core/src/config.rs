use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the per-frame verification pipeline.
///
/// `Default` yields the production thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum spacing between two processed frames.
    #[serde(with = "millis")]
    pub frame_interval: Duration,
    /// Time allowed to perform one liveness gesture before the sequence restarts.
    #[serde(with = "millis")]
    pub challenge_timeout: Duration,
    /// Face width / frame width below which a frame is rejected as too far away.
    pub min_face_ratio: f32,
    /// Face width / frame width above which the ZOOM_IN gesture is satisfied.
    pub zoom_face_ratio: f32,
    /// Both eye-open probabilities must be under this for a blink.
    pub blink_eye_open_max: f32,
    /// Smile probability must exceed this for a smile.
    pub smile_min: f32,
    /// Absolute head yaw (degrees) a turn must exceed.
    pub turn_yaw_degrees: f32,
    /// Embedding distance strictly below this counts as a match.
    pub accept_distance: f32,
    /// Consecutive matching frames required to confirm identity.
    pub required_matches: u32,
    /// Symmetric margin added around the face box before embedding, as a fraction of box size.
    pub crop_margin: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(500),
            challenge_timeout: Duration::from_millis(3000),
            min_face_ratio: 0.2,
            zoom_face_ratio: 0.45,
            blink_eye_open_max: 0.1,
            smile_min: 0.8,
            turn_yaw_degrees: 20.0,
            accept_distance: 0.75,
            required_matches: 3,
            crop_margin: 0.2,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_thresholds() {
        let c = PipelineConfig::default();
        assert_eq!(c.frame_interval, Duration::from_millis(500));
        assert_eq!(c.challenge_timeout, Duration::from_millis(3000));
        assert_eq!(c.required_matches, 3);
        assert!((c.accept_distance - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let c: PipelineConfig =
            serde_json::from_str(r#"{"frame_interval": 250, "accept_distance": 0.6}"#).unwrap();
        assert_eq!(c.frame_interval, Duration::from_millis(250));
        assert!((c.accept_distance - 0.6).abs() < f32::EPSILON);
        assert_eq!(c.challenge_timeout, Duration::from_millis(3000));
    }
}
