use crate::config::PipelineConfig;

/// Outcome of feeding one distance to a [`MatchAccumulator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchProgress {
    pub verified: bool,
    /// Current run of consecutive matches.
    pub count: u32,
    pub distance: f32,
}

impl MatchProgress {
    pub fn is_match(&self) -> bool {
        self.count > 0
    }
}

/// Consecutive-match counter.
///
/// Identity is confirmed only after `required` matching frames in a row. Any
/// non-matching distance (or an explicit [`reset`](Self::reset) for a
/// rejected frame) starts the run over. This is strict consecutiveness, not
/// "k out of the last n".
#[derive(Debug, Clone)]
pub struct MatchAccumulator {
    accept_distance: f32,
    required: u32,
    count: u32,
}

impl MatchAccumulator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            accept_distance: config.accept_distance,
            required: config.required_matches.max(1),
            count: 0,
        }
    }

    pub fn consider(&mut self, distance: f32) -> MatchProgress {
        // NaN compares false and therefore resets the run.
        if distance < self.accept_distance {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
        }

        MatchProgress {
            verified: self.count >= self.required,
            count: self.count,
            distance,
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn required(&self) -> u32 {
        self.required
    }
}

impl Default for MatchAccumulator {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}
