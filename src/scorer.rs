//! Attention scoring
//!
//! Fuses one frame's signals into an instant score and a behavioral state, then
//! smooths the score with an exponential moving average. The scorer itself holds only
//! configuration; everything that carries over between frames lives in a
//! [`ScorerContext`] owned by the student's session and passed into every call.
//!
//! Rules, in priority order:
//! 1. device detected: -50, `device_detected` (overrides everything below)
//! 2. more than one face: -60, `multiple_faces_detected`
//! 3. head turned past the yaw or pitch threshold: -30, `away`
//! 4. otherwise `focused`
//!
//! Independently, a gaze held off-center for longer than the configured duration
//! costs 25 points on every frame while it persists.

use crate::config::{GazeStatePolicy, ScorerConfig};
use crate::error::ProctorError;
use crate::types::{round2, AttentionState, FrameResult, Gaze, HeadPose, Observation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Smoothed score a fresh session starts from
pub const BASELINE_SCORE: f64 = 70.0;

const MAX_SCORE: f64 = 100.0;
const DEVICE_PENALTY: f64 = 50.0;
const MULTIPLE_FACES_PENALTY: f64 = 60.0;
const HEAD_AWAY_PENALTY: f64 = 30.0;
const GAZE_PENALTY: f64 = 25.0;

/// Per-session scorer state carried between frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerContext {
    /// EMA accumulator (unrounded)
    smoothed_score: f64,
    /// When the gaze first left center in the current off-center run
    gaze_off_center_since: Option<DateTime<Utc>>,
}

impl Default for ScorerContext {
    fn default() -> Self {
        Self {
            smoothed_score: BASELINE_SCORE,
            gaze_off_center_since: None,
        }
    }
}

impl ScorerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn smoothed_score(&self) -> f64 {
        self.smoothed_score
    }

    pub fn gaze_off_center_since(&self) -> Option<DateTime<Utc>> {
        self.gaze_off_center_since
    }
}

/// Attention scorer with fixed thresholds
#[derive(Debug, Clone)]
pub struct AttentionScorer {
    config: ScorerConfig,
}

impl AttentionScorer {
    /// Create a scorer, rejecting invalid thresholds or smoothing weight
    pub fn new(config: ScorerConfig) -> Result<Self, ProctorError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Score a frame using the current wall-clock time for the gaze timer
    pub fn score(&self, observation: &Observation, context: &mut ScorerContext) -> FrameResult {
        self.score_at(observation, context, Utc::now())
    }

    /// Score a frame observed at `now`.
    ///
    /// Updates `context` with the new smoothed score and gaze timer.
    pub fn score_at(
        &self,
        observation: &Observation,
        context: &mut ScorerContext,
        now: DateTime<Utc>,
    ) -> FrameResult {
        let mut base = MAX_SCORE;

        let mut state = if observation.device_present() {
            base -= DEVICE_PENALTY;
            AttentionState::DeviceDetected
        } else if observation.face_count > 1 {
            base -= MULTIPLE_FACES_PENALTY;
            AttentionState::MultipleFacesDetected
        } else if observation
            .head_pose
            .as_ref()
            .is_some_and(|pose| self.head_turned_away(pose))
        {
            base -= HEAD_AWAY_PENALTY;
            AttentionState::Away
        } else {
            AttentionState::Focused
        };

        if self.update_gaze_timer(observation.gaze.as_ref(), context, now) {
            base -= GAZE_PENALTY;
            if self.config.gaze_state_policy == GazeStatePolicy::PromoteFocused
                && state == AttentionState::Focused
            {
                state = AttentionState::Distracted;
            }
        }

        let instant = base.clamp(0.0, MAX_SCORE);
        let alpha = self.config.smoothing_alpha;
        let smoothed =
            (alpha * instant + (1.0 - alpha) * context.smoothed_score).clamp(0.0, MAX_SCORE);
        context.smoothed_score = smoothed;

        trace!(instant, smoothed, state = %state, "frame scored");

        FrameResult {
            score: round2(smoothed),
            state,
        }
    }

    fn head_turned_away(&self, pose: &HeadPose) -> bool {
        pose.yaw.abs() > self.config.yaw_threshold || pose.pitch.abs() > self.config.pitch_threshold
    }

    /// Advance the off-center gaze timer; returns whether the gaze penalty applies.
    ///
    /// A missing gaze signal leaves the timer untouched.
    fn update_gaze_timer(
        &self,
        gaze: Option<&Gaze>,
        context: &mut ScorerContext,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(gaze) = gaze else {
            return false;
        };

        if !gaze.is_off_center() {
            context.gaze_off_center_since = None;
            return false;
        }

        match context.gaze_off_center_since {
            None => {
                context.gaze_off_center_since = Some(now);
                false
            }
            Some(since) => {
                let held_sec = (now - since).num_milliseconds() as f64 / 1000.0;
                let fires = held_sec > self.config.gaze_duration_threshold;
                if fires {
                    debug!(held_sec, "sustained off-center gaze");
                }
                fires
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceDetection, GazeDirection};
    use chrono::{Duration, TimeZone};

    fn test_scorer(policy: GazeStatePolicy) -> AttentionScorer {
        let config = ScorerConfig::new(25.0, 20.0, 1.5, 1.0)
            .unwrap()
            .with_gaze_state_policy(policy);
        AttentionScorer::new(config).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn obs(yaw: f64, pitch: f64, gaze: GazeDirection, device: bool, faces: u32) -> Observation {
        Observation {
            head_pose: Some(HeadPose {
                yaw,
                pitch,
                roll: 0.0,
            }),
            gaze: Some(Gaze {
                direction: gaze,
                confidence: 0.9,
            }),
            device: Some(DeviceDetection {
                present: device,
                bbox: None,
                confidence: if device { 0.8 } else { 0.0 },
            }),
            face_count: faces,
        }
    }

    #[test]
    fn test_focused_frame() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();

        let observation = obs(0.0, 0.0, GazeDirection::Center, false, 1);
        let result = scorer.score_at(&observation, &mut ctx, t0());

        assert_eq!(result.state, AttentionState::Focused);
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn test_away_on_yaw() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();

        let observation = obs(30.0, 0.0, GazeDirection::Center, false, 1);
        let result = scorer.score_at(&observation, &mut ctx, t0());

        assert_eq!(result.state, AttentionState::Away);
        assert_eq!(result.score, 70.0);
    }

    #[test]
    fn test_away_on_negative_pitch() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();

        let observation = obs(0.0, -21.0, GazeDirection::Center, false, 1);
        let result = scorer.score_at(&observation, &mut ctx, t0());

        assert_eq!(result.state, AttentionState::Away);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();

        let observation = obs(25.0, 20.0, GazeDirection::Center, false, 1);
        let result = scorer.score_at(&observation, &mut ctx, t0());

        assert_eq!(result.state, AttentionState::Focused);
    }

    #[test]
    fn test_device_overrides_multiple_faces() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();

        let observation = obs(40.0, 30.0, GazeDirection::Center, true, 2);
        let result = scorer.score_at(&observation, &mut ctx, t0());

        assert_eq!(result.state, AttentionState::DeviceDetected);
        assert_eq!(result.score, 50.0);
    }

    #[test]
    fn test_device_with_other_signals_absent() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();
        let observation = Observation {
            head_pose: None,
            gaze: None,
            device: Some(DeviceDetection {
                present: true,
                bbox: Some([0, 0, 10, 10]),
                confidence: 0.9,
            }),
            face_count: 0,
        };

        let result = scorer.score_at(&observation, &mut ctx, t0());

        assert_eq!(result.state, AttentionState::DeviceDetected);
        assert_eq!(result.score, 50.0);
    }

    #[test]
    fn test_multiple_faces_beats_head_pose() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();

        let observation = obs(45.0, 0.0, GazeDirection::Center, false, 3);
        let result = scorer.score_at(&observation, &mut ctx, t0());

        assert_eq!(result.state, AttentionState::MultipleFacesDetected);
        assert_eq!(result.score, 40.0);
    }

    #[test]
    fn test_absent_signals_carry_no_penalty() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();

        let result = scorer.score_at(&Observation::single_face(), &mut ctx, t0());

        assert_eq!(result.state, AttentionState::Focused);
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn test_gaze_penalty_needs_sustained_hold() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();
        let looking_left = obs(0.0, 0.0, GazeDirection::Left, false, 1);

        // First off-center frame only starts the timer
        let first = scorer.score_at(&looking_left, &mut ctx, t0());
        assert_eq!(first.score, 100.0);
        assert_eq!(ctx.gaze_off_center_since(), Some(t0()));

        // Still within the hold duration
        let early = scorer.score_at(&looking_left, &mut ctx, t0() + Duration::milliseconds(1500));
        assert_eq!(early.score, 100.0);

        // Past the hold duration: penalized, state untouched
        let late = scorer.score_at(&looking_left, &mut ctx, t0() + Duration::milliseconds(1600));
        assert_eq!(late.score, 75.0);
        assert_eq!(late.state, AttentionState::Focused);

        // Penalty repeats on every frame while the gaze stays off-center
        let later = scorer.score_at(&looking_left, &mut ctx, t0() + Duration::seconds(3));
        assert_eq!(later.score, 75.0);
        assert_eq!(ctx.gaze_off_center_since(), Some(t0()));
    }

    #[test]
    fn test_gaze_return_to_center_resets_timer() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();
        let left = obs(0.0, 0.0, GazeDirection::Left, false, 1);
        let center = obs(0.0, 0.0, GazeDirection::Center, false, 1);

        scorer.score_at(&left, &mut ctx, t0());
        scorer.score_at(&center, &mut ctx, t0() + Duration::seconds(1));
        assert_eq!(ctx.gaze_off_center_since(), None);

        // The timer restarts from scratch
        let result = scorer.score_at(&left, &mut ctx, t0() + Duration::seconds(2));
        assert_eq!(result.score, 100.0);
        assert_eq!(ctx.gaze_off_center_since(), Some(t0() + Duration::seconds(2)));
    }

    #[test]
    fn test_missing_gaze_keeps_timer() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();

        scorer.score_at(&obs(0.0, 0.0, GazeDirection::Right, false, 1), &mut ctx, t0());
        scorer.score_at(&Observation::single_face(), &mut ctx, t0() + Duration::seconds(1));

        assert_eq!(ctx.gaze_off_center_since(), Some(t0()));
    }

    #[test]
    fn test_gaze_stacks_with_head_pose() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();
        let frame = obs(30.0, 0.0, GazeDirection::Left, false, 1);

        scorer.score_at(&frame, &mut ctx, t0());
        let result = scorer.score_at(&frame, &mut ctx, t0() + Duration::seconds(2));

        assert_eq!(result.state, AttentionState::Away);
        assert_eq!(result.score, 45.0);
    }

    #[test]
    fn test_promote_focused_policy_marks_distracted() {
        let scorer = test_scorer(GazeStatePolicy::PromoteFocused);
        let mut ctx = ScorerContext::new();
        let left = obs(0.0, 0.0, GazeDirection::Left, false, 1);

        let first = scorer.score_at(&left, &mut ctx, t0());
        assert_eq!(first.state, AttentionState::Focused);

        let result = scorer.score_at(&left, &mut ctx, t0() + Duration::milliseconds(1600));
        assert_eq!(result.state, AttentionState::Distracted);
        assert_eq!(result.score, 75.0);
    }

    #[test]
    fn test_promote_focused_policy_respects_precedence() {
        let scorer = test_scorer(GazeStatePolicy::PromoteFocused);
        let mut ctx = ScorerContext::new();
        let away = obs(30.0, 0.0, GazeDirection::Left, false, 1);

        scorer.score_at(&away, &mut ctx, t0());
        let result = scorer.score_at(&away, &mut ctx, t0() + Duration::seconds(2));
        assert_eq!(result.state, AttentionState::Away);

        let device = obs(0.0, 0.0, GazeDirection::Left, true, 1);
        let result = scorer.score_at(&device, &mut ctx, t0() + Duration::seconds(3));
        assert_eq!(result.state, AttentionState::DeviceDetected);
        assert_eq!(result.score, 25.0);
    }

    #[test]
    fn test_multiple_faces_with_sustained_gaze() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut ctx = ScorerContext::new();
        let frame = obs(0.0, 0.0, GazeDirection::Left, false, 2);

        scorer.score_at(&frame, &mut ctx, t0());
        let result = scorer.score_at(&frame, &mut ctx, t0() + Duration::seconds(2));

        assert_eq!(result.score, 15.0);
        assert!(result.score >= 0.0);
    }

    #[test]
    fn test_smoothing_from_baseline() {
        let config = ScorerConfig::new(25.0, 20.0, 1.5, 0.1).unwrap();
        let scorer = AttentionScorer::new(config).unwrap();
        let mut ctx = ScorerContext::new();
        let focused = obs(0.0, 0.0, GazeDirection::Center, false, 1);

        // 0.1 * 100 + 0.9 * 70 = 73
        let first = scorer.score_at(&focused, &mut ctx, t0());
        assert_eq!(first.score, 73.0);

        // 0.1 * 100 + 0.9 * 73 = 75.7
        let second = scorer.score_at(&focused, &mut ctx, t0() + Duration::seconds(1));
        assert_eq!(second.score, 75.7);

        // 0.1 * 50 + 0.9 * 75.7 = 73.13
        let device = obs(0.0, 0.0, GazeDirection::Center, true, 1);
        let third = scorer.score_at(&device, &mut ctx, t0() + Duration::seconds(2));
        assert_eq!(third.score, 73.13);
        assert_eq!(third.state, AttentionState::DeviceDetected);
    }

    #[test]
    fn test_contexts_are_independent() {
        let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
        let mut a = ScorerContext::new();
        let mut b = ScorerContext::new();

        scorer.score_at(&obs(0.0, 0.0, GazeDirection::Left, false, 1), &mut a, t0());

        assert!(a.gaze_off_center_since().is_some());
        assert!(b.gaze_off_center_since().is_none());

        let observation = obs(0.0, 0.0, GazeDirection::Left, false, 1);
        let result = scorer.score_at(&observation, &mut b, t0() + Duration::seconds(5));
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ScorerConfig {
            smoothing_alpha: 0.0,
            ..ScorerConfig::default()
        };
        assert!(matches!(
            AttentionScorer::new(config),
            Err(ProctorError::InvalidConfig(_))
        ));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn direction() -> impl Strategy<Value = GazeDirection> {
            prop_oneof![
                Just(GazeDirection::Left),
                Just(GazeDirection::Right),
                Just(GazeDirection::Center),
            ]
        }

        proptest! {
            #[test]
            fn score_stays_in_range(
                alpha in 0.01f64..=1.0,
                frames in proptest::collection::vec(
                    (
                        -180.0f64..180.0,
                        -90.0f64..90.0,
                        direction(),
                        any::<bool>(),
                        0u32..5,
                        0i64..3000,
                    ),
                    1..40,
                ),
            ) {
                let config = ScorerConfig::new(25.0, 20.0, 1.5, alpha).unwrap();
                let scorer = AttentionScorer::new(config).unwrap();
                let mut ctx = ScorerContext::new();
                let mut now = t0();

                for (yaw, pitch, gaze, device, faces, step_ms) in frames {
                    now += Duration::milliseconds(step_ms);
                    let observation = obs(yaw, pitch, gaze, device, faces);
                    let result = scorer.score_at(&observation, &mut ctx, now);
                    prop_assert!((0.0..=100.0).contains(&result.score));
                    prop_assert!((0.0..=100.0).contains(&ctx.smoothed_score()));
                }
            }

            #[test]
            fn full_weight_alpha_is_unsmoothed(
                yaw in -60.0f64..60.0,
                device in any::<bool>(),
                faces in 0u32..4,
            ) {
                let scorer = test_scorer(GazeStatePolicy::ScoreOnly);
                let mut ctx = ScorerContext::new();
                let observation = obs(yaw, 0.0, GazeDirection::Center, device, faces);
                let result = scorer.score_at(&observation, &mut ctx, t0());

                let expected = if device {
                    50.0
                } else if faces > 1 {
                    40.0
                } else if yaw.abs() > 25.0 {
                    70.0
                } else {
                    100.0
                };
                prop_assert_eq!(result.score, expected);
            }

            #[test]
            fn device_always_wins(
                yaw in -90.0f64..90.0,
                pitch in -90.0f64..90.0,
                gaze in direction(),
                faces in 0u32..6,
            ) {
                let scorer = test_scorer(GazeStatePolicy::PromoteFocused);
                let mut ctx = ScorerContext::new();
                scorer.score_at(&obs(yaw, pitch, gaze, true, faces), &mut ctx, t0());
                let observation = obs(yaw, pitch, gaze, true, faces);
                let result = scorer.score_at(&observation, &mut ctx, t0() + Duration::seconds(2));
                prop_assert_eq!(result.state, AttentionState::DeviceDetected);
            }
        }
    }
}
