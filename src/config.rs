//! Scorer configuration
//!
//! Thresholds are fixed when a scorer is built. Values can come from defaults,
//! a JSON document, or the process environment; every path ends in [`ScorerConfig::validate`].

use crate::error::ProctorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default head yaw threshold in degrees
pub const DEFAULT_YAW_THRESHOLD: f64 = 25.0;

/// Default head pitch threshold in degrees
pub const DEFAULT_PITCH_THRESHOLD: f64 = 20.0;

/// Default continuous off-center gaze duration (seconds) before the gaze penalty applies
pub const DEFAULT_GAZE_DURATION_THRESHOLD: f64 = 1.5;

/// Default EMA weight of the newest instant score
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.1;

pub const ENV_YAW_THRESHOLD: &str = "HEAD_POSE_YAW_THRESHOLD";
pub const ENV_PITCH_THRESHOLD: &str = "HEAD_POSE_PITCH_THRESHOLD";
pub const ENV_GAZE_DURATION: &str = "GAZE_OFF_CENTER_DURATION";
pub const ENV_SMOOTHING_ALPHA: &str = "SCORE_SMOOTHING_ALPHA";
pub const ENV_GAZE_STATE_POLICY: &str = "GAZE_STATE_POLICY";

/// How a sustained off-center gaze interacts with the frame state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeStatePolicy {
    /// Gaze only lowers the score; the state comes from device, face count and head pose.
    #[default]
    ScoreOnly,
    /// Legacy behavior: once the gaze penalty fires, a `focused` frame is reported as
    /// `distracted`. Device, multiple-face and head-pose states still take precedence.
    PromoteFocused,
}

impl GazeStatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GazeStatePolicy::ScoreOnly => "score_only",
            GazeStatePolicy::PromoteFocused => "promote_focused",
        }
    }
}

impl fmt::Display for GazeStatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GazeStatePolicy {
    type Err = ProctorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "score_only" => Ok(GazeStatePolicy::ScoreOnly),
            "promote_focused" => Ok(GazeStatePolicy::PromoteFocused),
            other => Err(ProctorError::InvalidConfig(format!(
                "unknown gaze state policy '{other}' (expected score_only or promote_focused)"
            ))),
        }
    }
}

/// Attention scorer configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Absolute yaw (degrees) above which the head counts as turned away
    pub yaw_threshold: f64,
    /// Absolute pitch (degrees) above which the head counts as turned away
    pub pitch_threshold: f64,
    /// Seconds of continuous off-center gaze before the gaze penalty applies
    pub gaze_duration_threshold: f64,
    /// EMA weight of the newest instant score, in (0, 1]
    pub smoothing_alpha: f64,
    pub gaze_state_policy: GazeStatePolicy,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            yaw_threshold: DEFAULT_YAW_THRESHOLD,
            pitch_threshold: DEFAULT_PITCH_THRESHOLD,
            gaze_duration_threshold: DEFAULT_GAZE_DURATION_THRESHOLD,
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            gaze_state_policy: GazeStatePolicy::default(),
        }
    }
}

impl ScorerConfig {
    /// Build and validate a configuration with the default gaze policy
    pub fn new(
        yaw_threshold: f64,
        pitch_threshold: f64,
        gaze_duration_threshold: f64,
        smoothing_alpha: f64,
    ) -> Result<Self, ProctorError> {
        let config = Self {
            yaw_threshold,
            pitch_threshold,
            gaze_duration_threshold,
            smoothing_alpha,
            gaze_state_policy: GazeStatePolicy::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_gaze_state_policy(mut self, policy: GazeStatePolicy) -> Self {
        self.gaze_state_policy = policy;
        self
    }

    /// Check thresholds are positive and alpha lies in (0, 1]
    pub fn validate(&self) -> Result<(), ProctorError> {
        check_positive("yaw_threshold", self.yaw_threshold)?;
        check_positive("pitch_threshold", self.pitch_threshold)?;
        check_positive("gaze_duration_threshold", self.gaze_duration_threshold)?;

        let alpha = self.smoothing_alpha;
        if !alpha.is_finite() || alpha <= 0.0 || alpha > 1.0 {
            return Err(ProctorError::InvalidConfig(format!(
                "smoothing_alpha must be in (0, 1], got {alpha}"
            )));
        }
        Ok(())
    }

    /// Load a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ProctorError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from the process environment
    pub fn from_env() -> Result<Self, ProctorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load a configuration from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProctorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_YAW_THRESHOLD) {
            config.yaw_threshold = parse_number(ENV_YAW_THRESHOLD, &v)?;
        }
        if let Some(v) = lookup(ENV_PITCH_THRESHOLD) {
            config.pitch_threshold = parse_number(ENV_PITCH_THRESHOLD, &v)?;
        }
        if let Some(v) = lookup(ENV_GAZE_DURATION) {
            config.gaze_duration_threshold = parse_number(ENV_GAZE_DURATION, &v)?;
        }
        if let Some(v) = lookup(ENV_SMOOTHING_ALPHA) {
            config.smoothing_alpha = parse_number(ENV_SMOOTHING_ALPHA, &v)?;
        }
        if let Some(v) = lookup(ENV_GAZE_STATE_POLICY) {
            config.gaze_state_policy = v.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ProctorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn check_positive(name: &str, value: f64) -> Result<(), ProctorError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ProctorError::InvalidConfig(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}

fn parse_number(key: &str, raw: &str) -> Result<f64, ProctorError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| ProctorError::InvalidConfig(format!("{key}='{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScorerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.yaw_threshold, 25.0);
        assert_eq!(config.pitch_threshold, 20.0);
        assert_eq!(config.gaze_duration_threshold, 1.5);
        assert_eq!(config.smoothing_alpha, 0.1);
        assert_eq!(config.gaze_state_policy, GazeStatePolicy::ScoreOnly);
    }

    #[test]
    fn test_rejects_non_positive_thresholds() {
        assert!(ScorerConfig::new(0.0, 20.0, 1.5, 0.5).is_err());
        assert!(ScorerConfig::new(25.0, -1.0, 1.5, 0.5).is_err());
        assert!(ScorerConfig::new(25.0, 20.0, 0.0, 0.5).is_err());
        assert!(ScorerConfig::new(f64::NAN, 20.0, 1.5, 0.5).is_err());
    }

    #[test]
    fn test_alpha_bounds() {
        assert!(ScorerConfig::new(25.0, 20.0, 1.5, 1.0).is_ok());
        assert!(ScorerConfig::new(25.0, 20.0, 1.5, 0.001).is_ok());
        assert!(ScorerConfig::new(25.0, 20.0, 1.5, 0.0).is_err());
        assert!(ScorerConfig::new(25.0, 20.0, 1.5, 1.01).is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let json = r#"{"smoothing_alpha": 1.0, "gaze_state_policy": "promote_focused"}"#;
        let config = ScorerConfig::from_json(json).unwrap();

        assert_eq!(config.smoothing_alpha, 1.0);
        assert_eq!(config.yaw_threshold, DEFAULT_YAW_THRESHOLD);
        assert_eq!(config.gaze_state_policy, GazeStatePolicy::PromoteFocused);
    }

    #[test]
    fn test_from_json_invalid_alpha() {
        let result = ScorerConfig::from_json(r#"{"smoothing_alpha": 2.0}"#);
        assert!(matches!(result, Err(ProctorError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_YAW_THRESHOLD, "30"),
            (ENV_SMOOTHING_ALPHA, " 0.25 "),
            (ENV_GAZE_STATE_POLICY, "PROMOTE_FOCUSED"),
        ]
        .into_iter()
        .collect();

        let config = ScorerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.yaw_threshold, 30.0);
        assert_eq!(config.pitch_threshold, DEFAULT_PITCH_THRESHOLD);
        assert_eq!(config.smoothing_alpha, 0.25);
        assert_eq!(config.gaze_state_policy, GazeStatePolicy::PromoteFocused);
    }

    #[test]
    fn test_from_lookup_bad_number() {
        let result = ScorerConfig::from_lookup(|k| {
            (k == ENV_PITCH_THRESHOLD).then(|| "twenty".to_string())
        });
        assert!(matches!(result, Err(ProctorError::InvalidConfig(_))));
    }

    #[test]
    fn test_json_roundtrip_keeps_policy() {
        let config =
            ScorerConfig::default().with_gaze_state_policy(GazeStatePolicy::PromoteFocused);
        let loaded = ScorerConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(loaded, config);
    }
}
