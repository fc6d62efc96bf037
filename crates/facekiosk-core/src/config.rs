//! Capture session configuration.
//!
//! Every field has a default, so an empty TOML table or no file at all
//! yields a three-bucket, pose-gated session requiring all validity flags.

use crate::strategy::{CaptureStrategy, GatePolicy, PoseGatedStrategy, TimedStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("target bucket count must be 3 or 5, got {0}")]
    UnsupportedBucketCount(usize),
    #[error("timed sessions need at least one shot")]
    ZeroShots,
    #[error("timed sessions support at most {max} shots, got {got}")]
    TooManyShots { max: usize, got: usize },
    #[error("invalid distance range [{min}, {max}]")]
    InvalidDistanceRange { min: f32, max: f32 },
    #[error("confidence threshold must be within [0, 1], got {0}")]
    InvalidConfidence(f32),
    #[error("unknown {field} value: {value}")]
    UnknownValue { field: &'static str, value: String },
}

/// How stills are triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    /// One still per pose bucket, gated on face position.
    #[default]
    PoseGated,
    /// Countdown shots regardless of face position.
    Timed,
}

impl FromStr for CaptureMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pose-gated" | "pose" => Ok(CaptureMode::PoseGated),
            "timed" => Ok(CaptureMode::Timed),
            other => Err(ConfigError::UnknownValue {
                field: "capture mode",
                value: other.to_string(),
            }),
        }
    }
}

/// What the session controller does after a failed frame grab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureFailurePolicy {
    /// Keep already captured buckets and keep collecting.
    #[default]
    Retain,
    /// Discard the partial set and start collecting from scratch.
    Reset,
}

impl FromStr for CaptureFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "retain" => Ok(CaptureFailurePolicy::Retain),
            "reset" => Ok(CaptureFailurePolicy::Reset),
            other => Err(ConfigError::UnknownValue {
                field: "capture failure policy",
                value: other.to_string(),
            }),
        }
    }
}

/// Thresholds used by the face position evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Inclusive band for the rounded face-box diagonal.
    pub distance_range: [f32; 2],
    /// Maximum rounded cheek depth difference for a level head.
    pub angle_tolerance: u32,
    /// Minimum face-in-view confidence before a pose is reported.
    pub confidence_threshold: f32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            distance_range: [400.0, 500.0],
            angle_tolerance: 3,
            confidence_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    /// Pose-gated sessions: 3 (center, left, right) or 5 (all buckets).
    pub target_bucket_count: usize,
    pub gate: GatePolicy,
    /// Timed sessions: countdown before each shot.
    pub timed_duration_seconds: u64,
    /// Timed sessions: number of shots per session.
    pub timed_shots: usize,
    pub distance_range: [f32; 2],
    pub angle_tolerance: u32,
    pub confidence_threshold: f32,
    pub on_capture_failure: CaptureFailurePolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let evaluator = EvaluatorConfig::default();
        Self {
            mode: CaptureMode::default(),
            target_bucket_count: 3,
            gate: GatePolicy::default(),
            timed_duration_seconds: 3,
            timed_shots: 4,
            distance_range: evaluator.distance_range,
            angle_tolerance: evaluator.angle_tolerance,
            confidence_threshold: evaluator.confidence_threshold,
            on_capture_failure: CaptureFailurePolicy::default(),
        }
    }
}

impl CaptureConfig {
    /// Check field ranges. Only the fields relevant to `mode` are checked
    /// for the strategy-specific parts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let [min, max] = self.distance_range;
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(ConfigError::InvalidDistanceRange { min, max });
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::InvalidConfidence(self.confidence_threshold));
        }
        match self.mode {
            CaptureMode::PoseGated => {
                if !matches!(self.target_bucket_count, 3 | 5) {
                    return Err(ConfigError::UnsupportedBucketCount(self.target_bucket_count));
                }
            }
            CaptureMode::Timed => {
                if self.timed_shots == 0 {
                    return Err(ConfigError::ZeroShots);
                }
                if self.timed_shots > TimedStrategy::MAX_SHOTS {
                    return Err(ConfigError::TooManyShots {
                        max: TimedStrategy::MAX_SHOTS,
                        got: self.timed_shots,
                    });
                }
            }
        }
        Ok(())
    }

    /// Apply the capture-level `FACEKIOSK_*` overrides read through `lookup`.
    ///
    /// Unparseable numbers keep the current value; unknown enum names are
    /// rejected.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("FACEKIOSK_CAPTURE_MODE") {
            self.mode = v.parse()?;
        }
        if let Some(v) = lookup("FACEKIOSK_GATE") {
            self.gate = v.parse()?;
        }
        if let Some(v) = lookup("FACEKIOSK_ON_CAPTURE_FAILURE") {
            self.on_capture_failure = v.parse()?;
        }
        self.target_bucket_count =
            env_or(&lookup, "FACEKIOSK_TARGET_BUCKETS", self.target_bucket_count);
        self.timed_duration_seconds =
            env_or(&lookup, "FACEKIOSK_TIMED_SECS", self.timed_duration_seconds);
        self.timed_shots = env_or(&lookup, "FACEKIOSK_TIMED_SHOTS", self.timed_shots);
        self.distance_range[0] = env_or(&lookup, "FACEKIOSK_DISTANCE_MIN", self.distance_range[0]);
        self.distance_range[1] = env_or(&lookup, "FACEKIOSK_DISTANCE_MAX", self.distance_range[1]);
        self.angle_tolerance = env_or(&lookup, "FACEKIOSK_ANGLE_TOLERANCE", self.angle_tolerance);
        self.confidence_threshold = env_or(
            &lookup,
            "FACEKIOSK_CONFIDENCE_THRESHOLD",
            self.confidence_threshold,
        );
        Ok(())
    }

    pub fn evaluator(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            distance_range: self.distance_range,
            angle_tolerance: self.angle_tolerance,
            confidence_threshold: self.confidence_threshold,
        }
    }

    /// Build the capture strategy selected by `mode`.
    pub fn build_strategy(&self) -> Result<Box<dyn CaptureStrategy>, ConfigError> {
        self.validate()?;
        let strategy: Box<dyn CaptureStrategy> = match self.mode {
            CaptureMode::PoseGated => Box::new(
                PoseGatedStrategy::with_bucket_count(self.target_bucket_count, self.gate)
                    .ok_or(ConfigError::UnsupportedBucketCount(self.target_bucket_count))?,
            ),
            CaptureMode::Timed => Box::new(TimedStrategy::new(
                Duration::from_secs(self.timed_duration_seconds),
                self.timed_shots,
            )),
        };
        Ok(strategy)
    }
}

/// Parse the override at `key`, keeping `current` when unset or unparseable.
pub fn env_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match lookup(key) {
        Some(v) => match v.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(key, value = %v, "ignoring unparseable override");
                current
            }
        },
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CaptureConfig::default();
        assert_eq!(cfg.mode, CaptureMode::PoseGated);
        assert_eq!(cfg.target_bucket_count, 3);
        assert_eq!(cfg.gate, GatePolicy::AllFlags);
        assert_eq!(cfg.timed_duration_seconds, 3);
        assert_eq!(cfg.distance_range, [400.0, 500.0]);
        assert_eq!(cfg.angle_tolerance, 3);
        assert_eq!(cfg.confidence_threshold, 0.9);
        assert_eq!(cfg.on_capture_failure, CaptureFailurePolicy::Retain);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: CaptureConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, CaptureConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let cfg: CaptureConfig = toml::from_str(
            r#"
            mode = "timed"
            timed_duration_seconds = 5
            timed_shots = 1
            gate = "confidence-only"
            distance_range = [380.0, 520.0]
            on_capture_failure = "reset"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.mode, CaptureMode::Timed);
        assert_eq!(cfg.timed_duration_seconds, 5);
        assert_eq!(cfg.timed_shots, 1);
        assert_eq!(cfg.gate, GatePolicy::ConfidenceOnly);
        assert_eq!(cfg.distance_range, [380.0, 520.0]);
        assert_eq!(cfg.on_capture_failure, CaptureFailurePolicy::Reset);
        assert_eq!(cfg.target_bucket_count, 3);
    }

    #[test]
    fn test_rejects_unsupported_bucket_count() {
        let cfg = CaptureConfig {
            target_bucket_count: 4,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::UnsupportedBucketCount(4)));
        assert!(cfg.build_strategy().is_err());
    }

    #[test]
    fn test_bucket_count_ignored_in_timed_mode() {
        let cfg = CaptureConfig {
            mode: CaptureMode::Timed,
            target_bucket_count: 4,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_shots() {
        let cfg = CaptureConfig {
            mode: CaptureMode::Timed,
            timed_shots: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroShots));
    }

    #[test]
    fn test_rejects_inverted_distance_range() {
        let cfg = CaptureConfig {
            distance_range: [500.0, 400.0],
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidDistanceRange { .. })
        ));
    }

    #[test]
    fn test_rejects_confidence_out_of_range() {
        let cfg = CaptureConfig {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidConfidence(1.5)));
    }

    #[test]
    fn test_build_strategy_targets() {
        let pose5 = CaptureConfig {
            target_bucket_count: 5,
            ..Default::default()
        };
        assert_eq!(pose5.build_strategy().unwrap().target(), 5);

        let timed = CaptureConfig {
            mode: CaptureMode::Timed,
            timed_shots: 4,
            ..Default::default()
        };
        assert_eq!(timed.build_strategy().unwrap().target(), 4);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("timed".parse::<CaptureMode>(), Ok(CaptureMode::Timed));
        assert_eq!(" pose-gated ".parse::<CaptureMode>(), Ok(CaptureMode::PoseGated));
        assert!("burst".parse::<CaptureMode>().is_err());
        assert_eq!("reset".parse::<CaptureFailurePolicy>(), Ok(CaptureFailurePolicy::Reset));
    }

    #[test]
    fn test_apply_env_capture_overrides() {
        let env = [
            ("FACEKIOSK_CAPTURE_MODE", "timed"),
            ("FACEKIOSK_TIMED_SHOTS", "2"),
            ("FACEKIOSK_ANGLE_TOLERANCE", "12"),
            ("FACEKIOSK_DISTANCE_MAX", "wide"),
        ];
        let lookup = |key: &str| {
            env.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        };
        let mut cfg = CaptureConfig::default();
        cfg.apply_env(lookup).unwrap();
        assert_eq!(cfg.mode, CaptureMode::Timed);
        assert_eq!(cfg.timed_shots, 2);
        assert_eq!(cfg.angle_tolerance, 12);
        assert_eq!(cfg.distance_range, CaptureConfig::default().distance_range);
        assert_eq!(cfg.evaluator().angle_tolerance, 12);
    }

    #[test]
    fn test_apply_env_rejects_unknown_gate() {
        let mut cfg = CaptureConfig::default();
        let err = cfg
            .apply_env(|key| (key == "FACEKIOSK_GATE").then(|| "sometimes".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownValue { .. }));
    }
}
