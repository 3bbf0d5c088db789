use serde::{Deserialize, Serialize, Serializer};

use crate::keyframes::{KeyframeKind, KeyframeMap};
use crate::pose::{detected_poses, FramePose, Handedness, NEUTRAL_X};

pub const MIN_DETECTED_POSES: usize = 3;

/// Score used when the wrist never got behind the shoulder, or when a
/// weight shift went backwards.
const FLOOR_SCORE: i64 = 30;
/// Score used when there is not enough hip data to judge a weight shift.
const NEUTRAL_SCORE: u8 = 50;

/// Degrees as reported: rounded to one decimal place.
pub fn tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round_tenth<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(tenth(*value))
}

/// The five throw metrics plus optional detail fields.
///
/// Scores are 0-100, degree fields are 0-90. An all-zero record is the
/// "not enough poses" result, not a measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiomechanicsMetrics {
    pub reachback_depth_score: u8,
    #[serde(serialize_with = "round_tenth")]
    pub hip_rotation_degrees: f64,
    #[serde(serialize_with = "round_tenth")]
    pub shoulder_separation_degrees: f64,
    pub follow_through_score: u8,
    pub weight_shift_score: u8,

    /// Furthest-back throwing-wrist x.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reachback_wrist_x: Option<f64>,
    /// Throwing-wrist x at the release keyframe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_wrist_x: Option<f64>,
    /// Time from peak hip turn to peak shoulder turn. Positive means the
    /// hips led.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hip_shoulder_timing_ms: Option<f64>,
}

impl BiomechanicsMetrics {
    pub fn zero() -> Self {
        Self::default()
    }
}

fn clamp_score(score: i64) -> u8 {
    score.clamp(0, 100) as u8
}

/// 30 when the wrist stays in front of the shoulder, 30-60 up to a depth of
/// 0.1, then 60-100 saturating at 0.25.
pub fn reachback_depth_score(depth: f64) -> u8 {
    let score = if depth < 0.0 {
        FLOOR_SCORE
    } else if depth < 0.1 {
        (30.0 + depth / 0.1 * 30.0) as i64
    } else {
        (60.0 + ((depth - 0.1) / 0.15).min(1.0) * 40.0) as i64
    };
    clamp_score(score)
}

/// 30 for a backwards shift, 30-50 up to 0.05, then 50-100 saturating at 0.15.
pub fn weight_shift_score(shift: f64) -> u8 {
    let score = if shift < 0.0 {
        FLOOR_SCORE
    } else if shift < 0.05 {
        (30.0 + shift / 0.05 * 20.0) as i64
    } else {
        (50.0 + ((shift - 0.05) / 0.1).min(1.0) * 50.0) as i64
    };
    clamp_score(score)
}

/// Angle between two body lines, folded into `[0, 90]`. Lines have no
/// direction, so the difference is taken modulo 180 first.
pub fn line_separation(a: f64, b: f64) -> f64 {
    let separation = (a - b).abs() % 180.0;
    if separation > 90.0 {
        180.0 - separation
    } else {
        separation
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn wrap_delta(delta: f64) -> f64 {
    (delta + 180.0).rem_euclid(360.0) - 180.0
}

pub struct BiomechanicsCalculator {
    handedness: Handedness,
}

impl BiomechanicsCalculator {
    pub fn new(handedness: Handedness) -> Self {
        Self { handedness }
    }

    pub fn analyze(&self, poses: &[FramePose], keyframes: Option<&KeyframeMap>) -> BiomechanicsMetrics {
        let detected = detected_poses(poses);
        if detected.len() < MIN_DETECTED_POSES {
            log::warn!(
                "[BIOMECH] Insufficient detected poses: {} (need {})",
                detected.len(),
                MIN_DETECTED_POSES
            );
            return BiomechanicsMetrics::zero();
        }

        let (reachback_depth_score, reachback_wrist_x) = self.reachback(&detected);
        let metrics = BiomechanicsMetrics {
            reachback_depth_score,
            hip_rotation_degrees: self.hip_rotation(&detected),
            shoulder_separation_degrees: self.shoulder_separation(&detected),
            follow_through_score: self.follow_through(&detected),
            weight_shift_score: self.weight_shift(&detected),
            reachback_wrist_x,
            release_wrist_x: keyframes.and_then(|k| self.release_wrist_x(&detected, k)),
            hip_shoulder_timing_ms: self.hip_shoulder_timing(&detected),
        };

        log::info!(
            "[BIOMECH] reachback={} hips={:.1}° x-factor={:.1}° follow-through={} weight-shift={}",
            metrics.reachback_depth_score,
            metrics.hip_rotation_degrees,
            metrics.shoulder_separation_degrees,
            metrics.follow_through_score,
            metrics.weight_shift_score
        );
        metrics
    }

    /// Depth is measured against the throwing shoulder in the same frame as
    /// the furthest-back wrist. A missing shoulder there counts as `NEUTRAL_X`.
    fn reachback(&self, poses: &[&FramePose]) -> (u8, Option<f64>) {
        let wrist = self.handedness.wrist();
        let shoulder = self.handedness.shoulder();

        let mut min_wrist_x = 1.0;
        let mut shoulder_x = NEUTRAL_X;
        let mut seen = None;
        for pose in poses {
            let Some(w) = pose.get(wrist) else { continue };
            if w.x < min_wrist_x {
                min_wrist_x = w.x;
                seen = Some(w.x);
                shoulder_x = pose.get(shoulder).map(|s| s.x).unwrap_or(NEUTRAL_X);
            }
        }

        (reachback_depth_score(shoulder_x - min_wrist_x), seen)
    }

    fn hip_rotation(&self, poses: &[&FramePose]) -> f64 {
        let angles: Vec<f64> = poses.iter().filter_map(|p| p.hip_angle()).collect();
        if angles.len() < 2 {
            return 0.0;
        }

        let n = angles.len();
        let early = mean(&angles[..n / 4 + 1]);
        let late = mean(&angles[n * 3 / 4..]);
        (late - early).abs().min(90.0)
    }

    fn shoulder_separation(&self, poses: &[&FramePose]) -> f64 {
        poses
            .iter()
            .filter_map(|p| Some(line_separation(p.shoulder_angle()?, p.hip_angle()?)))
            .fold(0.0, f64::max)
    }

    fn follow_through(&self, poses: &[&FramePose]) -> u8 {
        let wrist = self.handedness.wrist();
        let shoulder = self.handedness.shoulder();

        let mut max_wrist_x: f64 = 0.0;
        let mut max_extension: f64 = 0.0;
        for pose in &poses[poses.len() * 2 / 3..] {
            let Some(w) = pose.get(wrist) else { continue };
            max_wrist_x = max_wrist_x.max(w.x);
            if let Some(s) = pose.get(shoulder) {
                max_extension = max_extension.max((w.x - s.x).abs());
            }
        }

        let wrist_score = (max_wrist_x * 60.0).min(50.0);
        let extension_score = (max_extension * 150.0).min(50.0);
        clamp_score((wrist_score + extension_score) as i64)
    }

    fn weight_shift(&self, poses: &[&FramePose]) -> u8 {
        let centers: Vec<f64> = poses.iter().filter_map(|p| p.hip_center_x()).collect();
        if centers.len() < 2 {
            return NEUTRAL_SCORE;
        }

        let shift = centers[centers.len() - 1] - centers[0];
        let shift = match self.handedness {
            Handedness::Right => shift,
            Handedness::Left => -shift,
        };
        weight_shift_score(shift)
    }

    fn release_wrist_x(&self, poses: &[&FramePose], keyframes: &KeyframeMap) -> Option<f64> {
        let release = *keyframes.get(&KeyframeKind::Release)?;
        let pose = poses.iter().find(|p| p.frame_number == release)?;
        pose.get(self.handedness.wrist()).map(|w| w.x)
    }

    fn hip_shoulder_timing(&self, poses: &[&FramePose]) -> Option<f64> {
        let hip_peak = peak_turn_time(poses, |p| p.hip_angle())?;
        let shoulder_peak = peak_turn_time(poses, |p| p.shoulder_angle())?;
        Some(shoulder_peak - hip_peak)
    }
}

/// Timestamp of the pose that ends the largest frame-to-frame turn of a line.
fn peak_turn_time(poses: &[&FramePose], angle: impl Fn(&FramePose) -> Option<f64>) -> Option<f64> {
    let samples: Vec<(f64, f64)> = poses
        .iter()
        .filter_map(|p| Some((p.timestamp_ms, angle(p)?)))
        .collect();

    let mut best: Option<(f64, f64)> = None;
    for pair in samples.windows(2) {
        let turn = wrap_delta(pair[1].1 - pair[0].1).abs();
        if best.map_or(true, |(_, b)| turn > b) {
            best = Some((pair[1].0, turn));
        }
    }
    best.map(|(t, _)| t)
}
