use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pose::{detected_poses, FramePose, Handedness, NEUTRAL_X};

/// Named instants of a throw, in the order they normally occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyframeKind {
    Setup,
    Reachback,
    Release,
    FollowThrough,
}

impl KeyframeKind {
    pub fn label(self) -> &'static str {
        match self {
            KeyframeKind::Setup => "Setup",
            KeyframeKind::Reachback => "Reachback",
            KeyframeKind::Release => "Release",
            KeyframeKind::FollowThrough => "Follow-through",
        }
    }
}

/// Sparse map from keyframe to frame number. A missing key means the
/// heuristic could not place that keyframe, never frame zero.
pub type KeyframeMap = BTreeMap<KeyframeKind, u32>;

pub const MIN_DETECTED_POSES: usize = 5;

/// Index of the furthest-back wrist sample (first one on ties).
pub fn find_reachback_index(wrist_x: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, x) in wrist_x.iter().enumerate() {
        match best {
            Some(b) if *x >= wrist_x[b] => {}
            _ if x.is_nan() => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Peak forward wrist velocity at or after `reachback`, reported at the
/// sample that ends the winning difference. Needs at least three samples
/// from `reachback` onwards.
pub fn find_release_index(wrist_x: &[f64], reachback: usize) -> Option<usize> {
    if wrist_x.len() <= reachback + 2 {
        return None;
    }

    let window = &wrist_x[reachback..];
    let mut peak = 0;
    let mut peak_velocity = f64::NEG_INFINITY;
    for (i, pair) in window.windows(2).enumerate() {
        let velocity = pair[1] - pair[0];
        if velocity > peak_velocity {
            peak_velocity = velocity;
            peak = i;
        }
    }

    Some((reachback + peak + 1).min(wrist_x.len() - 1))
}

pub struct KeyframeDetector {
    handedness: Handedness,
}

impl KeyframeDetector {
    pub fn new(handedness: Handedness) -> Self {
        Self { handedness }
    }

    /// Throwing-wrist x per pose. Unseen wrists are pinned to `NEUTRAL_X`.
    fn wrist_series(&self, poses: &[&FramePose]) -> Vec<f64> {
        let wrist = self.handedness.wrist();
        poses
            .iter()
            .map(|p| p.get(wrist).map(|lm| lm.x).unwrap_or(NEUTRAL_X))
            .collect()
    }

    pub fn detect(&self, poses: &[FramePose]) -> KeyframeMap {
        let mut keyframes = KeyframeMap::new();
        let detected = detected_poses(poses);

        if detected.len() < MIN_DETECTED_POSES {
            log::warn!(
                "[KEYFRAMES] Only {} detected poses (need {}), no keyframes",
                detected.len(),
                MIN_DETECTED_POSES
            );
            return keyframes;
        }

        let first = detected[0];
        let last = detected[detected.len() - 1];
        keyframes.insert(KeyframeKind::Setup, first.frame_number);

        let wrist_x = self.wrist_series(&detected);
        if let Some(reachback) = find_reachback_index(&wrist_x) {
            keyframes.insert(KeyframeKind::Reachback, detected[reachback].frame_number);

            if let Some(release) = find_release_index(&wrist_x, reachback) {
                keyframes.insert(KeyframeKind::Release, detected[release].frame_number);
            }
        }

        keyframes.insert(KeyframeKind::FollowThrough, last.frame_number);

        log::info!(
            "[KEYFRAMES] {}",
            keyframes
                .iter()
                .map(|(k, f)| format!("{}={}", k.label(), f))
                .collect::<Vec<_>>()
                .join(", ")
        );
        keyframes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_pose::MockPoseSource;
    use crate::pose::{Landmark, LandmarkName};
    use crate::source::{ExtractorConfig, PoseExtractor};

    fn wrist_pose(frame: u32, x: Option<f64>) -> FramePose {
        let mut pose = FramePose::undetected(frame, frame as f64 * 33.3);
        pose.detected = true;
        if let Some(x) = x {
            pose.landmarks
                .insert(LandmarkName::RightWrist, Landmark::new(x, 0.4, 0.0, 1.0));
        }
        pose
    }

    const WRIST: [f64; 10] = [0.5, 0.5, 0.5, 0.3, 0.1, 0.05, 0.2, 0.5, 0.7, 0.8];

    #[test]
    fn test_detect_wrist_scenario() {
        let poses: Vec<FramePose> = WRIST
            .iter()
            .enumerate()
            .map(|(i, x)| wrist_pose(i as u32 * 2, Some(*x)))
            .collect();
        let keyframes = KeyframeDetector::new(Handedness::Right).detect(&poses);

        assert_eq!(keyframes[&KeyframeKind::Setup], 0);
        assert_eq!(keyframes[&KeyframeKind::Reachback], 10);
        assert_eq!(keyframes[&KeyframeKind::Release], 14);
        assert_eq!(keyframes[&KeyframeKind::FollowThrough], 18);
    }

    #[test]
    fn test_empty_and_short_sequences() {
        let detector = KeyframeDetector::new(Handedness::Right);
        assert!(detector.detect(&[]).is_empty());

        let mut poses: Vec<FramePose> = (0..4).map(|i| wrist_pose(i, Some(0.4))).collect();
        poses.push(FramePose::undetected(4, 0.0));
        assert!(detector.detect(&poses).is_empty());
    }

    #[test]
    fn test_missing_wrist_counts_as_neutral() {
        let xs = [Some(0.6), None, Some(0.55), None, Some(0.7), Some(0.9)];
        let poses: Vec<FramePose> = xs
            .iter()
            .enumerate()
            .map(|(i, x)| wrist_pose(i as u32, *x))
            .collect();
        let keyframes = KeyframeDetector::new(Handedness::Right).detect(&poses);
        assert_eq!(keyframes[&KeyframeKind::Reachback], 1);

        let xs = [Some(0.3), None, Some(0.2), None, Some(0.7)];
        let poses: Vec<FramePose> = xs
            .iter()
            .enumerate()
            .map(|(i, x)| wrist_pose(i as u32, *x))
            .collect();
        let keyframes = KeyframeDetector::new(Handedness::Right).detect(&poses);
        assert_eq!(keyframes[&KeyframeKind::Reachback], 2);
    }

    #[test]
    fn test_release_window_needs_three_samples() {
        assert_eq!(find_release_index(&[0.5, 0.4, 0.1, 0.3], 2), None);
        assert_eq!(find_release_index(&[0.5, 0.1, 0.3, 0.35], 1), Some(2));
        assert_eq!(find_reachback_index(&[]), None);
    }

    #[test]
    fn test_release_never_precedes_reachback() {
        for seed in 0..8 {
            let source = MockPoseSource::new(seed, 90).with_jitter(0.02).with_dropout(0.1);
            let config = ExtractorConfig {
                sample_rate: 1,
                ..ExtractorConfig::default()
            };
            let mut extractor = PoseExtractor::new(source, config).unwrap();
            let poses = extractor.extract(None).unwrap();
            let keyframes = KeyframeDetector::new(Handedness::Right).detect(&poses);

            let setup = keyframes[&KeyframeKind::Setup];
            let reachback = keyframes[&KeyframeKind::Reachback];
            let follow = keyframes[&KeyframeKind::FollowThrough];
            assert!(setup <= reachback && reachback <= follow);
            if let Some(release) = keyframes.get(&KeyframeKind::Release) {
                assert!(*release > reachback && *release <= follow);
            }
        }
    }

    #[test]
    fn test_keyframe_map_serialises_with_snake_case_keys() {
        let mut keyframes = KeyframeMap::new();
        keyframes.insert(KeyframeKind::FollowThrough, 40);
        keyframes.insert(KeyframeKind::Setup, 0);
        let json = serde_json::to_string(&keyframes).unwrap();
        assert_eq!(json, r#"{"setup":0,"follow_through":40}"#);
    }
}
