use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Neutral x used wherever a heuristic needs a wrist position that was not
/// observed. Half the normalized frame width can never be "furthest back".
pub const NEUTRAL_X: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkName {
    Nose,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl LandmarkName {
    pub const ALL: [LandmarkName; 13] = [
        LandmarkName::Nose,
        LandmarkName::LeftShoulder,
        LandmarkName::RightShoulder,
        LandmarkName::LeftElbow,
        LandmarkName::RightElbow,
        LandmarkName::LeftWrist,
        LandmarkName::RightWrist,
        LandmarkName::LeftHip,
        LandmarkName::RightHip,
        LandmarkName::LeftKnee,
        LandmarkName::RightKnee,
        LandmarkName::LeftAnkle,
        LandmarkName::RightAnkle,
    ];

    /// Index of this joint in the 33-point body model emitted by the pose detector.
    pub fn model_index(self) -> usize {
        match self {
            LandmarkName::Nose => 0,
            LandmarkName::LeftShoulder => 11,
            LandmarkName::RightShoulder => 12,
            LandmarkName::LeftElbow => 13,
            LandmarkName::RightElbow => 14,
            LandmarkName::LeftWrist => 15,
            LandmarkName::RightWrist => 16,
            LandmarkName::LeftHip => 23,
            LandmarkName::RightHip => 24,
            LandmarkName::LeftKnee => 25,
            LandmarkName::RightKnee => 26,
            LandmarkName::LeftAnkle => 27,
            LandmarkName::RightAnkle => 28,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LandmarkName::Nose => "nose",
            LandmarkName::LeftShoulder => "left_shoulder",
            LandmarkName::RightShoulder => "right_shoulder",
            LandmarkName::LeftElbow => "left_elbow",
            LandmarkName::RightElbow => "right_elbow",
            LandmarkName::LeftWrist => "left_wrist",
            LandmarkName::RightWrist => "right_wrist",
            LandmarkName::LeftHip => "left_hip",
            LandmarkName::RightHip => "right_hip",
            LandmarkName::LeftKnee => "left_knee",
            LandmarkName::RightKnee => "right_knee",
            LandmarkName::LeftAnkle => "left_ankle",
            LandmarkName::RightAnkle => "right_ankle",
        }
    }

    /// Match a detector landmark name (`LEFT_SHOULDER`, `left_shoulder`, ...).
    /// Names outside the retained set return `None` and are dropped.
    pub fn from_model_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|lm| lm.label() == wanted)
    }

    pub fn from_model_index(index: usize) -> Option<Self> {
        Self::ALL.iter().copied().find(|lm| lm.model_index() == index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    Left,
    #[default]
    Right,
}

impl Handedness {
    /// Form-parameter style parsing: anything unrecognised falls back to right.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "left" | "l" | "lhbh" => Handedness::Left,
            _ => Handedness::Right,
        }
    }

    pub fn wrist(self) -> LandmarkName {
        match self {
            Handedness::Left => LandmarkName::LeftWrist,
            Handedness::Right => LandmarkName::RightWrist,
        }
    }

    pub fn elbow(self) -> LandmarkName {
        match self {
            Handedness::Left => LandmarkName::LeftElbow,
            Handedness::Right => LandmarkName::RightElbow,
        }
    }

    pub fn shoulder(self) -> LandmarkName {
        match self {
            Handedness::Left => LandmarkName::LeftShoulder,
            Handedness::Right => LandmarkName::RightShoulder,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Handedness::Left => "left",
            Handedness::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "full_visibility")]
    pub visibility: f64,
}

fn full_visibility() -> f64 {
    1.0
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64, visibility: f64) -> Self {
        Self { x, y, z, visibility }
    }

    pub fn distance(&self, other: &Landmark) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePose {
    pub frame_number: u32,
    pub timestamp_ms: f64,
    pub detected: bool,
    pub landmarks: BTreeMap<LandmarkName, Landmark>,
}

impl FramePose {
    pub fn undetected(frame_number: u32, timestamp_ms: f64) -> Self {
        Self {
            frame_number,
            timestamp_ms,
            detected: false,
            landmarks: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: LandmarkName) -> Option<&Landmark> {
        self.landmarks.get(&name)
    }

    /// Both landmarks of a pair, or nothing.
    pub fn pair(&self, a: LandmarkName, b: LandmarkName) -> Option<(&Landmark, &Landmark)> {
        Some((self.get(a)?, self.get(b)?))
    }

    /// Angle in degrees of the line running from `a` to `b` in the image plane.
    pub fn line_angle(&self, a: LandmarkName, b: LandmarkName) -> Option<f64> {
        let (p1, p2) = self.pair(a, b)?;
        Some((p2.y - p1.y).atan2(p2.x - p1.x).to_degrees())
    }

    pub fn hip_angle(&self) -> Option<f64> {
        self.line_angle(LandmarkName::LeftHip, LandmarkName::RightHip)
    }

    pub fn shoulder_angle(&self) -> Option<f64> {
        self.line_angle(LandmarkName::LeftShoulder, LandmarkName::RightShoulder)
    }

    pub fn hip_center_x(&self) -> Option<f64> {
        let (left, right) = self.pair(LandmarkName::LeftHip, LandmarkName::RightHip)?;
        Some((left.x + right.x) / 2.0)
    }
}

/// Only poses where the detector found a body.
pub fn detected_poses(poses: &[FramePose]) -> Vec<&FramePose> {
    poses.iter().filter(|p| p.detected).collect()
}

/// Angle at `b` formed by the segments b→a and b→c, in degrees.
pub fn joint_angle(a: &Landmark, b: &Landmark, c: &Landmark) -> Option<f64> {
    let ba = [a.x - b.x, a.y - b.y, a.z - b.z];
    let bc = [c.x - b.x, c.y - b.y, c.z - b.z];
    let dot: f64 = ba.iter().zip(bc.iter()).map(|(u, v)| u * v).sum();
    let norm_ba = ba.iter().map(|v| v * v).sum::<f64>().sqrt();
    let norm_bc = bc.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm_ba == 0.0 || norm_bc == 0.0 {
        return None;
    }
    Some((dot / (norm_ba * norm_bc)).clamp(-1.0, 1.0).acos().to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_matching() {
        assert_eq!(
            LandmarkName::from_model_name("LEFT_SHOULDER"),
            Some(LandmarkName::LeftShoulder)
        );
        assert_eq!(LandmarkName::from_model_name("right_wrist"), Some(LandmarkName::RightWrist));
        assert_eq!(LandmarkName::from_model_name("RIGHT_INDEX"), None);
        assert_eq!(LandmarkName::from_model_index(24), Some(LandmarkName::RightHip));
        assert_eq!(LandmarkName::from_model_index(19), None);
    }

    #[test]
    fn test_handedness_lenient() {
        assert_eq!(Handedness::parse_lenient("LEFT"), Handedness::Left);
        assert_eq!(Handedness::parse_lenient("ambidextrous"), Handedness::Right);
        assert_eq!(Handedness::Left.wrist(), LandmarkName::LeftWrist);
    }

    #[test]
    fn test_joint_angle_right_angle() {
        let a = Landmark::new(0.0, 1.0, 0.0, 1.0);
        let b = Landmark::new(0.0, 0.0, 0.0, 1.0);
        let c = Landmark::new(1.0, 0.0, 0.0, 1.0);
        let angle = joint_angle(&a, &b, &c).unwrap();
        assert!((angle - 90.0).abs() < 1e-9);
        assert!(joint_angle(&b, &b, &c).is_none());
    }

    #[test]
    fn test_line_angle_requires_both_points() {
        let mut pose = FramePose::undetected(0, 0.0);
        pose.detected = true;
        pose.landmarks.insert(LandmarkName::LeftHip, Landmark::new(0.4, 0.6, 0.0, 1.0));
        assert!(pose.hip_angle().is_none());
        pose.landmarks.insert(LandmarkName::RightHip, Landmark::new(0.6, 0.6, 0.0, 1.0));
        assert!(pose.hip_angle().unwrap().abs() < 1e-9);
        assert!((pose.hip_center_x().unwrap() - 0.5).abs() < 1e-12);
    }
}
