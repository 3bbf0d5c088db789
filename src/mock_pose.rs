use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};

use crate::error::SourceError;
use crate::pose::{Landmark, LandmarkName};
use crate::source::{LandmarkSource, SourceFrame};
use crate::trajectory::DiscPosition;

/// Fraction of the clip at which the scripted throw lets go of the disc.
const RELEASE_T: f64 = 0.6;

/// Mock pose detector that plays back a synthetic right-handed backhand throw.
///
/// The motion follows a fixed script (setup, reachback, pull-through,
/// release, follow-through) with seeded jitter so runs are reproducible.
pub struct MockPoseSource {
    rng: StdRng,
    seed: u64,
    total_frames: u32,
    fps: f64,
    jitter: f64,
    dropout: f64,
    unavailable: bool,
    next_frame: u32,
    open: bool,
}

impl MockPoseSource {
    pub fn new(seed: u64, total_frames: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            total_frames,
            fps: 30.0,
            jitter: 0.004,
            dropout: 0.0,
            unavailable: false,
            next_frame: 0,
            open: false,
        }
    }

    /// A detector that fails to load, for exercising the degraded path.
    pub fn unavailable() -> Self {
        let mut source = Self::new(0, 0);
        source.unavailable = true;
        source
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    /// Probability that a frame comes back with no body found.
    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout.clamp(0.0, 1.0);
        self
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        if fps > 0.0 {
            self.fps = fps;
        }
        self
    }

    /// Disc sightings after release: a shallow arc across a 1280x720 frame,
    /// one sighting per frame until the disc leaves the picture.
    pub fn disc_track(&self) -> Vec<DiscPosition> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(1));
        let last = self.total_frames.saturating_sub(1) as f64;
        let release = (RELEASE_T * last).round() as i64;
        let count = (self.total_frames as i64 - release).clamp(0, 40);

        (0..count)
            .map(|i| {
                let u = i as f64 / 40.0;
                let x = 420.0 + 28.0 * i as f64 + rng.gen_range(-1.5..1.5);
                let y = 430.0 - 180.0 * (std::f64::consts::PI * u).sin() + rng.gen_range(-1.5..1.5);
                DiscPosition::new(x, y, release + i)
            })
            .collect()
    }

    fn noise(&mut self) -> f64 {
        if self.jitter == 0.0 {
            0.0
        } else {
            self.rng.gen_range(-self.jitter..self.jitter)
        }
    }

    fn point(&mut self, x: f64, y: f64, z: f64) -> Landmark {
        let visibility = self.rng.gen_range(0.85..1.0);
        Landmark::new(x + self.noise(), y + self.noise(), z, visibility)
    }

    fn generate(&mut self, t: f64) -> BTreeMap<LandmarkName, Landmark> {
        let pose = ScriptedPose::at(t);
        let mut landmarks = BTreeMap::new();

        let hip_rad = pose.hip_angle.to_radians();
        let shoulder_rad = pose.shoulder_angle.to_radians();

        let left_hip = (0.42 + pose.shift, 0.60);
        let right_hip = (left_hip.0 + 0.12 * hip_rad.cos(), left_hip.1 + 0.12 * hip_rad.sin());
        let left_shoulder = (0.40 + pose.shift, 0.35);
        let right_shoulder = (
            left_shoulder.0 + 0.14 * shoulder_rad.cos(),
            left_shoulder.1 + 0.14 * shoulder_rad.sin(),
        );
        let wrist = (pose.wrist_x, 0.42);
        // Elbow sits off the shoulder-wrist line, bent away from the body.
        let (dx, dy) = (wrist.0 - right_shoulder.0, wrist.1 - right_shoulder.1);
        let reach = dx.hypot(dy).max(1e-6);
        let elbow = (
            (right_shoulder.0 + wrist.0) / 2.0 - dy / reach * pose.elbow_bend,
            (right_shoulder.1 + wrist.1) / 2.0 + dx / reach * pose.elbow_bend,
        );

        let entries = [
            (LandmarkName::Nose, (0.47 + pose.shift, 0.22)),
            (LandmarkName::LeftShoulder, left_shoulder),
            (LandmarkName::RightShoulder, right_shoulder),
            (LandmarkName::LeftElbow, (left_shoulder.0 - 0.05, 0.45)),
            (LandmarkName::RightElbow, elbow),
            (LandmarkName::LeftWrist, (left_shoulder.0 - 0.02, 0.52)),
            (LandmarkName::RightWrist, wrist),
            (LandmarkName::LeftHip, left_hip),
            (LandmarkName::RightHip, right_hip),
            (LandmarkName::LeftKnee, (left_hip.0, 0.75)),
            (LandmarkName::RightKnee, (right_hip.0, 0.75)),
            (LandmarkName::LeftAnkle, (0.40, 0.92)),
            (LandmarkName::RightAnkle, (0.56, 0.92)),
        ];
        for (name, (x, y)) in entries {
            let point = self.point(x, y, 0.0);
            landmarks.insert(name, point);
        }
        landmarks
    }
}

/// Joint positions along the throw at normalized time `t` in `[0, 1]`.
struct ScriptedPose {
    wrist_x: f64,
    hip_angle: f64,
    shoulder_angle: f64,
    shift: f64,
    elbow_bend: f64,
}

fn segment(t: f64, start: f64, end: f64) -> f64 {
    ((t - start) / (end - start)).clamp(0.0, 1.0)
}

fn lerp(a: f64, b: f64, u: f64) -> f64 {
    a + (b - a) * u
}

impl ScriptedPose {
    fn at(t: f64) -> Self {
        let wrist_x = if t < 0.2 {
            lerp(0.50, 0.45, segment(t, 0.0, 0.2))
        } else if t < 0.4 {
            lerp(0.45, 0.18, segment(t, 0.2, 0.4))
        } else if t < RELEASE_T {
            // Accelerates into release
            lerp(0.18, 0.78, segment(t, 0.4, RELEASE_T).powi(2))
        } else {
            lerp(0.78, 0.85, segment(t, RELEASE_T, 1.0))
        };

        let hip_angle = lerp(0.0, 45.0, segment(t, 0.35, 0.6));
        let shoulder_angle = if t < 0.4 {
            lerp(0.0, -20.0, segment(t, 0.1, 0.4))
        } else {
            lerp(-20.0, 50.0, segment(t, 0.45, 0.65))
        };
        let shift = lerp(0.0, 0.10, segment(t, 0.3, 0.7));
        let elbow_bend = if t < 0.4 {
            lerp(0.04, 0.12, segment(t, 0.1, 0.4))
        } else {
            lerp(0.12, 0.02, segment(t, 0.4, 0.6))
        };

        Self {
            wrist_x,
            hip_angle,
            shoulder_angle,
            shift,
            elbow_bend,
        }
    }
}

impl LandmarkSource for MockPoseSource {
    fn open(&mut self) -> Result<(), SourceError> {
        if self.unavailable {
            return Err(SourceError::Unavailable("mock detector configured as unavailable".into()));
        }
        self.rng = StdRng::seed_from_u64(self.seed);
        self.next_frame = 0;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn info(&self) -> HashMap<String, String> {
        let mut info = HashMap::new();
        info.insert("source".to_string(), "mock".to_string());
        info.insert("seed".to_string(), self.seed.to_string());
        info.insert("frames".to_string(), self.total_frames.to_string());
        info
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn read_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        if !self.open {
            return Err(SourceError::NotOpen);
        }
        if self.next_frame >= self.total_frames {
            return Ok(None);
        }

        let frame_number = self.next_frame;
        self.next_frame += 1;

        if self.dropout > 0.0 && self.rng.gen_bool(self.dropout) {
            return Ok(Some(SourceFrame {
                frame_number,
                detected: false,
                landmarks: BTreeMap::new(),
            }));
        }

        let t = if self.total_frames > 1 {
            frame_number as f64 / (self.total_frames - 1) as f64
        } else {
            0.0
        };
        let landmarks = self.generate(t);
        Ok(Some(SourceFrame {
            frame_number,
            detected: true,
            landmarks,
        }))
    }
}
