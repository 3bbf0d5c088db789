use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pose::{joint_angle, FramePose, Handedness};
use crate::smoothing::{unwrap_degrees, SavitzkyGolay};

/// Post-reach-back elbow samples needed before a release is searched for.
pub const MIN_RELEASE_SAMPLES: usize = 10;

/// Physical quantities tracked over a throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormMetric {
    ShoulderRotation,
    ElbowAngle,
    WristAngle,
    HipRotation,
    ReachBackExtension,
    FollowThroughExtension,
    DiscSpeed,
}

impl FormMetric {
    pub const ALL: [FormMetric; 7] = [
        FormMetric::ShoulderRotation,
        FormMetric::ElbowAngle,
        FormMetric::WristAngle,
        FormMetric::HipRotation,
        FormMetric::ReachBackExtension,
        FormMetric::FollowThroughExtension,
        FormMetric::DiscSpeed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormMetric::ShoulderRotation => "Shoulder rotation",
            FormMetric::ElbowAngle => "Elbow angle",
            FormMetric::WristAngle => "Wrist angle",
            FormMetric::HipRotation => "Hip rotation",
            FormMetric::ReachBackExtension => "Reach-back extension",
            FormMetric::FollowThroughExtension => "Follow-through extension",
            FormMetric::DiscSpeed => "Disc speed",
        }
    }

    /// Series measured in degrees.
    pub fn is_angle(self) -> bool {
        matches!(
            self,
            FormMetric::ShoulderRotation
                | FormMetric::ElbowAngle
                | FormMetric::WristAngle
                | FormMetric::HipRotation
        )
    }

    /// Line orientations that can jump across ±180°.
    pub fn needs_unwrap(self) -> bool {
        matches!(self, FormMetric::ShoulderRotation | FormMetric::HipRotation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub frame: i64,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(frame: i64, value: f64) -> Self {
        Self { frame, value }
    }
}

pub type MetricSeries = BTreeMap<FormMetric, Vec<SeriesPoint>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyMoment {
    pub frame: i64,
    pub elbow_angle: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMoments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reach_back: Option<KeyMoment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<KeyMoment>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormMetrics {
    pub series: MetricSeries,
    pub key_moments: KeyMoments,
}

/// Tightest elbow bend of the throw (first one on ties).
pub fn find_reach_back(elbow: &[SeriesPoint]) -> Option<KeyMoment> {
    let mut best: Option<&SeriesPoint> = None;
    for point in elbow.iter().filter(|p| !p.value.is_nan()) {
        if best.map_or(true, |b| point.value < b.value) {
            best = Some(point);
        }
    }
    best.map(|p| KeyMoment {
        frame: p.frame,
        elbow_angle: p.value,
    })
}

/// Peak elbow angular acceleration strictly after `reach_back_frame`.
pub fn find_release(elbow: &[SeriesPoint], reach_back_frame: i64) -> Option<KeyMoment> {
    let mut after: Vec<SeriesPoint> = elbow
        .iter()
        .filter(|p| p.frame > reach_back_frame)
        .copied()
        .collect();
    if after.len() < MIN_RELEASE_SAMPLES {
        return None;
    }
    after.sort_by_key(|p| p.frame);

    let velocity: Vec<f64> = after.windows(2).map(|w| w[1].value - w[0].value).collect();
    let mut peak: Option<(usize, f64)> = None;
    for (i, pair) in velocity.windows(2).enumerate() {
        let accel = (pair[1] - pair[0]).abs();
        if peak.map_or(true, |(_, best)| accel > best) {
            peak = Some((i, accel));
        }
    }

    let (idx, _) = peak?;
    let point = after.get(idx + 1)?;
    Some(KeyMoment {
        frame: point.frame,
        elbow_angle: point.value,
    })
}

pub struct FormMetricsCalculator {
    handedness: Handedness,
    smoother: SavitzkyGolay,
}

impl FormMetricsCalculator {
    pub fn new(handedness: Handedness) -> Self {
        Self {
            handedness,
            smoother: SavitzkyGolay::default(),
        }
    }

    /// Per-frame measurements straight from the landmarks. A metric is only
    /// sampled on frames where all of its joints are present.
    pub fn extract_raw(&self, poses: &[FramePose]) -> MetricSeries {
        let shoulder = self.handedness.shoulder();
        let elbow = self.handedness.elbow();
        let wrist = self.handedness.wrist();

        let mut raw = MetricSeries::new();
        let mut push = |metric: FormMetric, frame: i64, value: Option<f64>| {
            if let Some(value) = value {
                raw.entry(metric).or_default().push(SeriesPoint::new(frame, value));
            }
        };

        for pose in poses.iter().filter(|p| p.detected) {
            let frame = pose.frame_number as i64;
            let s = pose.get(shoulder);
            let e = pose.get(elbow);
            let w = pose.get(wrist);

            push(FormMetric::ShoulderRotation, frame, pose.shoulder_angle());
            push(
                FormMetric::ElbowAngle,
                frame,
                s.zip(e).zip(w).and_then(|((s, e), w)| joint_angle(s, e, w)),
            );
            push(FormMetric::HipRotation, frame, pose.hip_angle());
            push(
                FormMetric::ReachBackExtension,
                frame,
                s.zip(w).map(|(s, w)| s.distance(w)),
            );
            push(
                FormMetric::FollowThroughExtension,
                frame,
                s.zip(w).map(|(s, w)| w.x - s.x),
            );
        }
        raw
    }

    /// Unwrap line angles, then smooth every series.
    pub fn process(&self, raw: MetricSeries) -> MetricSeries {
        raw.into_iter()
            .filter(|(_, points)| !points.is_empty())
            .map(|(metric, points)| {
                let mut values: Vec<f64> = points.iter().map(|p| p.value).collect();
                if metric.needs_unwrap() {
                    values = unwrap_degrees(&values);
                }
                let smoothed = self.smoother.smooth(&values);
                let points = points
                    .iter()
                    .zip(smoothed)
                    .map(|(p, value)| SeriesPoint::new(p.frame, value))
                    .collect();
                (metric, points)
            })
            .collect()
    }

    pub fn calculate(&self, poses: &[FramePose]) -> FormMetrics {
        log::info!("[FORM] Calculating form metrics from {} poses", poses.len());
        let series = self.process(self.extract_raw(poses));

        let key_moments = match series.get(&FormMetric::ElbowAngle) {
            Some(elbow) => {
                let reach_back = find_reach_back(elbow);
                let release = reach_back.and_then(|rb| find_release(elbow, rb.frame));
                KeyMoments { reach_back, release }
            }
            None => KeyMoments::default(),
        };

        match (&key_moments.reach_back, &key_moments.release) {
            (Some(rb), Some(rel)) => {
                log::info!("[FORM] Reach-back at frame {}, release at frame {}", rb.frame, rel.frame)
            }
            (Some(rb), None) => log::info!("[FORM] Reach-back at frame {}, release not found", rb.frame),
            _ => log::warn!("[FORM] No elbow data, key moments undetected"),
        }

        FormMetrics { series, key_moments }
    }
}
