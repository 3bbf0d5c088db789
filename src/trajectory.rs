use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub const MIN_TRACK_POSITIONS: usize = 5;
pub const MIN_SPEED_POSITIONS: usize = 3;
/// Fit window used for the release-speed regression.
const SPEED_FIT_POINTS: usize = 3;
/// Standard golf disc diameter in metres.
pub const DISC_DIAMETER_M: f64 = 0.21;
/// Pixels per metre assumed when no calibration is available.
const ROUGH_PX_PER_M: f64 = 100.0;
const FLAT_LIMIT_DEG: f64 = 5.0;
const STEEP_LIMIT_DEG: f64 = 20.0;

pub const NO_DISC_TIP: &str = "Unable to detect disc clearly.";

/// Disc centre in image pixels on one frame, as reported by the disc detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscPosition {
    pub x: f64,
    pub y: f64,
    pub frame: i64,
}

impl DiscPosition {
    pub fn new(x: f64, y: f64, frame: i64) -> Self {
        Self { x, y, frame }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightPath {
    Flat,
    Hyzer,
    Anhyzer,
    #[default]
    Unknown,
    Error,
}

impl FlightPath {
    pub fn from_release_angle(angle: f64) -> Self {
        if angle.abs() < FLAT_LIMIT_DEG {
            FlightPath::Flat
        } else if angle >= FLAT_LIMIT_DEG {
            FlightPath::Hyzer
        } else {
            FlightPath::Anhyzer
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryMetrics {
    pub flight_path: FlightPath,
    /// Straight-line pixels from first to last sighting.
    pub distance: f64,
    /// Vertical pixel range of the track.
    pub max_height: f64,
    pub release_angle: f64,
}

impl TrajectoryMetrics {
    pub fn unknown() -> Self {
        Self::default()
    }
}

pub fn analyze_trajectory(positions: &[DiscPosition]) -> TrajectoryMetrics {
    if positions.len() < MIN_TRACK_POSITIONS {
        log::warn!(
            "[TRAJECTORY] Only {} disc positions (need {})",
            positions.len(),
            MIN_TRACK_POSITIONS
        );
        return TrajectoryMetrics::unknown();
    }

    let first = positions[0];
    let last = positions[positions.len() - 1];
    let distance = (last.x - first.x).hypot(last.y - first.y);

    let (min_y, max_y) = positions
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.y), hi.max(p.y)));

    // Image y grows downwards, so a rising disc has y0 > y2.
    let dx = positions[2].x - first.x;
    let dy = first.y - positions[2].y;
    let release_angle = if dx != 0.0 { dy.atan2(dx).to_degrees() } else { 0.0 };

    TrajectoryMetrics {
        flight_path: FlightPath::from_release_angle(release_angle),
        distance,
        max_height: max_y - min_y,
        release_angle,
    }
}

pub fn trajectory_tips(metrics: &TrajectoryMetrics) -> Vec<String> {
    let mut tips = Vec::new();

    match metrics.flight_path {
        FlightPath::Flat => tips.push("Your throw has a flat release angle, which is good for straight shots."),
        FlightPath::Hyzer => {
            tips.push("Your throw has a hyzer angle (disc tilted down). This is good for controlled fades.")
        }
        FlightPath::Anhyzer => tips.push(
            "Your throw has an anhyzer angle (disc tilted up). This can help with distance but may reduce control.",
        ),
        FlightPath::Unknown | FlightPath::Error => return vec![NO_DISC_TIP.to_string()],
    }

    let angle = metrics.release_angle;
    if angle.abs() < FLAT_LIMIT_DEG {
        tips.push("Your release angle is very flat, which is ideal for straight shots.");
    } else if angle > STEEP_LIMIT_DEG {
        tips.push("Your release angle is quite steep. Try flattening your release for more distance.");
    } else if angle < -STEEP_LIMIT_DEG {
        tips.push("Your anhyzer angle is quite extreme. Consider a more moderate angle for better control.");
    }

    tips.push("Focus on a smooth release and follow-through to improve consistency.");
    tips.into_iter().map(String::from).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedEstimate {
    pub meters_per_second: f64,
    pub kilometers_per_hour: f64,
    pub miles_per_hour: f64,
    pub release_frame: i64,
}

/// Disc release speed from a pixel track.
#[derive(Debug, Clone, Default)]
pub struct SpeedEstimator {
    px_per_m: Option<f64>,
}

impl SpeedEstimator {
    pub fn new(px_per_m: Option<f64>) -> Self {
        Self {
            px_per_m: px_per_m.filter(|v| *v > 0.0),
        }
    }

    /// Calibrate from the disc's apparent diameter in pixels.
    pub fn from_disc_width(width_px: f64) -> Self {
        Self::new(Some(width_px / DISC_DIAMETER_M))
    }

    pub fn px_per_m(&self) -> Option<f64> {
        self.px_per_m
    }

    /// Release is the sample nearest `release_frame` if given, otherwise the
    /// end of the fastest inter-frame step. Velocity is a least-squares fit
    /// over the few samples right after release.
    pub fn estimate(
        &self,
        positions: &[DiscPosition],
        fps: f64,
        release_frame: Option<i64>,
    ) -> Option<SpeedEstimate> {
        if positions.len() < MIN_SPEED_POSITIONS || fps <= 0.0 {
            log::warn!("[TRAJECTORY] Not enough disc positions to estimate speed");
            return None;
        }

        let mut track = positions.to_vec();
        track.sort_by_key(|p| p.frame);
        let n = track.len();

        let release_idx = match release_frame {
            Some(frame) => nearest_index(&track, frame),
            None => fastest_step_end(&track, fps)?,
        };

        let mut post = (release_idx + 1).min(n - 1);
        if post >= n - 2 {
            log::warn!("[TRAJECTORY] Few frames after release, fitting on the last samples");
            post = n - 3;
        }
        let window = &track[post..(post + SPEED_FIT_POINTS).min(n)];

        let t0 = window[0].frame as f64;
        let times: Vec<f64> = window.iter().map(|p| (p.frame as f64 - t0) / fps).collect();
        let vx = fit_slope(&times, &window.iter().map(|p| p.x).collect::<Vec<_>>())?;
        let vy = fit_slope(&times, &window.iter().map(|p| p.y).collect::<Vec<_>>())?;
        let px_per_s = vx.hypot(vy);

        let meters_per_second = match self.px_per_m {
            Some(scale) => px_per_s / scale,
            None => {
                log::warn!("[TRAJECTORY] No calibration, using rough pixel scale for speed");
                px_per_s / ROUGH_PX_PER_M
            }
        };

        Some(SpeedEstimate {
            meters_per_second,
            kilometers_per_hour: meters_per_second * 3.6,
            miles_per_hour: meters_per_second * 2.23694,
            release_frame: track[release_idx].frame,
        })
    }
}

fn nearest_index(track: &[DiscPosition], frame: i64) -> usize {
    let mut best = 0;
    for (i, p) in track.iter().enumerate() {
        if (p.frame - frame).abs() < (track[best].frame - frame).abs() {
            best = i;
        }
    }
    best
}

fn fastest_step_end(track: &[DiscPosition], fps: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, pair) in track.windows(2).enumerate() {
        let dt = (pair[1].frame - pair[0].frame) as f64 / fps;
        if dt <= 0.0 {
            continue;
        }
        let speed = (pair[1].x - pair[0].x).hypot(pair[1].y - pair[0].y) / dt;
        if best.map_or(true, |(_, s)| speed > s) {
            best = Some((i + 1, speed));
        }
    }
    best.map(|(i, _)| i)
}

/// Slope of the least-squares line through `(t, y)`. `None` when the times
/// do not span an interval.
fn fit_slope(times: &[f64], values: &[f64]) -> Option<f64> {
    let design = DMatrix::from_fn(times.len(), 2, |row, col| if col == 0 { times[row] } else { 1.0 });
    let target = DVector::from_column_slice(values);
    let normal = design.transpose() * &design;
    let coefficients = normal.try_inverse()? * design.transpose() * target;
    coefficients[0].is_finite().then_some(coefficients[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(points: &[(f64, f64)]) -> Vec<DiscPosition> {
        points
            .iter()
            .enumerate()
            .map(|(i, (x, y))| DiscPosition::new(*x, *y, i as i64))
            .collect()
    }

    #[test]
    fn test_short_track_is_unknown() {
        let metrics = analyze_trajectory(&track(&[(0.0, 0.0), (1.0, 1.0)]));
        assert_eq!(metrics, TrajectoryMetrics::unknown());
        assert_eq!(trajectory_tips(&metrics), vec![NO_DISC_TIP.to_string()]);
    }

    #[test]
    fn test_flat_track() {
        let positions = track(&[(100.0, 300.0), (120.0, 300.0), (140.0, 301.0), (160.0, 302.0), (180.0, 300.0)]);
        let metrics = analyze_trajectory(&positions);
        assert_eq!(metrics.flight_path, FlightPath::Flat);
        assert!((metrics.distance - 80.0).abs() < 1e-9);
        assert!((metrics.max_height - 2.0).abs() < 1e-9);

        let tips = trajectory_tips(&metrics);
        assert_eq!(tips.len(), 3);
        assert!(tips[1].contains("very flat"));
    }

    #[test]
    fn test_rising_track_is_hyzer_and_steep() {
        let positions = track(&[(0.0, 100.0), (10.0, 90.0), (20.0, 80.0), (30.0, 75.0), (40.0, 72.0)]);
        let metrics = analyze_trajectory(&positions);
        assert!((metrics.release_angle - 45.0).abs() < 1e-9);
        assert_eq!(metrics.flight_path, FlightPath::Hyzer);
        assert!(trajectory_tips(&metrics)[1].contains("quite steep"));
    }

    #[test]
    fn test_dropping_track_is_anhyzer() {
        let positions = track(&[(0.0, 100.0), (10.0, 102.0), (20.0, 104.0), (30.0, 110.0), (40.0, 120.0)]);
        let metrics = analyze_trajectory(&positions);
        assert_eq!(metrics.flight_path, FlightPath::Anhyzer);
        assert_eq!(trajectory_tips(&metrics).len(), 2);
    }

    #[test]
    fn test_vertical_start_has_zero_angle() {
        let positions = track(&[(5.0, 100.0), (5.0, 90.0), (5.0, 80.0), (8.0, 70.0), (12.0, 60.0)]);
        assert_eq!(analyze_trajectory(&positions).release_angle, 0.0);
    }

    #[test]
    fn test_speed_from_constant_velocity() {
        // 30 px per frame at 30 fps = 900 px/s
        let positions: Vec<DiscPosition> = (0..8).map(|i| DiscPosition::new(30.0 * i as f64, 200.0, i)).collect();
        let estimate = SpeedEstimator::new(Some(300.0)).estimate(&positions, 30.0, Some(2)).unwrap();
        assert!((estimate.meters_per_second - 3.0).abs() < 1e-9);
        assert!((estimate.kilometers_per_hour - 10.8).abs() < 1e-9);
        assert_eq!(estimate.release_frame, 2);

        let rough = SpeedEstimator::default().estimate(&positions, 30.0, None).unwrap();
        assert!((rough.meters_per_second - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_speed_needs_three_positions() {
        let positions = track(&[(0.0, 0.0), (1.0, 0.0)]);
        assert!(SpeedEstimator::default().estimate(&positions, 30.0, None).is_none());
    }

    #[test]
    fn test_disc_width_calibration() {
        let estimator = SpeedEstimator::from_disc_width(42.0);
        assert!((estimator.px_per_m().unwrap() - 200.0).abs() < 1e-9);
    }
}
