use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use crate::biomechanics::{BiomechanicsCalculator, BiomechanicsMetrics};
use crate::error::SourceError;
use crate::feedback::{combine_feedback, FeedbackEngine, PoseFeedback, SkillLevel};
use crate::form_metrics::FormMetricsCalculator;
use crate::keyframes::{KeyframeDetector, KeyframeKind, KeyframeMap};
use crate::pose::{FramePose, Handedness};
use crate::pro_model::ProModel;
use crate::source::{ExtractorConfig, LandmarkSource, PoseExtractor};
use crate::trajectory::{
    analyze_trajectory, trajectory_tips, DiscPosition, FlightPath, SpeedEstimate, SpeedEstimator,
};

/// Settings for one throw analysis.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub min_confidence: f64,
    pub handedness: Handedness,
    pub skill_level: SkillLevel,
    pub max_frames: usize,
    pub sample_rate: usize,
    /// Used when the landmark source does not report a frame rate.
    pub fps: f64,
    /// Single pixel-to-metre scale for disc speed.
    pub calibration_px_per_m: Option<f64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            handedness: Handedness::Right,
            skill_level: SkillLevel::Intermediate,
            max_frames: 300,
            sample_rate: 2,
            fps: 30.0,
            calibration_px_per_m: None,
        }
    }
}

impl AnalysisConfig {
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_handedness(mut self, handedness: Handedness) -> Self {
        self.handedness = handedness;
        self
    }

    pub fn with_skill_level(mut self, skill_level: SkillLevel) -> Self {
        self.skill_level = skill_level;
        self
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: usize) -> Self {
        self.sample_rate = sample_rate.max(1);
        self
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        if fps > 0.0 {
            self.fps = fps;
        }
        self
    }

    pub fn with_calibration(mut self, px_per_m: Option<f64>) -> Self {
        self.calibration_px_per_m = px_per_m.filter(|v| *v > 0.0);
        self
    }

    pub(crate) fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            min_confidence: self.min_confidence,
            sample_rate: self.sample_rate,
            max_frames: self.max_frames,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryReport {
    pub flight_path: FlightPath,
    pub distance: f64,
    pub max_height: f64,
    pub release_angle: f64,
    pub technique_feedback: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_speed: Option<SpeedEstimate>,
}

impl TrajectoryReport {
    pub fn from_positions(positions: &[DiscPosition]) -> Self {
        let metrics = analyze_trajectory(positions);
        let technique_feedback = trajectory_tips(&metrics);
        Self {
            flight_path: metrics.flight_path,
            distance: metrics.distance,
            max_height: metrics.max_height,
            release_angle: metrics.release_angle,
            technique_feedback,
            release_speed: None,
        }
    }

    fn error(message: &str) -> Self {
        Self {
            flight_path: FlightPath::Error,
            distance: 0.0,
            max_height: 0.0,
            release_angle: 0.0,
            technique_feedback: vec![format!("Analysis error: {}", message)],
            release_speed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseReport {
    pub detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BiomechanicsMetrics>,
    #[serde(default)]
    pub keyframes: KeyframeMap,
}

/// Everything learned about one throw, in the shape the analysis service
/// returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub trajectory: TrajectoryReport,
    pub pose: PoseReport,
    pub feedback: PoseFeedback,
    #[serde(default)]
    pub processing_time_ms: u64,
}

impl AnalysisReport {
    /// Degraded report for a throw whose analysis failed part way. Still
    /// schema-valid so callers can render it.
    pub fn failed(message: &str, processing_time_ms: u64) -> Self {
        Self {
            error: Some(format!("Error during pose analysis: {}", message)),
            trajectory: TrajectoryReport::error(message),
            pose: PoseReport {
                detected: false,
                metrics: None,
                keyframes: KeyframeMap::new(),
            },
            feedback: PoseFeedback::error(),
            processing_time_ms,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Pose tips followed by trajectory tips, without repeats.
    pub fn combined_tips(&self) -> Vec<String> {
        combine_feedback(&self.feedback.pose_tips, &self.trajectory.technique_feedback)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Runs the throw pipeline: landmarks, keyframes, biomechanics and feedback,
/// alongside trajectory analysis of an externally detected disc track.
pub struct ThrowAnalyzer {
    config: AnalysisConfig,
}

impl ThrowAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Pull poses out of `source` in one scoped session. Returns the poses
    /// and the frame rate they were timed with.
    pub fn extract_poses<S: LandmarkSource>(
        &self,
        source: S,
        stop: Option<&AtomicBool>,
    ) -> Result<(Vec<FramePose>, f64), SourceError> {
        let mut extractor = PoseExtractor::new(source, self.config.extractor_config())?;
        let fps = match extractor.fps() {
            fps if fps > 0.0 => fps,
            _ => self.config.fps,
        };
        let poses = extractor.extract(stop);
        extractor.close();
        Ok((poses?, fps))
    }

    /// Full analysis of one throw. A source that cannot be opened is an
    /// error; anything that fails after that yields a degraded report.
    pub fn analyze<S: LandmarkSource>(
        &self,
        source: S,
        disc_track: &[DiscPosition],
        stop: Option<&AtomicBool>,
    ) -> Result<AnalysisReport> {
        self.run(source, disc_track, stop, false).map(|(report, _)| report)
    }

    /// Like [`analyze`](Self::analyze), also building the throw's form
    /// profile. There is no profile when extraction failed.
    pub fn analyze_with_profile<S: LandmarkSource>(
        &self,
        source: S,
        disc_track: &[DiscPosition],
        stop: Option<&AtomicBool>,
    ) -> Result<(AnalysisReport, Option<ProModel>)> {
        self.run(source, disc_track, stop, true)
    }

    fn run<S: LandmarkSource>(
        &self,
        source: S,
        disc_track: &[DiscPosition],
        stop: Option<&AtomicBool>,
        with_profile: bool,
    ) -> Result<(AnalysisReport, Option<ProModel>)> {
        let start = Instant::now();
        log::info!(
            "[ANALYSIS] handedness={} skill={} min_confidence={:.2}",
            self.config.handedness.as_str(),
            self.config.skill_level.as_str(),
            self.config.min_confidence
        );

        let mut extractor = PoseExtractor::new(source, self.config.extractor_config())
            .context("Failed to open landmark source")?;
        let fps = match extractor.fps() {
            fps if fps > 0.0 => fps,
            _ => self.config.fps,
        };
        let extracted = extractor.extract(stop);
        extractor.close();

        let (report, profile) = match extracted {
            Ok(poses) => {
                let profile = with_profile.then(|| self.build_profile(&poses, disc_track, fps));
                (self.analyze_poses(&poses, disc_track, fps, start), profile)
            }
            Err(e) => {
                log::error!("[ANALYSIS] Pose extraction failed: {}", e);
                (AnalysisReport::failed(&e.to_string(), elapsed_ms(start)), None)
            }
        };

        log::info!("[ANALYSIS] Complete in {} ms", report.processing_time_ms);
        Ok((report, profile))
    }

    /// Analysis of poses that were already extracted.
    pub fn analyze_poses(
        &self,
        poses: &[FramePose],
        disc_track: &[DiscPosition],
        fps: f64,
        start: Instant,
    ) -> AnalysisReport {
        let keyframes = KeyframeDetector::new(self.config.handedness).detect(poses);
        let pose_detected = poses.iter().any(|p| p.detected);

        let mut trajectory = TrajectoryReport::from_positions(disc_track);
        trajectory.release_speed = self.release_speed(
            disc_track,
            fps,
            keyframes.get(&KeyframeKind::Release).map(|f| *f as i64),
        );

        let (metrics, feedback) = if pose_detected {
            let metrics =
                BiomechanicsCalculator::new(self.config.handedness).analyze(poses, Some(&keyframes));
            let feedback = FeedbackEngine::new(self.config.skill_level).generate(&metrics);
            (metrics, feedback)
        } else {
            log::warn!("[ANALYSIS] No pose detected in any frame");
            (BiomechanicsMetrics::zero(), PoseFeedback::no_pose())
        };

        AnalysisReport {
            error: None,
            trajectory,
            pose: PoseReport {
                detected: pose_detected,
                metrics: Some(metrics),
                keyframes,
            },
            feedback,
            processing_time_ms: elapsed_ms(start),
        }
    }

    fn release_speed(
        &self,
        disc_track: &[DiscPosition],
        fps: f64,
        release_frame: Option<i64>,
    ) -> Option<SpeedEstimate> {
        if disc_track.is_empty() {
            return None;
        }
        SpeedEstimator::new(self.config.calibration_px_per_m).estimate(disc_track, fps, release_frame)
    }

    /// Form profile of a throw: smoothed series, key moments, phases and,
    /// when the disc was tracked, the release speed.
    pub fn build_profile(&self, poses: &[FramePose], disc_track: &[DiscPosition], fps: f64) -> ProModel {
        let form = FormMetricsCalculator::new(self.config.handedness).calculate(poses);
        let release_frame = form.key_moments.release.map(|m| m.frame);
        let profile = ProModel::from_form_metrics(form);

        match self.release_speed(disc_track, fps, release_frame) {
            Some(speed) => {
                log::info!(
                    "[ANALYSIS] Release speed {:.1} mph at frame {}",
                    speed.miles_per_hour,
                    speed.release_frame
                );
                profile.with_disc_speed(&speed)
            }
            None => {
                log::warn!("[ANALYSIS] Could not calculate disc speed");
                profile
            }
        }
    }

    /// Extract poses from `source` and build its form profile.
    pub fn profile_source<S: LandmarkSource>(
        &self,
        source: S,
        disc_track: &[DiscPosition],
        stop: Option<&AtomicBool>,
    ) -> Result<ProModel> {
        let (poses, fps) = self
            .extract_poses(source, stop)
            .context("Failed to extract poses")?;
        Ok(self.build_profile(&poses, disc_track, fps))
    }
}
