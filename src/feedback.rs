use serde::{Deserialize, Serialize};

use crate::biomechanics::{tenth, BiomechanicsMetrics};

pub const MAX_TIPS: usize = 4;
pub const MAX_STRENGTHS: usize = 3;
pub const MAX_COMBINED_TIPS: usize = 6;

const FALLBACK_TIP: &str = "Your form looks solid. Focus on consistency and timing.";
const FALLBACK_STRENGTH: &str = "Keep working on your fundamentals.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl SkillLevel {
    /// Scales every rule threshold. Higher skill needs higher numbers to
    /// count as good.
    pub fn multiplier(self) -> f64 {
        match self {
            SkillLevel::Beginner => 0.8,
            SkillLevel::Intermediate => 1.0,
            SkillLevel::Advanced => 1.15,
        }
    }

    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "beginner" => SkillLevel::Beginner,
            "advanced" => SkillLevel::Advanced,
            _ => SkillLevel::Intermediate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SkillLevel::Beginner => "beginner",
            SkillLevel::Intermediate => "intermediate",
            SkillLevel::Advanced => "advanced",
        }
    }
}

/// The five scored metrics of a throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    ReachbackDepth,
    HipRotation,
    ShoulderSeparation,
    FollowThrough,
    WeightShift,
}

impl MetricKind {
    /// Kinetic-chain order used to pick the focus area.
    pub const PRIORITY: [MetricKind; 5] = [
        MetricKind::HipRotation,
        MetricKind::ReachbackDepth,
        MetricKind::ShoulderSeparation,
        MetricKind::WeightShift,
        MetricKind::FollowThrough,
    ];

    pub fn field_name(self) -> &'static str {
        match self {
            MetricKind::ReachbackDepth => "reachback_depth_score",
            MetricKind::HipRotation => "hip_rotation_degrees",
            MetricKind::ShoulderSeparation => "shoulder_separation_degrees",
            MetricKind::FollowThrough => "follow_through_score",
            MetricKind::WeightShift => "weight_shift_score",
        }
    }

    pub fn focus(self) -> FocusArea {
        match self {
            MetricKind::ReachbackDepth => FocusArea::Reachback,
            MetricKind::HipRotation => FocusArea::HipRotation,
            MetricKind::ShoulderSeparation => FocusArea::XFactor,
            MetricKind::FollowThrough => FocusArea::FollowThrough,
            MetricKind::WeightShift => FocusArea::WeightTransfer,
        }
    }

    pub fn is_degrees(self) -> bool {
        matches!(self, MetricKind::HipRotation | MetricKind::ShoulderSeparation)
    }

    /// The metric as the report shows it. Degrees are rounded to a tenth so
    /// feedback agrees with the printed numbers.
    pub fn value(self, metrics: &BiomechanicsMetrics) -> f64 {
        match self {
            MetricKind::ReachbackDepth => metrics.reachback_depth_score as f64,
            MetricKind::HipRotation => tenth(metrics.hip_rotation_degrees),
            MetricKind::ShoulderSeparation => tenth(metrics.shoulder_separation_degrees),
            MetricKind::FollowThrough => metrics.follow_through_score as f64,
            MetricKind::WeightShift => metrics.weight_shift_score as f64,
        }
    }

    /// Rough 0-100 scale for comparing degree metrics against scores.
    fn normalized(self, metrics: &BiomechanicsMetrics) -> f64 {
        let value = self.value(metrics);
        if self.is_degrees() {
            (value * 2.0).min(100.0)
        } else {
            value
        }
    }

    /// Weight in the overall score (weights sum to 1), and the value that
    /// counts as 100.
    fn scoring(self) -> (f64, f64) {
        match self {
            MetricKind::ReachbackDepth => (0.20, 100.0),
            MetricKind::HipRotation => (0.25, 60.0),
            MetricKind::ShoulderSeparation => (0.20, 45.0),
            MetricKind::FollowThrough => (0.15, 100.0),
            MetricKind::WeightShift => (0.20, 100.0),
        }
    }
}

/// User-facing focus tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusArea {
    Reachback,
    HipRotation,
    XFactor,
    FollowThrough,
    WeightTransfer,
    Timing,
    Visibility,
    Error,
}

impl FocusArea {
    pub fn as_str(self) -> &'static str {
        match self {
            FocusArea::Reachback => "reachback",
            FocusArea::HipRotation => "hip_rotation",
            FocusArea::XFactor => "x_factor",
            FocusArea::FollowThrough => "follow_through",
            FocusArea::WeightTransfer => "weight_transfer",
            FocusArea::Timing => "timing",
            FocusArea::Visibility => "visibility",
            FocusArea::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricStatus {
    Low,
    Medium,
    High,
}

pub struct FeedbackRule {
    pub metric: MetricKind,
    pub low: f64,
    pub high: f64,
    pub low_message: &'static str,
    pub good_message: &'static str,
}

/// Rule table. Row order is the order tips and strengths are reported in.
pub const RULES: [FeedbackRule; 5] = [
    FeedbackRule {
        metric: MetricKind::ReachbackDepth,
        low: 50.0,
        high: 75.0,
        low_message: "Extend your reachback further - try to get your throwing hand behind your rear shoulder.",
        good_message: "Good reachback extension - you're creating space for acceleration.",
    },
    FeedbackRule {
        metric: MetricKind::HipRotation,
        low: 30.0,
        high: 45.0,
        low_message: "Rotate your hips more during the throw. Lead with your hips, not your arm.",
        good_message: "Good hip rotation - you're generating power from your lower body.",
    },
    FeedbackRule {
        metric: MetricKind::ShoulderSeparation,
        low: 25.0,
        high: 40.0,
        low_message: "Create more separation between your shoulders and hips. Keep shoulders closed longer.",
        good_message: "Good shoulder-hip separation - you're building torque effectively.",
    },
    FeedbackRule {
        metric: MetricKind::FollowThrough,
        low: 50.0,
        high: 75.0,
        low_message: "Follow through more completely. Let your arm continue across your body after release.",
        good_message: "Good follow-through - you're completing the throwing motion.",
    },
    FeedbackRule {
        metric: MetricKind::WeightShift,
        low: 50.0,
        high: 75.0,
        low_message: "Shift your weight more decisively from back foot to front foot during the throw.",
        good_message: "Good weight transfer - you're driving power through your legs.",
    },
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseFeedback {
    pub pose_tips: Vec<String>,
    pub strengths: Vec<String>,
    pub priority_focus: FocusArea,
    pub overall_score: u8,
}

impl PoseFeedback {
    /// Feedback for a throw where no body was found in any frame.
    pub fn no_pose() -> Self {
        Self {
            pose_tips: vec!["Unable to detect body pose. Ensure full body is visible.".to_string()],
            strengths: Vec::new(),
            priority_focus: FocusArea::Visibility,
            overall_score: 0,
        }
    }

    /// Feedback for a throw whose analysis failed internally.
    pub fn error() -> Self {
        Self {
            pose_tips: vec!["An error occurred during analysis.".to_string()],
            strengths: Vec::new(),
            priority_focus: FocusArea::Error,
            overall_score: 0,
        }
    }
}

pub struct FeedbackEngine {
    skill_level: SkillLevel,
}

impl FeedbackEngine {
    pub fn new(skill_level: SkillLevel) -> Self {
        Self { skill_level }
    }

    /// Low is strictly below the scaled low threshold, high is at or above
    /// the scaled high threshold.
    pub fn classify(&self, rule: &FeedbackRule, value: f64) -> MetricStatus {
        let multiplier = self.skill_level.multiplier();
        if value < rule.low * multiplier {
            MetricStatus::Low
        } else if value >= rule.high * multiplier {
            MetricStatus::High
        } else {
            MetricStatus::Medium
        }
    }

    pub fn generate(&self, metrics: &BiomechanicsMetrics) -> PoseFeedback {
        let mut tips = Vec::new();
        let mut strengths = Vec::new();
        let mut statuses = Vec::with_capacity(RULES.len());

        for rule in &RULES {
            let value = rule.metric.value(metrics);
            let status = self.classify(rule, value);
            log::debug!("[FEEDBACK] {} = {:.1} ({:?})", rule.metric.field_name(), value, status);
            match status {
                MetricStatus::Low => tips.push(rule.low_message.to_string()),
                MetricStatus::High => strengths.push(rule.good_message.to_string()),
                MetricStatus::Medium => {}
            }
            statuses.push((rule.metric, status));
        }

        let priority_focus = priority_focus(&statuses, metrics);
        let overall_score = overall_score(metrics);

        if tips.is_empty() {
            tips.push(FALLBACK_TIP.to_string());
        }
        if strengths.is_empty() {
            strengths.push(FALLBACK_STRENGTH.to_string());
        }
        tips.truncate(MAX_TIPS);
        strengths.truncate(MAX_STRENGTHS);

        log::info!(
            "[FEEDBACK] skill={} focus={} score={}",
            self.skill_level.as_str(),
            priority_focus.as_str(),
            overall_score
        );

        PoseFeedback {
            pose_tips: tips,
            strengths,
            priority_focus,
            overall_score,
        }
    }
}

/// First low metric in kinetic-chain order, else the weakest one on a
/// common 0-100 scale.
fn priority_focus(statuses: &[(MetricKind, MetricStatus)], metrics: &BiomechanicsMetrics) -> FocusArea {
    let status_of = |kind: MetricKind| {
        statuses
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, s)| *s)
    };

    if let Some(kind) = MetricKind::PRIORITY
        .iter()
        .find(|k| status_of(**k) == Some(MetricStatus::Low))
    {
        return kind.focus();
    }

    let mut lowest: Option<(MetricKind, f64)> = None;
    for kind in MetricKind::PRIORITY {
        let value = kind.normalized(metrics);
        if value < lowest.map_or(f64::INFINITY, |(_, v)| v) {
            lowest = Some((kind, value));
        }
    }
    lowest.map(|(kind, _)| kind.focus()).unwrap_or(FocusArea::Timing)
}

/// Weighted 0-100 form score. Degree metrics are scaled against their
/// reference maxima first.
pub fn overall_score(metrics: &BiomechanicsMetrics) -> u8 {
    let total: f64 = RULES
        .iter()
        .map(|rule| {
            let (weight, full_marks) = rule.metric.scoring();
            (rule.metric.value(metrics) / full_marks * 100.0).min(100.0) * weight
        })
        .sum();
    total.clamp(0.0, 100.0) as u8
}

/// Pose tips first, then trajectory tips, without repeats.
pub fn combine_feedback(pose_tips: &[String], trajectory_tips: &[String]) -> Vec<String> {
    let mut combined: Vec<String> = Vec::new();
    for tip in pose_tips.iter().chain(trajectory_tips) {
        if !combined.contains(tip) {
            combined.push(tip.clone());
        }
    }
    combined.truncate(MAX_COMBINED_TIPS);
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(reachback: u8, hips: f64, xf: f64, follow: u8, weight: u8) -> BiomechanicsMetrics {
        BiomechanicsMetrics {
            reachback_depth_score: reachback,
            hip_rotation_degrees: hips,
            shoulder_separation_degrees: xf,
            follow_through_score: follow,
            weight_shift_score: weight,
            ..BiomechanicsMetrics::zero()
        }
    }

    #[test]
    fn test_all_zero_metrics() {
        let feedback = FeedbackEngine::new(SkillLevel::Intermediate).generate(&BiomechanicsMetrics::zero());
        assert_eq!(feedback.priority_focus, FocusArea::HipRotation);
        assert_eq!(feedback.pose_tips.len(), MAX_TIPS);
        assert_eq!(feedback.pose_tips[0], RULES[0].low_message);
        assert_eq!(feedback.strengths, vec![FALLBACK_STRENGTH.to_string()]);
        assert_eq!(feedback.overall_score, 0);
    }

    #[test]
    fn test_high_boundary_is_inclusive() {
        let feedback = FeedbackEngine::new(SkillLevel::Intermediate).generate(&metrics(75, 45.0, 40.0, 75, 75));
        assert_eq!(feedback.pose_tips, vec![FALLBACK_TIP.to_string()]);
        assert_eq!(feedback.strengths.len(), MAX_STRENGTHS);
        assert_eq!(feedback.strengths[0], RULES[0].good_message);

        let engine = FeedbackEngine::new(SkillLevel::Advanced);
        let mult = SkillLevel::Advanced.multiplier();
        for rule in &RULES {
            assert_eq!(engine.classify(rule, rule.high * mult), MetricStatus::High);
        }
    }

    #[test]
    fn test_low_boundary_is_exclusive() {
        let engine = FeedbackEngine::new(SkillLevel::Intermediate);
        let feedback = engine.generate(&metrics(50, 30.0, 25.0, 50, 50));
        assert_eq!(feedback.pose_tips, vec![FALLBACK_TIP.to_string()]);
        assert_eq!(feedback.strengths, vec![FALLBACK_STRENGTH.to_string()]);

        let beginner = FeedbackEngine::new(SkillLevel::Beginner);
        let mult = SkillLevel::Beginner.multiplier();
        for rule in &RULES {
            assert_eq!(beginner.classify(rule, rule.low * mult), MetricStatus::Medium);
        }
    }

    #[test]
    fn test_focus_without_low_metrics() {
        let engine = FeedbackEngine::new(SkillLevel::Intermediate);
        let feedback = engine.generate(&metrics(75, 45.0, 40.0, 75, 75));
        assert_eq!(feedback.priority_focus, FocusArea::Reachback);

        let feedback = engine.generate(&metrics(90, 50.0, 28.0, 80, 95));
        assert_eq!(feedback.priority_focus, FocusArea::XFactor);
    }

    #[test]
    fn test_first_low_in_priority_order() {
        let engine = FeedbackEngine::new(SkillLevel::Intermediate);
        let feedback = engine.generate(&metrics(40, 50.0, 10.0, 20, 90));
        assert_eq!(feedback.priority_focus, FocusArea::Reachback);
        assert_eq!(feedback.pose_tips.len(), 3);
        assert_eq!(feedback.pose_tips[1], RULES[2].low_message);
    }

    #[test]
    fn test_overall_score_weights() {
        assert_eq!(overall_score(&metrics(100, 60.0, 45.0, 100, 100)), 100);
        assert_eq!(overall_score(&metrics(100, 90.0, 90.0, 100, 100)), 100);
        // 0.2*50 + 0.25*50 + 0.2*50 + 0.15*50 + 0.2*50
        assert_eq!(overall_score(&metrics(50, 30.0, 22.5, 50, 50)), 50);
        assert_eq!(overall_score(&metrics(80, 0.0, 0.0, 0, 0)), 16);
        // 0.15*10 = 1.5, truncated
        assert_eq!(overall_score(&metrics(0, 0.0, 0.0, 10, 0)), 1);
    }

    #[test]
    fn test_degrees_judged_as_reported() {
        let engine = FeedbackEngine::new(SkillLevel::Intermediate);
        let reported = metrics(90, 29.97, 28.0, 80, 95);
        let json = serde_json::to_value(&reported).unwrap();
        assert_eq!(json["hip_rotation_degrees"], 30.0);

        let feedback = engine.generate(&reported);
        assert_eq!(feedback.pose_tips, vec![FALLBACK_TIP.to_string()]);
        assert_eq!(feedback.priority_focus, FocusArea::XFactor);
        assert_eq!(feedback.overall_score, overall_score(&metrics(90, 30.0, 28.0, 80, 95)));

        let feedback = engine.generate(&metrics(90, 29.94, 28.0, 80, 95));
        assert_eq!(feedback.priority_focus, FocusArea::HipRotation);
        assert_eq!(feedback.pose_tips, vec![RULES[1].low_message.to_string()]);
    }

    #[test]
    fn test_skill_parsing() {
        assert_eq!(SkillLevel::parse_lenient("Advanced"), SkillLevel::Advanced);
        assert_eq!(SkillLevel::parse_lenient("pro"), SkillLevel::Intermediate);
    }

    #[test]
    fn test_combine_feedback_dedupes_and_caps() {
        let pose: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let traj: Vec<String> = ["b", "d", "e", "f", "g"].iter().map(|s| s.to_string()).collect();
        let combined = combine_feedback(&pose, &traj);
        assert_eq!(combined, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_feedback_serialises_focus_tag() {
        let json = serde_json::to_value(PoseFeedback::no_pose()).unwrap();
        assert_eq!(json["priority_focus"], "visibility");
        assert_eq!(json["overall_score"], 0);
    }
}
