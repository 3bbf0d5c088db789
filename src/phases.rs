use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::form_metrics::{FormMetric, KeyMoments, MetricSeries};

const REACH_BACK_LEAD_FRAMES: i64 = 15;
const RELEASE_HALF_WIDTH: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    ReachBack,
    PullThrough,
    Release,
    FollowThrough,
}

impl PhaseName {
    pub fn label(self) -> &'static str {
        match self {
            PhaseName::ReachBack => "Reach back",
            PhaseName::PullThrough => "Pull through",
            PhaseName::Release => "Release",
            PhaseName::FollowThrough => "Follow through",
        }
    }
}

/// How the phase boundaries were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseConfidence {
    /// Both key moments were found.
    KeyMoments,
    /// Only one key moment was found; some phases are missing.
    Partial,
    /// Neither key moment was found; phases are an even split of the frames.
    QuartileFallback,
    /// No series data at all.
    #[default]
    NoData,
}

impl PhaseConfidence {
    pub fn label(self) -> &'static str {
        match self {
            PhaseConfidence::KeyMoments => "from key moments",
            PhaseConfidence::Partial => "partial",
            PhaseConfidence::QuartileFallback => "quartile fallback",
            PhaseConfidence::NoData => "no data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpan {
    pub frame_range: [i64; 2],
    /// Each series' value at the key moment the phase is anchored on.
    #[serde(default)]
    pub key_metrics: BTreeMap<FormMetric, f64>,
}

impl PhaseSpan {
    fn new(start: i64, end: i64) -> Self {
        Self {
            frame_range: [start, end],
            key_metrics: BTreeMap::new(),
        }
    }

    pub fn start(&self) -> i64 {
        self.frame_range[0]
    }

    pub fn end(&self) -> i64 {
        self.frame_range[1]
    }
}

/// Segmenter output. Persisted as the flat `spans` map, with the confidence
/// stored beside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThrowPhases {
    pub confidence: PhaseConfidence,
    pub spans: BTreeMap<PhaseName, PhaseSpan>,
}

impl ThrowPhases {
    pub fn get(&self, name: PhaseName) -> Option<&PhaseSpan> {
        self.spans.get(&name)
    }
}

/// Value of every series at exactly `frame`, where one was sampled.
fn snapshot(series: &MetricSeries, frame: i64) -> BTreeMap<FormMetric, f64> {
    series
        .iter()
        .filter_map(|(metric, points)| {
            points
                .iter()
                .find(|p| p.frame == frame)
                .map(|p| (*metric, p.value))
        })
        .collect()
}

fn frame_bounds(series: &MetricSeries) -> Option<(i64, i64)> {
    let mut frames = series.values().flatten().map(|p| p.frame);
    let first = frames.next()?;
    Some(frames.fold((first, first), |(lo, hi), f| (lo.min(f), hi.max(f))))
}

/// Split a throw into reach back, pull through, release and follow through.
pub fn segment_phases(series: &MetricSeries, key_moments: &KeyMoments) -> ThrowPhases {
    let Some((min_frame, max_frame)) = frame_bounds(series) else {
        log::warn!("[FORM] No frame data, phases left empty");
        return ThrowPhases::default();
    };

    let reach_back = key_moments.reach_back.map(|m| m.frame);
    let release = key_moments.release.map(|m| m.frame);
    let mut spans = BTreeMap::new();

    if let Some(rb) = reach_back {
        let mut span = PhaseSpan::new((rb - REACH_BACK_LEAD_FRAMES).max(min_frame), rb);
        span.key_metrics = snapshot(series, rb);
        spans.insert(PhaseName::ReachBack, span);
    }

    if let Some(rel) = release {
        let mut span = PhaseSpan::new(rel - RELEASE_HALF_WIDTH, rel + RELEASE_HALF_WIDTH);
        span.key_metrics = snapshot(series, rel);
        spans.insert(PhaseName::Release, span);

        if let Some(rb) = reach_back {
            let mut span = PhaseSpan::new(rb, rel - RELEASE_HALF_WIDTH);
            span.key_metrics = snapshot(series, rb);
            spans.insert(PhaseName::PullThrough, span);
        }

        let mut span = PhaseSpan::new(rel + RELEASE_HALF_WIDTH, max_frame);
        span.key_metrics = snapshot(series, rel);
        spans.insert(PhaseName::FollowThrough, span);
    }

    let confidence = match (reach_back, release) {
        (Some(_), Some(_)) => PhaseConfidence::KeyMoments,
        (None, None) => {
            let quarter = (max_frame - min_frame) / 4;
            let cut = |k: i64| min_frame + k * quarter;
            spans.insert(PhaseName::ReachBack, PhaseSpan::new(min_frame, cut(1)));
            spans.insert(PhaseName::PullThrough, PhaseSpan::new(cut(1), cut(2)));
            spans.insert(PhaseName::Release, PhaseSpan::new(cut(2), cut(3)));
            spans.insert(PhaseName::FollowThrough, PhaseSpan::new(cut(3), max_frame));
            log::warn!("[FORM] Key moments not found, using quartile phase split");
            PhaseConfidence::QuartileFallback
        }
        _ => PhaseConfidence::Partial,
    };

    ThrowPhases { confidence, spans }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_metrics::{KeyMoment, SeriesPoint};

    fn linear_series(frames: std::ops::RangeInclusive<i64>) -> MetricSeries {
        let mut series = MetricSeries::new();
        series.insert(
            FormMetric::ElbowAngle,
            frames.clone().map(|f| SeriesPoint::new(f, 100.0 + f as f64)).collect(),
        );
        series.insert(
            FormMetric::ReachBackExtension,
            frames.map(|f| SeriesPoint::new(f, f as f64 / 100.0)).collect(),
        );
        series
    }

    fn moment(frame: i64) -> Option<KeyMoment> {
        Some(KeyMoment {
            frame,
            elbow_angle: 100.0 + frame as f64,
        })
    }

    #[test]
    fn test_phases_from_key_moments() {
        let series = linear_series(0..=100);
        let moments = KeyMoments {
            reach_back: moment(40),
            release: moment(60),
        };
        let phases = segment_phases(&series, &moments);

        assert_eq!(phases.confidence, PhaseConfidence::KeyMoments);
        assert_eq!(phases.get(PhaseName::ReachBack).unwrap().frame_range, [25, 40]);
        assert_eq!(phases.get(PhaseName::PullThrough).unwrap().frame_range, [40, 55]);
        assert_eq!(phases.get(PhaseName::Release).unwrap().frame_range, [55, 65]);
        assert_eq!(phases.get(PhaseName::FollowThrough).unwrap().frame_range, [65, 100]);

        let release = phases.get(PhaseName::Release).unwrap();
        assert_eq!(release.key_metrics[&FormMetric::ElbowAngle], 160.0);
        assert_eq!(release.key_metrics[&FormMetric::ReachBackExtension], 0.6);
    }

    #[test]
    fn test_reach_back_clamped_to_start_and_frame_zero_counts() {
        let series = linear_series(0..=50);
        let moments = KeyMoments {
            reach_back: moment(0),
            release: None,
        };
        let phases = segment_phases(&series, &moments);
        assert_eq!(phases.confidence, PhaseConfidence::Partial);
        assert_eq!(phases.get(PhaseName::ReachBack).unwrap().frame_range, [0, 0]);
        assert!(phases.get(PhaseName::Release).is_none());
        assert!(phases.get(PhaseName::PullThrough).is_none());
    }

    #[test]
    fn test_quartile_fallback() {
        let series = linear_series(10..=110);
        let phases = segment_phases(&series, &KeyMoments::default());
        assert_eq!(phases.confidence, PhaseConfidence::QuartileFallback);
        assert_eq!(phases.get(PhaseName::ReachBack).unwrap().frame_range, [10, 35]);
        assert_eq!(phases.get(PhaseName::PullThrough).unwrap().frame_range, [35, 60]);
        assert_eq!(phases.get(PhaseName::Release).unwrap().frame_range, [60, 85]);
        assert_eq!(phases.get(PhaseName::FollowThrough).unwrap().frame_range, [85, 110]);
    }

    #[test]
    fn test_no_data() {
        let phases = segment_phases(&MetricSeries::new(), &KeyMoments::default());
        assert_eq!(phases.confidence, PhaseConfidence::NoData);
        assert!(phases.spans.is_empty());
    }

    #[test]
    fn test_serialised_shape() {
        let series = linear_series(0..=20);
        let phases = segment_phases(&series, &KeyMoments::default());
        let json = serde_json::to_value(&phases.spans).unwrap();
        assert_eq!(json["pull_through"]["frame_range"], serde_json::json!([5, 10]));
        assert_eq!(json["release"]["key_metrics"], serde_json::json!({}));
        assert_eq!(
            serde_json::to_value(phases.confidence).unwrap(),
            "quartile_fallback"
        );
    }
}
