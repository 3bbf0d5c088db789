use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ModelError;
use crate::form_metrics::{FormMetric, FormMetrics, KeyMoments, MetricSeries, SeriesPoint};
use crate::phases::{segment_phases, PhaseConfidence, PhaseName, PhaseSpan};
use crate::trajectory::SpeedEstimate;

/// Reference points a series needs before it can be interpolated.
const MIN_REFERENCE_POINTS: usize = 2;
const ANGLE_NORMALIZER: f64 = 180.0;

/// A recorded throw: metric series, key moments and phases.
///
/// Pro reference models carry a name, throw type and creation time. A user's
/// own throw uses the same document with the identity fields left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pro_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throw_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phases: BTreeMap<PhaseName, PhaseSpan>,
    /// How the phases were segmented. Absent in models written without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_confidence: Option<PhaseConfidence>,
    pub metrics: MetricSeries,
    #[serde(default)]
    pub key_moments: KeyMoments,
}

/// Accepts RFC 3339 and zone-less ISO 8601 timestamps (read as UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| {
        parse_timestamp(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date_created {:?}", s)))
    })
    .transpose()
}

impl ProModel {
    /// Profile of a user's throw, phases segmented from its key moments.
    pub fn from_form_metrics(form: FormMetrics) -> Self {
        let phases = segment_phases(&form.series, &form.key_moments);
        Self {
            pro_name: None,
            throw_type: None,
            date_created: None,
            phases: phases.spans,
            phase_confidence: Some(phases.confidence),
            metrics: form.series,
            key_moments: form.key_moments,
        }
    }

    /// Turn a throw profile into a named pro's reference model, stamped with
    /// the current time.
    pub fn into_reference(mut self, pro_name: &str, throw_type: &str) -> Self {
        self.pro_name = Some(pro_name.to_string());
        self.throw_type = Some(throw_type.to_string());
        self.date_created = Some(Utc::now());
        self
    }

    /// Adds the release speed (mph) as a one-point `disc_speed` series.
    pub fn with_disc_speed(mut self, speed: &SpeedEstimate) -> Self {
        self.metrics.insert(
            FormMetric::DiscSpeed,
            vec![SeriesPoint::new(speed.release_frame, speed.miles_per_hour)],
        );
        self
    }

    pub fn is_reference(&self) -> bool {
        self.pro_name.is_some()
    }

    pub fn display_name(&self) -> &str {
        self.pro_name.as_deref().unwrap_or("user")
    }

    /// Where a pro model lives under a model library root:
    /// `<root>/<pro>/<throw type>_model.json`.
    pub fn library_path(root: &Path, pro_name: &str, throw_type: &str) -> PathBuf {
        root.join(pro_name).join(format!("{}_model.json", throw_type))
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        log::info!("[MODEL] Saved {} model to {}", self.display_name(), path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::NotFound(path.to_path_buf()));
        }
        let json = fs::read_to_string(path)?;
        let model: ProModel = serde_json::from_str(&json)?;
        log::debug!(
            "[MODEL] Loaded {} model from {} ({} series)",
            model.display_name(),
            path.display(),
            model.metrics.len()
        );
        Ok(model)
    }

    pub fn summary(&self) -> ModelSummary {
        let series = self
            .metrics
            .iter()
            .filter_map(|(metric, points)| SeriesStats::of(points).map(|stats| (*metric, stats)))
            .collect();
        let disc_speed_mph = self
            .metrics
            .get(&FormMetric::DiscSpeed)
            .and_then(|points| points.first())
            .map(|p| p.value);

        ModelSummary {
            pro_name: self.pro_name.clone(),
            throw_type: self.throw_type.clone(),
            date_created: self.date_created,
            series,
            disc_speed_mph,
            phase_confidence: self.phase_confidence,
            phases: self
                .phases
                .iter()
                .map(|(name, span)| (*name, span.frame_range))
                .collect(),
        }
    }
}

/// Result of comparing one throw against a reference model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub pro_name: Option<String>,
    pub throw_type: Option<String>,
    pub overall_similarity: f64,
    pub metric_similarities: BTreeMap<FormMetric, f64>,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pro: {}", self.pro_name.as_deref().unwrap_or("unknown"))?;
        writeln!(f, "Throw Type: {}", self.throw_type.as_deref().unwrap_or("unknown"))?;
        writeln!(f, "Overall Similarity: {:.1}%", self.overall_similarity * 100.0)?;
        writeln!(f)?;
        writeln!(f, "Metric Similarities:")?;
        for (metric, similarity) in &self.metric_similarities {
            writeln!(f, "  {}: {:.1}%", metric.label(), similarity * 100.0)?;
        }
        Ok(())
    }
}

/// Frames rescaled into `[0, 1]` by the series' own last frame.
fn normalized_positions(points: &[SeriesPoint]) -> Vec<f64> {
    let max_frame = points.iter().map(|p| p.frame).max().unwrap_or(0);
    if max_frame <= 0 {
        return vec![0.0; points.len()];
    }
    points
        .iter()
        .map(|p| p.frame as f64 / max_frame as f64)
        .collect()
}

/// Piecewise-linear interpolation through `(xs, ys)` (sorted by x, at least
/// two points), extending the end segments beyond the sampled range.
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if let Some(i) = xs.iter().position(|v| *v == x) {
        return ys[i];
    }
    let i = match xs.iter().position(|v| *v > x) {
        Some(0) => 0,
        Some(k) => k - 1,
        None => xs.len() - 2,
    };
    let (x0, x1, y0, y1) = (xs[i], xs[i + 1], ys[i], ys[i + 1]);
    if x1 == x0 {
        return y0;
    }
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

/// Similarity in `[0, 1]` between one user series and the matching reference
/// series, or `None` when either side is too sparse to compare.
pub fn series_similarity(metric: FormMetric, user: &[SeriesPoint], reference: &[SeriesPoint]) -> Option<f64> {
    if user.is_empty() || reference.len() < MIN_REFERENCE_POINTS {
        return None;
    }

    let user_x = normalized_positions(user);
    let mut reference_xy: Vec<(f64, f64)> = normalized_positions(reference)
        .into_iter()
        .zip(reference.iter().map(|p| p.value))
        .collect();
    reference_xy.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (ref_x, ref_y): (Vec<f64>, Vec<f64>) = reference_xy.into_iter().unzip();

    let mean_diff = user_x
        .iter()
        .zip(user)
        .map(|(x, p)| (p.value - interpolate(&ref_x, &ref_y, *x)).abs())
        .sum::<f64>()
        / user.len() as f64;

    let similarity = if metric.is_angle() {
        1.0 - mean_diff / ANGLE_NORMALIZER
    } else if metric == FormMetric::DiscSpeed {
        let max_speed = ref_y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max_speed > 0.0 {
            1.0 - mean_diff / max_speed
        } else if mean_diff == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        let values = user.iter().map(|p| p.value).chain(ref_y.iter().copied());
        let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let range = hi - lo;
        if range > 0.0 {
            1.0 - mean_diff / range
        } else {
            1.0
        }
    };

    if similarity.is_nan() {
        return None;
    }
    Some(similarity.clamp(0.0, 1.0))
}

/// Compare a throw's series against a reference model, metric by metric.
pub fn compare(user: &MetricSeries, model: &ProModel) -> Comparison {
    let metric_similarities: BTreeMap<FormMetric, f64> = user
        .iter()
        .filter_map(|(metric, points)| {
            let reference = model.metrics.get(metric)?;
            series_similarity(*metric, points, reference).map(|s| (*metric, s))
        })
        .collect();

    let overall_similarity = if metric_similarities.is_empty() {
        0.0
    } else {
        metric_similarities.values().sum::<f64>() / metric_similarities.len() as f64
    };

    log::info!(
        "[MODEL] Compared against {}: {:.1}% over {} metrics",
        model.display_name(),
        overall_similarity * 100.0,
        metric_similarities.len()
    );

    Comparison {
        pro_name: model.pro_name.clone(),
        throw_type: model.throw_type.clone(),
        overall_similarity,
        metric_similarities,
    }
}

fn collect_model_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ModelError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_model_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

/// Compare against every `*.json` model under `dir` and keep the most similar.
/// Files that are not models are skipped with a warning.
pub fn best_match(user: &MetricSeries, dir: &Path) -> Result<Option<(PathBuf, Comparison)>, ModelError> {
    if !dir.is_dir() {
        return Err(ModelError::NotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    collect_model_files(dir, &mut files)?;
    files.sort();
    log::info!("[MODEL] Searching {} model files under {}", files.len(), dir.display());

    let mut best: Option<(PathBuf, Comparison)> = None;
    for path in files {
        let model = match ProModel::load(&path) {
            Ok(model) => model,
            Err(e) => {
                log::warn!("[MODEL] Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let comparison = compare(user, &model);
        let better = best
            .as_ref()
            .map_or(true, |(_, b)| comparison.overall_similarity > b.overall_similarity);
        if better {
            best = Some((path, comparison));
        }
    }
    Ok(best)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl SeriesStats {
    fn of(points: &[SeriesPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let (min, max, sum) = points.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(lo, hi, sum), p| (lo.min(p.value), hi.max(p.value), sum + p.value),
        );
        Some(Self {
            count: points.len(),
            min,
            max,
            mean: sum / points.len() as f64,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub pro_name: Option<String>,
    pub throw_type: Option<String>,
    pub date_created: Option<DateTime<Utc>>,
    pub series: BTreeMap<FormMetric, SeriesStats>,
    pub disc_speed_mph: Option<f64>,
    pub phase_confidence: Option<PhaseConfidence>,
    pub phases: BTreeMap<PhaseName, [i64; 2]>,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pro: {}", self.pro_name.as_deref().unwrap_or("user throw"))?;
        if let Some(throw_type) = &self.throw_type {
            writeln!(f, "Throw Type: {}", throw_type)?;
        }
        if let Some(created) = &self.date_created {
            writeln!(f, "Created: {}", created.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        match self.disc_speed_mph {
            Some(mph) => writeln!(f, "Disc Speed: {:.1} mph", mph)?,
            None => writeln!(f, "Disc Speed: n/a")?,
        }

        writeln!(f)?;
        writeln!(f, "Series:")?;
        for (metric, stats) in &self.series {
            writeln!(
                f,
                "  {:<26} n={:<4} min={:>8.2} max={:>8.2} mean={:>8.2}",
                metric.label(),
                stats.count,
                stats.min,
                stats.max,
                stats.mean
            )?;
        }

        writeln!(f)?;
        match self.phase_confidence {
            Some(confidence) => writeln!(f, "Phases ({}):", confidence.label())?,
            None => writeln!(f, "Phases:")?,
        }
        if self.phases.is_empty() {
            writeln!(f, "  none")?;
        }
        for (phase, [start, end]) in &self.phases {
            writeln!(f, "  {:<15} frames {}-{}", phase.label(), start, end)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_metrics::FormMetricsCalculator;
    use crate::mock_pose::MockPoseSource;
    use crate::pose::Handedness;
    use crate::source::{ExtractorConfig, PoseExtractor};

    fn points(frames: &[i64], values: &[f64]) -> Vec<SeriesPoint> {
        frames
            .iter()
            .zip(values)
            .map(|(f, v)| SeriesPoint::new(*f, *v))
            .collect()
    }

    fn mock_model(seed: u64) -> ProModel {
        let mut extractor = PoseExtractor::new(MockPoseSource::new(seed, 90), ExtractorConfig::default()).unwrap();
        let poses = extractor.extract(None).unwrap();
        let form = FormMetricsCalculator::new(Handedness::Right).calculate(&poses);
        ProModel::from_form_metrics(form).into_reference("Test Pro", "backhand")
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("discform-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_self_similarity_is_exactly_one() {
        let model = mock_model(11);
        let comparison = compare(&model.metrics, &model);
        assert!(!comparison.metric_similarities.is_empty());
        assert_eq!(comparison.overall_similarity, 1.0);
        assert!(comparison.metric_similarities.values().all(|s| *s == 1.0));
    }

    #[test]
    fn test_frame_axes_are_normalized() {
        let user = points(&[0, 50, 100], &[10.0, 40.0, 90.0]);
        let pro = points(&[0, 100, 200], &[10.0, 40.0, 90.0]);
        let similarity = series_similarity(FormMetric::ShoulderRotation, &user, &pro).unwrap();
        assert!((similarity - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_interpolation_between_and_beyond_samples() {
        let xs = [0.0, 0.5, 1.0];
        let ys = [0.0, 10.0, 30.0];
        assert_eq!(interpolate(&xs, &ys, 0.25), 5.0);
        assert_eq!(interpolate(&xs, &ys, 0.75), 20.0);
        assert_eq!(interpolate(&xs, &ys, 1.5), 50.0);
        assert_eq!(interpolate(&xs, &ys, -0.5), -10.0);
    }

    #[test]
    fn test_angle_similarity_uses_half_turn() {
        let user = points(&[0, 10], &[0.0, 0.0]);
        let pro = points(&[0, 10], &[90.0, 90.0]);
        let similarity = series_similarity(FormMetric::ElbowAngle, &user, &pro).unwrap();
        assert!((similarity - 0.5).abs() < 1e-12);

        let far = points(&[0, 10], &[400.0, 400.0]);
        assert_eq!(series_similarity(FormMetric::ElbowAngle, &user, &far), Some(0.0));
    }

    #[test]
    fn test_range_normalizer_and_constant_series() {
        let user = points(&[0, 10], &[0.2, 0.2]);
        let pro = points(&[0, 10], &[0.2, 0.2]);
        assert_eq!(series_similarity(FormMetric::ReachBackExtension, &user, &pro), Some(1.0));

        let pro = points(&[0, 10], &[0.4, 0.4]);
        // mean diff 0.2 over a combined range of 0.2
        assert_eq!(series_similarity(FormMetric::ReachBackExtension, &user, &pro), Some(0.0));
    }

    #[test]
    fn test_disc_speed_needs_two_reference_points() {
        let user = points(&[30], &[50.0]);
        let single = points(&[40], &[60.0]);
        assert!(series_similarity(FormMetric::DiscSpeed, &user, &single).is_none());

        let pro = points(&[0, 40], &[60.0, 60.0]);
        let similarity = series_similarity(FormMetric::DiscSpeed, &user, &pro).unwrap();
        assert!((similarity - (1.0 - 10.0 / 60.0)).abs() < 1e-12);
    }

    #[test]
    fn test_no_shared_metrics_scores_zero() {
        let mut user = MetricSeries::new();
        user.insert(FormMetric::WristAngle, points(&[0, 1], &[1.0, 2.0]));
        let comparison = compare(&user, &mock_model(3));
        assert!(comparison.metric_similarities.is_empty());
        assert_eq!(comparison.overall_similarity, 0.0);
    }

    #[test]
    fn test_save_load_and_best_match() {
        let root = temp_dir("library");
        let user = mock_model(21);
        let close = mock_model(21);
        let mut far = mock_model(22);
        for points in far.metrics.values_mut() {
            for p in points.iter_mut() {
                p.value += 45.0;
            }
        }

        close.save(&ProModel::library_path(&root, "Close", "backhand")).unwrap();
        far.save(&ProModel::library_path(&root, "Far", "backhand")).unwrap();
        fs::write(root.join("notes.json"), "{\"not\": \"a model\"}").unwrap();

        let loaded = ProModel::load(&ProModel::library_path(&root, "Close", "backhand")).unwrap();
        assert_eq!(loaded.pro_name.as_deref(), Some("Test Pro"));
        assert_eq!(
            loaded.key_moments.release.map(|m| m.frame),
            close.key_moments.release.map(|m| m.frame)
        );
        assert_eq!(loaded.phase_confidence, close.phase_confidence);
        assert_eq!(loaded.phases.len(), close.phases.len());

        let (path, comparison) = best_match(&user.metrics, &root).unwrap().unwrap();
        assert!(path.ends_with("Close/backhand_model.json"));
        assert!(comparison.overall_similarity > 0.999_999);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_files_are_not_found() {
        let missing = temp_dir("missing");
        assert!(matches!(
            ProModel::load(&missing.join("x.json")),
            Err(ModelError::NotFound(_))
        ));
        assert!(matches!(
            best_match(&MetricSeries::new(), &missing),
            Err(ModelError::NotFound(_))
        ));
    }

    #[test]
    fn test_user_profile_omits_identity_and_reads_naive_dates() {
        let json = serde_json::to_value(ProModel::default()).unwrap();
        assert!(json.get("pro_name").is_none());
        assert!(json.get("date_created").is_none());

        let doc = r#"{
            "pro_name": "Someone",
            "throw_type": "forehand",
            "date_created": "2024-03-01T10:20:30.123456",
            "metrics": {"disc_speed": [{"frame": 12, "value": 55.5}]}
        }"#;
        let model: ProModel = serde_json::from_str(doc).unwrap();
        assert_eq!(
            model.date_created.unwrap().format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-03-01 10:20:30"
        );
        assert_eq!(model.summary().disc_speed_mph, Some(55.5));
    }

    #[test]
    fn test_loads_flat_phase_map() {
        let doc = r#"{
            "pro_name": "Flat Phases",
            "throw_type": "backhand",
            "date_created": "2024-05-12T08:00:00.000001",
            "phases": {
                "reach_back": {"frame_range": [10, 25], "key_metrics": {"elbow_angle": 162.5, "reach_back_extension": 0.41}},
                "pull_through": {"frame_range": [25, 35], "key_metrics": {}},
                "release": {"frame_range": [35, 45], "key_metrics": {"elbow_angle": 171}},
                "follow_through": {"frame_range": [45, 80], "key_metrics": {}}
            },
            "metrics": {"elbow_angle": [{"frame": 10, "value": 150.0}, {"frame": 40, "value": 171.0}]},
            "key_moments": {
                "reach_back": {"frame": 25, "elbow_angle": 162.5},
                "release": {"frame": 40, "elbow_angle": 171.0}
            }
        }"#;
        let model: ProModel = serde_json::from_str(doc).unwrap();
        assert_eq!(model.phases.len(), 4);
        assert_eq!(model.phases[&PhaseName::ReachBack].frame_range, [10, 25]);
        assert_eq!(
            model.phases[&PhaseName::Release].key_metrics[&FormMetric::ElbowAngle],
            171.0
        );
        assert_eq!(model.phase_confidence, None);
        assert_eq!(model.key_moments.release.map(|m| m.frame), Some(40));

        // written back in the same flat shape
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["phases"]["follow_through"]["frame_range"], serde_json::json!([45, 80]));
        assert!(json.get("phase_confidence").is_none());
        assert!(json["phases"].get("confidence").is_none());
    }

    #[test]
    fn test_profile_records_phase_confidence() {
        let model = mock_model(5);
        let json = serde_json::to_value(&model).unwrap();
        assert!(json["phases"].get("spans").is_none());
        assert_eq!(
            json["phase_confidence"],
            serde_json::to_value(model.phase_confidence.unwrap()).unwrap()
        );
        let reloaded: ProModel = serde_json::from_value(json).unwrap();
        assert_eq!(reloaded.phase_confidence, model.phase_confidence);
        assert_eq!(reloaded.phases.keys().collect::<Vec<_>>(), model.phases.keys().collect::<Vec<_>>());
    }

    #[test]
    fn test_summary_stats() {
        let mut model = ProModel::default();
        model
            .metrics
            .insert(FormMetric::ElbowAngle, points(&[0, 1, 2], &[90.0, 120.0, 150.0]));
        let summary = model.summary();
        let stats = summary.series[&FormMetric::ElbowAngle];
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 90.0);
        assert_eq!(stats.max, 150.0);
        assert_eq!(stats.mean, 120.0);
        assert!(summary.to_string().contains("Elbow angle"));
    }
}
