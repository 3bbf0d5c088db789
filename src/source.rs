use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SourceError;
use crate::pose::{FramePose, Landmark, LandmarkName};

/// One frame as delivered by the external pose detector, already reduced to
/// the retained joint set.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFrame {
    pub frame_number: u32,
    pub detected: bool,
    pub landmarks: BTreeMap<LandmarkName, Landmark>,
}

// Trait for landmark stream providers (recorded detector output or mock)
pub trait LandmarkSource {
    fn open(&mut self) -> Result<(), SourceError>;
    fn close(&mut self);
    fn info(&self) -> HashMap<String, String>;
    fn fps(&self) -> f64;
    /// Next frame in stream order; `Ok(None)` at end of stream.
    fn read_frame(&mut self) -> Result<Option<SourceFrame>, SourceError>;
}

impl<S: LandmarkSource + ?Sized> LandmarkSource for Box<S> {
    fn open(&mut self) -> Result<(), SourceError> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn info(&self) -> HashMap<String, String> {
        (**self).info()
    }

    fn fps(&self) -> f64 {
        (**self).fps()
    }

    fn read_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        (**self).read_frame()
    }
}

#[derive(Debug, Deserialize)]
struct LandmarkRecord {
    name: Option<String>,
    index: Option<usize>,
    x: f64,
    y: f64,
    #[serde(default)]
    z: f64,
    #[serde(default = "default_visibility")]
    visibility: f64,
}

fn default_visibility() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct FrameRecord {
    frame: Option<u32>,
    detected: Option<bool>,
    #[serde(default)]
    landmarks: Vec<LandmarkRecord>,
}

/// Reads detector output stored as JSON lines: an optional header object
/// (`{"fps": 30.0, "source": "..."}`) followed by one object per frame.
pub struct JsonLinesSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    fps: f64,
    info: HashMap<String, String>,
    line_no: usize,
    frames_read: u32,
    seen_record: bool,
}

impl JsonLinesSource {
    const DEFAULT_FPS: f64 = 30.0;
    const FRAME_KEYS: [&'static str; 3] = ["frame", "landmarks", "detected"];
    const HEADER_KEYS: [&'static str; 2] = ["fps", "source"];

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: None,
            fps: Self::DEFAULT_FPS,
            info: HashMap::new(),
            line_no: 0,
            frames_read: 0,
            seen_record: false,
        }
    }

    /// Override the frame rate used when the file carries no header.
    pub fn with_fps(mut self, fps: f64) -> Self {
        if fps > 0.0 {
            self.fps = fps;
        }
        self
    }

    /// A header has no frame fields, and is either the first record or
    /// names the frame rate or detector.
    fn is_header(map: &serde_json::Map<String, Value>, first: bool) -> bool {
        if Self::FRAME_KEYS.iter().any(|k| map.contains_key(*k)) {
            return false;
        }
        first || Self::HEADER_KEYS.iter().any(|k| map.contains_key(*k))
    }

    fn absorb_header(&mut self, map: serde_json::Map<String, Value>) {
        for (key, value) in map {
            if key == "fps" {
                if let Some(fps) = value.as_f64().filter(|f| *f > 0.0) {
                    self.fps = fps;
                }
            }
            self.info.insert(key, value.to_string().trim_matches('"').to_string());
        }
    }

    fn parse_frame(&mut self, value: Value) -> Result<SourceFrame, SourceError> {
        let record: FrameRecord = serde_json::from_value(value).map_err(|e| SourceError::Decode {
            line: self.line_no,
            message: e.to_string(),
        })?;

        let frame_number = record.frame.unwrap_or(self.frames_read);
        let mut landmarks = BTreeMap::new();
        for lm in record.landmarks {
            let name = lm
                .name
                .as_deref()
                .and_then(LandmarkName::from_model_name)
                .or_else(|| lm.index.and_then(LandmarkName::from_model_index));
            if let Some(name) = name {
                landmarks.insert(name, Landmark::new(lm.x, lm.y, lm.z, lm.visibility));
            }
        }
        let detected = record.detected.unwrap_or(!landmarks.is_empty());
        if !detected {
            landmarks.clear();
        }

        Ok(SourceFrame {
            frame_number,
            detected,
            landmarks,
        })
    }
}

impl LandmarkSource for JsonLinesSource {
    fn open(&mut self) -> Result<(), SourceError> {
        let file = File::open(&self.path).map_err(|source| SourceError::Open {
            path: self.path.clone(),
            source,
        })?;
        self.reader = Some(BufReader::new(file));
        self.line_no = 0;
        self.frames_read = 0;
        self.seen_record = false;
        self.info
            .insert("path".to_string(), self.path.display().to_string());
        Ok(())
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            log::debug!("[SOURCE] Closed {}", self.path.display());
        }
    }

    fn info(&self) -> HashMap<String, String> {
        self.info.clone()
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn read_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        loop {
            let reader = self.reader.as_mut().ok_or(SourceError::NotOpen)?;
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let first = !self.seen_record;
            self.seen_record = true;
            let value: Value = serde_json::from_str(line).map_err(|e| {
                // Count the broken record as a frame so numbering stays aligned.
                self.frames_read += 1;
                SourceError::Decode {
                    line: self.line_no,
                    message: e.to_string(),
                }
            })?;

            match value {
                Value::Object(map) if Self::is_header(&map, first) => {
                    self.absorb_header(map);
                }
                other => {
                    let frame = self.parse_frame(other);
                    self.frames_read += 1;
                    return frame.map(Some);
                }
            }
        }
    }
}

impl Drop for JsonLinesSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Landmarks below this visibility are treated as missing.
    pub min_confidence: f64,
    /// Keep every Nth frame read from the source.
    pub sample_rate: usize,
    /// Stop after reading this many frames.
    pub max_frames: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            sample_rate: 2,
            max_frames: 300,
        }
    }
}

/// One extraction session. Owns the source exclusively and releases it when
/// the session ends, on success and on every error path.
pub struct PoseExtractor<S: LandmarkSource> {
    source: S,
    config: ExtractorConfig,
    available: bool,
    closed: bool,
}

impl<S: LandmarkSource> PoseExtractor<S> {
    pub fn new(mut source: S, config: ExtractorConfig) -> Result<Self, SourceError> {
        let available = match source.open() {
            Ok(()) => true,
            Err(SourceError::Unavailable(reason)) => {
                log::warn!(
                    "[EXTRACT] Pose detector unavailable ({}), continuing without landmarks",
                    reason
                );
                false
            }
            Err(e) => {
                source.close();
                return Err(e);
            }
        };

        Ok(Self {
            source,
            config,
            available,
            closed: false,
        })
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn fps(&self) -> f64 {
        self.source.fps()
    }

    pub fn info(&self) -> HashMap<String, String> {
        self.source.info()
    }

    /// Pull frames until the stream ends, `max_frames` have been read, or
    /// `stop` is raised. Whatever was collected is returned in all three cases.
    pub fn extract(&mut self, stop: Option<&AtomicBool>) -> Result<Vec<FramePose>, SourceError> {
        if !self.available {
            return Ok(Vec::new());
        }

        let sample_rate = self.config.sample_rate.max(1);
        let mut poses = Vec::new();
        let mut frames_read = 0usize;

        while frames_read < self.config.max_frames {
            if stop.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                log::info!("[EXTRACT] Stop requested after {} frames", frames_read);
                break;
            }

            let frame = match self.source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) if e.is_recoverable() => {
                    log::warn!("[EXTRACT] Skipping frame: {}", e);
                    frames_read += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let index = frames_read;
            frames_read += 1;
            if index % sample_rate != 0 {
                continue;
            }

            poses.push(self.to_pose(frame));
        }

        let detected = poses.iter().filter(|p| p.detected).count();
        log::info!(
            "[EXTRACT] Read {} frames, kept {}, {} with detected poses",
            frames_read,
            poses.len(),
            detected
        );
        Ok(poses)
    }

    fn to_pose(&self, frame: SourceFrame) -> FramePose {
        let fps = self.source.fps();
        let fps = if fps > 0.0 { fps } else { 30.0 };
        let timestamp_ms = frame.frame_number as f64 / fps * 1000.0;

        if !frame.detected {
            return FramePose::undetected(frame.frame_number, timestamp_ms);
        }

        let min_confidence = self.config.min_confidence;
        let landmarks = frame
            .landmarks
            .into_iter()
            .filter(|(_, lm)| lm.visibility >= min_confidence)
            .collect();

        FramePose {
            frame_number: frame.frame_number,
            timestamp_ms,
            detected: true,
            landmarks,
        }
    }

    /// End the session now instead of at scope exit.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.source.close();
            self.closed = true;
        }
    }
}

impl<S: LandmarkSource> Drop for PoseExtractor<S> {
    fn drop(&mut self) {
        self.release();
    }
}
