use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;

use crate::analysis::{AnalysisConfig, AnalysisReport};
use crate::error::ServiceError;

/// Client for a remote throw analysis service.
///
/// The service takes a video upload plus the analysis parameters and answers
/// with an `AnalysisReport`. Internal failures still come back as a report
/// (with `error` set); only a malformed request is refused outright.
pub struct AnalysisServiceClient {
    base_url: String,
    timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl AnalysisServiceClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self::from_url(&format!("http://{}:{}", host, port))
    }

    pub fn from_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: 120,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn health(&self) -> Result<HealthStatus, ServiceError> {
        let url = self.endpoint("health");
        log::debug!("[SERVICE] GET {}", url);

        let client = reqwest::Client::new();
        let response = timeout(Duration::from_secs(5), client.get(&url).send())
            .await
            .map_err(|_| ServiceError::Timeout(5))??;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ServiceError::Status { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Upload a throw video for analysis.
    pub async fn analyze_pose(
        &self,
        video_path: &Path,
        config: &AnalysisConfig,
    ) -> Result<AnalysisReport, ServiceError> {
        let url = self.endpoint("analyze-pose");
        let bytes = tokio::fs::read(video_path).await?;
        let file_name = video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "throw.mp4".to_string());

        log::info!(
            "[SERVICE] Uploading {} ({} bytes) to {}",
            file_name,
            bytes.len(),
            url
        );

        let video = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("video/mp4")?;
        let form = Form::new()
            .part("video", video)
            .text("min_confidence", config.min_confidence.to_string())
            .text("handedness", config.handedness.as_str())
            .text("skill_level", config.skill_level.as_str());

        let client = reqwest::Client::new();
        let response = timeout(
            Duration::from_secs(self.timeout_secs),
            client.post(&url).multipart(form).send(),
        )
        .await
        .map_err(|_| ServiceError::Timeout(self.timeout_secs))??;

        let status = response.status().as_u16();
        let body = response.text().await?;
        let report = decode_response(status, &body)?;

        if let Some(error) = &report.error {
            log::warn!("[SERVICE] Analysis degraded: {}", error);
        } else {
            log::info!(
                "[SERVICE] Analysis received (score {}, {} ms)",
                report.feedback.overall_score,
                report.processing_time_ms
            );
        }
        Ok(report)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Map an HTTP status and body onto a report or a service error. Degraded
/// reports are decoded whatever their status.
pub fn decode_response(status: u16, body: &str) -> Result<AnalysisReport, ServiceError> {
    if status == 400 {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| body.to_string());
        return Err(ServiceError::Malformed(message));
    }

    match serde_json::from_str::<AnalysisReport>(body) {
        Ok(report) => Ok(report),
        Err(_) if !(200..300).contains(&status) => Err(ServiceError::Status {
            status,
            body: body.to_string(),
        }),
        Err(e) => Err(ServiceError::Decode(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::FlightPath;

    #[test]
    fn test_endpoint_join() {
        let client = AnalysisServiceClient::from_url("http://localhost:5001/");
        assert_eq!(client.endpoint("/analyze-pose"), "http://localhost:5001/analyze-pose");
        let client = AnalysisServiceClient::new("10.0.0.2", 8080);
        assert_eq!(client.endpoint("health"), "http://10.0.0.2:8080/health");
    }

    #[test]
    fn test_bad_request_is_malformed() {
        let result = decode_response(400, r#"{"error": "No video file provided"}"#);
        match result {
            Err(ServiceError::Malformed(message)) => assert_eq!(message, "No video file provided"),
            other => panic!("unexpected {:?}", other.map(|r| r.error)),
        }
    }

    #[test]
    fn test_degraded_500_still_decodes() {
        let body = serde_json::to_string(&AnalysisReport::failed("decoder crashed", 40)).unwrap();
        let report = decode_response(500, &body).unwrap();
        assert!(report.is_error());
        assert_eq!(report.trajectory.flight_path, FlightPath::Error);
    }

    #[test]
    fn test_opaque_failure_keeps_status() {
        assert!(matches!(
            decode_response(502, "Bad Gateway"),
            Err(ServiceError::Status { status: 502, .. })
        ));
        assert!(matches!(decode_response(200, "not json"), Err(ServiceError::Decode(_))));
    }
}
