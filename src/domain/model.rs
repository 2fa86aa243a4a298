use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque credential issued by the token endpoint.
#[derive(Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mp3,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 2] = [OutputFormat::Mp4, OutputFormat::Mp3];

    pub fn label(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "MP4",
            OutputFormat::Mp3 => "MP3",
        }
    }

    /// Whether a specific resolution can be picked for this format.
    pub fn has_resolutions(self) -> bool {
        matches!(self, OutputFormat::Mp4)
    }
}

/// The single outbound message of a streaming connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRequest {
    pub url: String,
    pub format: OutputFormat,
    pub format_id: Option<String>,
}

impl JobRequest {
    /// Audio-only jobs never carry a format identifier.
    pub fn new(url: &str, format: OutputFormat, format_id: Option<String>) -> Self {
        let format_id = if format.has_resolutions() {
            format_id
        } else {
            None
        };

        Self {
            url: url.trim().to_string(),
            format,
            format_id,
        }
    }

    pub fn to_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Downloading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressUpdate {
    pub percent: f64,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub eta: Option<f64>,
}

/// Inbound message on the streaming channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StatusEvent {
    Progress(ProgressUpdate),
    Ready { filename: String },
    Error { message: String },
}

/// Last known progress figures, as displayed.
///
/// `percent` always follows the latest event. The optional figures keep
/// their previous value when an event omits them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressView {
    pub percent: f64,
    pub size: Option<f64>,
    pub speed: Option<f64>,
    pub eta_seconds: Option<f64>,
}

impl ProgressView {
    pub fn apply(&mut self, update: &ProgressUpdate) {
        self.percent = update.percent;
        if update.size.is_some() {
            self.size = update.size;
        }
        if update.speed.is_some() {
            self.speed = update.speed;
        }
        if update.eta.is_some() {
            self.eta_seconds = update.eta;
        }
    }

    fn clamped(&self) -> f64 {
        if self.percent.is_nan() {
            0.0
        } else {
            self.percent.clamp(0.0, 100.0)
        }
    }

    /// Progress bar fill in `0.0..=1.0`.
    pub fn fraction(&self) -> f32 {
        (self.clamped() / 100.0) as f32
    }

    pub fn percent_label(&self) -> String {
        format!("{}%", self.clamped().round() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_request_message_shape() {
        let job = JobRequest::new(" https://a.example/v ", OutputFormat::Mp4, Some("137".into()));
        let value: serde_json::Value = serde_json::from_str(&job.to_message().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"url": "https://a.example/v", "format": "mp4", "format_id": "137"})
        );
    }

    #[test]
    fn test_audio_job_drops_format_id() {
        let job = JobRequest::new("https://a.example/v", OutputFormat::Mp3, Some("137".into()));
        assert_eq!(job.format_id, None);
        assert!(job.to_message().unwrap().contains("\"format_id\":null"));
    }

    #[test]
    fn test_status_event_parsing() {
        let progress: StatusEvent =
            serde_json::from_str(r#"{"type":"progress","percent":12.5,"speed":1024}"#).unwrap();
        assert_eq!(
            progress,
            StatusEvent::Progress(ProgressUpdate {
                percent: 12.5,
                size: None,
                speed: Some(1024.0),
                eta: None,
            })
        );

        let ready: StatusEvent =
            serde_json::from_str(r#"{"type":"ready","filename":"a b.mp4"}"#).unwrap();
        assert_eq!(ready, StatusEvent::Ready { filename: "a b.mp4".into() });

        let error: StatusEvent =
            serde_json::from_str(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert_eq!(error, StatusEvent::Error { message: "boom".into() });

        assert!(serde_json::from_str::<StatusEvent>(r#"{"type":"progress"}"#).is_err());
        assert!(serde_json::from_str::<StatusEvent>(r#"{"type":"queued"}"#).is_err());
    }

    #[test]
    fn test_progress_view_keeps_last_known_figures() {
        let mut view = ProgressView::default();
        view.apply(&ProgressUpdate {
            percent: 10.0,
            size: Some(2048.0),
            speed: Some(512.0),
            eta: Some(30.0),
        });
        view.apply(&ProgressUpdate {
            percent: 57.4,
            ..Default::default()
        });

        assert_eq!(view.percent_label(), "57%");
        assert_eq!(view.size, Some(2048.0));
        assert_eq!(view.speed, Some(512.0));
        assert_eq!(view.eta_seconds, Some(30.0));
    }

    #[test]
    fn test_percent_is_clamped_for_display() {
        let mut view = ProgressView::default();
        view.apply(&ProgressUpdate { percent: 140.0, ..Default::default() });
        assert_eq!(view.percent_label(), "100%");
        assert_eq!(view.fraction(), 1.0);

        view.apply(&ProgressUpdate { percent: -3.0, ..Default::default() });
        assert_eq!(view.percent_label(), "0%");
        assert_eq!(view.percent, -3.0);
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = SessionToken::new("secret");
        assert!(!format!("{:?}", token).contains("secret"));
    }
}
