use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::SessionToken;

pub const DEFAULT_API_URL: &str = "https://simpledownloader.giize.com/api";
pub const DEFAULT_WS_URL: &str = "wss://simpledownloader.giize.com/api/ws/download";

pub const API_URL_ENV: &str = "DOWNLOADER_API_URL";
pub const WS_URL_ENV: &str = "DOWNLOADER_WS_URL";

/// Response from the /get-session-token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token: SessionToken,
}

/// Response from the /info endpoint
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<VideoFormat>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VideoFormat {
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub height: Option<u32>,
    pub format_id: String,
    #[serde(default)]
    pub filesize: Option<f64>,
}

/// A selectable video resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOption {
    pub format_id: String,
    pub height: u32,
    pub filesize: Option<f64>,
}

impl ResolutionOption {
    pub fn label(&self) -> String {
        match self.filesize.filter(|size| *size > 0.0) {
            Some(size) => format!("{}p ({:.1} MB)", self.height, size / 1024.0 / 1024.0),
            None => format!("{}p", self.height),
        }
    }
}

impl VideoInfo {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().filter(|t| !t.is_empty()).unwrap_or("Untitled")
    }

    pub fn display_uploader(&self) -> &str {
        self.uploader.as_deref().filter(|u| !u.is_empty()).unwrap_or("Unknown")
    }

    /// MP4 formats with a known height, tallest first.
    pub fn resolution_options(&self) -> Vec<ResolutionOption> {
        let mut options: Vec<ResolutionOption> = self
            .formats
            .iter()
            .filter(|f| f.ext == "mp4")
            .filter_map(|f| {
                let height = f.height.filter(|h| *h > 0)?;
                Some(ResolutionOption {
                    format_id: f.format_id.clone(),
                    height,
                    filesize: f.filesize,
                })
            })
            .collect();

        options.sort_by(|a, b| b.height.cmp(&a.height));
        options
    }
}

/// Endpoints of the remote download service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub api_url: Url,
    pub ws_url: Url,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            ws_url: Url::parse(DEFAULT_WS_URL).expect("default WebSocket URL is valid"),
        }
    }
}

impl ApiConfig {
    pub fn new(api_url: &str, ws_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            api_url: Url::parse(api_url)?,
            ws_url: Url::parse(ws_url)?,
        })
    }

    /// Defaults, overridden by `DOWNLOADER_API_URL` / `DOWNLOADER_WS_URL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = url_from_env(API_URL_ENV) {
            config.api_url = url;
        }
        if let Some(url) = url_from_env(WS_URL_ENV) {
            config.ws_url = url;
        }

        config
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn token_url(&self) -> Url {
        self.endpoint(&["get-session-token"])
    }

    pub fn info_url(&self, media_url: &str, token: &SessionToken) -> Url {
        let mut url = self.endpoint(&["info"]);
        url.query_pairs_mut()
            .append_pair("url", media_url)
            .append_pair("token", token.as_str());
        url
    }

    pub fn stream_url(&self, token: &SessionToken) -> Url {
        let mut url = self.ws_url.clone();
        url.query_pairs_mut().append_pair("token", token.as_str());
        url
    }

    pub fn artifact_url(&self, filename: &str, token: &SessionToken) -> Url {
        let mut url = self.endpoint(&["download", filename]);
        url.query_pairs_mut().append_pair("token", token.as_str());
        url
    }
}

fn url_from_env(key: &str) -> Option<Url> {
    let value = std::env::var(key).ok()?;
    match Url::parse(value.trim()) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!("Ignoring {}={:?}: {}", key, value, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(ext: &str, height: Option<u32>, id: &str, size: Option<f64>) -> VideoFormat {
        VideoFormat {
            ext: ext.to_string(),
            height,
            format_id: id.to_string(),
            filesize: size,
        }
    }

    #[test]
    fn test_resolution_options_filter_and_sort() {
        let info = VideoInfo {
            formats: vec![
                format("mp4", Some(360), "18", None),
                format("webm", Some(1080), "248", None),
                format("mp4", None, "140", None),
                format("mp4", Some(1080), "137", Some(10.0 * 1024.0 * 1024.0)),
                format("mp4", Some(720), "22", Some(0.0)),
            ],
            ..Default::default()
        };

        let options = info.resolution_options();
        let labels: Vec<String> = options.iter().map(ResolutionOption::label).collect();
        assert_eq!(labels, vec!["1080p (10.0 MB)", "720p", "360p"]);
        assert_eq!(options[0].format_id, "137");
    }

    #[test]
    fn test_info_defaults() {
        let info: VideoInfo = serde_json::from_str(r#"{"title":null}"#).unwrap();
        assert_eq!(info.display_title(), "Untitled");
        assert_eq!(info.display_uploader(), "Unknown");
        assert!(info.formats.is_empty());
    }

    #[test]
    fn test_endpoint_urls() {
        let config = ApiConfig::default();
        let token = SessionToken::new("t0k");

        assert_eq!(
            config.token_url().as_str(),
            "https://simpledownloader.giize.com/api/get-session-token"
        );
        assert_eq!(
            config.stream_url(&token).as_str(),
            "wss://simpledownloader.giize.com/api/ws/download?token=t0k"
        );
        assert_eq!(
            config.artifact_url("my clip?.mp4", &token).as_str(),
            "https://simpledownloader.giize.com/api/download/my%20clip%3F.mp4?token=t0k"
        );

        let info = config.info_url("https://youtu.be/x?t=1&a=b", &token);
        let pairs: Vec<(String, String)> = info.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("url".to_string(), "https://youtu.be/x?t=1&a=b".to_string()),
                ("token".to_string(), "t0k".to_string()),
            ]
        );
    }

    #[test]
    fn test_endpoint_with_trailing_slash() {
        let config = ApiConfig::new("http://127.0.0.1:9000/", "ws://127.0.0.1:9000/ws").unwrap();
        assert_eq!(config.token_url().as_str(), "http://127.0.0.1:9000/get-session-token");
    }
}
