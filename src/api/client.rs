use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use thiserror::Error;
use url::Url;

use super::models::{ApiConfig, TokenResponse, VideoInfo};
use crate::domain::SessionToken;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    /// Non-success status; the body text is what the server had to say.
    #[error("{body} (HTTP {status})")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct ApiClient {
    config: ApiConfig,
    http: Client,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn checked(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status { status, body })
    }

    /// Fetch a fresh session token
    pub async fn get_session_token(&self) -> Result<SessionToken> {
        let response = self.http.get(self.config.token_url()).send().await?;
        let response = Self::checked(response).await?;

        let json: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("JSON decode error: {}", e)))?;

        Ok(json.token)
    }

    /// Fetch title, thumbnail and available formats for a media URL
    pub async fn get_info(&self, media_url: &str, token: &SessionToken) -> Result<VideoInfo> {
        let url = self.config.info_url(media_url, token);
        let response = Self::checked(self.http.get(url).send().await?).await?;

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("JSON decode error: {}", e)))
    }

    pub async fn get_bytes(&self, url: &str) -> Result<bytes::Bytes> {
        let response = Self::checked(self.http.get(url).send().await?).await?;
        Ok(response.bytes().await?)
    }

    /// Stream a finished artifact.
    /// Returns (total_size, stream)
    pub async fn download_file_stream(
        &self,
        url: &Url,
    ) -> Result<(Option<u64>, BoxStream<'static, Result<bytes::Bytes>>)> {
        let response = Self::checked(self.http.get(url.clone()).send().await?).await?;

        let total_size = response.content_length();
        let stream = response
            .bytes_stream()
            .map_err(ApiError::RequestError)
            .boxed();

        Ok((total_size, stream))
    }
}
