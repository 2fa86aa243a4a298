use std::path::{Path, PathBuf};

use futures::{stream::BoxStream, StreamExt};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::{
    api::{ApiClient, ResolutionOption, VideoInfo},
    domain::{AppError, SessionToken},
    utils::sanitize_filename,
};

/// Decoded preview image, RGBA8.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Everything the selection UI needs after a successful search.
#[derive(Debug, Clone)]
pub struct MediaPreview {
    pub title: String,
    pub uploader: String,
    pub resolutions: Vec<ResolutionOption>,
    pub thumbnail: Option<Thumbnail>,
}

#[derive(Debug, Clone)]
pub enum RetrievalEvent {
    Progress { downloaded: u64, total: Option<u64> },
    Completed(PathBuf),
    Failed(AppError),
}

#[derive(Clone)]
pub struct DownloadCoordinator {
    api_client: ApiClient,
}

impl DownloadCoordinator {
    pub fn new(api_client: ApiClient) -> Self {
        Self { api_client }
    }

    #[cfg(test)]
    pub fn api_client(&self) -> &ApiClient {
        &self.api_client
    }

    pub async fn init_session(&self) -> Result<SessionToken, AppError> {
        self.api_client
            .get_session_token()
            .await
            .map_err(|e| AppError::Initialization(e.to_string()))
    }

    pub async fn search(
        &self,
        media_url: String,
        token: Option<SessionToken>,
    ) -> Result<MediaPreview, AppError> {
        let token = token.ok_or(AppError::NoSession)?;
        let media_url = media_url.trim();
        if media_url.is_empty() {
            return Err(AppError::EmptyUrl);
        }

        let info: VideoInfo = self
            .api_client
            .get_info(media_url, &token)
            .await
            .map_err(|e| AppError::Metadata(e.to_string()))?;

        let thumbnail = match info.thumbnail.as_deref().filter(|t| !t.is_empty()) {
            Some(url) => self.load_thumbnail(url).await,
            None => None,
        };

        Ok(MediaPreview {
            title: info.display_title().to_string(),
            uploader: info.display_uploader().to_string(),
            resolutions: info.resolution_options(),
            thumbnail,
        })
    }

    async fn load_thumbnail(&self, url: &str) -> Option<Thumbnail> {
        let bytes = match self.api_client.get_bytes(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Thumbnail fetch failed: {}", e);
                return None;
            }
        };

        match image::load_from_memory(&bytes) {
            Ok(img) => {
                let rgba = img.to_rgba8();
                let (width, height) = rgba.dimensions();
                Some(Thumbnail {
                    width,
                    height,
                    rgba: rgba.into_raw(),
                })
            }
            Err(e) => {
                tracing::warn!("Thumbnail decode failed: {}", e);
                None
            }
        }
    }

    pub async fn choose_save_path(&self, filename: String) -> Option<PathBuf> {
        let suggested = sanitize_filename(&filename);
        let suggested = suggested.trim_matches(|c| c == '.' || c == ' ');

        rfd::AsyncFileDialog::new()
            .set_file_name(suggested)
            .save_file()
            .await
            .map(|handle| handle.path().to_path_buf())
    }

    /// Stream the finished artifact at `url` into `path`.
    pub fn retrieve_stream(&self, url: Url, path: PathBuf) -> BoxStream<'static, RetrievalEvent> {
        futures::stream::unfold(
            RetrievalState::Start {
                client: self.api_client.clone(),
                url,
                path,
            },
            |state| async move {
                match state {
                    RetrievalState::Start { client, url, path } => {
                        let file = match tokio::fs::File::create(&path).await {
                            Ok(file) => file,
                            Err(e) => {
                                return Some((
                                    RetrievalEvent::Failed(AppError::Io(format!(
                                        "Failed to create file: {}",
                                        e
                                    ))),
                                    RetrievalState::Finished,
                                ));
                            }
                        };

                        match client.download_file_stream(&url).await {
                            Ok((total, stream)) => Some((
                                RetrievalEvent::Progress {
                                    downloaded: 0,
                                    total,
                                },
                                RetrievalState::Downloading {
                                    file,
                                    stream,
                                    downloaded: 0,
                                    total,
                                    path,
                                },
                            )),
                            Err(e) => {
                                tracing::warn!("Artifact request failed: {}", e);
                                drop(file);
                                Some((
                                    abandon(&path, AppError::Retrieval(e.to_string())).await,
                                    RetrievalState::Finished,
                                ))
                            }
                        }
                    }
                    RetrievalState::Downloading {
                        mut file,
                        mut stream,
                        mut downloaded,
                        total,
                        path,
                    } => match stream.next().await {
                        Some(Ok(chunk)) => {
                            if let Err(e) = file.write_all(&chunk).await {
                                drop(file);
                                let error = AppError::Io(format!("Write error: {}", e));
                                return Some((abandon(&path, error).await, RetrievalState::Finished));
                            }

                            downloaded += chunk.len() as u64;

                            Some((
                                RetrievalEvent::Progress { downloaded, total },
                                RetrievalState::Downloading {
                                    file,
                                    stream,
                                    downloaded,
                                    total,
                                    path,
                                },
                            ))
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Artifact stream broke off: {}", e);
                            drop(file);
                            Some((
                                abandon(&path, AppError::Retrieval(e.to_string())).await,
                                RetrievalState::Finished,
                            ))
                        }
                        None => {
                            if let Err(e) = file.sync_all().await {
                                return Some((
                                    RetrievalEvent::Failed(AppError::Io(format!(
                                        "Failed to sync file: {}",
                                        e
                                    ))),
                                    RetrievalState::Finished,
                                ));
                            }

                            tracing::info!("Saved {}", path.display());
                            Some((RetrievalEvent::Completed(path), RetrievalState::Finished))
                        }
                    },
                    RetrievalState::Finished => None,
                }
            },
        )
        .boxed()
    }
}

/// Remove a partially written artifact and report why.
async fn abandon(path: &Path, error: AppError) -> RetrievalEvent {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Could not remove {}: {}", path.display(), e);
    }
    RetrievalEvent::Failed(error)
}

enum RetrievalState {
    Start {
        client: ApiClient,
        url: Url,
        path: PathBuf,
    },
    Downloading {
        file: tokio::fs::File,
        stream: BoxStream<'static, crate::api::client::Result<bytes::Bytes>>,
        downloaded: u64,
        total: Option<u64>,
        path: PathBuf,
    },
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiConfig;

    fn coordinator_for(server: &mockito::ServerGuard) -> DownloadCoordinator {
        let base = server.url();
        let config = ApiConfig::new(&base, &format!("{}/ws", base.replace("http", "ws"))).unwrap();
        DownloadCoordinator::new(ApiClient::new(config))
    }

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn test_search_requires_token_and_url() {
        let server = mockito::Server::new_async().await;
        let coordinator = coordinator_for(&server);

        let err = coordinator
            .search("https://youtu.be/abc".into(), None)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::NoSession);

        let err = coordinator
            .search("   ".into(), Some(SessionToken::new("tok")))
            .await
            .unwrap_err();
        assert_eq!(err, AppError::EmptyUrl);
    }

    #[tokio::test]
    async fn test_search_builds_preview() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/info")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"{"title":"","uploader":"Chan","formats":[
                    {"ext":"mp4","height":480,"format_id":"135"},
                    {"ext":"mp4","height":1080,"format_id":"137","filesize":5242880}]}"#,
            )
            .create_async()
            .await;

        let preview = coordinator_for(&server)
            .search(" https://youtu.be/abc ".into(), Some(SessionToken::new("tok")))
            .await
            .unwrap();

        assert_eq!(preview.title, "Untitled");
        assert_eq!(preview.uploader, "Chan");
        assert!(preview.thumbnail.is_none());
        assert_eq!(preview.resolutions[0].label(), "1080p (5.0 MB)");
        assert_eq!(preview.resolutions[1].format_id, "135");
    }

    #[tokio::test]
    async fn test_search_failure_is_metadata_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/info")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body("Unsupported URL")
            .create_async()
            .await;

        let err = coordinator_for(&server)
            .search("https://example.com".into(), Some(SessionToken::new("tok")))
            .await
            .unwrap_err();

        match err {
            AppError::Metadata(message) => assert!(message.contains("Unsupported URL")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broken_thumbnail_is_not_fatal() {
        let mut server = mockito::Server::new_async().await;
        let thumb = format!("{}/thumb.jpg", server.url());
        server
            .mock("GET", "/info")
            .match_query(mockito::Matcher::Any)
            .with_body(format!(r#"{{"title":"Clip","thumbnail":"{}"}}"#, thumb))
            .create_async()
            .await;
        server
            .mock("GET", "/thumb.jpg")
            .with_body("not an image")
            .create_async()
            .await;

        let preview = coordinator_for(&server)
            .search("https://youtu.be/abc".into(), Some(SessionToken::new("tok")))
            .await
            .unwrap();
        assert_eq!(preview.title, "Clip");
        assert!(preview.thumbnail.is_none());
    }

    #[tokio::test]
    async fn test_retrieve_stream_writes_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/download/clip.mp3")
            .match_query(mockito::Matcher::Any)
            .with_body(vec![1u8; 2048])
            .create_async()
            .await;

        let coordinator = coordinator_for(&server);
        let url = coordinator
            .api_client()
            .config()
            .artifact_url("clip.mp3", &SessionToken::new("tok"));
        let path = scratch_path("clip.mp3");

        let events: Vec<RetrievalEvent> =
            coordinator.retrieve_stream(url, path.clone()).collect().await;

        match events.last() {
            Some(RetrievalEvent::Completed(saved)) => assert_eq!(saved, &path),
            other => panic!("unexpected final event {:?}", other),
        }
        assert_eq!(tokio::fs::read(&path).await.unwrap().len(), 2048);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_retrieve_stream_reports_http_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/download/gone.mp4")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .with_body("File not found")
            .create_async()
            .await;

        let coordinator = coordinator_for(&server);
        let url = coordinator
            .api_client()
            .config()
            .artifact_url("gone.mp4", &SessionToken::new("tok"));
        let path = scratch_path("gone.mp4");

        let events: Vec<RetrievalEvent> = coordinator.retrieve_stream(url, path.clone()).collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], RetrievalEvent::Failed(AppError::Retrieval(m)) if m.contains("File not found")));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_abandon_removes_partial_file() {
        let path = scratch_path("partial.mp4");
        tokio::fs::write(&path, b"half an artifact").await.unwrap();

        let event = abandon(&path, AppError::Retrieval("connection reset".into())).await;

        assert!(matches!(event, RetrievalEvent::Failed(AppError::Retrieval(m)) if m == "connection reset"));
        assert!(!path.exists());
    }
}
