use std::path::PathBuf;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::{Stream, StreamExt};
use iced::{Subscription, Task};
use url::Url;

use crate::api::{ApiClient, ApiConfig};
use crate::application::{
    DownloadCoordinator, MediaPreview, RetrievalEvent, SessionDriver, SessionNotice,
    SessionRequest, SessionUpdate,
};
use crate::config::{SessionConfig, ERROR_DISPLAY};
use crate::domain::{AppError, JobRequest, SessionToken};
use crate::ui::{DownloadView, UiMessage};
use crate::utils::format_bytes;

pub struct DownloadApp {
    view: DownloadView,
    coordinator: DownloadCoordinator,
    token: Option<SessionToken>,
    worker: Option<SessionHandle>,
    // Id of the latest session started; updates from older ones are dropped
    session_seq: u64,
    // Bumped per shown error so a stale dismiss timer cannot hide a newer one
    error_seq: u64,
}

/// Request side of the long-lived session worker.
#[derive(Debug, Clone)]
pub struct SessionHandle(UnboundedSender<SessionRequest>);

impl SessionHandle {
    fn send(&self, request: SessionRequest) {
        if self.0.unbounded_send(request).is_err() {
            tracing::error!("Session worker is gone");
        }
    }
}

impl DownloadApp {
    pub fn new() -> (Self, Task<Message>) {
        let api_client = ApiClient::new(ApiConfig::from_env());
        let coordinator = DownloadCoordinator::new(api_client);

        let app = Self {
            view: DownloadView::default(),
            coordinator: coordinator.clone(),
            token: None,
            worker: None,
            session_seq: 0,
            error_seq: 0,
        };

        // Token bootstrap gates both search and download
        let init = Task::perform(
            async move { coordinator.init_session().await },
            Message::TokenReceived,
        );

        (app, init)
    }

    fn show_error(&mut self, error: AppError) -> Task<Message> {
        tracing::warn!("{}", error);
        self.error_seq += 1;
        self.view.error = Some(error.to_string());

        let seq = self.error_seq;
        Task::perform(tokio::time::sleep(ERROR_DISPLAY), move |_| {
            Message::DismissError(seq)
        })
    }

    fn start_download(&mut self) -> Task<Message> {
        if self.view.locked || self.view.preview.is_none() {
            return Task::none();
        }
        let Some(token) = self.token.clone() else {
            return Task::none();
        };
        let Some(worker) = &self.worker else {
            tracing::warn!("Session worker not ready yet");
            return Task::none();
        };

        self.session_seq += 1;
        let job = JobRequest::new(&self.view.media_url, self.view.format, self.view.format_id());
        worker.send(SessionRequest::Start {
            session: self.session_seq,
            token,
            job,
        });

        self.view.locked = true;
        self.view.save_status = None;
        Task::none()
    }

    fn on_session_update(&mut self, notice: SessionNotice) -> Task<Message> {
        // Leftovers from a cancelled session
        if !self.view.locked || notice.session != self.session_seq {
            return Task::none();
        }

        match notice.update {
            SessionUpdate::Connecting { attempt, max } => {
                self.view.show_download_progress(true);
                self.view.status_text = format!("Connecting... ({}/{})", attempt, max);
            }
            SessionUpdate::Downloading => {
                self.view.show_download_progress(true);
                self.view.status_text = "Downloading...".to_string();
            }
            SessionUpdate::Progress(progress) => {
                self.view.progress = progress;
            }
            SessionUpdate::Ready { .. } => {
                self.view.status_text = "Starting file download...".to_string();
            }
            SessionUpdate::Retrieve { filename, url } => {
                let coordinator = self.coordinator.clone();
                return Task::perform(
                    async move { coordinator.choose_save_path(filename).await },
                    move |path| Message::SavePathSelected(path, url.clone()),
                );
            }
            SessionUpdate::Countdown(remaining) => {
                self.view.status_text =
                    format!("File sent to downloads! Resetting in {}s", remaining);
            }
            SessionUpdate::Error(message) => {
                self.view.show_download_progress(false);
                return self.show_error(AppError::Server(message));
            }
            SessionUpdate::ConnectionExhausted => {
                self.view.show_download_progress(false);
                return self.show_error(AppError::ConnectionExhausted);
            }
            SessionUpdate::Released => {
                self.view.locked = false;
                self.view.show_download_progress(false);
            }
        }
        Task::none()
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    UiMessage(UiMessage),
    TokenReceived(Result<SessionToken, AppError>),
    SearchCompleted(Result<MediaPreview, AppError>),
    /// The session worker is up and accepts requests
    WorkerReady(SessionHandle),
    Session(SessionNotice),
    /// (Selected path, artifact URL)
    SavePathSelected(Option<PathBuf>, Url),
    Retrieval(RetrievalEvent),
    DismissError(u64),
}

pub fn update(app: &mut DownloadApp, message: Message) -> Task<Message> {
    match message {
        Message::UiMessage(ui_msg) => {
            app.view.update(ui_msg.clone());

            match ui_msg {
                UiMessage::SearchPressed if !app.view.locked => {
                    if app.token.is_none() {
                        return app.show_error(AppError::NoSession);
                    }
                    if app.view.media_url.trim().is_empty() {
                        return app.show_error(AppError::EmptyUrl);
                    }

                    app.view.begin_search();
                    let coordinator = app.coordinator.clone();
                    let url = app.view.media_url.clone();
                    let token = app.token.clone();
                    return Task::perform(
                        async move { coordinator.search(url, token).await },
                        Message::SearchCompleted,
                    );
                }
                UiMessage::DownloadPressed => return app.start_download(),
                UiMessage::CancelPressed if app.view.locked => {
                    if let Some(worker) = &app.worker {
                        worker.send(SessionRequest::Cancel);
                    }
                    app.view.locked = false;
                    app.view.show_download_progress(false);
                }
                _ => {}
            }
        }
        Message::TokenReceived(result) => match result {
            Ok(token) => {
                tracing::info!("Session initialized");
                app.token = Some(token);
                app.view.session_ready = true;
            }
            Err(e) => return app.show_error(e),
        },
        Message::SearchCompleted(result) => {
            app.view.searching = false;
            match result {
                Ok(preview) => app.view.set_preview(preview),
                Err(e) => return app.show_error(e),
            }
        }
        Message::WorkerReady(handle) => {
            app.worker = Some(handle);
        }
        Message::Session(update) => return app.on_session_update(update),
        Message::SavePathSelected(path_opt, url) => match path_opt {
            Some(path) => {
                app.view.save_status = Some(format!("Saving to: {}", path.display()));
                return Task::stream(
                    app.coordinator
                        .retrieve_stream(url, path)
                        .map(Message::Retrieval),
                );
            }
            None => {
                // User cancelled dialog
                app.view.save_status = Some("Save cancelled".to_string());
            }
        },
        Message::Retrieval(event) => match event {
            RetrievalEvent::Progress { downloaded, total } => {
                let done = format_bytes(downloaded as f64);
                app.view.save_status = Some(match total {
                    Some(total) => format!("Saving: {} / {}", done, format_bytes(total as f64)),
                    None => format!("Saving: {}", done),
                });
            }
            RetrievalEvent::Completed(path) => {
                app.view.save_status = Some(format!("Saved: {}", path.display()));
            }
            RetrievalEvent::Failed(e) => {
                app.view.save_status = None;
                return app.show_error(e);
            }
        },
        Message::DismissError(seq) => {
            if seq == app.error_seq {
                app.view.error = None;
            }
        }
    }
    Task::none()
}

pub fn view(app: &DownloadApp) -> iced::Element<'_, Message> {
    app.view.view().map(Message::UiMessage)
}

pub fn subscription(_app: &DownloadApp) -> Subscription<Message> {
    Subscription::run(session_worker)
}

/// One driver for the whole run; the first item hands out its request side.
fn session_worker() -> impl Stream<Item = Message> {
    let (request_tx, request_rx) = mpsc::unbounded();
    let (update_tx, update_rx) = mpsc::unbounded();

    let driver = SessionDriver::new(ApiConfig::from_env(), SessionConfig::default(), update_tx);
    let worker = futures::stream::once(driver.run(request_rx)).filter_map(|()| async { None::<Message> });

    futures::stream::once(async move { Message::WorkerReady(SessionHandle(request_tx)) }).chain(
        futures::stream::select(update_rx.map(Message::Session), worker),
    )
}
