use iced::{
    widget::{button, column, container, image, progress_bar, row, text, text_input, Row, Space},
    Alignment, Element, Length,
};

use crate::api::ResolutionOption;
use crate::application::MediaPreview;
use crate::domain::{OutputFormat, ProgressView};
use crate::utils::{format_bytes, format_eta, format_speed};

const DEFAULT_STATUS: &str = "Downloading...";

/// Search result as shown in the preview panel
pub struct PreviewState {
    pub title: String,
    pub uploader: String,
    pub thumbnail: Option<image::Handle>,
    pub resolutions: Vec<ResolutionOption>,
}

impl From<MediaPreview> for PreviewState {
    fn from(preview: MediaPreview) -> Self {
        Self {
            title: preview.title,
            uploader: preview.uploader,
            thumbnail: preview
                .thumbnail
                .map(|t| image::Handle::from_rgba(t.width, t.height, t.rgba)),
            resolutions: preview.resolutions,
        }
    }
}

/// Main view state
pub struct DownloadView {
    pub media_url: String,
    pub searching: bool,
    pub preview: Option<PreviewState>,
    pub format: OutputFormat,
    pub selected_resolution: Option<String>,
    /// A session token has been obtained; search stays disabled until then.
    pub session_ready: bool,
    /// Inputs are frozen while a download session is active.
    pub locked: bool,
    pub progress_visible: bool,
    pub progress: ProgressView,
    pub status_text: String,
    pub save_status: Option<String>,
    pub error: Option<String>,
}

impl Default for DownloadView {
    fn default() -> Self {
        Self {
            media_url: String::new(),
            searching: false,
            preview: None,
            format: OutputFormat::Mp4,
            selected_resolution: None,
            session_ready: false,
            locked: false,
            progress_visible: false,
            progress: ProgressView::default(),
            status_text: DEFAULT_STATUS.to_string(),
            save_status: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum UiMessage {
    UrlChanged(String),
    SearchPressed,
    FormatSelected(OutputFormat),
    ResolutionSelected(String),
    DownloadPressed,
    CancelPressed,
}

impl DownloadView {
    pub fn update(&mut self, message: UiMessage) {
        if self.locked && !matches!(message, UiMessage::CancelPressed) {
            return;
        }

        match message {
            UiMessage::UrlChanged(url) => {
                self.media_url = url;
            }
            UiMessage::FormatSelected(format) => {
                self.format = format;
            }
            UiMessage::ResolutionSelected(format_id) => {
                self.selected_resolution = Some(format_id);
            }
            UiMessage::SearchPressed | UiMessage::DownloadPressed | UiMessage::CancelPressed => {
                // Will be handled by the app
            }
        }
    }

    pub fn begin_search(&mut self) {
        self.searching = true;
        self.error = None;
        self.preview = None;
    }

    pub fn set_preview(&mut self, preview: MediaPreview) {
        let preview = PreviewState::from(preview);
        self.format = OutputFormat::Mp4;
        self.selected_resolution = preview.resolutions.first().map(|r| r.format_id.clone());
        self.preview = Some(preview);
    }

    /// Format identifier to send with the job, if any.
    pub fn format_id(&self) -> Option<String> {
        if self.format.has_resolutions() {
            self.selected_resolution.clone()
        } else {
            None
        }
    }

    pub fn can_search(&self) -> bool {
        self.session_ready && !self.locked && !self.searching
    }

    pub fn can_download(&self) -> bool {
        self.preview.is_some() && !self.locked && !self.searching
    }

    pub fn show_download_progress(&mut self, show: bool) {
        self.progress_visible = show;
        if !show {
            self.progress = ProgressView::default();
            self.status_text = DEFAULT_STATUS.to_string();
        }
    }

    pub fn view(&self) -> Element<'_, UiMessage> {
        let unlocked = !self.locked;

        let search_row = row![
            text_input("Paste a video link...", &self.media_url)
                .on_input_maybe(unlocked.then_some(UiMessage::UrlChanged))
                .on_submit_maybe(self.can_search().then_some(UiMessage::SearchPressed))
                .padding(10),
            button("Search")
                .on_press_maybe(self.can_search().then_some(UiMessage::SearchPressed))
                .padding([10, 20]),
        ]
        .spacing(10);

        let mut content = column![
            text("Media Downloader").size(32),
            Space::new().height(Length::Fixed(10.0)),
            search_row,
        ]
        .padding(20)
        .spacing(10);

        if self.searching {
            content = content.push(text("Loading...").size(14));
        }

        if let Some(preview) = &self.preview {
            content = content.push(self.preview_view(preview));
        }

        content = content.push(
            button("Download")
                .on_press_maybe(self.can_download().then_some(UiMessage::DownloadPressed))
                .padding([10, 20]),
        );

        if self.progress_visible {
            content = content.push(self.progress_view());
        }

        if let Some(status) = &self.save_status {
            content = content.push(text(status).size(14));
        }

        if let Some(error) = &self.error {
            content = content.push(text(error).size(14).style(text::danger));
        }

        container(content).width(Length::Fill).into()
    }

    fn preview_view<'a>(&'a self, preview: &'a PreviewState) -> Element<'a, UiMessage> {
        let unlocked = !self.locked;

        let mut details = column![
            text(&preview.title).size(20),
            text(&preview.uploader).size(14),
        ]
        .spacing(4);

        let format_buttons = OutputFormat::ALL.iter().map(|format| {
            let style = if *format == self.format {
                button::primary
            } else {
                button::secondary
            };
            button(format.label())
                .style(style)
                .on_press_maybe(unlocked.then_some(UiMessage::FormatSelected(*format)))
                .into()
        });
        details = details.push(Row::with_children(format_buttons).spacing(8));

        if self.format.has_resolutions() && !preview.resolutions.is_empty() {
            let resolution_buttons = preview.resolutions.iter().map(|option| {
                let selected = self.selected_resolution.as_deref() == Some(option.format_id.as_str());
                let style = if selected {
                    button::primary
                } else {
                    button::secondary
                };
                button(text(option.label()))
                    .style(style)
                    .on_press_maybe(
                        unlocked.then(|| UiMessage::ResolutionSelected(option.format_id.clone())),
                    )
                    .into()
            });
            details = details.push(Row::with_children(resolution_buttons).spacing(8).wrap());
        }

        let mut panel = row![].spacing(16).align_y(Alignment::Start);
        if let Some(handle) = &preview.thumbnail {
            panel = panel.push(image(handle.clone()).width(Length::Fixed(200.0)));
        }
        panel.push(details).into()
    }

    fn progress_view(&self) -> Element<'_, UiMessage> {
        let mut figures = Vec::new();
        if let Some(size) = self.progress.size {
            figures.push(format_bytes(size));
        }
        if let Some(speed) = self.progress.speed {
            figures.push(format_speed(speed));
        }
        if let Some(eta) = self.progress.eta_seconds {
            figures.push(format!("ETA {}", format_eta(eta)));
        }

        column![
            row![
                text(&self.status_text).size(14).width(Length::Fill),
                text(self.progress.percent_label()).size(14),
            ],
            progress_bar(0.0..=1.0, self.progress.fraction()),
            row![
                text(figures.join("  ·  ")).size(12).width(Length::Fill),
                button("Cancel")
                    .on_press_maybe(self.locked.then_some(UiMessage::CancelPressed))
                    .style(button::danger),
            ]
            .align_y(Alignment::Center),
        ]
        .spacing(6)
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ProgressUpdate;

    fn preview() -> MediaPreview {
        MediaPreview {
            title: "Clip".into(),
            uploader: "Chan".into(),
            resolutions: vec![
                ResolutionOption {
                    format_id: "137".into(),
                    height: 1080,
                    filesize: None,
                },
                ResolutionOption {
                    format_id: "22".into(),
                    height: 720,
                    filesize: None,
                },
            ],
            thumbnail: None,
        }
    }

    #[test]
    fn test_preview_preselects_tallest_resolution() {
        let mut view = DownloadView::default();
        view.format = OutputFormat::Mp3;
        view.set_preview(preview());

        assert_eq!(view.format, OutputFormat::Mp4);
        assert_eq!(view.format_id(), Some("137".to_string()));
        assert!(view.can_download());
    }

    #[test]
    fn test_audio_format_sends_no_format_id() {
        let mut view = DownloadView::default();
        view.set_preview(preview());
        view.update(UiMessage::ResolutionSelected("22".into()));
        assert_eq!(view.format_id(), Some("22".to_string()));

        view.update(UiMessage::FormatSelected(OutputFormat::Mp3));
        assert_eq!(view.format_id(), None);
    }

    #[test]
    fn test_locked_view_ignores_edits() {
        let mut view = DownloadView::default();
        view.set_preview(preview());
        view.locked = true;

        view.update(UiMessage::UrlChanged("https://other".into()));
        view.update(UiMessage::FormatSelected(OutputFormat::Mp3));

        assert!(view.media_url.is_empty());
        assert_eq!(view.format, OutputFormat::Mp4);
        assert!(!view.can_download());
    }

    #[test]
    fn test_search_waits_for_session_token() {
        let mut view = DownloadView::default();
        assert!(!view.can_search());

        view.session_ready = true;
        assert!(view.can_search());

        view.locked = true;
        assert!(!view.can_search());
    }

    #[test]
    fn test_hiding_progress_resets_it() {
        let mut view = DownloadView::default();
        view.show_download_progress(true);
        view.progress.apply(&ProgressUpdate {
            percent: 80.0,
            ..Default::default()
        });
        view.status_text = "Connecting... (2/3)".into();

        view.show_download_progress(false);

        assert_eq!(view.progress.percent_label(), "0%");
        assert_eq!(view.status_text, DEFAULT_STATUS);
    }
}
