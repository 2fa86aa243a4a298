mod api;
mod app;
mod application;
mod config;
mod domain;
mod ui;
mod utils;

fn main() -> iced::Result {
    tracing_subscriber::fmt::init();

    iced::application(app::DownloadApp::new, app::update, app::view)
        .title("Simple Media Downloader")
        .subscription(app::subscription)
        .window_size((560.0, 720.0))
        .run()
}
