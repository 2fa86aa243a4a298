pub mod download_coordinator;
pub mod download_session;
pub mod session_driver;

pub use download_coordinator::{DownloadCoordinator, MediaPreview, RetrievalEvent};
pub use session_driver::{SessionDriver, SessionNotice, SessionRequest, SessionUpdate};
