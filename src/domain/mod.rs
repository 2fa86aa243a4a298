pub mod error;
pub mod model;

pub use error::AppError;
pub use model::{JobRequest, OutputFormat, ProgressView, SessionPhase, SessionToken, StatusEvent};
