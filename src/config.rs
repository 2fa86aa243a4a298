use std::time::Duration;

/// Connection attempts per download before giving up.
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Fixed pause between a dropped connection and the next attempt.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for a single WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Seconds shown to the user after `ready` before the UI unlocks.
pub const READY_COUNTDOWN_TICKS: u32 = 3;

/// Length of one countdown tick.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// How long a transient error banner stays visible.
pub const ERROR_DISPLAY: Duration = Duration::from_secs(8);

/// Tunables of a download session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub ready_countdown: u32,
    pub countdown_tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_CONNECT_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            connect_timeout: CONNECT_TIMEOUT,
            ready_countdown: READY_COUNTDOWN_TICKS,
            countdown_tick: COUNTDOWN_TICK,
        }
    }
}
