//! Engine tuning knobs.
//!
//! A `Config` value is built once per [`Connection`](crate::Connection) and
//! handed down to chains, devices, and protocol adapters. There is no
//! process-wide configuration state.

use std::time::Duration;

/// Timeouts and buffer sizes for the dialog engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout for the protocol connect FSMs.
    pub connect_timeout: Duration,

    /// Timeout after the telnet escape banner has been seen.
    pub esc_char_timeout: Duration,

    /// How long to wait for the first prompt after sending credentials.
    pub first_prompt_timeout: Duration,

    /// Settle time for the admin-shell hop on IOS XR 64 bit.
    pub calvados_term_wait: Duration,

    /// Pause before every write to the child process.
    pub delay_before_send: Duration,

    /// How many trailing bytes of the session buffer are searched for
    /// event patterns.
    pub search_window: usize,

    /// Size of a single read from the pseudo-terminal.
    pub read_buffer_size: usize,

    /// Upper bound for a single sleep in the reconnect loop.
    pub max_reconnect_sleep: Duration,

    /// Credential redaction applied to the session transcript. Capture
    /// groups of this pattern are replaced with `***`.
    pub redaction_pattern: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            esc_char_timeout: Duration::from_secs(10),
            first_prompt_timeout: Duration::from_secs(30),
            calvados_term_wait: Duration::from_secs(10),
            delay_before_send: Duration::from_millis(300),
            search_window: 4000,
            read_buffer_size: 65536,
            max_reconnect_sleep: Duration::from_secs(30),
            redaction_pattern: r"s?ftp://.*:(.*)@".to_string(),
        }
    }
}
