//! Configuration for the charger link

use std::time::Duration;

use crate::types::StationId;

/// Line terminator used by the controller
pub const DEFAULT_LINE_TERMINATOR: &str = "\r\n";

/// Wait for an expected follow-up line
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Complete link configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Bounded wait for the tag, confirmation, completion and frame header
    /// lines of a multi-line exchange
    pub response_timeout: Duration,

    /// Station addressed before any heartbeat has been seen
    pub default_station: StationId,

    /// Appended to every outgoing line
    pub line_terminator: String,

    /// Size of a single non-blocking read from the byte stream
    pub read_chunk_size: usize,

    /// Register the MMETERING structured frame decoder
    pub structured_frames: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            default_station: StationId::new("1"),
            line_terminator: DEFAULT_LINE_TERMINATOR.to_string(),
            read_chunk_size: 256,
            structured_frames: true,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the station used before the first heartbeat
    pub fn with_default_station(mut self, station: impl Into<String>) -> Self {
        self.default_station = StationId::new(station);
        self
    }

    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Disable the structured frame decoder
    pub fn without_structured_frames(mut self) -> Self {
        self.structured_frames = false;
        self
    }
}
