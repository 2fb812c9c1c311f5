use std::time::Duration;

/// Transport-level settings for the WebSocket connection.
#[derive(Debug, Clone)]
pub struct WebsocketConfig {
    /// Timeout for establishing a connection, handshake included.
    pub connect_timeout: Duration,
    /// Per-frame write deadline. Ping writes past the deadline are dropped,
    /// ping being best-effort.
    pub write_timeout: Duration,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(1),
        }
    }
}
