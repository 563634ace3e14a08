/// Application name
pub const APP_NAME: &str = "Agora";

/// Default HTTP port (matches the legacy forum deployment)
pub const DEFAULT_HTTP_PORT: u16 = 4422;

/// Messages returned per history page when the caller gives no limit
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 10;

/// Upper bound on a single history page
pub const MAX_HISTORY_PAGE_SIZE: u32 = 100;

/// Frames buffered per connection before the peer is considered stalled
pub const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Maximum inbound WebSocket frame size in bytes (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
