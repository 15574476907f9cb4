//! Central place for application-wide constants and default values.

/// Default application name shown in logs and prompts
pub const DEFAULT_APP_NAME: &str = "tlsfactory";

/// Left padding used to align log lines with those that include emoji prefixes.
pub const ICON_PLACEHOLDER: &str = "   "; // Three spaces for alignment

/// Default address the factory RPC listener binds to
pub const DEFAULT_FACTORY_LISTEN: &str = "127.0.0.1:12010";

/// Default host secure endpoints bind to when a creation request names no address
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";

/// Upper bound for a single TLS handshake (accept + handshake + identity check)
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Upper bound for reserving a listening socket
pub const DEFAULT_BIND_TIMEOUT_MS: u64 = 2_000;

/// Upper bound for draining an endpoint's tasks after close was requested
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 2_000;

/// Outcome records kept per endpoint before the oldest are evicted
pub const DEFAULT_OUTCOME_LOG_CAPACITY: usize = 1024;

/// Longest line accepted on the factory RPC connection or a promoted session
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Protocol branding used by the factory RPC `ping` reply
pub const PROTOCOL_NAME: &str = "tlsfactory";
/// Factory RPC protocol version (bump when the wire format changes)
pub const PROTOCOL_VERSION: &str = "1";

/// Application / crate version (populated from Cargo.toml via env! macro)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Human friendly composite version string used in logs.
pub fn full_version() -> String {
    format!("v{} (protocol={})", APP_VERSION, PROTOCOL_VERSION)
}
