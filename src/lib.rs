pub mod audio;
pub mod bot;
pub mod config;
pub mod db;
pub mod session;

/// Audio file extensions the codec can decode
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "flac"];

/// Upper bound for both uploaded and rendered media (50 MiB)
pub const MAX_MEDIA_BYTES: u64 = 50 * 1024 * 1024;

/// Application name for XDG paths
pub const APP_NAME: &str = "remixbot";

/// Numeric user identifier supplied by the transport.
pub type UserId = i64;

/// Generated track identifier.
pub type TrackId = i64;
