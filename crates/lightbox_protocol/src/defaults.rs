//! Canonical default values shared by the library and the CLI.

pub const DEFAULT_INBOX_PREFIX: &str = "inbox/";
pub const DEFAULT_PROCESSED_PREFIX: &str = "processed/";
pub const DEFAULT_RELOCATION_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_ANALYSIS_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_CONCURRENT_INVOCATIONS: usize = 4;
pub const DEFAULT_MAX_LABELS: u32 = 10;
pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com";
pub const DEFAULT_CATEGORIZER_ENDPOINT: &str = "https://api.anthropic.com";
pub const DEFAULT_CATEGORIZER_MODEL: &str = "claude-3-5-haiku-latest";
