//! Object key naming

use chrono::{DateTime, Utc};

/// Hands out `{prefix}/data_{YYYYMMDD_HHMMSS}.{format}` keys
///
/// Timestamps have one-second resolution. When a second write lands in the same second as the
/// previous one, the name gets a `_{n}` suffix so no artifact is overwritten.
#[derive(Debug, Default)]
pub struct ArtifactNamer {
    last_stamp: Option<String>,
    repeats: u32,
}

impl ArtifactNamer {
    /// Namer with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for an artifact written at `at`
    pub fn next_key(&mut self, prefix: &str, format: &str, at: DateTime<Utc>) -> String {
        let stamp = at.format("%Y%m%d_%H%M%S").to_string();

        let suffix = if self.last_stamp.as_deref() == Some(stamp.as_str()) {
            self.repeats += 1;
            format!("_{}", self.repeats)
        } else {
            self.last_stamp = Some(stamp.clone());
            self.repeats = 0;
            String::new()
        };

        let name = format!("data_{}{}.{}", stamp, suffix, format);
        if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        }
    }
}

/// Strip leading and trailing slashes from a configured prefix
pub fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim_matches('/')
}
