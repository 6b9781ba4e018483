use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingConfig {
    /// Messages per thread page. A full page implies older messages may exist.
    pub page_size: u32,
    /// Conversations returned by one inbox listing.
    pub directory_page_size: u32,
    /// Upper bound on any single backend round trip.
    pub request_timeout: Duration,
    /// Pause before the single retry of a failed initial thread load.
    pub initial_load_retry_delay: Duration,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            directory_page_size: 50,
            request_timeout: Duration::from_secs(12),
            initial_load_retry_delay: Duration::from_millis(600),
        }
    }
}

impl MessagingConfig {
    /// Defaults overridden by `BAZAAR_*` environment variables. Unparseable
    /// values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(v) if v > 0 => Some(v),
                _ => {
                    warn!("Ignoring {}={:?}: expected a positive integer", key, raw);
                    None
                }
            }
        };

        Self {
            page_size: read("BAZAAR_PAGE_SIZE")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.page_size),
            directory_page_size: read("BAZAAR_DIRECTORY_PAGE_SIZE")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.directory_page_size),
            request_timeout: read("BAZAAR_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            initial_load_retry_delay: read("BAZAAR_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_load_retry_delay),
        }
    }
}
