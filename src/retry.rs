use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Status codes treated as transient unless overridden on the command line.
pub const DEFAULT_RETRY_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Exponential backoff with jitter for outbound GET traffic (API and CDN).
///
/// The transient status set lives here rather than in the error types so the
/// same policy object decides for both the API client and the downloader.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryConfig {
    /// Compute the delay for a given retry attempt (0-indexed).
    ///
    /// Formula: `min(base * multiplier^retry, max) + random_jitter(0..base)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exp_ms = base_ms * self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let capped_ms = if exp_ms.is_finite() {
            exp_ms.min(self.max_delay.as_millis() as f64)
        } else {
            self.max_delay.as_millis() as f64
        };
        let base = self.base_delay.as_millis() as u64;
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..base)
        } else {
            0
        };
        Duration::from_millis(capped_ms as u64 + jitter)
    }

    pub fn is_transient_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Decide whether a response should be retried before its body is read.
    ///
    /// Besides the transient status set, a success status carrying a `text/*`
    /// content type is retried when a binary payload was expected: the CDN
    /// serves HTML error pages with a 200.
    pub fn classify_response(
        &self,
        status: u16,
        content_type: Option<&str>,
        expect_binary: bool,
    ) -> RetryAction {
        if self.is_transient_status(status) {
            return RetryAction::Retry;
        }
        if expect_binary && (200..300).contains(&status) && is_text_content(content_type) {
            return RetryAction::Retry;
        }
        RetryAction::Abort
    }
}

/// True when a `Content-Type` header value names a `text/*` media type.
pub fn is_text_content(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/"))
        .unwrap_or(false)
}

/// Retry an async operation with exponential backoff and jitter.
///
/// Returns the first `Ok` result, or the last error unchanged if retries are
/// exhausted or the classifier returns `Abort`.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_retries + 1;
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if classifier(&e) == RetryAction::Abort || attempt + 1 >= total_attempts {
                    return Err(e);
                }
                let delay = config.delay_for_retry(attempt);
                tracing::warn!(
                    "Retryable error (attempt {}/{}), retrying in {}ms: {}",
                    attempt + 1,
                    total_attempts,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn instant_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert_eq!(config.retry_statuses, vec![408, 429, 500, 502, 503, 504]);
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            ..RetryConfig::default()
        };
        let d = config.delay_for_retry(0).as_millis();
        assert!((100..200).contains(&d), "{d}");
        let d = config.delay_for_retry(1).as_millis();
        assert!((200..300).contains(&d), "{d}");
        let d = config.delay_for_retry(3).as_millis();
        assert!((800..900).contains(&d), "{d}");
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3000),
            ..RetryConfig::default()
        };
        let d = config.delay_for_retry(40).as_millis();
        assert!((3000..3500).contains(&d), "{d}");
    }

    #[test]
    fn test_delay_zero_base() {
        let config = instant_config(3);
        assert_eq!(config.delay_for_retry(0), Duration::ZERO);
    }

    #[test]
    fn test_transient_statuses() {
        let config = RetryConfig::default();
        assert!(config.is_transient_status(503));
        assert!(config.is_transient_status(429));
        assert!(!config.is_transient_status(404));
        assert!(!config.is_transient_status(200));
    }

    #[test]
    fn test_custom_status_set() {
        let config = RetryConfig {
            retry_statuses: vec![520],
            ..RetryConfig::default()
        };
        assert!(config.is_transient_status(520));
        assert!(!config.is_transient_status(503));
    }

    #[test]
    fn test_html_page_with_ok_status_is_retried_for_binary() {
        let config = RetryConfig::default();
        assert_eq!(
            config.classify_response(200, Some("text/html; charset=utf-8"), true),
            RetryAction::Retry
        );
        assert_eq!(
            config.classify_response(200, Some("image/jpeg"), true),
            RetryAction::Abort
        );
        // JSON endpoints may legitimately answer with text/*.
        assert_eq!(
            config.classify_response(200, Some("text/plain"), false),
            RetryAction::Abort
        );
        assert_eq!(config.classify_response(200, None, true), RetryAction::Abort);
    }

    #[test]
    fn test_classify_transient_status() {
        let config = RetryConfig::default();
        assert_eq!(
            config.classify_response(502, Some("text/html"), false),
            RetryAction::Retry
        );
        assert_eq!(config.classify_response(404, None, true), RetryAction::Abort);
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let config = instant_config(3);
        let result: Result<i32, String> =
            retry_with_backoff(&config, |_| RetryAction::Retry, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_abort_on_non_retryable() {
        let config = instant_config(3);
        let call_count = Arc::new(AtomicU32::new(0));
        let cc = call_count.clone();
        let result: Result<i32, String> = retry_with_backoff(
            &config,
            |_| RetryAction::Abort,
            || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let config = instant_config(3);
        let call_count = Arc::new(AtomicU32::new(0));
        let cc = call_count.clone();
        let result: Result<i32, String> = retry_with_backoff(
            &config,
            |_| RetryAction::Retry,
            || {
                let cc = cc.clone();
                async move {
                    let n = cc.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(99)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error_unchanged() {
        let config = instant_config(2);
        let call_count = Arc::new(AtomicU32::new(0));
        let cc = call_count.clone();
        let result: Result<i32, String> = retry_with_backoff(
            &config,
            |_| RetryAction::Retry,
            || {
                let cc = cc.clone();
                async move {
                    let n = cc.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure #{n}"))
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "failure #2");
        // 1 initial + 2 retries = 3 attempts
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }
}
