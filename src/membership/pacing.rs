//! Request pacing from Discord rate-limit headers
//!
//! Every response carries the remaining budget of its bucket. Once the
//! budget hits zero, or a 429 arrives, all following requests from the same
//! client wait for the advertised reset. The failed request itself is not
//! retried.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

const REMAINING: &str = "x-ratelimit-remaining";
const RESET_AFTER: &str = "x-ratelimit-reset-after";

/// Pause after a 429 that names no reset time
pub const DEFAULT_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(1);

/// Longest single pause honored
pub const MAX_PAUSE: Duration = Duration::from_secs(60);

fn header_seconds(headers: &HeaderMap, name: &str) -> Option<Duration> {
    let seconds = headers.get(name)?.to_str().ok()?.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

/// How long to hold further requests after a response, if at all
pub fn pause_from_headers(status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
    let pause = if status == StatusCode::TOO_MANY_REQUESTS {
        Some(
            header_seconds(headers, RETRY_AFTER.as_str())
                .or_else(|| header_seconds(headers, RESET_AFTER))
                .unwrap_or(DEFAULT_RATE_LIMIT_PAUSE),
        )
    } else {
        let exhausted = headers
            .get(REMAINING)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            == Some("0");
        if exhausted {
            header_seconds(headers, RESET_AFTER)
        } else {
            None
        }
    };

    pause.map(|p| p.min(MAX_PAUSE))
}

/// Shared "blocked until" deadline for one API client
#[derive(Debug, Default)]
pub struct RequestPacer {
    blocked_until: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until the current deadline, if one is set
    pub async fn wait(&self) {
        let deadline = *self.blocked_until.lock().await;
        if let Some(deadline) = deadline {
            if deadline > Instant::now() {
                debug!(wait_ms = (deadline - Instant::now()).as_millis() as u64, "Waiting for rate limit reset");
                tokio::time::sleep_until(deadline).await;
            }
        }
    }

    /// Record the rate-limit state a response reported. Deadlines only move forward.
    pub async fn observe(&self, path: &str, status: StatusCode, headers: &HeaderMap) {
        let Some(pause) = pause_from_headers(status, headers) else {
            return;
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(path = %path, pause_ms = pause.as_millis() as u64, "Rate limited, pausing requests");
        } else {
            debug!(path = %path, pause_ms = pause.as_millis() as u64, "Rate limit bucket exhausted");
        }

        let until = Instant::now() + pause;
        let mut blocked = self.blocked_until.lock().await;
        if blocked.map_or(true, |current| until > current) {
            *blocked = Some(until);
        }
    }

    pub async fn blocked_until(&self) -> Option<Instant> {
        *self.blocked_until.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_exhausted_bucket_pauses_until_reset() {
        let h = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset-after", "1.5")]);
        assert_eq!(pause_from_headers(StatusCode::OK, &h), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_remaining_budget_does_not_pause() {
        let h = headers(&[("x-ratelimit-remaining", "3"), ("x-ratelimit-reset-after", "1.5")]);
        assert_eq!(pause_from_headers(StatusCode::OK, &h), None);
        assert_eq!(pause_from_headers(StatusCode::OK, &HeaderMap::new()), None);
    }

    #[test]
    fn test_too_many_requests_prefers_retry_after() {
        let h = headers(&[("retry-after", "2"), ("x-ratelimit-reset-after", "0.5")]);
        assert_eq!(
            pause_from_headers(StatusCode::TOO_MANY_REQUESTS, &h),
            Some(Duration::from_secs(2))
        );

        assert_eq!(
            pause_from_headers(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new()),
            Some(DEFAULT_RATE_LIMIT_PAUSE)
        );
    }

    #[test]
    fn test_pause_is_capped_and_garbage_ignored() {
        let h = headers(&[("retry-after", "3600")]);
        assert_eq!(pause_from_headers(StatusCode::TOO_MANY_REQUESTS, &h), Some(MAX_PAUSE));

        let h = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset-after", "soon")]);
        assert_eq!(pause_from_headers(StatusCode::OK, &h), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_holds_until_deadline() {
        let pacer = RequestPacer::new();
        pacer
            .observe("/users/1", StatusCode::TOO_MANY_REQUESTS, &headers(&[("retry-after", "2")]))
            .await;

        // A later, shorter pause never pulls the deadline in
        pacer
            .observe(
                "/users/2",
                StatusCode::OK,
                &headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset-after", "0.1")]),
            )
            .await;

        let started = Instant::now();
        pacer.wait().await;
        assert!(started.elapsed() >= Duration::from_secs(2));

        let started = Instant::now();
        pacer.wait().await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_no_deadline_by_default() {
        let pacer = RequestPacer::new();
        assert!(pacer.blocked_until().await.is_none());
        tokio::time::timeout(Duration::from_millis(50), pacer.wait())
            .await
            .unwrap();
    }
}
