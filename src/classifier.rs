//! Rate-limit classification of remote failures.
//!
//! Providers report throttling as human-readable text, so the matching rules
//! are kept as data in [`RateLimitRules`] and applied by one pure function.
//! Decision order (first match wins):
//! 1. Concurrent-request cap -> `Concurrent`, fixed short wait
//! 2. Per-minute token budget -> `TokensPerMinute`, stated wait or default
//! 3. Stated wait below the minute ceiling -> `RequestsPerMinute`
//! 4. Stated wait at or above the ceiling -> `RequestsPerDay`
//! 5. Throttle without a stated wait (HTTP 429, generic limit text) -> `RequestsPerMinute`, default wait
//! 6. Anything else -> `Fatal`

use crate::error::ErrorSignal;
use crate::types::{FailureKind, LimitCategory};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Matching rules and thresholds for [`classify`].
///
/// Markers are matched case-insensitively as substrings of the error body.
#[derive(Debug, Clone)]
pub struct RateLimitRules {
    pub concurrent_markers: Vec<String>,
    pub token_markers: Vec<String>,
    pub limit_markers: Vec<String>,
    pub concurrent_wait: Duration,
    pub token_wait: Duration,
    pub minute_wait: Duration,
    /// Stated waits below this are per-minute limits, the rest per-day.
    pub minute_ceiling: Duration,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self {
            concurrent_markers: vec![
                "UserConcurrentRequests".to_string(),
                "concurrent requests".to_string(),
            ],
            token_markers: vec![
                "UserTokensPerMinute".to_string(),
                "tokens per minute".to_string(),
                "token rate limit".to_string(),
            ],
            limit_markers: vec![
                "rate limit".to_string(),
                "too many requests".to_string(),
            ],
            concurrent_wait: Duration::from_secs(2),
            token_wait: Duration::from_secs(60),
            minute_wait: Duration::from_secs(60),
            minute_ceiling: Duration::from_secs(120),
        }
    }
}

impl RateLimitRules {
    /// Classify `signal` with these rules. Same as [`classify`].
    pub fn classify(&self, signal: &ErrorSignal) -> FailureKind {
        classify(signal, self)
    }
}

/// Map a remote failure to a [`FailureKind`]. Deterministic and side-effect free.
pub fn classify(signal: &ErrorSignal, rules: &RateLimitRules) -> FailureKind {
    let body = signal.body.to_lowercase();
    let stated_wait = signal
        .retry_after_secs
        .or_else(|| extract_wait_secs(&signal.body));

    if contains_any(&body, &rules.concurrent_markers) {
        return FailureKind::RateLimited {
            category: LimitCategory::Concurrent,
            wait_secs: rules.concurrent_wait.as_secs(),
        };
    }

    if contains_any(&body, &rules.token_markers) {
        return FailureKind::RateLimited {
            category: LimitCategory::TokensPerMinute,
            wait_secs: stated_wait.unwrap_or(rules.token_wait.as_secs()),
        };
    }

    if let Some(wait_secs) = stated_wait {
        let category = if wait_secs < rules.minute_ceiling.as_secs() {
            LimitCategory::RequestsPerMinute
        } else {
            LimitCategory::RequestsPerDay
        };
        return FailureKind::RateLimited {
            category,
            wait_secs,
        };
    }

    if signal.status == Some(429) || contains_any(&body, &rules.limit_markers) {
        return FailureKind::RateLimited {
            category: LimitCategory::RequestsPerMinute,
            wait_secs: rules.minute_wait.as_secs(),
        };
    }

    FailureKind::Fatal {
        message: signal.to_string(),
    }
}

fn contains_any(haystack_lower: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|m| !m.is_empty() && haystack_lower.contains(&m.to_lowercase()))
}

fn wait_regex() -> &'static Regex {
    static WAIT: OnceLock<Regex> = OnceLock::new();
    WAIT.get_or_init(|| {
        Regex::new(
            r"(?i)(?:wait|retry[\s_-]*after|try\s+again\s+in)[\s:]*(\d+)\s*(hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)?\b",
        )
        .expect("wait pattern is valid")
    })
}

/// Pull an explicit wait duration, in seconds, out of provider error text.
///
/// Understands "Please wait 38 seconds", "retry after 5", "Retry-After: 30"
/// and "try again in 2 minutes". Returns `None` when no duration is stated.
pub fn extract_wait_secs(text: &str) -> Option<u64> {
    let caps = wait_regex().captures(text)?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();
    let factor = match unit.chars().next() {
        Some('h') => 3600,
        Some('m') => 60,
        _ => 1,
    };
    Some(amount.saturating_mul(factor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RateLimitRules {
        RateLimitRules::default()
    }

    // ── Concurrent cap ──

    #[test]
    fn concurrent_requests_get_short_fixed_wait() {
        let signal = ErrorSignal::http(
            429,
            r#"{"error":{"code":"RateLimitReached","message":"Rate limit of 2 per 0s exceeded for UserConcurrentRequests. Please wait 0 seconds before retrying."}}"#,
        );
        assert_eq!(
            classify(&signal, &rules()),
            FailureKind::RateLimited {
                category: LimitCategory::Concurrent,
                wait_secs: 2
            }
        );
    }

    #[test]
    fn concurrent_wins_over_minute_wait() {
        let signal = ErrorSignal::http(
            429,
            "Too many concurrent requests. Please wait 45 seconds.",
        );
        assert!(matches!(
            classify(&signal, &rules()),
            FailureKind::RateLimited {
                category: LimitCategory::Concurrent,
                ..
            }
        ));
    }

    // ── Token budget ──

    #[test]
    fn token_limit_uses_stated_wait() {
        let signal = ErrorSignal::http(
            429,
            "Rate limit of 50000 per 60s exceeded for UserTokensPerMinute. Please wait 17 seconds before retrying.",
        );
        assert_eq!(
            classify(&signal, &rules()),
            FailureKind::RateLimited {
                category: LimitCategory::TokensPerMinute,
                wait_secs: 17
            }
        );
    }

    #[test]
    fn token_limit_defaults_to_sixty_seconds() {
        let signal = ErrorSignal::http(429, "tokens per minute budget exhausted");
        assert_eq!(
            classify(&signal, &rules()),
            FailureKind::RateLimited {
                category: LimitCategory::TokensPerMinute,
                wait_secs: 60
            }
        );
    }

    // ── Stated waits ──

    #[test]
    fn short_wait_is_per_minute() {
        let signal = ErrorSignal::http(
            429,
            "Rate limit of 10 per 60s exceeded for UserByModelByMinute. Please wait 38 seconds before retrying.",
        );
        assert_eq!(
            classify(&signal, &rules()),
            FailureKind::RateLimited {
                category: LimitCategory::RequestsPerMinute,
                wait_secs: 38
            }
        );
    }

    #[test]
    fn long_wait_is_per_day() {
        let signal = ErrorSignal::http(
            429,
            "Rate limit of 50 per 86400s exceeded for UserByModelByDay. Please wait 3600 seconds before retrying.",
        );
        assert_eq!(
            classify(&signal, &rules()),
            FailureKind::RateLimited {
                category: LimitCategory::RequestsPerDay,
                wait_secs: 3600
            }
        );
    }

    #[test]
    fn boundary_wait_is_per_day() {
        let signal = ErrorSignal::http(429, "Please wait 120 seconds");
        assert!(matches!(
            classify(&signal, &rules()),
            FailureKind::RateLimited {
                category: LimitCategory::RequestsPerDay,
                wait_secs: 120
            }
        ));
    }

    #[test]
    fn retry_after_header_wins_over_text() {
        let signal = ErrorSignal::http(429, "Please wait 5 seconds").with_retry_after(30);
        assert_eq!(
            classify(&signal, &rules()),
            FailureKind::RateLimited {
                category: LimitCategory::RequestsPerMinute,
                wait_secs: 30
            }
        );
    }

    #[test]
    fn bare_429_defaults_to_per_minute() {
        let signal = ErrorSignal::http(429, "");
        assert_eq!(
            classify(&signal, &rules()),
            FailureKind::RateLimited {
                category: LimitCategory::RequestsPerMinute,
                wait_secs: 60
            }
        );
    }

    // ── Fatal ──

    #[test]
    fn network_timeout_is_fatal() {
        let signal = ErrorSignal::timeout(Duration::from_secs(30));
        assert!(matches!(
            classify(&signal, &rules()),
            FailureKind::Fatal { .. }
        ));
    }

    #[test]
    fn unauthorized_is_fatal_with_message() {
        let signal = ErrorSignal::http(401, "Bad credentials");
        assert_eq!(
            classify(&signal, &rules()),
            FailureKind::Fatal {
                message: "HTTP 401: Bad credentials".to_string()
            }
        );
    }

    #[test]
    fn classification_is_repeatable() {
        let signal = ErrorSignal::http(429, "UserConcurrentRequests");
        let first = classify(&signal, &rules());
        for _ in 0..10 {
            assert_eq!(classify(&signal, &rules()), first);
        }
    }

    #[test]
    fn custom_rules_change_boundaries() {
        let mut custom = rules();
        custom.minute_ceiling = Duration::from_secs(30);
        let signal = ErrorSignal::http(429, "Please wait 45 seconds");
        assert!(matches!(
            classify(&signal, &custom),
            FailureKind::RateLimited {
                category: LimitCategory::RequestsPerDay,
                ..
            }
        ));
    }

    // ── Wait extraction ──

    #[test]
    fn extract_wait_variants() {
        assert_eq!(extract_wait_secs("Please wait 38 seconds before retrying."), Some(38));
        assert_eq!(extract_wait_secs("Retry-After: 30"), Some(30));
        assert_eq!(extract_wait_secs("retry after 12s"), Some(12));
        assert_eq!(extract_wait_secs("try again in 2 minutes"), Some(120));
        assert_eq!(extract_wait_secs("wait 1 hour"), Some(3600));
    }

    #[test]
    fn extract_wait_absent() {
        assert_eq!(extract_wait_secs("connection reset by peer"), None);
        assert_eq!(extract_wait_secs(""), None);
    }
}
