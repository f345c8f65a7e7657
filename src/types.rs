use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a remote call was throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitCategory {
    /// Too many requests open at the same time.
    Concurrent,
    TokensPerMinute,
    RequestsPerMinute,
    RequestsPerDay,
}

impl LimitCategory {
    pub fn as_str(&self) -> &str {
        match self {
            LimitCategory::Concurrent => "concurrent",
            LimitCategory::TokensPerMinute => "tokens_per_minute",
            LimitCategory::RequestsPerMinute => "requests_per_minute",
            LimitCategory::RequestsPerDay => "requests_per_day",
        }
    }
}

/// Classified failure of one analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The account hit a remote limit. Recoverable once `wait_secs` elapse.
    RateLimited {
        category: LimitCategory,
        wait_secs: u64,
    },
    /// Anything that is not throttling. Never retried automatically.
    Fatal { message: String },
}

impl FailureKind {
    pub fn fatal(message: impl Into<String>) -> Self {
        FailureKind::Fatal {
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FailureKind::RateLimited { .. })
    }

    /// The raw failure text for logs and detail views.
    pub fn raw_message(&self) -> String {
        match self {
            FailureKind::RateLimited {
                category,
                wait_secs,
            } => format!("Rate limited ({}), wait {}s", category.as_str(), wait_secs),
            FailureKind::Fatal { message } => message.clone(),
        }
    }

    /// A short sentence suitable for a status label.
    pub fn friendly_message(&self) -> String {
        match self {
            FailureKind::RateLimited { wait_secs, .. } => format!(
                "AI limit reached, analysis continues in about {}",
                format_wait(*wait_secs)
            ),
            FailureKind::Fatal { message } => {
                let lower = message.to_lowercase();
                if lower.contains("401") || lower.contains("unauthorized") || lower.contains("invalid token") {
                    "Token invalid or expired, please check your credentials".to_string()
                } else if lower.contains("placeholder") || lower.contains("empty") {
                    "AI returned an empty answer, please try again".to_string()
                } else if lower.contains("timed out") {
                    "AI analysis timed out, please try again".to_string()
                } else {
                    format!("AI analysis failed: {}", message)
                }
            }
        }
    }
}

fn format_wait(secs: u64) -> String {
    match secs {
        0..=119 => format!("{}s", secs),
        120..=7199 => format!("{} min", secs.div_ceil(60)),
        _ => format!("{} h", secs.div_ceil(3600)),
    }
}

/// Lifecycle of one item in the current session.
///
/// Pending -> Queued -> InFlight -> Done/Failed. A rate-limited failure
/// returns to Pending when the buffer resumes, and a cancelled Queued item
/// returns to Pending without ever reaching the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Queued,
    InFlight,
    Done,
    Failed { failure: FailureKind },
}

impl ItemState {
    pub fn as_str(&self) -> &str {
        match self {
            ItemState::Pending => "pending",
            ItemState::Queued => "queued",
            ItemState::InFlight => "in_flight",
            ItemState::Done => "done",
            ItemState::Failed { .. } => "failed",
        }
    }
}

/// Answer to a non-blocking result query.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Done(T),
    Failed(FailureKind),
    NotReady,
}

impl<T> Lookup<T> {
    pub fn is_ready(&self) -> bool {
        !matches!(self, Lookup::NotReady)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Lookup::Done(value) => Some(value),
            _ => None,
        }
    }
}

/// Observability snapshot for status displays ("buffered: 3, analyzing: 2").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStatus {
    pub total: usize,
    pub active_index: usize,
    pub pending: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub done: usize,
    pub failed: usize,
    pub paused_until: Option<DateTime<Utc>>,
    pub limit_category: Option<LimitCategory>,
    pub manual_resume_required: bool,
}

impl BufferStatus {
    pub fn is_paused(&self) -> bool {
        self.paused_until.is_some()
    }
}
