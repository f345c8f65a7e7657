//! # camtrap-lookahead
//!
//! Look-ahead analysis buffer for camera-trap images sent to a remote
//! vision-language API.
//!
//! ## Features
//!
//! - Rolling look-ahead window kept pre-analyzed ahead of the active image
//! - Bounded concurrency (worker pool) and global request pacing
//! - Rate-limit classification with automatic resume for short waits and
//!   an explicit manual resume for long ones
//! - Consistent under non-sequential navigation: abandoned queued work is
//!   cancelled before it costs quota, in-flight work is kept
//! - Non-blocking result lookups and a broadcast event stream for UIs
//! - A ready-made GitHub Models analyzer with a tolerant response parser
//!
//! ## Quick Start
//!
//! 1. Implement [`ImageAnalyzer`] (or use [`GithubModelsAnalyzer`])
//! 2. Create an [`AnalysisBuffer`] with a [`BufferConfig`]
//! 3. Load the images with [`AnalysisBuffer::start_session()`]
//! 4. Call [`AnalysisBuffer::ensure_window()`] / [`AnalysisBuffer::jump_to()`]
//!    as the user navigates, and read results with
//!    [`AnalysisBuffer::get_result()`]

pub mod buffer;
pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod github;
pub mod parser;
pub mod pool;
pub mod sequence;
pub mod store;
pub mod throttle;
pub mod types;

pub use buffer::AnalysisBuffer;
pub use classifier::{classify, RateLimitRules};
pub use config::{BufferConfig, BufferConfigBuilder};
pub use error::{BufferError, ErrorSignal};
pub use events::BufferEvent;
pub use github::{GithubModelsAnalyzer, GithubModelsConfig};
pub use parser::{parse_observation, WildlifeObservation};
pub use sequence::{image_sequence, SequenceOrder};
pub use types::{BufferStatus, FailureKind, ItemState, LimitCategory, Lookup};

use std::path::Path;

/// The remote analysis operation the buffer schedules.
///
/// Implementations perform one call for one image and either return the
/// parsed payload or the raw [`ErrorSignal`] (HTTP status and body). The
/// buffer classifies signals itself; implementations must not retry rate
/// limits on their own.
///
/// # Example
///
/// ```ignore
/// use camtrap_lookahead::*;
/// use std::path::Path;
///
/// struct Echo;
///
/// impl ImageAnalyzer for Echo {
///     type Output = String;
///
///     async fn analyze(&self, image: &Path) -> Result<String, ErrorSignal> {
///         Ok(image.display().to_string())
///     }
/// }
/// ```
pub trait ImageAnalyzer: Send + Sync + 'static {
    /// Opaque result payload, stored and handed back verbatim.
    type Output: Clone + Send + Sync + 'static;

    /// Analyze one image.
    fn analyze(
        &self,
        image: &Path,
    ) -> impl std::future::Future<Output = Result<Self::Output, ErrorSignal>> + Send;

    /// Optional: a human-readable name, used in logging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
