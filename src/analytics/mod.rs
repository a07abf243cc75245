//! Streaming loudness analytics
//!
//! Per-member sample buffers with adaptive calibration and speak flags,
//! talk-interval segmentation, and cross-member turn arbitration.

pub mod arbiter;
pub mod calibration;
pub mod intervals;
pub mod smoother;
pub mod volume;

pub use calibration::SpeakPolicy;
pub use intervals::TalkInterval;
pub use smoother::Smoother;
pub use volume::{Sample, VolumeAnalyzer};

use crate::config::AnalyticsConfig;
use crate::dialogue::Chunk;
use tracing::{debug, warn};

/// Analytics over a whole roster.
///
/// Members are kept in registration order; that order is the documented
/// tie-break in [`GroupAnalyzer::arbitrate`] (an equally loud later member
/// never takes an increment from an earlier one).
pub struct GroupAnalyzer {
    config: AnalyticsConfig,
    members: Vec<(String, VolumeAnalyzer)>,
}

impl GroupAnalyzer {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            members: Vec::new(),
        }
    }

    /// Register a member. Re-registering an existing key is a no-op.
    pub fn add_member(&mut self, key: impl Into<String>) {
        let key = key.into();
        if self.members.iter().any(|(k, _)| *k == key) {
            warn!(member = %key, "member already registered");
            return;
        }
        self.members.push((key, VolumeAnalyzer::new(&self.config)));
    }

    /// Member keys in registration order
    pub fn member_keys(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(k, _)| k.as_str())
    }

    /// One member's analyzer
    pub fn member(&self, key: &str) -> Option<&VolumeAnalyzer> {
        self.members
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, analyzer)| analyzer)
    }

    /// Ingest one decoded chunk for `member`.
    ///
    /// Sample `i` lands at chunk start + i x sample interval; duplicates from
    /// a badge resend fall out via the analyzer's monotonicity check. The
    /// member recalibrates after the chunk (periodic, not per-sample).
    ///
    /// Returns the number of samples accepted.
    pub fn ingest_chunk(&mut self, member: &str, chunk: &Chunk) -> usize {
        let Some((_, analyzer)) = self.members.iter_mut().find(|(k, _)| k == member) else {
            warn!(member, "chunk for unknown member dropped");
            return 0;
        };
        let start_ms = chunk.start_timestamp_ms();
        let interval_ms = chunk.sample_interval_ms as i64;
        let mut accepted = 0usize;
        for (i, &volume) in chunk.samples().iter().enumerate() {
            let timestamp_ms = start_ms + i as i64 * interval_ms;
            if analyzer.add_sample(volume as f32, timestamp_ms, interval_ms) {
                accepted += 1;
            }
        }
        analyzer.update_cutoff();
        analyzer.update_speak_threshold();
        debug!(
            member,
            accepted,
            total = chunk.samples().len(),
            "chunk ingested"
        );
        accepted
    }

    /// One member's talk intervals within `[window_start_ms, window_end_ms)`
    pub fn talk_intervals(
        &self,
        member: &str,
        window_start_ms: i64,
        window_end_ms: i64,
    ) -> Vec<TalkInterval> {
        self.member(member)
            .map(|analyzer| analyzer.talk_intervals(member, window_start_ms, window_end_ms))
            .unwrap_or_default()
    }

    /// Loudest-speaker turn segmentation across all members (see
    /// [`arbiter::arbitrate`]).
    pub fn arbitrate(
        &self,
        window_start_ms: i64,
        window_end_ms: i64,
        increment_ms: i64,
    ) -> Vec<TalkInterval> {
        arbiter::arbitrate(
            &self.members,
            window_start_ms,
            window_end_ms,
            increment_ms,
            self.config.talk_timeout_ms,
            self.config.min_talk_ms,
        )
    }
}
