//! Per-member volume analysis
//!
//! Owns one member's bounded sample buffer and the derivation pipeline:
//! clip raw volume at the adaptive cutoff, smooth it, and flag speech via
//! the configured [`SpeakPolicy`]. Ingestion enforces strictly increasing
//! timestamps (badges resend data after a reconnect, and replays must not
//! double-count) and purges samples older than the retention window.

use crate::analytics::calibration::{blend, mean_std, SpeakPolicy};
use crate::analytics::smoother::Smoother;
use crate::config::AnalyticsConfig;
use std::collections::VecDeque;
use tracing::trace;

/// One derived loudness sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Volume as received from the badge
    pub raw: f32,
    /// Raw volume capped at the adaptive cutoff
    pub clipped: f32,
    /// Moving average of clipped volume
    pub smoothed: f32,
    /// Whether this sample counts as speech
    pub speaking: bool,
    /// Sample start, epoch milliseconds
    pub timestamp_ms: i64,
    /// Time this sample covers, milliseconds
    pub duration_ms: i64,
}

/// Streaming analyzer for one member's volume samples.
pub struct VolumeAnalyzer {
    config: AnalyticsConfig,
    samples: VecDeque<Sample>,
    smoother: Smoother,
    policy: SpeakPolicy,
    cutoff: f32,
    last_timestamp_ms: Option<i64>,
}

impl VolumeAnalyzer {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            samples: VecDeque::new(),
            smoother: Smoother::new(config.smoothing_samples),
            policy: SpeakPolicy::from_config(&config.speak_policy),
            cutoff: config.cutoff_prior,
            last_timestamp_ms: None,
            config: config.clone(),
        }
    }

    /// Ingest one raw sample.
    ///
    /// Returns `false` (and changes nothing) when the timestamp is not
    /// strictly greater than the last accepted one. Otherwise purges expired
    /// samples, derives the clipped/smoothed/speaking fields, and appends.
    pub fn add_sample(&mut self, raw: f32, timestamp_ms: i64, duration_ms: i64) -> bool {
        if self.last_timestamp_ms.is_some_and(|last| timestamp_ms <= last) {
            trace!(
                timestamp_ms,
                last = self.last_timestamp_ms,
                "stale sample rejected"
            );
            return false;
        }
        self.purge_before(timestamp_ms - self.config.retention_ms);

        let clipped = raw.min(self.cutoff);
        let smoothed = self.smoother.push(clipped);
        self.policy.observe(timestamp_ms, smoothed);
        let speaking = self.policy.is_speaking(smoothed);

        self.samples.push_back(Sample {
            raw,
            clipped,
            smoothed,
            speaking,
            timestamp_ms,
            duration_ms,
        });
        self.last_timestamp_ms = Some(timestamp_ms);
        true
    }

    /// Recompute the clipping cutoff from the retained raw volumes:
    /// a prior-weighted blend of the configured prior with mean + k*std.
    /// Call periodically (per chunk), not per sample.
    pub fn update_cutoff(&mut self) {
        let (mean, std) = mean_std(self.samples.iter().map(|s| s.raw));
        self.cutoff = blend(
            self.config.cutoff_prior,
            self.config.cutoff_prior_weight,
            mean + self.config.cutoff_spread * std,
        );
    }

    /// Refresh the speak threshold from retained smoothed volumes.
    /// No-op under the RMS policy.
    pub fn update_speak_threshold(&mut self) {
        self.policy.recalibrate(self.samples.iter().map(|s| s.smoothed));
    }

    /// Current clipping cutoff
    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    /// Retained samples, oldest first
    pub fn samples(&self) -> &VecDeque<Sample> {
        &self.samples
    }

    /// Timestamp of the newest accepted sample
    pub fn last_timestamp_ms(&self) -> Option<i64> {
        self.last_timestamp_ms
    }

    /// Speaking intervals within `[window_start_ms, window_end_ms)`.
    pub fn talk_intervals(
        &self,
        member: &str,
        window_start_ms: i64,
        window_end_ms: i64,
    ) -> Vec<crate::analytics::TalkInterval> {
        crate::analytics::intervals::segment(
            member,
            self.samples.iter(),
            window_start_ms,
            window_end_ms,
            self.config.talk_timeout_ms,
            self.config.min_talk_ms,
        )
    }

    fn purge_before(&mut self, horizon_ms: i64) {
        let mut purged = 0usize;
        while let Some(front) = self.samples.front() {
            if front.timestamp_ms >= horizon_ms {
                break;
            }
            self.samples.pop_front();
            purged += 1;
        }
        if purged > 0 {
            trace!(purged, horizon_ms, "expired samples purged");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpeakPolicyConfig;
    use approx::assert_relative_eq;

    fn config() -> AnalyticsConfig {
        AnalyticsConfig::default()
    }

    #[test]
    fn test_monotonicity_rejection_is_noop() {
        let mut analyzer = VolumeAnalyzer::new(&config());
        assert!(analyzer.add_sample(10.0, 1000, 50));
        assert!(analyzer.add_sample(12.0, 1050, 50));

        let before: Vec<Sample> = analyzer.samples().iter().copied().collect();
        let level_before = analyzer.policy.level();

        // duplicate and out-of-order are both rejected without side effects
        assert!(!analyzer.add_sample(99.0, 1050, 50));
        assert!(!analyzer.add_sample(99.0, 900, 50));

        let after: Vec<Sample> = analyzer.samples().iter().copied().collect();
        assert_eq!(before, after);
        assert_relative_eq!(analyzer.policy.level(), level_before);
    }

    #[test]
    fn test_retention_purges_head() {
        let mut analyzer = VolumeAnalyzer::new(&config());
        let retention = config().retention_ms;

        analyzer.add_sample(10.0, 0, 50);
        analyzer.add_sample(10.0, 1000, 50);
        analyzer.add_sample(10.0, retention + 500, 50);

        // the t=0 sample is out of the window relative to the newest
        assert_eq!(analyzer.samples().len(), 2);
        assert_eq!(analyzer.samples().front().unwrap().timestamp_ms, 1000);

        // no sample older than newest - retention survives
        let newest = analyzer.last_timestamp_ms().unwrap();
        assert!(analyzer
            .samples()
            .iter()
            .all(|s| s.timestamp_ms >= newest - retention));
    }

    #[test]
    fn test_clipping_at_cutoff() {
        let mut cfg = config();
        cfg.cutoff_prior = 20.0;
        cfg.smoothing_samples = 1;
        let mut analyzer = VolumeAnalyzer::new(&cfg);

        analyzer.add_sample(200.0, 0, 50);
        let sample = analyzer.samples().back().unwrap();
        assert_relative_eq!(sample.raw, 200.0);
        assert_relative_eq!(sample.clipped, 20.0);
        assert_relative_eq!(sample.smoothed, 20.0);
    }

    #[test]
    fn test_cutoff_calibration_tracks_buffer() {
        let mut cfg = config();
        cfg.cutoff_prior = 50.0;
        cfg.cutoff_prior_weight = 0.9;
        cfg.cutoff_spread = 2.0;
        let mut analyzer = VolumeAnalyzer::new(&cfg);

        for i in 0..20 {
            analyzer.add_sample(10.0, i * 50, 50);
        }
        analyzer.update_cutoff();
        // constant 10: mean 10, std 0 -> 0.9*50 + 0.1*10 = 46
        assert_relative_eq!(analyzer.cutoff(), 46.0, max_relative = 1e-6);
    }

    #[test]
    fn test_speaking_flags_with_threshold_policy() {
        let mut cfg = config();
        cfg.smoothing_samples = 1;
        cfg.speak_policy = SpeakPolicyConfig::Threshold {
            prior: 15.0,
            prior_weight: 1.0,
            spread: 2.0,
        };
        let mut analyzer = VolumeAnalyzer::new(&cfg);

        analyzer.add_sample(10.0, 0, 50);
        analyzer.add_sample(30.0, 50, 50);
        let samples = analyzer.samples();
        assert!(!samples[0].speaking);
        assert!(samples[1].speaking);
    }

    #[test]
    fn test_rms_policy_sees_evictions() {
        // narrow retention so purge and policy window interact
        let mut cfg = config();
        cfg.smoothing_samples = 1;
        cfg.speak_policy = SpeakPolicyConfig::RmsWindow { window_ms: 500 };
        let mut analyzer = VolumeAnalyzer::new(&cfg);

        // loud stretch lifts the mean square
        for i in 0..10 {
            analyzer.add_sample(50.0, i * 100, 100);
        }
        // after the loud stretch ages out of the 500 ms window, a moderate
        // value counts as speech against the now-quiet background
        for i in 10..20 {
            analyzer.add_sample(1.0, i * 100, 100);
        }
        assert!(analyzer.add_sample(10.0, 2000, 100));
        assert!(analyzer.samples().back().unwrap().speaking);
    }
}
