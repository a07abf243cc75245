//! Speak-decision calibration
//!
//! Two interchangeable policies decide whether a smoothed volume counts as
//! speech, selected at construction:
//!
//! - [`SpeakPolicy::Threshold`]: an adaptive threshold blended from a fixed
//!   prior and the buffer statistics, refreshed by periodic recalibration.
//! - [`SpeakPolicy::RmsWindow`]: the running mean of squared smoothed volume
//!   over a short window. Maintained incrementally (running sum and count,
//!   decremented exactly when an entry ages out) so cost per sample stays
//!   O(1) amortized regardless of window size.

use crate::config::SpeakPolicyConfig;
use std::collections::VecDeque;

/// Runtime state of the speak-decision policy
#[derive(Debug, Clone)]
pub enum SpeakPolicy {
    Threshold {
        prior: f32,
        prior_weight: f32,
        spread: f32,
        threshold: f32,
    },
    RmsWindow {
        window_ms: i64,
        entries: VecDeque<(i64, f64)>,
        sum_squares: f64,
    },
}

impl SpeakPolicy {
    pub fn from_config(config: &SpeakPolicyConfig) -> Self {
        match *config {
            SpeakPolicyConfig::Threshold {
                prior,
                prior_weight,
                spread,
            } => SpeakPolicy::Threshold {
                prior,
                prior_weight,
                spread,
                threshold: prior,
            },
            SpeakPolicyConfig::RmsWindow { window_ms } => SpeakPolicy::RmsWindow {
                window_ms,
                entries: VecDeque::new(),
                sum_squares: 0.0,
            },
        }
    }

    /// Feed one smoothed value into the policy's window state.
    pub fn observe(&mut self, timestamp_ms: i64, smoothed: f32) {
        if let SpeakPolicy::RmsWindow {
            window_ms,
            entries,
            sum_squares,
        } = self
        {
            let horizon = timestamp_ms - *window_ms;
            while let Some(&(at, sq)) = entries.front() {
                if at >= horizon {
                    break;
                }
                entries.pop_front();
                *sum_squares -= sq;
            }
            let sq = (smoothed as f64) * (smoothed as f64);
            entries.push_back((timestamp_ms, sq));
            *sum_squares += sq;
        }
    }

    /// Whether `smoothed` counts as speech right now. For the RMS policy the
    /// comparison runs against the window including the value itself
    /// (observe first, then ask).
    pub fn is_speaking(&self, smoothed: f32) -> bool {
        match self {
            SpeakPolicy::Threshold { threshold, .. } => smoothed > *threshold,
            SpeakPolicy::RmsWindow {
                entries,
                sum_squares,
                ..
            } => {
                if entries.is_empty() {
                    return false;
                }
                let mean_square = sum_squares / entries.len() as f64;
                (smoothed as f64) * (smoothed as f64) > mean_square
            }
        }
    }

    /// Refresh the adaptive threshold from the retained smoothed volumes.
    /// No-op for the RMS policy, which calibrates itself continuously.
    pub fn recalibrate(&mut self, smoothed_values: impl Iterator<Item = f32>) {
        if let SpeakPolicy::Threshold {
            prior,
            prior_weight,
            spread,
            threshold,
        } = self
        {
            let (mean, std) = mean_std(smoothed_values);
            *threshold = blend(*prior, *prior_weight, mean + *spread * std);
        }
    }

    /// Current decision level, for diagnostics
    pub fn level(&self) -> f64 {
        match self {
            SpeakPolicy::Threshold { threshold, .. } => *threshold as f64,
            SpeakPolicy::RmsWindow {
                entries,
                sum_squares,
                ..
            } => {
                if entries.is_empty() {
                    0.0
                } else {
                    sum_squares / entries.len() as f64
                }
            }
        }
    }
}

/// Mean and population standard deviation of a value stream
pub(crate) fn mean_std(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let mut sum = 0.0f64;
    let mut sum_squares = 0.0f64;
    let mut count = 0usize;
    for v in values {
        sum += v as f64;
        sum_squares += (v as f64) * (v as f64);
        count += 1;
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let variance = (sum_squares / count as f64 - mean * mean).max(0.0);
    (mean as f32, variance.sqrt() as f32)
}

/// Prior-weighted blend of a fixed prior with an observed statistic
pub(crate) fn blend(prior: f32, prior_weight: f32, observed: f32) -> f32 {
    prior * prior_weight + observed * (1.0 - prior_weight)
}
