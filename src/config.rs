//! Runtime configuration
//!
//! All tunables live here, grouped by subsystem, with defaults matching the
//! deployed badge firmware and hub behavior. A JSON file can override any
//! subset; missing fields fall back to the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Connection lifecycle tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Minimum quiet period after a disconnect before the next attempt (ms)
    pub cooldown_ms: u64,
    /// Delay before retrying when another device holds the connection slot (ms)
    pub lock_retry_ms: u64,
    /// Inactivity watchdog timeout (ms). The only reclaim path for a radio
    /// that goes silent without reporting an error.
    pub watchdog_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 500,
            lock_retry_ms: 1000,
            watchdog_ms: 15_000,
        }
    }
}

/// Badge protocol tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Recording timeout sent with the start-recording request (minutes)
    pub recording_timeout_minutes: u16,
    /// Lower bound of the plausible battery voltage range (exclusive)
    pub voltage_min: f32,
    /// Upper bound of the plausible battery voltage range (exclusive)
    pub voltage_max: f32,
    /// How far back to request data when no chunk has been received yet (s)
    pub resync_lookback_secs: u32,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            recording_timeout_minutes: 5,
            // Firmware revisions disagree on the lower bound (1 vs 2 units);
            // these match the nRF_mobile-era badges.
            voltage_min: 1.0,
            voltage_max: 4.0,
            resync_lookback_secs: 60,
        }
    }
}

/// Policy used to decide whether a smoothed sample counts as speech
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpeakPolicyConfig {
    /// Adaptive threshold blended from a fixed prior and the buffer's
    /// smoothed-volume statistics, refreshed by periodic recalibration
    Threshold {
        prior: f32,
        prior_weight: f32,
        spread: f32,
    },
    /// Running mean of squared smoothed volume over a short window,
    /// maintained incrementally
    RmsWindow { window_ms: i64 },
}

/// Loudness analytics tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Sample retention window (ms); older samples are purged from the head
    pub retention_ms: i64,
    /// Circular moving-average length for volume smoothing (min 1)
    pub smoothing_samples: usize,
    /// Fixed prior for the clipping cutoff (volume units, 0-255 scale)
    pub cutoff_prior: f32,
    /// Weight of the prior when blending with observed statistics
    pub cutoff_prior_weight: f32,
    /// Standard-deviation multiplier in the observed part of the blend
    pub cutoff_spread: f32,
    /// Maximum gap between consecutive speaking samples in one interval (ms)
    pub talk_timeout_ms: i64,
    /// Minimum interval length worth reporting (ms)
    pub min_talk_ms: i64,
    /// Speak-decision policy
    pub speak_policy: SpeakPolicyConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            retention_ms: 300_000,
            smoothing_samples: 5,
            cutoff_prior: 50.0,
            cutoff_prior_weight: 0.9,
            cutoff_spread: 2.0,
            talk_timeout_ms: 1000,
            min_talk_ms: 200,
            speak_policy: SpeakPolicyConfig::RmsWindow { window_ms: 30_000 },
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub dialogue: DialogueConfig,
    pub analytics: AnalyticsConfig,
}

impl Config {
    /// Load configuration from a JSON file, filling missing fields with
    /// defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.link.cooldown_ms, 500);
        assert_eq!(config.link.watchdog_ms, 15_000);
        assert_eq!(config.dialogue.recording_timeout_minutes, 5);
        assert_eq!(config.analytics.smoothing_samples, 5);
        assert_eq!(
            config.analytics.speak_policy,
            SpeakPolicyConfig::RmsWindow { window_ms: 30_000 }
        );
    }

    #[test]
    fn test_partial_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"link": {{"watchdog_ms": 20000}},
                "analytics": {{"speak_policy": {{"kind": "threshold",
                    "prior": 30.0, "prior_weight": 0.9, "spread": 2.0}}}}}}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.link.watchdog_ms, 20_000);
        // untouched fields keep their defaults
        assert_eq!(config.link.cooldown_ms, 500);
        assert_eq!(config.dialogue.voltage_max, 4.0);
        match config.analytics.speak_policy {
            SpeakPolicyConfig::Threshold { prior, .. } => assert_eq!(prior, 30.0),
            other => panic!("unexpected policy: {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(Config::load("/nonexistent/badgelink.json").is_err());
    }
}
