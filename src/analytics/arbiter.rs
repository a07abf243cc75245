//! Cross-member arbitration
//!
//! Resolves, per fixed time increment, which member (if any) is the loudest
//! qualifying speaker. Implemented as a merge-style joint scan: every member
//! keeps a monotonic cursor into their ordered sample buffer, advanced and
//! never rewound, so the whole window costs O(total samples) rather than
//! O(members x increments). A cursor whose next sample starts beyond the
//! current increment simply holds position, so one member's gap never resets
//! anyone else's progress.

use crate::analytics::intervals::{segment, TalkInterval};
use crate::analytics::volume::{Sample, VolumeAnalyzer};
use tracing::debug;

/// Arbitrate `[window_start_ms, window_end_ms)` in `increment_ms` steps over
/// `members` (in registration order) and segment the winning increments into
/// mutually exclusive turn intervals.
///
/// Ties on smoothed volume keep the earliest-registered member: a later
/// member must be strictly louder to take an increment.
pub fn arbitrate(
    members: &[(String, VolumeAnalyzer)],
    window_start_ms: i64,
    window_end_ms: i64,
    increment_ms: i64,
    talk_timeout_ms: i64,
    min_talk_ms: i64,
) -> Vec<TalkInterval> {
    if members.is_empty() || increment_ms <= 0 || window_start_ms >= window_end_ms {
        return Vec::new();
    }

    let mut cursors = vec![0usize; members.len()];
    let mut winners: Vec<Vec<Sample>> = vec![Vec::new(); members.len()];

    let mut t = window_start_ms;
    while t < window_end_ms {
        let t_end = (t + increment_ms).min(window_end_ms);
        let mut best: Option<(usize, f32)> = None;

        for (i, (_, analyzer)) in members.iter().enumerate() {
            let samples = analyzer.samples();
            // skip samples that ended before this increment
            while cursors[i] < samples.len()
                && samples[cursors[i]].timestamp_ms + samples[cursors[i]].duration_ms <= t
            {
                cursors[i] += 1;
            }
            let Some(sample) = samples.get(cursors[i]) else {
                continue;
            };
            if sample.timestamp_ms >= t_end {
                // this member's data starts past the increment; hold the cursor
                continue;
            }
            if !sample.speaking {
                continue;
            }
            if best.is_none_or(|(_, loudest)| sample.smoothed > loudest) {
                best = Some((i, sample.smoothed));
            }
        }

        if let Some((i, smoothed)) = best {
            winners[i].push(Sample {
                raw: smoothed,
                clipped: smoothed,
                smoothed,
                speaking: true,
                timestamp_ms: t,
                duration_ms: t_end - t,
            });
        }
        t = t_end;
    }

    let mut turns = Vec::new();
    for (i, (name, _)) in members.iter().enumerate() {
        debug!(member = %name, increments = winners[i].len(), "arbitration winners");
        turns.extend(segment(
            name,
            winners[i].iter(),
            window_start_ms,
            window_end_ms,
            talk_timeout_ms,
            min_talk_ms,
        ));
    }
    turns.sort_by_key(|interval| interval.start_ms);
    turns
}
