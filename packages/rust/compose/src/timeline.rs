//! Clip placement on the output timeline.
//!
//! Adjacent clips overlap by the crossfade length, so clip `i` starts at
//! `sum(d_0..d_{i-1}) - i * o` and the timeline lasts `sum(d) - (n-1) * o`.

use tracing::warn;

/// Where one clip sits on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipPlacement {
    pub start_secs: f64,
    pub duration_secs: f64,
    /// Blend from black or the previous clip.
    pub fade_in_secs: f64,
    /// Blend to black or the next clip.
    pub fade_out_secs: f64,
}

impl ClipPlacement {
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }
}

/// Placement of every clip plus the overlap actually applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub clips: Vec<ClipPlacement>,
    /// Crossfade length after clamping.
    pub overlap_secs: f64,
    pub total_secs: f64,
}

impl Timeline {
    /// Lay out clips of the given durations with `overlap` seconds of
    /// crossfade between neighbours.
    ///
    /// The overlap is clamped to half the shortest clip so no transition
    /// can swallow a whole clip. A single clip never overlaps anything, but
    /// still fades from and to black over the clamped length.
    pub fn build(durations: &[f64], overlap: f64) -> Self {
        let requested = overlap.max(0.0);
        let shortest = durations.iter().copied().fold(f64::INFINITY, f64::min);
        let fade_secs = if durations.is_empty() {
            0.0
        } else {
            let limit = shortest / 2.0;
            if requested > limit {
                warn!(
                    requested,
                    clamped = limit,
                    "crossfade longer than half the shortest clip, clamping"
                );
                limit
            } else {
                requested
            }
        };
        let overlap_secs = if durations.len() < 2 { 0.0 } else { fade_secs };

        let mut clips = Vec::with_capacity(durations.len());
        let mut cursor = 0.0;
        for (i, &duration_secs) in durations.iter().enumerate() {
            let start_secs = if i == 0 { 0.0 } else { cursor - overlap_secs };
            clips.push(ClipPlacement {
                start_secs,
                duration_secs,
                fade_in_secs: fade_secs,
                fade_out_secs: fade_secs,
            });
            cursor = start_secs + duration_secs;
        }

        Self {
            clips,
            overlap_secs,
            total_secs: cursor,
        }
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}
