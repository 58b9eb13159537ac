// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Playback controller: arbitrates between live tailing and scrubbing a
//! cached window of historical envelopes.
//!
//! # Modes
//!
//! - **Live**: the controller only tracks the latest observed time; the cache
//!   is ignored.
//! - **Replay**: a cursor moves through the cached window. `seek` jumps,
//!   `play`/`pause` toggle a fixed-period clock that advances the cursor by
//!   `period × rate` per whole period of elapsed time.
//!
//! `Live → Replay` happens on `seek` or `play`; `Replay → Live` only on
//! [`PlaybackController::resume_live`].
//!
//! Frames are delivered at most once per pass: a forward move delivers the
//! frames in `(previous delivery point, cursor]`. A backward seek restarts the
//! pass from the window start and flags the batch as a rewind so the owner
//! can reset its replay state before applying it.

use noema_proto::Envelope;
use std::time::Duration;
use thiserror::Error;

use crate::timeline::window_times;

/// Default tick period of the replay clock.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(100);

/// Playback mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Tail the live stream.
    #[default]
    Live,
    /// Scrub through the cached window.
    Replay,
}

/// Rejected playback commands.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum PlaybackError {
    /// Rates must be finite and strictly positive.
    #[error("invalid playback rate {0}")]
    InvalidRate(f64),
    /// The command only makes sense in replay mode.
    #[error("not in replay mode")]
    NotInReplay,
}

/// A cached envelope with its derived time.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedFrame {
    /// Derived time.
    pub time_ms: i64,
    /// The envelope.
    pub envelope: Envelope,
}

/// One batch of frames released by a seek or a clock tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delivery {
    /// The batch restarts from the window start.
    pub rewind: bool,
    /// Cursor after the move.
    pub cursor_ms: i64,
    /// Newly passed frames, ascending by derived time.
    pub frames: Vec<TimedFrame>,
}

/// Result of feeding elapsed wall time to the replay clock.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Not playing, or less than one period accumulated.
    Idle,
    /// The cursor moved.
    Advanced(Delivery),
    /// The cursor hit the end of the window; playback paused itself.
    ReachedEnd(Delivery),
}

#[derive(Debug, Clone)]
struct Window {
    from_ms: i64,
    to_ms: i64,
    frames: Vec<TimedFrame>,
}

/// Live/replay arbiter with a fixed-period replay clock.
#[derive(Debug, Clone)]
pub struct PlaybackController {
    mode: PlaybackMode,
    playing: bool,
    rate: f64,
    period: Duration,
    accumulated: Duration,
    cursor_ms: f64,
    next: usize,
    window: Option<Window>,
    live_time_ms: Option<i64>,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD)
    }
}

impl PlaybackController {
    /// Controller in live mode with the given clock period (minimum 1ms).
    pub fn new(period: Duration) -> Self {
        Self {
            mode: PlaybackMode::Live,
            playing: false,
            rate: 1.0,
            period: period.max(Duration::from_millis(1)),
            accumulated: Duration::ZERO,
            cursor_ms: 0.0,
            next: 0,
            window: None,
            live_time_ms: None,
        }
    }

    /// Current mode.
    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    /// True while the replay clock runs.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Playback rate multiplier.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Clock period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Replay cursor, whole milliseconds.
    #[allow(clippy::cast_possible_truncation)]
    pub fn cursor_ms(&self) -> i64 {
        self.cursor_ms.floor() as i64
    }

    /// Time the rest of the client should treat as "now": the cursor while
    /// replaying, the latest observed live time otherwise.
    pub fn current_time_ms(&self) -> Option<i64> {
        match self.mode {
            PlaybackMode::Replay => Some(self.cursor_ms()),
            PlaybackMode::Live => self.live_time_ms,
        }
    }

    /// Record the latest live time. Ignored by the cache.
    pub fn observe_live(&mut self, time_ms: i64) {
        self.live_time_ms = Some(self.live_time_ms.map_or(time_ms, |t| t.max(time_ms)));
    }

    /// Cached window bounds.
    pub fn cached_range(&self) -> Option<(i64, i64)> {
        self.window.as_ref().map(|w| (w.from_ms, w.to_ms))
    }

    /// Cached frames in delivery order.
    pub fn cached_frames(&self) -> &[TimedFrame] {
        self.window.as_ref().map_or(&[], |w| w.frames.as_slice())
    }

    /// Replace the cached window and reset the delivery point to its start.
    ///
    /// Frames are stamped with derived times and sorted stably by
    /// `(time, sequence)`.
    pub fn set_cache(&mut self, frames: Vec<Envelope>, range: (i64, i64)) {
        let (from_ms, to_ms) = (range.0.min(range.1), range.0.max(range.1));
        let times = window_times(&frames, from_ms);
        let mut frames: Vec<TimedFrame> = times
            .into_iter()
            .zip(frames)
            .map(|(time_ms, envelope)| TimedFrame { time_ms, envelope })
            .collect();
        frames.sort_by_key(|f| (f.time_ms, f.envelope.sequence));
        self.window = Some(Window {
            from_ms,
            to_ms,
            frames,
        });
        self.next = 0;
        self.cursor_ms = ms_f64(from_ms);
        self.accumulated = Duration::ZERO;
    }

    /// True when `[from, to]` lies within the cached window.
    pub fn has_cache(&self, from_ms: i64, to_ms: i64) -> bool {
        self.window
            .as_ref()
            .is_some_and(|w| w.from_ms <= from_ms && to_ms <= w.to_ms && from_ms <= to_ms)
    }

    /// Move the cursor to `t` (entering replay) and deliver the frames passed.
    pub fn seek(&mut self, t_ms: i64) -> Delivery {
        self.mode = PlaybackMode::Replay;
        let target = ms_f64(t_ms);
        let rewind = target < self.cursor_ms;
        if rewind {
            self.next = 0;
        }
        self.cursor_ms = target;
        let mut delivery = self.release();
        delivery.rewind = rewind;
        delivery
    }

    /// Start the replay clock (entering replay).
    pub fn play(&mut self) {
        if self.mode == PlaybackMode::Live {
            self.mode = PlaybackMode::Replay;
            if let Some((from, _)) = self.cached_range() {
                if self.next == 0 {
                    self.cursor_ms = ms_f64(from);
                }
            }
        }
        self.playing = true;
        self.accumulated = Duration::ZERO;
    }

    /// Stop the replay clock, keeping the cursor.
    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        if self.mode != PlaybackMode::Replay {
            return Err(PlaybackError::NotInReplay);
        }
        self.playing = false;
        Ok(())
    }

    /// Return to live tailing. The cache is kept for later scrubbing.
    pub fn resume_live(&mut self) {
        self.mode = PlaybackMode::Live;
        self.playing = false;
        self.accumulated = Duration::ZERO;
    }

    /// Set the playback rate.
    pub fn set_rate(&mut self, rate: f64) -> Result<(), PlaybackError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PlaybackError::InvalidRate(rate));
        }
        self.rate = rate;
        Ok(())
    }

    /// Feed elapsed wall time to the replay clock.
    ///
    /// Every whole period advances the cursor by `period × rate`; the
    /// remainder carries over to the next call.
    pub fn advance(&mut self, elapsed: Duration) -> TickOutcome {
        if !self.playing || self.mode != PlaybackMode::Replay {
            return TickOutcome::Idle;
        }
        self.accumulated += elapsed;
        let mut steps = 0_u32;
        while self.accumulated >= self.period {
            self.accumulated -= self.period;
            steps = steps.saturating_add(1);
        }
        if steps == 0 {
            return TickOutcome::Idle;
        }
        let step_ms = self.period.as_secs_f64() * 1000.0 * self.rate;
        self.cursor_ms += step_ms * f64::from(steps);

        let end = self.window.as_ref().map(|w| ms_f64(w.to_ms));
        match end {
            Some(end) if self.cursor_ms >= end => {
                self.cursor_ms = end;
                let delivery = self.release();
                self.playing = false;
                self.accumulated = Duration::ZERO;
                TickOutcome::ReachedEnd(delivery)
            }
            None => {
                self.playing = false;
                TickOutcome::ReachedEnd(Delivery {
                    rewind: false,
                    cursor_ms: self.cursor_ms(),
                    frames: Vec::new(),
                })
            }
            Some(_) => TickOutcome::Advanced(self.release()),
        }
    }

    /// Drop the cache and return to live mode (session switch).
    pub fn reset(&mut self) {
        *self = Self::new(self.period);
    }

    fn release(&mut self) -> Delivery {
        let cursor = self.cursor_ms();
        let mut frames = Vec::new();
        if let Some(window) = &self.window {
            while let Some(frame) = window.frames.get(self.next) {
                if frame.time_ms > cursor {
                    break;
                }
                frames.push(frame.clone());
                self.next += 1;
            }
        }
        Delivery {
            rewind: false,
            cursor_ms: cursor,
            frames,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ms_f64(ms: i64) -> f64 {
    ms as f64
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use noema_proto::decode_envelope_value;

    fn frame(t: i64, sequence: u64) -> Envelope {
        decode_envelope_value(serde_json::json!({
            "message_type": "somatic_state",
            "timestamp_utc": "2025-01-01T00:00:00Z",
            "session_id": "s-1",
            "subject_id": "subj",
            "sequence": sequence,
            "payload": {"t_rel_ms": t}
        }))
        .unwrap()
    }

    fn times(d: &Delivery) -> Vec<i64> {
        d.frames.iter().map(|f| f.time_ms).collect()
    }

    fn controller_with(ts: &[i64], range: (i64, i64)) -> PlaybackController {
        let mut pc = PlaybackController::new(Duration::from_millis(100));
        let frames = ts
            .iter()
            .zip(1_u64..)
            .map(|(t, seq)| frame(*t, seq))
            .collect();
        pc.set_cache(frames, range);
        pc
    }

    #[test]
    fn seek_delivers_each_frame_once() {
        let mut pc = controller_with(&[0, 500, 1200], (0, 2000));
        assert_eq!(pc.mode(), PlaybackMode::Live);
        let d = pc.seek(1000);
        assert_eq!(pc.mode(), PlaybackMode::Replay);
        assert!(!d.rewind);
        assert_eq!(times(&d), vec![0, 500]);
        let d = pc.seek(1300);
        assert_eq!(times(&d), vec![1200]);
        assert!(pc.seek(1900).frames.is_empty());
    }

    #[test]
    fn backward_seek_is_a_rewind_from_window_start() {
        let mut pc = controller_with(&[0, 500, 1200], (0, 2000));
        pc.seek(1300);
        let d = pc.seek(600);
        assert!(d.rewind);
        assert_eq!(times(&d), vec![0, 500]);
        assert_eq!(pc.cursor_ms(), 600);
    }

    #[test]
    fn cache_window_containment() {
        let pc = controller_with(&[], (1000, 5000));
        assert!(pc.has_cache(2000, 4000));
        assert!(pc.has_cache(1000, 5000));
        assert!(!pc.has_cache(0, 6000));
        assert!(!pc.has_cache(4000, 6000));
        assert!(!PlaybackController::default().has_cache(0, 0));
    }

    #[test]
    fn frames_sort_by_time_then_sequence() {
        let mut pc = PlaybackController::default();
        pc.set_cache(vec![frame(300, 5), frame(100, 9), frame(100, 2)], (0, 1000));
        let order: Vec<_> = pc
            .cached_frames()
            .iter()
            .map(|f| (f.time_ms, f.envelope.sequence))
            .collect();
        assert_eq!(order, vec![(100, 2), (100, 9), (300, 5)]);
    }

    #[test]
    fn clock_advances_by_period_times_rate_and_pauses_at_end() {
        let mut pc = controller_with(&[0, 250, 700], (0, 800));
        assert_eq!(pc.advance(Duration::from_secs(1)), TickOutcome::Idle);
        pc.play();
        pc.set_rate(2.0).unwrap();

        // Half a period accumulates without moving.
        assert_eq!(pc.advance(Duration::from_millis(50)), TickOutcome::Idle);
        let TickOutcome::Advanced(d) = pc.advance(Duration::from_millis(60)) else {
            panic!("expected the cursor to move");
        };
        assert_eq!(d.cursor_ms, 200);
        assert_eq!(times(&d), vec![0]);

        let TickOutcome::Advanced(d) = pc.advance(Duration::from_millis(190)) else {
            panic!("expected the cursor to move");
        };
        assert_eq!(d.cursor_ms, 600);
        assert_eq!(times(&d), vec![250]);

        let TickOutcome::ReachedEnd(d) = pc.advance(Duration::from_millis(500)) else {
            panic!("expected the end of the window");
        };
        assert_eq!(d.cursor_ms, 800);
        assert_eq!(times(&d), vec![700]);
        assert!(!pc.is_playing());
        assert_eq!(pc.mode(), PlaybackMode::Replay);
        assert_eq!(pc.advance(Duration::from_secs(5)), TickOutcome::Idle);
    }

    #[test]
    fn commands_are_validated() {
        let mut pc = PlaybackController::default();
        assert_eq!(pc.pause(), Err(PlaybackError::NotInReplay));
        assert!(matches!(pc.set_rate(0.0), Err(PlaybackError::InvalidRate(_))));
        assert!(matches!(pc.set_rate(f64::NAN), Err(PlaybackError::InvalidRate(_))));
        assert!(pc.set_rate(0.5).is_ok());
        assert_eq!(pc.rate(), 0.5);
    }

    #[test]
    fn live_time_and_mode_switches() {
        let mut pc = controller_with(&[0, 500], (0, 1000));
        pc.observe_live(4000);
        pc.observe_live(3500);
        assert_eq!(pc.current_time_ms(), Some(4000));
        pc.seek(250);
        assert_eq!(pc.current_time_ms(), Some(250));
        pc.resume_live();
        assert_eq!(pc.mode(), PlaybackMode::Live);
        assert_eq!(pc.current_time_ms(), Some(4000));
        assert_eq!(pc.cached_range(), Some((0, 1000)));

        pc.reset();
        assert_eq!(pc.cached_range(), None);
        assert_eq!(pc.current_time_ms(), None);
    }
}
