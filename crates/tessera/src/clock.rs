//! # Frame Triggers
//!
//! The wait for the next frame is the only place the service loop blocks.
//! Every trigger watches a cancel channel while waiting so that stopping the
//! service never waits out a whole frame.
//!
//! - [`FrameClock`] - fixed rate, driven by the configured frame rate
//! - [`ChannelTrigger`] - one frame per message pushed from outside
//!   (vsync callbacks, tests, network ticks)

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::config::SchedulerConfig;

/// Decides when the next frame starts.
pub trait FrameTrigger: Send {
    /// Blocks until the next frame is due.
    ///
    /// # Returns
    ///
    /// `false` if `cancel` fired or disconnected first; the loop then ends.
    fn wait_next(&mut self, cancel: &Receiver<()>) -> bool;

    /// Reports how long the last frame took.
    fn frame_completed(&mut self, _elapsed: Duration) {}
}

// =============================================================================
// Fixed rate
// =============================================================================

/// Frame timing statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    /// Shortest frame observed.
    pub min_frame_us: u64,
    /// Longest frame observed.
    pub max_frame_us: u64,
    /// Rolling average frame duration.
    pub avg_frame_us: u64,
    /// Frames that overran their budget.
    pub late_frames: u64,
    /// Frames measured.
    pub total_frames: u64,
}

impl FrameStats {
    fn new(budget: Duration) -> Self {
        Self {
            min_frame_us: u64::MAX,
            max_frame_us: 0,
            avg_frame_us: duration_us(budget),
            late_frames: 0,
            total_frames: 0,
        }
    }
}

/// Fixed-rate frame trigger.
pub struct FrameClock {
    frame_duration: Duration,
    last_frame: Instant,
    frame_count: u64,
    stats: FrameStats,
}

impl FrameClock {
    /// Creates a clock firing `target_fps` times per second.
    #[must_use]
    pub fn new(target_fps: u32) -> Self {
        let frame_duration = Duration::from_micros(1_000_000 / u64::from(target_fps.max(1)));
        Self {
            frame_duration,
            last_frame: Instant::now(),
            frame_count: 0,
            stats: FrameStats::new(frame_duration),
        }
    }

    /// Creates a clock at the configured frame rate.
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.target_fps)
    }

    /// Frames fired so far.
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frame timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Target frame duration.
    #[must_use]
    pub const fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = FrameStats::new(self.frame_duration);
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(60)
    }
}

impl FrameTrigger for FrameClock {
    fn wait_next(&mut self, cancel: &Receiver<()>) -> bool {
        let elapsed = self.last_frame.elapsed();
        if elapsed < self.frame_duration {
            match cancel.recv_timeout(self.frame_duration - elapsed) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
            }
        } else {
            match cancel.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => return false,
            }
        }

        self.last_frame = Instant::now();
        self.frame_count += 1;
        true
    }

    fn frame_completed(&mut self, elapsed: Duration) {
        let elapsed_us = duration_us(elapsed);

        self.stats.total_frames += 1;
        self.stats.min_frame_us = self.stats.min_frame_us.min(elapsed_us);
        self.stats.max_frame_us = self.stats.max_frame_us.max(elapsed_us);
        self.stats.avg_frame_us = (self.stats.avg_frame_us * 15 + elapsed_us) / 16;

        if elapsed > self.frame_duration {
            self.stats.late_frames += 1;
            tracing::trace!(
                "Frame {} over budget: {}us > {}us",
                self.frame_count,
                elapsed_us,
                duration_us(self.frame_duration)
            );
        }
    }
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

// =============================================================================
// Externally pushed
// =============================================================================

/// Fires one frame per message received on a channel.
pub struct ChannelTrigger {
    ticks: Receiver<()>,
}

impl ChannelTrigger {
    /// Wraps an existing tick receiver.
    #[must_use]
    pub const fn new(ticks: Receiver<()>) -> Self {
        Self { ticks }
    }

    /// Creates a trigger and the sender that drives it.
    #[must_use]
    pub fn pair() -> (Sender<()>, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Self::new(rx))
    }
}

impl FrameTrigger for ChannelTrigger {
    fn wait_next(&mut self, cancel: &Receiver<()>) -> bool {
        crossbeam_channel::select! {
            recv(self.ticks) -> tick => tick.is_ok(),
            recv(cancel) -> _ => false,
        }
    }
}
