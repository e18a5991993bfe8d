//! # Scheduler Service
//!
//! Runs a [`Scheduler`] on its own thread, one frame per trigger.
//!
//! The loop re-arms only while `running` is set. [`SchedulerService::stop`]
//! clears the flag and drops the cancel sender, which wakes the pending
//! trigger wait. A frame already in progress always finishes. The scheduler
//! is handed back even when a frame error ended the loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::Sender;

use crate::clock::FrameTrigger;
use crate::error::{ScheduleError, ScheduleResult};
use crate::schedule::Scheduler;

type LoopOutcome = (Scheduler, ScheduleResult<()>);

/// What [`SchedulerService::stop`] hands back.
#[derive(Debug)]
pub struct StoppedService {
    /// The scheduler, with its frame counter and store intact.
    pub scheduler: Scheduler,
    /// The frame error that ended the loop early, if any.
    pub error: Option<ScheduleError>,
}

impl StoppedService {
    /// The scheduler if the loop ended cleanly.
    ///
    /// # Errors
    ///
    /// The frame error that ended the loop early. The scheduler is dropped.
    pub fn into_result(self) -> ScheduleResult<Scheduler> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.scheduler),
        }
    }
}

/// Background frame loop.
pub struct SchedulerService {
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<LoopOutcome>>,
}

impl SchedulerService {
    /// Starts the frame loop.
    ///
    /// # Arguments
    ///
    /// * `scheduler` - Resolved schedule; handed back by [`SchedulerService::stop`]
    /// * `trigger` - Decides when each frame starts
    ///
    /// # Errors
    ///
    /// [`ScheduleError::Spawn`] if the thread cannot be created.
    pub fn start<T>(scheduler: Scheduler, mut trigger: T) -> ScheduleResult<Self>
    where
        T: FrameTrigger + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let frames = Arc::new(AtomicU64::new(scheduler.frame_count()));
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);

        let loop_running = Arc::clone(&running);
        let loop_frames = Arc::clone(&frames);
        let handle = thread::Builder::new()
            .name("tessera-scheduler".into())
            .spawn(move || {
                let mut scheduler = scheduler;
                let mut outcome = Ok(());

                while loop_running.load(Ordering::Acquire) && trigger.wait_next(&cancel_rx) {
                    if !loop_running.load(Ordering::Acquire) {
                        break;
                    }
                    let start = Instant::now();
                    match scheduler.run_frame() {
                        Ok(frame) => loop_frames.store(frame.count, Ordering::Release),
                        Err(err) => {
                            tracing::error!(
                                "Frame {} failed, stopping scheduler: {}",
                                scheduler.frame_count(),
                                err
                            );
                            loop_frames.store(scheduler.frame_count(), Ordering::Release);
                            loop_running.store(false, Ordering::Release);
                            outcome = Err(err);
                            break;
                        }
                    }
                    trigger.frame_completed(start.elapsed());
                }

                tracing::debug!("Scheduler loop exited after {} frames", scheduler.frame_count());
                (scheduler, outcome)
            })
            .map_err(|e| ScheduleError::Spawn(e.to_string()))?;

        tracing::info!("Scheduler service started");
        Ok(Self {
            running,
            frames,
            cancel: Some(cancel_tx),
            handle: Some(handle),
        })
    }

    /// Returns true while the loop keeps re-arming.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Last completed frame number.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Stops the loop and hands the scheduler back, together with the frame
    /// error that stopped it early, if any.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::ServicePanicked`] if the loop thread died. The
    /// scheduler is lost then.
    pub fn stop(mut self) -> ScheduleResult<StoppedService> {
        let (scheduler, outcome) = self.shutdown().ok_or(ScheduleError::ServicePanicked)?;
        tracing::info!("Scheduler service stopped after {} frames", scheduler.frame_count());
        Ok(StoppedService {
            scheduler,
            error: outcome.err(),
        })
    }

    fn shutdown(&mut self) -> Option<LoopOutcome> {
        self.running.store(false, Ordering::Release);
        self.cancel.take();
        self.handle.take().and_then(|handle| handle.join().ok())
    }
}

impl Drop for SchedulerService {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}
