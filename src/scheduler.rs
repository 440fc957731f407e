// SPDX-License-Identifier: MPL-2.0

//! The consumer side of playback: pops frames, stages them and keeps time.
//!
//! Presentation is paced against absolute deadlines. Each frame moves the
//! deadline forward by its own duration, so time spent writing slots and
//! waiting on the display sink never accumulates into drift. A frame that
//! is already late is shown immediately; frames are never skipped to catch
//! up.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
    frame::FrameRecord, frame_queue::FrameQueue, pipeline::StateHandle, sink::DisplaySink,
    staging::StagingRing,
};

/// Source of time for the scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// What to do after presenting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// The next deadline is ahead; wait this long.
    Sleep(Duration),
    /// The next deadline already passed by this much.
    Lagging(Duration),
}

/// Accumulates absolute presentation deadlines.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadlineTracker {
    next: Option<Instant>,
}

impl DeadlineTracker {
    /// Anchor the first deadline at `now` if nothing has been shown yet.
    pub fn begin(&mut self, now: Instant) {
        self.next.get_or_insert(now);
    }

    /// Move the deadline forward by `duration` and compare it against `now`.
    pub fn advance(&mut self, now: Instant, duration: Duration) -> Pacing {
        let next = self.next.unwrap_or(now) + duration;
        self.next = Some(next);

        match next.checked_duration_since(now) {
            Some(ahead) if !ahead.is_zero() => Pacing::Sleep(ahead),
            _ => Pacing::Lagging(now.duration_since(next)),
        }
    }

    #[cfg(test)]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next
    }
}

/// The staging ring and the sink it feeds. Always used under one lock so a
/// slot write, the sink call for that slot and the rotation happen together.
struct Presenter {
    ring: StagingRing,
    sink: Box<dyn DisplaySink>,
}

/// Consumer loop state. Returned from the worker thread when it exits.
pub struct Scheduler<C = SystemClock> {
    presenter: Mutex<Presenter>,
    clock: C,
    pop_timeout: Duration,
    presented: u64,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(
        ring: StagingRing,
        sink: Box<dyn DisplaySink>,
        clock: C,
        pop_timeout: Duration,
    ) -> Self {
        Self {
            presenter: Mutex::new(Presenter { ring, sink }),
            clock,
            pop_timeout: pop_timeout.max(Duration::from_millis(1)),
            presented: 0,
        }
    }

    /// Frames shown since this scheduler was created.
    #[must_use]
    pub fn presented(&self) -> u64 {
        self.presented
    }

    fn presenter(&self) -> MutexGuard<'_, Presenter> {
        self.presenter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run until the pipeline stops.
    pub fn run(&mut self, state: &StateHandle, queue: &FrameQueue) {
        info!(slots = self.presenter().ring.len(), "Scheduler started");
        let mut deadlines = DeadlineTracker::default();

        while state.is_running() {
            let step = panic::catch_unwind(AssertUnwindSafe(|| {
                self.step(state, queue, &mut deadlines)
            }));

            if let Err(panic) = step {
                error!(reason = panic_message(&*panic), "Scheduler iteration panicked");
            }
        }

        info!(presented = self.presented, "Scheduler finished");
    }

    /// Present at most one frame and wait for its deadline.
    fn step(&mut self, state: &StateHandle, queue: &FrameQueue, deadlines: &mut DeadlineTracker) {
        let Some(frame) = queue.pop(self.pop_timeout) else {
            return;
        };
        if !state.is_running() {
            return;
        }

        deadlines.begin(self.clock.now());
        self.present(&frame);
        self.presented += 1;

        match deadlines.advance(self.clock.now(), frame.duration()) {
            Pacing::Sleep(remaining) => self.sleep_while_running(state, remaining),
            Pacing::Lagging(behind) => {
                warn!(
                    behind_ms = behind.as_millis() as u64,
                    frame = self.presented,
                    "Presentation is lagging behind schedule"
                );
            }
        }
    }

    /// Write `frame` into the current slot, hand the slot to the sink and rotate.
    fn present(&self, frame: &FrameRecord) {
        let mut presenter = self.presenter();
        let Presenter { ring, sink } = &mut *presenter;
        let slot = ring.next_slot();

        let path = match ring.write(frame.payload()) {
            Ok(path) => path,
            Err(why) => {
                error!(?why, slot, "Failed to write staging slot");
                return;
            }
        };

        let started = self.clock.now();
        if let Err(why) = sink.set_background(path) {
            error!(%why, slot, "Failed to set background");
        }
        debug!(
            slot,
            latency_ms = self.clock.now().duration_since(started).as_millis() as u64,
            "Display sink returned"
        );

        ring.rotate();
    }

    /// Sleep in steps no longer than the pop timeout so a stop is noticed.
    fn sleep_while_running(&self, state: &StateHandle, duration: Duration) {
        let wake = self.clock.now() + duration;
        while state.is_running() {
            let Some(remaining) = wake.checked_duration_since(self.clock.now()) else {
                break;
            };
            if remaining.is_zero() {
                break;
            }
            self.clock.sleep(remaining.min(self.pop_timeout));
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
