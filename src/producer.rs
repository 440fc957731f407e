// SPDX-License-Identifier: MPL-2.0

//! The producer side of playback: walks the frame sequence forever.

use std::{
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use tracing::{debug, error, info};

use crate::{
    frame::FrameSequence,
    frame_queue::{FrameQueue, PushOutcome},
    pipeline::StateHandle,
    scheduler::panic_message,
};

pub struct Producer {
    sequence: FrameSequence,
    push_timeout: Duration,
    /// Index of the next frame to push.
    cursor: usize,
    loops: u64,
}

impl Producer {
    pub fn new(sequence: FrameSequence, push_timeout: Duration) -> Self {
        Self {
            sequence,
            push_timeout: push_timeout.max(Duration::from_millis(1)),
            cursor: 0,
            loops: 0,
        }
    }

    /// Push frames in order, wrapping to the first after the last, until the
    /// pipeline stops or the queue closes.
    ///
    /// A push that times out on a full queue is retried with the same frame.
    pub fn run(&mut self, state: &StateHandle, queue: &FrameQueue) {
        info!(frames = self.sequence.len(), "Producer started");

        while state.is_running() {
            let step = panic::catch_unwind(AssertUnwindSafe(|| self.step(queue)));

            match step {
                Ok(PushOutcome::Closed) => break,
                Ok(PushOutcome::Pushed | PushOutcome::TimedOut) => {}
                Err(panic) => {
                    error!(reason = panic_message(&*panic), "Producer iteration panicked");
                }
            }
        }

        info!(loops = self.loops, "Producer finished");
    }

    fn step(&mut self, queue: &FrameQueue) -> PushOutcome {
        let frame = self.sequence.get(self.cursor).clone();
        let outcome = queue.push(frame, self.push_timeout);

        if outcome == PushOutcome::Pushed {
            self.cursor += 1;
            if self.cursor == self.sequence.len() {
                self.cursor = 0;
                self.loops += 1;
                debug!(loops = self.loops, "Restarting frame sequence");
            }
        }

        outcome
    }
}
