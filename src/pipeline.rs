// SPDX-License-Identifier: MPL-2.0

//! Running state and lifecycle of the playback workers.
//!
//! ```text
//! Producer ──push──► FrameQueue ──pop──► Scheduler ──► StagingRing ──► DisplaySink
//!     ▲                                      ▲
//!     └──────────── StateHandle ─────────────┘
//! ```

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use bg_animator_config::Config;
use tracing::{error, info, warn};

use crate::{
    error::PipelineError,
    frame::FrameSequence,
    frame_queue::{QueueStats, SharedFrameQueue, new_shared_queue},
    producer::Producer,
    scheduler::{Scheduler, SystemClock, panic_message},
    sink::DisplaySink,
    staging::StagingArea,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Stopped = 0,
    Running = 1,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Running,
            _ => PipelineState::Stopped,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Stopped => f.write_str("stopped"),
            PipelineState::Running => f.write_str("running"),
        }
    }
}

/// Shared handle to the pipeline state, polled by both workers.
#[derive(Debug, Clone, Default)]
pub struct StateHandle(Arc<AtomicU8>);

impl StateHandle {
    #[must_use]
    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.get() == PipelineState::Running
    }

    /// Move from `from` to `to`. Only `Stopped -> Running` and
    /// `Running -> Stopped` are allowed.
    pub fn transition(&self, from: PipelineState, to: PipelineState) -> Result<(), PipelineError> {
        let invalid = || PipelineError::InvalidTransition { from, to };
        if from == to {
            return Err(invalid());
        }

        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| PipelineError::InvalidTransition {
                from: PipelineState::from_u8(current),
                to,
            })
    }
}

/// Playback tunables taken from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSettings {
    pub queue_capacity: usize,
    pub staging_slots: usize,
    /// Bounded wait of both push and pop.
    pub timeout: Duration,
}

impl From<&Config> for PlaybackSettings {
    fn from(config: &Config) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            staging_slots: config.staging_slots,
            timeout: config.pop_timeout(),
        }
    }
}

struct Workers {
    producer: JoinHandle<()>,
    scheduler: JoinHandle<Scheduler>,
}

/// Owns the frame sequence, the staging area and the two worker threads.
pub struct Pipeline {
    state: StateHandle,
    sequence: FrameSequence,
    settings: PlaybackSettings,
    queue: SharedFrameQueue,
    staging: StagingArea,
    /// Parked here while stopped, moved into its thread while running.
    scheduler: Option<Scheduler>,
    workers: Option<Workers>,
    released: bool,
}

impl Pipeline {
    pub fn new(
        sequence: FrameSequence,
        staging: StagingArea,
        sink: Box<dyn DisplaySink>,
        settings: PlaybackSettings,
    ) -> Result<Self, PipelineError> {
        let ring = match staging.ring(settings.staging_slots) {
            Ok(ring) => ring,
            Err(why) => {
                if let Err(why) = staging.release() {
                    warn!(?why, "Failed to release staging area");
                }
                return Err(PipelineError::io("failed to create staging slots", why));
            }
        };
        let scheduler = Scheduler::new(ring, sink, SystemClock, settings.timeout);

        Ok(Self {
            state: StateHandle::default(),
            sequence,
            settings,
            queue: new_shared_queue(settings.queue_capacity),
            staging,
            scheduler: Some(scheduler),
            workers: None,
            released: false,
        })
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Spawn the producer and scheduler threads.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.released {
            return Err(PipelineError::io(
                "pipeline already shut down",
                std::io::Error::other("staging area released"),
            ));
        }
        self.state
            .transition(PipelineState::Stopped, PipelineState::Running)?;

        match self.spawn_workers() {
            Ok(workers) => {
                self.workers = Some(workers);
                info!(
                    frames = self.sequence.len(),
                    capacity = self.settings.queue_capacity,
                    slots = self.settings.staging_slots,
                    "Pipeline started"
                );
                Ok(())
            }
            Err(why) => {
                let _ = self
                    .state
                    .transition(PipelineState::Running, PipelineState::Stopped);
                Err(why)
            }
        }
    }

    fn spawn_workers(&mut self) -> Result<Workers, PipelineError> {
        let Some(mut scheduler) = self.scheduler.take() else {
            return Err(PipelineError::io(
                "scheduler unavailable",
                std::io::Error::other("a previous scheduler thread was lost"),
            ));
        };

        // Every run starts with an empty queue and the first frame.
        self.queue = new_shared_queue(self.settings.queue_capacity);

        let scheduler = {
            let (state, queue) = (self.state.clone(), Arc::clone(&self.queue));
            thread::Builder::new()
                .name("bg-scheduler".into())
                .spawn(move || {
                    scheduler.run(&state, &queue);
                    scheduler
                })
                .map_err(|e| PipelineError::io("failed to spawn scheduler thread", e))?
        };

        let producer = {
            let (state, queue) = (self.state.clone(), Arc::clone(&self.queue));
            let mut producer = Producer::new(self.sequence.clone(), self.settings.timeout);
            thread::Builder::new()
                .name("bg-producer".into())
                .spawn(move || producer.run(&state, &queue))
        };

        match producer {
            Ok(producer) => Ok(Workers {
                producer,
                scheduler,
            }),
            Err(e) => {
                self.queue.close();
                let _ = self
                    .state
                    .transition(PipelineState::Running, PipelineState::Stopped);
                self.scheduler = scheduler.join().ok();
                Err(PipelineError::io("failed to spawn producer thread", e))
            }
        }
    }

    /// Signal both workers to stop and wait for them.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        self.state
            .transition(PipelineState::Running, PipelineState::Stopped)?;
        self.queue.close();

        if let Some(Workers {
            producer,
            scheduler,
        }) = self.workers.take()
        {
            if let Err(panic) = producer.join() {
                error!(reason = panic_message(&*panic), "Producer thread panicked");
            }
            match scheduler.join() {
                Ok(scheduler) => self.scheduler = Some(scheduler),
                Err(panic) => {
                    error!(reason = panic_message(&*panic), "Scheduler thread panicked");
                }
            }
        }

        let presented = self.scheduler.as_ref().map_or(0, Scheduler::presented);
        info!(presented, stats = ?self.queue.stats(), "Pipeline stopped");
        Ok(())
    }

    /// Stop if running, then release the staging slots. Safe to call twice.
    pub fn shutdown(&mut self) -> Result<(), PipelineError> {
        if self.state.is_running() {
            self.stop()?;
        }
        if self.released {
            return Ok(());
        }

        self.released = true;
        self.staging
            .release()
            .map_err(|e| PipelineError::io("failed to release staging slots", e))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(why) = self.shutdown() {
            warn!(%why, "Pipeline teardown failed");
        }
    }
}
