// SPDX-License-Identifier: MPL-2.0

//! Owns the pipeline lifecycle on the main thread.
//!
//! A calloop event loop watches for signals and periodically logs playback
//! statistics. SIGINT and SIGTERM stop playback and exit, SIGHUP rebuilds
//! the pipeline from scratch after `restart_delay_ms`. A failed setup is
//! retried after the same delay unless running with `--once`.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use bg_animator_config::Config;
use calloop::{
    EventLoop,
    signals::{Signal, Signals},
    timer::{TimeoutAction, Timer},
};
use eyre::{WrapErr, eyre};
use tracing::{error, info, warn};

use crate::{
    error::PipelineError,
    pipeline::{Pipeline, PlaybackSettings},
    prepare::{Prepared, Preprocessor},
    resolution::{self, FixedResolution, XrandrResolution},
    sink::{CommandSink, DisplaySink, LogSink},
    staging::StagingArea,
};

/// Coarse poll interval of the controller.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How often queue statistics are logged.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source: PathBuf,
    /// Log frames instead of painting them.
    pub dry_run: bool,
    /// Exit instead of retrying when setup fails.
    pub once: bool,
}

type Preparation = JoinHandle<Result<Prepared, PipelineError>>;

enum Phase {
    /// Waiting to (re)build the pipeline.
    Idle { retry_at: Instant },
    Preparing {
        worker: Preparation,
        cancel: Arc<AtomicBool>,
    },
    Playing(Pipeline),
}

pub struct Controller {
    config: Config,
    options: RunOptions,
    display_bound: (u32, u32),
    phase: Phase,
    exit: bool,
    failure: Option<eyre::Report>,
}

impl Controller {
    pub fn new(config: Config, options: RunOptions) -> Self {
        let display_bound = match config.display_bound {
            Some((width, height)) => resolution::display_bound(&FixedResolution(width, height)),
            None => resolution::display_bound(&XrandrResolution),
        };
        info!(
            width = display_bound.0,
            height = display_bound.1,
            "Display bound"
        );

        Self {
            config,
            options,
            display_bound,
            phase: Phase::Idle {
                retry_at: Instant::now(),
            },
            exit: false,
            failure: None,
        }
    }

    /// Advance the lifecycle: start preparing when due, start playback once
    /// frames are ready.
    fn tick(&mut self) {
        let phase = std::mem::replace(
            &mut self.phase,
            Phase::Idle {
                retry_at: Instant::now(),
            },
        );

        self.phase = match phase {
            Phase::Idle { retry_at } if Instant::now() >= retry_at => self.begin_preparation(),
            Phase::Preparing { worker, cancel } if worker.is_finished() => {
                let outcome = worker.join().unwrap_or_else(|panic| {
                    Err(PipelineError::io(
                        "preprocessing thread panicked",
                        std::io::Error::other(crate::scheduler::panic_message(&*panic)),
                    ))
                });
                drop(cancel);

                match outcome.and_then(|prepared| self.build_pipeline(prepared)) {
                    Ok(pipeline) => Phase::Playing(pipeline),
                    Err(why) => self.setup_failed(why),
                }
            }
            phase => phase,
        };
    }

    fn begin_preparation(&mut self) -> Phase {
        let preprocessor = Preprocessor::new(&self.config, self.display_bound);
        let cancel = preprocessor.cancel_flag();
        let source = self.options.source.clone();

        info!(
            source = %source.display(),
            target_fps = self.config.target_fps,
            frame_skipping = self.config.frame_skipping,
            "Preparing frames"
        );

        let spawned = thread::Builder::new()
            .name("bg-prepare".into())
            .spawn(move || preprocessor.prepare(&source));

        match spawned {
            Ok(worker) => Phase::Preparing { worker, cancel },
            Err(why) => self.setup_failed(PipelineError::io("failed to spawn preprocessing", why)),
        }
    }

    fn build_pipeline(&self, prepared: Prepared) -> Result<Pipeline, PipelineError> {
        info!(
            frames = prepared.sequence.len(),
            origin = ?prepared.origin,
            loop_secs = prepared.sequence.total_duration().as_secs_f64(),
            "Frames ready"
        );

        let staging = StagingArea::provision(&self.config)
            .map_err(|e| PipelineError::io("failed to provision staging area", e))?;

        let sink: Box<dyn DisplaySink> = if self.options.dry_run {
            Box::new(LogSink::default())
        } else {
            let sink = CommandSink::from_config(&self.config);
            info!(program = sink.program(), "Display sink");
            Box::new(sink)
        };

        let mut pipeline = Pipeline::new(
            prepared.sequence,
            staging,
            sink,
            PlaybackSettings::from(&self.config),
        )?;
        pipeline.start()?;
        Ok(pipeline)
    }

    fn setup_failed(&mut self, why: PipelineError) -> Phase {
        error!(%why, "Pipeline setup failed");

        if self.options.once {
            self.failure = Some(eyre!(why).wrap_err("pipeline setup failed"));
            self.exit = true;
        } else {
            info!(
                delay_ms = self.config.restart_delay_ms,
                "Retrying pipeline setup"
            );
        }

        Phase::Idle {
            retry_at: Instant::now() + self.config.restart_delay(),
        }
    }

    /// Tear everything down and schedule a rebuild.
    fn restart(&mut self) {
        info!("Restart requested");
        self.teardown();
        self.phase = Phase::Idle {
            retry_at: Instant::now() + self.config.restart_delay(),
        };
    }

    fn request_exit(&mut self, signal: Signal) {
        info!(?signal, "Exit requested");
        self.exit = true;
    }

    /// Stop and join the workers, then release the staging slots.
    fn teardown(&mut self) {
        let phase = std::mem::replace(
            &mut self.phase,
            Phase::Idle {
                retry_at: Instant::now(),
            },
        );

        match phase {
            Phase::Playing(mut pipeline) => {
                if let Err(why) = pipeline.shutdown() {
                    warn!(%why, "Pipeline shutdown failed");
                }
            }
            Phase::Preparing { worker, cancel } => {
                cancel.store(true, Ordering::Relaxed);
                if worker.join().is_err() {
                    warn!("Preprocessing thread panicked during shutdown");
                }
            }
            Phase::Idle { .. } => {}
        }
    }

    fn log_stats(&self) {
        if let Phase::Playing(pipeline) = &self.phase {
            let stats = pipeline.stats();
            info!(
                pushed = stats.frames_pushed,
                popped = stats.frames_popped,
                push_timeouts = stats.push_timeouts,
                pop_timeouts = stats.pop_timeouts,
                queued = pipeline.queue_len(),
                state = %pipeline.state(),
                "Playback statistics"
            );
        }
    }
}

/// Run until a termination signal arrives, or until setup fails with `--once`.
pub fn run(config: Config, options: RunOptions) -> eyre::Result<()> {
    let mut event_loop: EventLoop<Controller> =
        EventLoop::try_new().wrap_err("failed to create event loop")?;
    let handle = event_loop.handle();

    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP])
        .wrap_err("failed to watch signals")?;
    handle
        .insert_source(signals, |event, _, controller| match event.signal() {
            Signal::SIGHUP => controller.restart(),
            signal => controller.request_exit(signal),
        })
        .map_err(|e| eyre!("failed to insert signal source: {}", e.error))?;

    handle
        .insert_source(
            Timer::from_duration(STATS_INTERVAL),
            |_, _, controller: &mut Controller| {
                controller.log_stats();
                TimeoutAction::ToDuration(STATS_INTERVAL)
            },
        )
        .map_err(|e| eyre!("failed to insert stats timer: {}", e.error))?;

    let mut controller = Controller::new(config, options);

    loop {
        controller.tick();
        if controller.exit {
            break;
        }
        event_loop
            .dispatch(POLL_INTERVAL, &mut controller)
            .wrap_err("event loop dispatch failed")?;
        if controller.exit {
            break;
        }
    }

    controller.teardown();
    info!("Exiting");

    match controller.failure.take() {
        Some(report) => Err(report),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Delay, Frame, Rgba, RgbaImage, codecs::gif::GifEncoder};
    use std::path::Path;

    fn write_gif(path: &Path) {
        let mut encoder = GifEncoder::new(std::fs::File::create(path).unwrap());
        for i in 0..4u8 {
            let image = RgbaImage::from_pixel(16, 16, Rgba([i * 60, 0, 0, 255]));
            let frame = Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(20, 1));
            encoder.encode_frame(frame).unwrap();
        }
    }

    fn config(root: &Path) -> Config {
        Config::default()
            .archive_dir(root.join("archive"))
            .staging_dir(root.join("staging"))
            .display_bound((64u32, 64u32))
            .staging_slots(2usize)
            .pop_timeout_ms(20u64)
            .restart_delay_ms(10u64)
    }

    fn tick_until(controller: &mut Controller, what: impl Fn(&Controller) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while !what(controller) {
            assert!(Instant::now() < deadline, "timed out waiting");
            controller.tick();
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn prepares_plays_and_restarts() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("spin.gif");
        write_gif(&source);

        let mut controller = Controller::new(
            config(root.path()),
            RunOptions {
                source,
                dry_run: true,
                once: true,
            },
        );

        tick_until(&mut controller, |c| matches!(c.phase, Phase::Playing(_)));
        assert!(root.path().join("archive/spin_gif/0.jpg").exists());

        controller.restart();
        assert!(matches!(controller.phase, Phase::Idle { .. }));
        assert!(!root.path().join("staging").exists());

        tick_until(&mut controller, |c| matches!(c.phase, Phase::Playing(_)));
        controller.teardown();
        assert!(controller.failure.is_none());
    }

    #[test]
    fn failed_setup_with_once_exits() {
        let root = tempfile::tempdir().unwrap();
        let mut controller = Controller::new(
            config(root.path()),
            RunOptions {
                source: root.path().join("missing.gif"),
                dry_run: true,
                once: true,
            },
        );

        tick_until(&mut controller, |c| c.exit);
        assert!(controller.failure.is_some());
    }

    #[test]
    fn failed_setup_without_once_retries() {
        let root = tempfile::tempdir().unwrap();
        let mut controller = Controller::new(
            config(root.path()),
            RunOptions {
                source: root.path().join("missing.gif"),
                dry_run: true,
                once: false,
            },
        );

        // Two attempts: idle -> preparing -> idle -> preparing.
        let mut attempts = 0;
        let deadline = Instant::now() + Duration::from_secs(20);
        let mut was_preparing = false;
        while attempts < 2 {
            assert!(Instant::now() < deadline, "timed out waiting");
            controller.tick();
            let preparing = matches!(controller.phase, Phase::Preparing { .. });
            if preparing && !was_preparing {
                attempts += 1;
            }
            was_preparing = preparing;
            thread::sleep(Duration::from_millis(1));
        }

        assert!(!controller.exit);
        controller.teardown();
    }
}
