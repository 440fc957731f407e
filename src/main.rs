// SPDX-License-Identifier: MPL-2.0

mod archive;
mod controller;
mod encoder;
mod error;
mod frame;
mod frame_queue;
mod pipeline;
mod prepare;
mod producer;
mod resolution;
mod scheduler;
mod sink;
mod source;
mod staging;

use std::path::PathBuf;

use bg_animator_config::Config;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Play a video or animated image as the desktop background.
#[derive(Parser, Debug)]
#[command(name = "bg-animator", version)]
struct Cli {
    /// Video or animated image to play.
    input: PathBuf,

    /// Configuration file (defaults to the user's config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target frames per second.
    #[arg(long)]
    fps: Option<u32>,

    /// JPEG quality of the prepared frames (0-100).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: Option<u8>,

    /// Fraction of the display size used for the frames (0 < f <= 1).
    #[arg(long)]
    scale: Option<f32>,

    /// Drop source frames to approach the target rate.
    #[arg(long, overrides_with = "no_skip")]
    skip: bool,

    /// Keep every source frame.
    #[arg(long, overrides_with = "skip")]
    no_skip: bool,

    /// Capacity of the playback queue.
    #[arg(long)]
    queue: Option<usize>,

    /// Number of rotating staging slots.
    #[arg(long)]
    slots: Option<usize>,

    /// Display size as WIDTHxHEIGHT instead of querying the displays.
    #[arg(long, value_parser = parse_display)]
    display: Option<(u32, u32)>,

    /// Root directory of the frame archive.
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Directory holding the staging slots.
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Log frames instead of setting the background.
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Exit instead of retrying when setup fails.
    #[arg(long)]
    once: bool,
}

impl Cli {
    /// Layer the command-line overrides on top of `config`.
    fn apply(&self, mut config: Config) -> Config {
        if let Some(fps) = self.fps {
            config.target_fps = fps;
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
        if let Some(scale) = self.scale {
            config.scale_factor = scale;
        }
        if self.skip {
            config.frame_skipping = true;
        }
        if self.no_skip {
            config.frame_skipping = false;
        }
        if let Some(queue) = self.queue {
            config.queue_capacity = queue;
        }
        if let Some(slots) = self.slots {
            config.staging_slots = slots;
        }
        if let Some(display) = self.display {
            config.display_bound = Some(display);
        }
        if let Some(dir) = &self.archive_dir {
            config.archive_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.staging_dir {
            config.staging_dir = Some(dir.clone());
        }
        config
    }
}

fn parse_display(value: &str) -> Result<(u32, u32), String> {
    match resolution::parse_size(value) {
        Some((width, height)) if width > 0 && height > 0 => Ok((width, height)),
        _ => Err(format!("expected WIDTHxHEIGHT, got `{value}`")),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "info,bg_animator=debug,bg_animator_config=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_config(path: Option<&std::path::Path>) -> Config {
    let loaded = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    match loaded {
        Ok(config) => config,
        Err(why) => {
            warn!(%why, "Config file error, falling back to defaults");
            Config::default()
        }
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.apply(load_config(cli.config.as_deref()));
    config.validate()?;

    if !cli.input.is_file() {
        eyre::bail!("{} is not a file", cli.input.display());
    }

    info!(
        input = %cli.input.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting bg-animator"
    );

    controller::run(
        config,
        controller::RunOptions {
            source: cli.input,
            dry_run: cli.dry_run,
            once: cli.once,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_config() {
        let cli = Cli::parse_from([
            "bg-animator",
            "clip.mp4",
            "--fps",
            "24",
            "--no-skip",
            "--display",
            "2560x1440",
            "--slots",
            "4",
        ]);
        let config = cli.apply(Config::default().quality(60u8));

        assert_eq!(config.target_fps, 24);
        assert!(!config.frame_skipping);
        assert_eq!(config.display_bound, Some((2560, 1440)));
        assert_eq!(config.staging_slots, 4);
        assert_eq!(config.quality, 60);
    }

    #[test]
    fn last_skip_flag_wins() {
        let cli = Cli::parse_from(["bg-animator", "a.gif", "--no-skip", "--skip"]);
        let config = cli.apply(Config::default().frame_skipping(false));
        assert!(config.frame_skipping);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["bg-animator", "a.gif", "--quality", "101"]).is_err());
        assert!(Cli::try_parse_from(["bg-animator", "a.gif", "--display", "wide"]).is_err());
        assert!(Cli::try_parse_from(["bg-animator"]).is_err());
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        std::fs::write(&path, "(not valid").unwrap();
        assert_eq!(load_config(Some(&path)), Config::default());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
