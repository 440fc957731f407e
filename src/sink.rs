// SPDX-License-Identifier: MPL-2.0

//! Display sinks: whatever actually paints a staging slot as the background.

use std::{
    path::Path,
    process::{Command, Stdio},
    time::Instant,
};

use bg_animator_config::Config;
use tracing::{debug, info};

use crate::error::SinkError;

/// Placeholder replaced by the absolute slot path.
pub const PATH_PLACEHOLDER: &str = "{path}";
/// Placeholder replaced by the `file://` URI of the slot.
pub const URI_PLACEHOLDER: &str = "{uri}";

/// Paints an image file as the desktop background.
///
/// Failures are reported to the caller, which logs them and carries on.
pub trait DisplaySink: Send {
    fn set_background(&mut self, path: &Path) -> Result<(), SinkError>;
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn set_background(&mut self, path: &Path) -> Result<(), SinkError> {
        (**self).set_background(path)
    }
}

/// Runs an external command for every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    /// `command` is the program followed by its arguments. `None` if empty.
    #[must_use]
    pub fn new(command: Vec<String>) -> Option<Self> {
        let mut command = command.into_iter();
        let program = command.next()?;
        Some(Self {
            program,
            args: command.collect(),
        })
    }

    /// The configured command, or the default for the running desktop.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        config
            .sink_command
            .clone()
            .and_then(Self::new)
            .unwrap_or_else(|| {
                Self::for_desktop(std::env::var("XDG_CURRENT_DESKTOP").ok().as_deref())
            })
    }

    /// Default command for a `XDG_CURRENT_DESKTOP` value.
    #[must_use]
    pub fn for_desktop(desktop: Option<&str>) -> Self {
        let gnome_like = desktop.is_some_and(|desktop| {
            desktop.split(':').any(|name| {
                matches!(
                    name.to_ascii_lowercase().as_str(),
                    "gnome" | "unity" | "budgie" | "budgie-desktop"
                )
            })
        });

        let command: &[&str] = if gnome_like {
            &[
                "gsettings",
                "set",
                "org.gnome.desktop.background",
                "picture-uri",
                URI_PLACEHOLDER,
            ]
        } else {
            &["feh", "--no-fehbg", "--bg-fill", PATH_PLACEHOLDER]
        };

        Self {
            program: command[0].to_string(),
            args: command[1..].iter().map(ToString::to_string).collect(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with the placeholders filled in for `path`.
    fn render_args(&self, path: &Path) -> Vec<String> {
        let path = path.to_string_lossy();
        let uri = format!("file://{path}");

        self.args
            .iter()
            .map(|arg| {
                arg.replace(PATH_PLACEHOLDER, &path)
                    .replace(URI_PLACEHOLDER, &uri)
            })
            .collect()
    }
}

impl DisplaySink for CommandSink {
    fn set_background(&mut self, path: &Path) -> Result<(), SinkError> {
        let started = Instant::now();

        let output = Command::new(&self.program)
            .args(self.render_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| SinkError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SinkError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(
            program = %self.program,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Background set"
        );
        Ok(())
    }
}

/// Only logs the slot it would have painted.
#[derive(Debug, Default)]
pub struct LogSink {
    calls: u64,
}

impl LogSink {
    #[cfg(test)]
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DisplaySink for LogSink {
    fn set_background(&mut self, path: &Path) -> Result<(), SinkError> {
        self.calls += 1;
        if self.calls == 1 {
            info!(path = %path.display(), "Dry run: not painting the background");
        }
        debug!(path = %path.display(), frame = self.calls, "Dry run background");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> Vec<String> {
        args.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn placeholders_are_substituted() {
        let sink = CommandSink::new(command(&["setter", "--uri={uri}", "{path}", "plain"])).unwrap();
        let args = sink.render_args(Path::new("/run/user/1000/bg-animator/slot_3.jpg"));

        assert_eq!(
            args,
            command(&[
                "--uri=file:///run/user/1000/bg-animator/slot_3.jpg",
                "/run/user/1000/bg-animator/slot_3.jpg",
                "plain",
            ])
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandSink::new(Vec::new()).is_none());
    }

    #[test]
    fn desktop_defaults() {
        assert_eq!(CommandSink::for_desktop(Some("GNOME")).program(), "gsettings");
        assert_eq!(CommandSink::for_desktop(Some("ubuntu:GNOME")).program(), "gsettings");
        assert_eq!(CommandSink::for_desktop(Some("Budgie")).program(), "gsettings");
        assert_eq!(CommandSink::for_desktop(Some("i3")).program(), "feh");
        assert_eq!(CommandSink::for_desktop(None).program(), "feh");
    }

    #[test]
    fn configured_command_wins() {
        let config = Config::default().sink_command(command(&["swaybg", "-i", "{path}"]));
        assert_eq!(CommandSink::from_config(&config).program(), "swaybg");
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_is_checked() {
        let path = Path::new("/tmp/slot_0.jpg");

        let mut ok = CommandSink::new(command(&["true"])).unwrap();
        assert!(ok.set_background(path).is_ok());

        let mut failing = CommandSink::new(command(&["false"])).unwrap();
        assert!(matches!(
            failing.set_background(path),
            Err(SinkError::Failed { .. })
        ));
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let mut sink = CommandSink::new(command(&["bg-animator-no-such-program"])).unwrap();
        assert!(matches!(
            sink.set_background(Path::new("slot_0.jpg")),
            Err(SinkError::Spawn { .. })
        ));
    }

    #[test]
    fn log_sink_counts_calls() {
        let mut sink = LogSink::default();
        sink.set_background(Path::new("a.jpg")).unwrap();
        sink.set_background(Path::new("b.jpg")).unwrap();
        assert_eq!(sink.calls(), 2);
    }
}
