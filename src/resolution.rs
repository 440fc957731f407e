// SPDX-License-Identifier: MPL-2.0

//! Target resolution planning and display size discovery.

use std::process::Command;

use tracing::{debug, warn};

/// Display size assumed when no provider can answer.
pub const FALLBACK_DISPLAY_SIZE: (u32, u32) = (1920, 1080);

/// Compute the frame resolution for a source of `native` size shown on a
/// display area of `bound`, scaled by `scale_factor`.
///
/// The result keeps the source aspect ratio and fits inside
/// `bound * scale_factor`. The width-bound branch is taken whenever the
/// resulting height still fits, otherwise the height-bound one.
#[must_use]
pub fn plan(native: (u32, u32), bound: (u32, u32), scale_factor: f32) -> (u32, u32) {
    let (width, height) = (native.0.max(1), native.1.max(1));
    let scale = f64::from(scale_factor).clamp(f64::MIN_POSITIVE, 1.0);

    let max_width = ((f64::from(bound.0) * scale).floor() as u32).max(1);
    let max_height = ((f64::from(bound.1) * scale).floor() as u32).max(1);

    // Integer cross-multiplication keeps the ratio exact up to the final floor.
    let (w, h) = (u64::from(width), u64::from(height));
    let (mw, mh) = (u64::from(max_width), u64::from(max_height));

    let (new_width, new_height) = if mw * h <= mh * w {
        (mw, mw * h / w)
    } else {
        (mh * w / h, mh)
    };

    (
        (new_width as u32).clamp(1, max_width),
        (new_height as u32).clamp(1, max_height),
    )
}

/// Reports the largest width and height across the attached displays.
pub trait ResolutionProvider {
    fn max_display_size(&self) -> Option<(u32, u32)>;
}

/// A display size given up front, e.g. from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolution(pub u32, pub u32);

impl ResolutionProvider for FixedResolution {
    fn max_display_size(&self) -> Option<(u32, u32)> {
        Some((self.0, self.1))
    }
}

/// Queries `xrandr --current` for the modes of connected outputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct XrandrResolution;

impl ResolutionProvider for XrandrResolution {
    fn max_display_size(&self) -> Option<(u32, u32)> {
        let output = match Command::new("xrandr").arg("--current").output() {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                debug!(status = %output.status, "xrandr failed");
                return None;
            }
            Err(why) => {
                debug!(?why, "xrandr unavailable");
                return None;
            }
        };

        parse_xrandr(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Extract the maximum `WxH` geometry of every connected output.
fn parse_xrandr(output: &str) -> Option<(u32, u32)> {
    output
        .lines()
        .filter(|line| line.contains(" connected"))
        .filter_map(|line| {
            line.split_whitespace()
                .find_map(|token| parse_size(token.split('+').next()?))
        })
        .reduce(|(w1, h1), (w2, h2)| (w1.max(w2), h1.max(h2)))
}

/// Parse a `WIDTHxHEIGHT` geometry such as `2560x1440`.
#[must_use]
pub fn parse_size(geometry: &str) -> Option<(u32, u32)> {
    let (width, height) = geometry.trim().split_once(['x', 'X'])?;
    Some((width.parse().ok()?, height.parse().ok()?))
}

/// Ask `provider` for the display bound, falling back to [`FALLBACK_DISPLAY_SIZE`].
pub fn display_bound(provider: &dyn ResolutionProvider) -> (u32, u32) {
    match provider.max_display_size() {
        Some((width, height)) if width > 0 && height > 0 => (width, height),
        _ => {
            warn!(
                width = FALLBACK_DISPLAY_SIZE.0,
                height = FALLBACK_DISPLAY_SIZE.1,
                "Could not determine display size, using fallback"
            );
            FALLBACK_DISPLAY_SIZE
        }
    }
}
