// SPDX-License-Identifier: MPL-2.0

//! Source kind detection and archive identity.

use std::path::Path;

use super::types::SourceKind;

/// Container extensions decoded as video, checked case-insensitively.
/// Anything else is handed to the animated-image decoder.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4",  // MPEG-4 container
    "avi",  // AVI container
    "mkv",  // Matroska container
    "mov",  // QuickTime container
    "wmv",  // Windows Media Video
    "webm", // WebM container (VP8/VP9/AV1)
    "m4v",  // MPEG-4 Video (Apple variant of MP4)
];

/// Check if a path points to a video file.
#[must_use]
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|video| ext.eq_ignore_ascii_case(video))
        })
        .unwrap_or(false)
}

impl SourceKind {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        if is_video_file(path) {
            SourceKind::Video
        } else {
            SourceKind::AnimatedImage
        }
    }
}

/// Stable archive key of a source: `{stem}_{extension}`.
///
/// Dots in the stem become underscores and the extension is lowercased,
/// so `bad.apple.MP4` maps to `bad_apple_mp4`.
#[must_use]
pub fn source_identity(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('.', "_"))
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    format!("{stem}_{extension}")
}
