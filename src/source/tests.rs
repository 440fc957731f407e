// SPDX-License-Identifier: MPL-2.0

//! Unit tests for source detection and decoding.

#[cfg(test)]
mod tests {
    use std::{
        fs::File,
        path::Path,
        sync::atomic::Ordering,
        time::{Duration, Instant},
    };

    use image::{Delay, Frame, Rgba, RgbaImage, codecs::gif::GifEncoder};

    use super::super::detection::{is_video_file, source_identity};
    use super::super::image_decoder::gif_durations;
    use super::super::types::{DecodeOptions, Retiming, SourceKind, skip_factor};
    use super::super::{FileDecoder, FrameSource, SourceDecoder};
    use crate::error::DecodeError;

    /// Write a GIF of `count` solid frames, each lasting `delay_ms`.
    fn write_gif(path: &Path, count: usize, delay_ms: u32) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for i in 0..count {
            let shade = (i * 40 % 256) as u8;
            let image = RgbaImage::from_pixel(8, 6, Rgba([shade, 255 - shade, 0, 255]));
            let frame = Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1));
            encoder.encode_frame(frame).unwrap();
        }
    }

    fn options(target_fps: u32, frame_skipping: bool) -> DecodeOptions {
        DecodeOptions::new(target_fps, frame_skipping)
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("test.mp4")));
        assert!(is_video_file(Path::new("test.MP4")));
        assert!(is_video_file(Path::new("test.wmv")));
        assert!(is_video_file(Path::new("test.webm")));
        assert!(is_video_file(Path::new("/path/to/clip.mkv")));
        assert!(!is_video_file(Path::new("test.gif")));
        assert!(!is_video_file(Path::new("test.webp")));
        assert!(!is_video_file(Path::new("test")));

        assert_eq!(SourceKind::from_path(Path::new("a.MOV")), SourceKind::Video);
        assert_eq!(
            SourceKind::from_path(Path::new("skull spinning.gif")),
            SourceKind::AnimatedImage
        );
    }

    #[test]
    fn test_source_identity() {
        assert_eq!(source_identity(Path::new("badapple.mp4")), "badapple_mp4");
        assert_eq!(source_identity(Path::new("/x/bad.apple.MP4")), "bad_apple_mp4");
        assert_eq!(
            source_identity(Path::new("skull spinning.gif")),
            "skull spinning_gif"
        );
        assert_eq!(source_identity(Path::new("noext")), "noext_");
    }

    #[test]
    fn test_skip_factor() {
        assert_eq!(skip_factor(30.0, 15), 2);
        assert_eq!(skip_factor(60.0, 15), 4);
        assert_eq!(skip_factor(29.97, 15), 2);
        assert_eq!(skip_factor(10.0, 15), 1);
        assert_eq!(skip_factor(0.0, 15), 1);
        assert_eq!(skip_factor(f64::NAN, 15), 1);
    }

    #[test]
    fn test_video_retiming() {
        let skipping = Retiming::for_video(Some(30.0), &options(15, true));
        let kept = (0..300).filter(|i| skipping.keeps(*i)).count();
        assert_eq!(kept, 150);
        assert_eq!(
            skipping.duration_for(Duration::from_millis(5)),
            options(15, true).frame_delay()
        );

        let all = Retiming::for_video(Some(30.0), &options(15, false));
        assert_eq!(all.keep_every(), 1);
        assert_eq!(
            all.duration_for(Duration::ZERO),
            options(15, false).frame_delay()
        );

        let unknown_rate = Retiming::for_video(None, &options(15, true));
        assert_eq!(unknown_rate.keep_every(), 1);
    }

    #[test]
    fn test_animation_retiming() {
        let durations = vec![Duration::from_millis(20); 10];
        let retiming = Retiming::for_animation(&durations, &options(25, true));
        // 50 fps source against 25 fps target
        assert_eq!(retiming.keep_every(), 2);

        let authored = Retiming::for_animation(&durations, &options(25, false));
        assert_eq!(authored, Retiming::Authored);
        assert_eq!(
            authored.duration_for(Duration::from_millis(70)),
            Duration::from_millis(70)
        );
    }

    #[test]
    fn test_gif_with_skipping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spin.gif");
        write_gif(&path, 6, 30);

        let source = FileDecoder.open(&path, &options(15, true)).unwrap();
        assert_eq!(source.native_size(), (8, 6));

        let frames = source.collect::<Result<Vec<_>, _>>().unwrap();
        // 30 ms per frame is ~33 fps, so every second frame is kept.
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert_eq!(frame.duration, options(15, true).frame_delay());
            assert_eq!((frame.image.width(), frame.image.height()), (8, 6));
        }
    }

    #[test]
    fn test_gif_without_skipping_keeps_authored_durations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spin.gif");
        write_gif(&path, 4, 70);

        let frames = FileDecoder
            .open(&path, &options(15, false))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(frames.len(), 4);
        assert!(
            frames
                .iter()
                .all(|frame| frame.duration == Duration::from_millis(70))
        );
    }

    #[test]
    fn test_unset_gif_delay_defaults_to_100ms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodelay.gif");
        write_gif(&path, 2, 0);

        let frames = FileDecoder
            .open(&path, &options(15, false))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(
            frames
                .iter()
                .all(|frame| frame.duration == Duration::from_millis(100))
        );
    }

    #[test]
    fn test_missing_source_fails_to_open() {
        let result = FileDecoder.open(Path::new("/nonexistent/clip.gif"), &options(15, true));
        assert!(matches!(result, Err(DecodeError::Open { .. })));
    }

    #[test]
    fn test_corrupt_source_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.gif");
        std::fs::write(&path, b"GIF89a not really").unwrap();

        for skipping in [false, true] {
            let started = Instant::now();
            let outcome = FileDecoder
                .open(&path, &options(15, skipping))
                .and_then(|source| source.collect::<Result<Vec<_>, _>>());
            assert!(outcome.is_err());
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    }

    #[test]
    fn test_oversized_canvas_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.gif");
        // 65535x65535 logical screen, no palette, then the trailer.
        std::fs::write(&path, b"GIF89a\xff\xff\xff\xff\x00\x00\x00;").unwrap();

        let started = Instant::now();
        let result = FileDecoder.open(&path, &options(15, false));
        assert!(matches!(result, Err(DecodeError::Image { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_gif_durations_from_frame_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spin.gif");
        write_gif(&path, 5, 40);

        let durations = gif_durations(&path, &options(15, true)).unwrap();
        assert_eq!(durations, vec![Duration::from_millis(40); 5]);

        let unset = dir.path().join("nodelay.gif");
        write_gif(&unset, 2, 0);
        let durations = gif_durations(&unset, &options(15, true)).unwrap();
        assert_eq!(durations, vec![Duration::from_millis(100); 2]);
    }

    #[test]
    fn test_cancelled_scan_stops_opening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spin.gif");
        write_gif(&path, 4, 30);

        let options = options(15, true);
        options.cancel.store(true, Ordering::Relaxed);

        let result = FileDecoder.open(&path, &options);
        assert!(matches!(result, Err(DecodeError::Cancelled { .. })));
    }
}
