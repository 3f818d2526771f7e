//! Raw media → RGBA pixel buffer
//!
//! Stills are decoded in-process with the `image` crate. Videos go through
//! an external `ffmpeg` which extracts the first frame as PNG.

use crate::error::{Result, ThumbnailError};
use crate::fetch::MediaKind;
use image::{ImageFormat, ImageReader, RgbaImage};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use tracing::debug;

/// How a media kind is turned into pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    Still,
    FirstVideoFrame,
}

impl MediaKind {
    /// `None` for kinds that cannot be thumbnailed
    pub fn decode_strategy(self) -> Option<DecodeStrategy> {
        match self {
            MediaKind::Image => Some(DecodeStrategy::Still),
            MediaKind::Video => Some(DecodeStrategy::FirstVideoFrame),
            MediaKind::Other => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaDecoder {
    ffmpeg: PathBuf,
}

impl Default for MediaDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl MediaDecoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn decode(&self, data: &[u8], kind: MediaKind) -> Result<RgbaImage> {
        match kind.decode_strategy() {
            Some(DecodeStrategy::Still) => decode_still(data, "image"),
            Some(DecodeStrategy::FirstVideoFrame) => {
                let frame = self.extract_first_frame(data)?;
                decode_still(&frame, "video")
            }
            None => Err(ThumbnailError::Unsupported { kind }),
        }
    }

    /// Run ffmpeg on a spilled copy of the video and capture frame one as PNG
    fn extract_first_frame(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut source = NamedTempFile::new().map_err(video_error)?;
        source.write_all(data).map_err(video_error)?;
        source.flush().map_err(video_error)?;

        let output = ffmpeg_first_frame(&self.ffmpeg, source.path())
            .output()
            .map_err(|e| ThumbnailError::Decode {
                kind: "video",
                message: format!("failed to run {}: {}", self.ffmpeg.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ThumbnailError::Decode {
                kind: "video",
                message: format!("ffmpeg exited with {}: {}", output.status, stderr.trim()),
            });
        }
        if output.stdout.is_empty() {
            return Err(ThumbnailError::Decode {
                kind: "video",
                message: "ffmpeg produced no frame".to_string(),
            });
        }

        debug!(bytes = output.stdout.len(), "extracted first video frame");
        Ok(output.stdout)
    }
}

fn ffmpeg_first_frame(ffmpeg: &Path, input: &Path) -> Command {
    let mut command = Command::new(ffmpeg);
    command
        .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
        .arg(input)
        .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "pipe:1"])
        .stdin(Stdio::null());
    command
}

fn video_error(e: std::io::Error) -> ThumbnailError {
    ThumbnailError::Decode {
        kind: "video",
        message: format!("failed to stage video for ffmpeg: {}", e),
    }
}

fn decode_still(data: &[u8], kind: &'static str) -> Result<RgbaImage> {
    let decode_error = |message: String| ThumbnailError::Decode { kind, message };

    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| decode_error(e.to_string()))?;
    if reader.format().is_none() {
        return Err(decode_error("unrecognised image format".to_string()));
    }

    let img = reader.decode().map_err(|e| decode_error(e.to_string()))?;
    Ok(img.to_rgba8())
}

/// Format of an encoded still, when recognisable
pub fn sniff_format(data: &[u8]) -> Option<ImageFormat> {
    image::guess_format(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 10) as u8, (y * 10) as u8, 128, 255])
        });
        let mut buffer = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_strategy_per_kind() {
        assert_eq!(MediaKind::Image.decode_strategy(), Some(DecodeStrategy::Still));
        assert_eq!(
            MediaKind::Video.decode_strategy(),
            Some(DecodeStrategy::FirstVideoFrame)
        );
        assert_eq!(MediaKind::Other.decode_strategy(), None);
    }

    #[test]
    fn test_decodes_still_image() -> anyhow::Result<()> {
        let data = png_bytes(12, 7);
        assert_eq!(sniff_format(&data), Some(ImageFormat::Png));

        let img = MediaDecoder::default().decode(&data, MediaKind::Image)?;
        assert_eq!(img.dimensions(), (12, 7));
        assert_eq!(img.get_pixel(1, 2), &Rgba([10, 20, 128, 255]));
        Ok(())
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let err = MediaDecoder::default()
            .decode(b"definitely not an image", MediaKind::Image)
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::Decode { kind: "image", .. }));
    }

    #[test]
    fn test_truncated_image_is_a_decode_error() {
        let data = png_bytes(16, 16);
        let err = MediaDecoder::default()
            .decode(&data[..data.len() / 2], MediaKind::Image)
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::Decode { .. }));
    }

    #[test]
    fn test_other_kind_is_rejected() {
        let err = MediaDecoder::default()
            .decode(&png_bytes(4, 4), MediaKind::Other)
            .unwrap_err();
        assert!(matches!(
            err,
            ThumbnailError::Unsupported {
                kind: MediaKind::Other
            }
        ));
    }

    #[test]
    fn test_missing_ffmpeg_is_a_decode_error() {
        let decoder = MediaDecoder::new("/nonexistent/bin/ffmpeg");
        let err = decoder.decode(b"\x00\x00\x00\x18ftypmp42", MediaKind::Video).unwrap_err();
        assert!(matches!(err, ThumbnailError::Decode { kind: "video", .. }));
    }

    fn ffmpeg_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    #[test]
    fn test_extracts_first_video_frame() -> anyhow::Result<()> {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not on PATH, skipping");
            return Ok(());
        }

        // Two seconds of solid red, 32x18
        let temp_dir = tempfile::tempdir()?;
        let clip = temp_dir.path().join("clip.y4m");
        let status = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-f", "lavfi"])
            .args(["-i", "color=c=red:s=32x18:r=5:d=2", "-pix_fmt", "yuv420p"])
            .arg(&clip)
            .status()?;
        anyhow::ensure!(status.success(), "ffmpeg could not render the test clip");

        let data = std::fs::read(&clip)?;
        let frame = MediaDecoder::default().decode(&data, MediaKind::Video)?;
        assert_eq!(frame.dimensions(), (32, 18));

        let [r, g, b, a] = frame.get_pixel(16, 9).0;
        assert!(r > 200 && g < 60 && b < 60, "expected red, got {:?}", (r, g, b));
        assert_eq!(a, 255);
        Ok(())
    }
}
