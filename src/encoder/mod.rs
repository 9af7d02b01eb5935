//! Encoder handle: frames in, one finalized MP4 out.
//!
//! The ffmpeg-backed encoder keeps one segment per display geometry in a
//! private temp dir. `finalize` closes the live segment and either moves
//! the lone segment into place or scales and concatenates them all.

pub mod ffmpeg;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use self::ffmpeg::{ConcatCommand, RawInputCommand, RawStream};
use crate::cli::LogLevel;
use crate::constants::{PIX_FMT_FINAL, TMP_PREFIX};
use crate::display::{DisplayFrame, Geometry};
use crate::error::{RecordError, Stage};
use crate::output;

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub output: PathBuf,
    /// Write to `output` as given. Otherwise the first free name derived
    /// from it is claimed when the video is assembled.
    pub overwrite: bool,
    pub vcodec: String,
    pub framerate: u32,
    pub log_level: LogLevel,
}

/// One closed intermediate encode.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub index: usize,
    pub geometry: Geometry,
    pub frames: u64,
    pub bytes: u64,
    pub duration: Duration,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeSummary {
    /// `None` when no frame was ever encoded; nothing is written then.
    pub output: Option<PathBuf>,
    pub frames: u64,
    pub segments: Vec<SegmentSummary>,
}

#[allow(async_fn_in_trait)]
pub trait Encoder {
    /// Hand one frame to the encoder.
    async fn encode(&mut self, frame: &DisplayFrame) -> Result<(), RecordError>;

    /// Size of the encoded output so far.
    async fn bytes_written(&self) -> u64;

    /// Flush and close the container. Consumes the handle, so it runs at
    /// most once.
    async fn finalize(self) -> Result<EncodeSummary, RecordError>;
}

pub struct FfmpegEncoder {
    settings: EncoderSettings,
    dir: TempDir,
    active: Option<RawStream>,
    closed: Vec<SegmentSummary>,
    failure: Option<RecordError>,
    segment_count: usize,
}

impl FfmpegEncoder {
    /// Prepare the segment directory. No process starts until the first
    /// frame arrives, since its geometry shapes the ffmpeg command line.
    pub fn new(settings: EncoderSettings) -> Result<Self, RecordError> {
        let dir = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempdir()
            .map_err(|e| RecordError::io(Stage::Encoding, e))?;
        debug!(dir = %dir.path().display(), "segment directory");
        Ok(Self {
            settings,
            dir,
            active: None,
            closed: Vec::new(),
            failure: None,
            segment_count: 0,
        })
    }

    fn start_segment(&mut self, frame: &DisplayFrame) -> Result<RawStream, RecordError> {
        let index = self.segment_count;
        self.segment_count += 1;
        let path = self
            .dir
            .path()
            .join(format!("{index:03}-{}.mp4", frame.geometry));
        info!(index, geometry = %frame.geometry, "starting segment");
        let cmd = RawInputCommand::new(path, frame.geometry, frame.format)
            .with_loglevel(self.settings.log_level.as_ffmpeg())
            .with_framerate(self.settings.framerate)
            .with_video_codec(&self.settings.vcodec);
        RawStream::spawn(index, &cmd)
    }

    async fn close_active(&mut self) {
        if let Some(stream) = self.active.take() {
            match stream.close().await {
                Ok(summary) => self.closed.push(summary),
                Err(e) => {
                    warn!("closing segment failed: {e}");
                    self.failure.get_or_insert(e);
                }
            }
        }
    }
}

impl Encoder for FfmpegEncoder {
    async fn encode(&mut self, frame: &DisplayFrame) -> Result<(), RecordError> {
        let expected = DisplayFrame::expected_len(frame.geometry, frame.format);
        if frame.data.len() != expected {
            return Err(RecordError::Encoder(format!(
                "frame of {} bytes does not match {} {:?}",
                frame.data.len(),
                frame.geometry,
                frame.format
            )));
        }

        let switch = match &self.active {
            Some(stream) => !stream.accepts(frame.geometry, frame.format),
            None => true,
        };
        if switch {
            self.close_active().await;
            self.active = Some(self.start_segment(frame)?);
        }
        match self.active.as_mut() {
            Some(stream) => stream.write(&frame.data).await,
            None => Err(RecordError::Encoder("no active segment".into())),
        }
    }

    async fn bytes_written(&self) -> u64 {
        let closed: u64 = self.closed.iter().map(|s| s.bytes).sum();
        let live = match &self.active {
            Some(stream) => tokio::fs::metadata(stream.path()).await.map(|m| m.len()).unwrap_or(0),
            None => 0,
        };
        closed + live
    }

    async fn finalize(mut self) -> Result<EncodeSummary, RecordError> {
        self.close_active().await;

        let segments: Vec<SegmentSummary> = self
            .closed
            .iter()
            .filter(|s| s.frames > 0)
            .cloned()
            .collect();
        let frames: u64 = segments.iter().map(|s| s.frames).sum();

        let output = if segments.is_empty() {
            info!("no frames recorded; nothing to write");
            None
        } else {
            Some(assemble(&segments, &self.settings).await?)
        };

        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        Ok(EncodeSummary {
            output,
            frames,
            segments,
        })
    }
}

/// Produce the final container from closed segments and return its path.
async fn assemble(segments: &[SegmentSummary], settings: &EncoderSettings) -> Result<PathBuf, RecordError> {
    let target = if settings.overwrite {
        settings.output.clone()
    } else {
        output::reserve(&settings.output)
            .await
            .map_err(|e| RecordError::io(Stage::Encoding, e))?
    };
    if target != settings.output {
        info!("{} exists, writing {} instead", settings.output.display(), target.display());
    }

    let written = match segments {
        // already yuv420p in the requested codec
        [only] if only.geometry.is_even() => {
            info!("Moving {} to {}", only.path.display(), target.display());
            move_file(&only.path, &target).await
        }
        _ => {
            info!(segments = segments.len(), "converting to {PIX_FMT_FINAL}");
            let cmd = segments.iter().fold(
                ConcatCommand::new(&target, &settings.vcodec).with_loglevel(settings.log_level.as_ffmpeg()),
                |cmd, s| cmd.input(&s.path, s.geometry),
            );
            cmd.run().await
        }
    };

    if let Err(e) = written {
        if !settings.overwrite {
            // drop the placeholder so the name is free again
            let _ = tokio::fs::remove_file(&target).await;
        }
        return Err(e);
    }
    Ok(target)
}

/// Rename, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<(), RecordError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| RecordError::io(Stage::Encoding, e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| RecordError::io(Stage::Encoding, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(output: PathBuf, overwrite: bool) -> EncoderSettings {
        EncoderSettings {
            output,
            overwrite,
            vcodec: "libx264".into(),
            framerate: 24,
            log_level: LogLevel::Warning,
        }
    }

    fn segment(path: PathBuf) -> SegmentSummary {
        SegmentSummary {
            index: 0,
            geometry: Geometry::new(640, 480),
            frames: 3,
            bytes: 4,
            duration: Duration::from_millis(125),
            path,
        }
    }

    #[tokio::test]
    async fn assemble_keeps_a_name_taken_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("vm1.mp4");
        let seg = dir.path().join("000-640x480.mp4");
        tokio::fs::write(&seg, b"ours").await.unwrap();
        // another session finished first under the same name
        tokio::fs::write(&output, b"theirs").await.unwrap();

        let written = assemble(&[segment(seg)], &settings(output.clone(), false))
            .await
            .unwrap();

        assert_eq!(written, dir.path().join("vm1_0.mp4"));
        assert_eq!(std::fs::read(&written).unwrap(), b"ours");
        assert_eq!(std::fs::read(&output).unwrap(), b"theirs");
    }

    #[tokio::test]
    async fn assemble_overwrites_explicit_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("capture.mp4");
        let seg = dir.path().join("000-640x480.mp4");
        tokio::fs::write(&seg, b"ours").await.unwrap();
        tokio::fs::write(&output, b"old").await.unwrap();

        let written = assemble(&[segment(seg)], &settings(output.clone(), true))
            .await
            .unwrap();

        assert_eq!(written, output);
        assert_eq!(std::fs::read(&output).unwrap(), b"ours");
    }

    #[tokio::test]
    async fn failed_assemble_frees_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("vm1.mp4");
        let missing = dir.path().join("gone.mp4");

        let err = assemble(&[segment(missing)], &settings(output.clone(), false))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Encoding);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn move_file_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("seg.mp4");
        let to = dir.path().join("vm1.mp4");
        tokio::fs::write(&from, b"video").await.unwrap();
        move_file(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"video");
    }

    #[tokio::test]
    async fn finalize_without_frames_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("vm1.mp4");
        let enc = FfmpegEncoder::new(settings(output.clone(), false)).unwrap();
        assert_eq!(enc.bytes_written().await, 0);
        let summary = enc.finalize().await.unwrap();
        assert_eq!(summary, EncodeSummary::default());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn rejects_short_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut enc = FfmpegEncoder::new(settings(dir.path().join("vm1.mp4"), false)).unwrap();
        let frame = DisplayFrame {
            geometry: Geometry::new(2, 2),
            format: crate::display::PixelFormat::Rgb24,
            data: vec![0; 5],
            pts: Duration::ZERO,
        };
        let err = enc.encode(&frame).await.unwrap_err();
        assert!(matches!(err, RecordError::Encoder(_)));
    }
}
