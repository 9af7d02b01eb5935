//! ffmpeg invocations: a rawvideo pipe per segment, and the final
//! scale/pad/concat pass.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::time::Instant;
use tracing::debug;

use super::SegmentSummary;
use crate::child;
use crate::constants::{FFMPEG_BIN, PIX_FMT_FINAL, PIX_FMT_ODD};
use crate::display::{Geometry, PixelFormat};
use crate::error::{RecordError, Stage};

/// Segment pixel format: yuv420p needs both sides even.
pub fn intermediate_pix_fmt(geometry: Geometry) -> &'static str {
    if geometry.is_even() {
        PIX_FMT_FINAL
    } else {
        PIX_FMT_ODD
    }
}

/// Arguments for an ffmpeg reading raw frames on stdin.
#[derive(Debug, Clone)]
pub struct RawInputCommand {
    loglevel: String,
    geometry: Geometry,
    format: PixelFormat,
    framerate: u32,
    vcodec: String,
    output: PathBuf,
}

impl RawInputCommand {
    pub fn new(output: impl Into<PathBuf>, geometry: Geometry, format: PixelFormat) -> Self {
        Self {
            loglevel: "warning".to_string(),
            geometry,
            format,
            framerate: crate::constants::DEFAULT_FRAMERATE,
            vcodec: crate::constants::DEFAULT_VCODEC.to_string(),
            output: output.into(),
        }
    }

    pub fn with_loglevel(mut self, loglevel: &str) -> Self {
        self.loglevel = loglevel.to_string();
        self
    }

    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.framerate = framerate;
        self
    }

    pub fn with_video_codec(mut self, vcodec: &str) -> Self {
        self.vcodec = vcodec.to_string();
        self
    }

    pub fn build(&self) -> Vec<String> {
        vec![
            "-loglevel".into(),
            self.loglevel.clone(),
            "-use_wallclock_as_timestamps".into(),
            "1".into(),
            // input
            "-f".into(),
            "rawvideo".into(),
            "-vcodec".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            self.format.ffmpeg_name().into(),
            "-r".into(),
            self.framerate.to_string(),
            "-an".into(),
            "-s".into(),
            self.geometry.to_string(),
            "-i".into(),
            "pipe:0".into(),
            // output
            "-vcodec".into(),
            self.vcodec.clone(),
            "-pix_fmt".into(),
            intermediate_pix_fmt(self.geometry).into(),
            self.output.to_string_lossy().into_owned(),
        ]
    }
}

/// Arguments for scaling every segment into one canvas and concatenating.
#[derive(Debug, Clone)]
pub struct ConcatCommand {
    loglevel: String,
    vcodec: String,
    inputs: Vec<(PathBuf, Geometry)>,
    output: PathBuf,
}

impl ConcatCommand {
    pub fn new(output: impl Into<PathBuf>, vcodec: &str) -> Self {
        Self {
            loglevel: "warning".to_string(),
            vcodec: vcodec.to_string(),
            inputs: Vec::new(),
            output: output.into(),
        }
    }

    pub fn with_loglevel(mut self, loglevel: &str) -> Self {
        self.loglevel = loglevel.to_string();
        self
    }

    pub fn input(mut self, path: impl Into<PathBuf>, geometry: Geometry) -> Self {
        self.inputs.push((path.into(), geometry));
        self
    }

    /// Largest width and height over all inputs, rounded up to even (the
    /// pad filter can't produce odd sizes).
    pub fn canvas(&self) -> Geometry {
        let (w, h) = self
            .inputs
            .iter()
            .fold((0, 0), |(w, h), (_, g)| (w.max(g.width), h.max(g.height)));
        Geometry::new(w, h).even_ceil()
    }

    pub fn filter_graph(&self) -> String {
        let Geometry { width: w, height: h } = self.canvas();
        let mut filters: Vec<String> = (0..self.inputs.len())
            .map(|i| {
                format!(
                    "[{i}:v] scale={w}:{h}:force_original_aspect_ratio=decrease,\
                     pad={w}:{h}:(ow-iw)/2:(oh-ih)/2 [v{i}]"
                )
            })
            .collect();
        let labels: Vec<String> = (0..self.inputs.len()).map(|i| format!("[v{i}]")).collect();
        filters.push(format!(
            "{}concat=n={}:v=1:a=0 [outv]",
            labels.join(" "),
            self.inputs.len()
        ));
        filters.join("; ")
    }

    pub fn build(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-nostdin".into(),
            "-loglevel".into(),
            self.loglevel.clone(),
            "-y".into(),
        ];
        for (path, _) in &self.inputs {
            args.push("-i".into());
            args.push(path.to_string_lossy().into_owned());
        }
        args.extend([
            "-filter_complex".into(),
            self.filter_graph(),
            "-vcodec".into(),
            self.vcodec.clone(),
            "-pix_fmt".into(),
            PIX_FMT_FINAL.into(),
            "-map".into(),
            "[outv]".into(),
            self.output.to_string_lossy().into_owned(),
        ]);
        args
    }

    pub async fn run(&self) -> Result<(), RecordError> {
        let args = self.build();
        debug!(?args, "invoking ffmpeg concat");
        let status = child::command(FFMPEG_BIN)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await
            .map_err(|e| RecordError::Encoder(format!("failed to run {FFMPEG_BIN}: {e}")))?;
        if !status.success() {
            return Err(RecordError::Encoder(format!("ffmpeg concat exited with {status}")));
        }
        Ok(())
    }
}

/// One live ffmpeg process encoding a single geometry.
pub struct RawStream {
    index: usize,
    geometry: Geometry,
    format: PixelFormat,
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    frames: u64,
    started: Instant,
}

impl RawStream {
    pub fn spawn(index: usize, cmd: &RawInputCommand) -> Result<Self, RecordError> {
        let args = cmd.build();
        debug!(?args, "invoking ffmpeg");
        let mut process = child::command(FFMPEG_BIN)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| RecordError::Encoder(format!("failed to run {FFMPEG_BIN}: {e}")))?;
        let stdin = process.stdin.take();
        Ok(Self {
            index,
            geometry: cmd.geometry,
            format: cmd.format,
            path: cmd.output.clone(),
            child: process,
            stdin,
            frames: 0,
            started: Instant::now(),
        })
    }

    pub fn accepts(&self, geometry: Geometry, format: PixelFormat) -> bool {
        self.geometry == geometry && self.format == format
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), RecordError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RecordError::Encoder("segment already closed".into()))?;
        stdin.write_all(data).await.map_err(|e| {
            RecordError::Encoder(format!("ffmpeg stopped accepting frames ({e}); check --vcodec"))
        })?;
        self.frames += 1;
        Ok(())
    }

    /// Close stdin so ffmpeg writes the trailer, then reap it.
    pub async fn close(mut self) -> Result<SegmentSummary, RecordError> {
        if let Some(mut stdin) = self.stdin.take() {
            // a dead ffmpeg is reported by its exit status below
            let _ = stdin.shutdown().await;
        }
        let duration: Duration = self.started.elapsed();
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| RecordError::io(Stage::Encoding, e))?;
        if !status.success() {
            return Err(RecordError::Encoder(format!(
                "ffmpeg for segment {} exited with {status}",
                self.index
            )));
        }
        let bytes = tokio::fs::metadata(&self.path).await.map(|m| m.len()).unwrap_or(0);
        Ok(SegmentSummary {
            index: self.index,
            geometry: self.geometry,
            frames: self.frames,
            bytes,
            duration,
            path: self.path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_input_args() {
        let args = RawInputCommand::new("/tmp/x/000-1024x768.mp4", Geometry::new(1024, 768), PixelFormat::Rgb24)
            .with_loglevel("error")
            .with_framerate(30)
            .with_video_codec("libx265")
            .build();
        let joined = args.join(" ");
        assert_eq!(
            joined,
            "-loglevel error -use_wallclock_as_timestamps 1 -f rawvideo -vcodec rawvideo \
             -pix_fmt rgb24 -r 30 -an -s 1024x768 -i pipe:0 -vcodec libx265 -pix_fmt yuv420p \
             /tmp/x/000-1024x768.mp4"
        );
    }

    #[test]
    fn odd_geometry_uses_444() {
        let args = RawInputCommand::new("o.mp4", Geometry::new(721, 400), PixelFormat::Gray8).build();
        let i = args.iter().rposition(|a| a == "-pix_fmt").unwrap();
        assert_eq!(args[i + 1], "yuv444p");
        assert!(args.contains(&"gray".to_string()));
    }

    #[test]
    fn concat_graph() {
        let cmd = ConcatCommand::new("vm1.mp4", "libx264")
            .input("a.mp4", Geometry::new(640, 480))
            .input("b.mp4", Geometry::new(1023, 767));
        assert_eq!(cmd.canvas(), Geometry::new(1024, 768));
        assert_eq!(
            cmd.filter_graph(),
            "[0:v] scale=1024:768:force_original_aspect_ratio=decrease,pad=1024:768:(ow-iw)/2:(oh-ih)/2 [v0]; \
             [1:v] scale=1024:768:force_original_aspect_ratio=decrease,pad=1024:768:(ow-iw)/2:(oh-ih)/2 [v1]; \
             [v0] [v1]concat=n=2:v=1:a=0 [outv]"
        );
        let args = cmd.build();
        assert_eq!(&args[..4], ["-nostdin", "-loglevel", "warning", "-y"]);
        assert_eq!(args.last().unwrap(), "vm1.mp4");
        let map = args.iter().position(|a| a == "-map").unwrap();
        assert_eq!(args[map + 1], "[outv]");
    }
}
