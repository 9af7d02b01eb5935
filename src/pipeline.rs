//! Recording pipeline: lookup → wait → attach → frame loop → finalize.
//!
//! One logical flow. Frames are pulled one at a time from the display
//! channel and handed straight to the encoder; the loop races the next
//! frame against the cancellation token. The encoder is created after
//! the display attaches and is consumed by `finalize` exactly once,
//! whichever way the loop ends.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RecordConfig;
use crate::constants::PROGRESS_INTERVAL;
use crate::display::{DisplayChannel, DisplayClient};
use crate::encoder::{EncodeSummary, Encoder, EncoderSettings, SegmentSummary};
use crate::error::RecordError;
use crate::hypervisor::{resolve_target, wait_until_running, Domain, Hypervisor};
use crate::output::default_output_path;
use crate::progress::{format_datasize, status_line, Console};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Attached,
    Recording,
    Finalizing,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The display channel ended cleanly (guest shut down).
    EndOfStream,
    /// The display channel failed mid-stream. What was recorded is kept,
    /// but the session still fails.
    Disconnected,
    /// Ctrl+C or the stop key.
    Cancelled,
    /// The encoder failed.
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::EndOfStream => "display closed",
            StopReason::Disconnected => "display disconnected",
            StopReason::Cancelled => "interrupted",
            StopReason::Failed => "encoder failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingReport {
    pub domain: Option<Domain>,
    /// Final container path, `None` if nothing was recorded.
    pub output: Option<PathBuf>,
    pub frames: u64,
    pub bytes: u64,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
    pub segments: Vec<SegmentSummary>,
}

impl RecordingReport {
    fn empty(domain: Option<Domain>, stop_reason: StopReason) -> Self {
        Self {
            domain,
            output: None,
            frames: 0,
            bytes: 0,
            elapsed: Duration::ZERO,
            stop_reason,
            segments: Vec::new(),
        }
    }
}

/// How the frame loop ended.
struct LoopOutcome {
    reason: StopReason,
    frames: u64,
    elapsed: Duration,
    error: Option<RecordError>,
}

pub struct Recorder {
    config: RecordConfig,
    console: Console,
    cancel: CancellationToken,
    phase: Phase,
}

impl Recorder {
    pub fn new(config: RecordConfig, cancel: CancellationToken) -> Self {
        let console = Console::new(config.quiet);
        Self {
            config,
            console,
            cancel,
            phase: Phase::Connecting,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &RecordConfig {
        &self.config
    }

    fn transition(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "phase");
        self.phase = next;
    }

    fn fail(&mut self, e: RecordError) -> RecordError {
        warn!(stage = %e.stage(), "{e}");
        self.transition(Phase::Failed);
        e
    }

    /// Run one recording session to completion.
    ///
    /// `make_encoder` is only called once the display is attached, so a
    /// session that can't reach the display never touches the output.
    /// Once the encoder exists it is always finalized; a display or encoder
    /// failure is returned after that.
    pub async fn run<H, D, E, F>(
        &mut self,
        hypervisor: &H,
        display: &D,
        make_encoder: F,
    ) -> Result<RecordingReport, RecordError>
    where
        H: Hypervisor,
        D: DisplayClient,
        E: Encoder,
        F: FnOnce(EncoderSettings) -> Result<E, RecordError>,
    {
        self.transition(Phase::Connecting);

        let resolved = resolve_target(hypervisor, &self.config.machine).await;
        let domain = match resolved {
            Ok(d) => d,
            Err(e) => return Err(self.fail(e)),
        };

        let running = wait_until_running(hypervisor, &domain, &self.console, &self.cancel).await;
        match running {
            Ok(true) => {}
            Ok(false) => {
                info!("cancelled while waiting for domain");
                self.transition(Phase::Closed);
                return Ok(RecordingReport::empty(Some(domain), StopReason::Cancelled));
            }
            Err(e) => return Err(self.fail(e)),
        }

        let output = match &self.config.output {
            Some(path) => path.clone(),
            None => default_output_path(&domain.name),
        };
        debug!(output = %output.display(), "output path");

        let attached = display.attach(&domain).await;
        let mut channel = match attached {
            Ok(c) => c,
            Err(e) => return Err(self.fail(e)),
        };
        self.transition(Phase::Attached);

        let settings = EncoderSettings {
            output,
            overwrite: self.config.output.is_some(),
            vcodec: self.config.vcodec.clone(),
            framerate: self.config.framerate,
            log_level: self.config.log_level,
        };
        let mut encoder = match make_encoder(settings) {
            Ok(enc) => enc,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(Phase::Recording);
        self.console.line("Recording... press Q or Ctrl+C to stop");
        let mut outcome = self.record(&mut channel, &mut encoder).await;
        // the channel is spent; release it before the final encode pass
        drop(channel);

        self.transition(Phase::Finalizing);
        let finalized = encoder.finalize().await;

        match (outcome.error.take(), finalized) {
            (Some(e), Ok(summary)) => {
                if let Some(path) = &summary.output {
                    self.console.line("");
                    self.console.line(format!(
                        "Recording stopped: {}; {} frames kept in {}",
                        outcome.reason,
                        summary.frames,
                        path.display()
                    ));
                }
                Err(self.fail(e))
            }
            (Some(e), Err(fin)) => {
                warn!("finalize after failure also failed: {fin}");
                Err(self.fail(e))
            }
            (None, Err(e)) => Err(self.fail(e)),
            (None, Ok(summary)) => {
                let report = self.report(domain, outcome, summary).await;
                self.transition(Phase::Closed);
                self.print_report(&report);
                Ok(report)
            }
        }
    }

    /// Pull frames until the channel ends, the token fires, or encoding fails.
    async fn record<C, E>(&self, channel: &mut C, encoder: &mut E) -> LoopOutcome
    where
        C: DisplayChannel,
        E: Encoder,
    {
        let started = Instant::now();
        let mut last_status = started;
        let mut frames = 0u64;

        let (reason, error) = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break (StopReason::Cancelled, None),
                next = channel.next_frame() => match next {
                    Ok(Some(frame)) => {
                        if let Err(e) = encoder.encode(&frame).await {
                            break (StopReason::Failed, Some(e));
                        }
                        frames += 1;
                        if last_status.elapsed() >= PROGRESS_INTERVAL {
                            last_status = Instant::now();
                            self.console.status(status_line(
                                started.elapsed(),
                                frames,
                                encoder.bytes_written().await,
                            ));
                        }
                    }
                    Ok(None) => break (StopReason::EndOfStream, None),
                    // preempted or unreadable: keep what we have, then fail
                    Err(e) => {
                        warn!("display stream lost: {e}");
                        break (StopReason::Disconnected, Some(e));
                    }
                },
            }
        };

        info!(%reason, frames, "recording stopped");
        LoopOutcome {
            reason,
            frames,
            elapsed: started.elapsed(),
            error,
        }
    }

    async fn report(&self, domain: Domain, outcome: LoopOutcome, summary: EncodeSummary) -> RecordingReport {
        let bytes = match &summary.output {
            Some(path) => tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0),
            None => 0,
        };
        if summary.frames != outcome.frames {
            debug!(encoded = summary.frames, received = outcome.frames, "frame count mismatch");
        }
        RecordingReport {
            domain: Some(domain),
            output: summary.output,
            frames: outcome.frames,
            bytes,
            elapsed: outcome.elapsed,
            stop_reason: outcome.reason,
            segments: summary.segments,
        }
    }

    fn print_report(&self, report: &RecordingReport) {
        let console = &self.console;
        if console.is_quiet() {
            return;
        }
        console.status(status_line(report.elapsed, report.frames, report.bytes));
        console.line("");
        console.line(format!("Recording stopped: {}", report.stop_reason));
        if !report.segments.is_empty() {
            console.line(format!(
                "{:<10}{:<14}{:>10}{:>12}{:>14}",
                "Segment", "Geometry", "Frames", "Duration", "Size"
            ));
            for s in &report.segments {
                console.line(format!(
                    "{:<10}{:<14}{:>10}{:>12}{:>14}",
                    s.index,
                    s.geometry.to_string(),
                    s.frames,
                    format!("{:.2} s", s.duration.as_secs_f64()),
                    format_datasize(s.bytes)
                ));
            }
        }
        match &report.output {
            Some(path) => console.line(format!("{} written!", path.display())),
            None => console.line("No frames recorded; nothing written"),
        }
    }
}
