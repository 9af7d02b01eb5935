//! Display frames sampled from the domain's SPICE graphics console.
//!
//! libvirt exposes the guest's primary surface through `virsh screenshot`,
//! which asks QEMU for a screendump of the same device the SPICE server
//! serves. Sampling that at the target framerate gives a stream of frames
//! without taking the single SPICE client slot.

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use super::{ppm, DisplayChannel, DisplayClient, DisplayFrame};
use crate::constants::{RATE_LOG_INTERVAL, TMP_PREFIX};
use crate::error::{RecordError, Stage};
use crate::hypervisor::{Domain, DomainState};
use crate::virsh::{Virsh, VirshError};

/// Where the guest's graphics server listens, from `virsh domdisplay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsInfo {
    pub kind: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_port: Option<u16>,
    pub socket: Option<String>,
}

impl GraphicsInfo {
    /// Parse a display URI such as `spice://127.0.0.1:5900?tls-port=5901`
    /// or `spice+unix:///run/libvirt/qemu/vm1.sock`.
    pub fn parse(uri: &str) -> Result<Self, RecordError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(RecordError::DisplayUnavailable(
                "domain has no active graphics device".to_string(),
            ));
        }
        let url = Url::parse(uri)
            .map_err(|e| RecordError::DisplayUnavailable(format!("bad display URI {uri:?}: {e}")))?;

        let (kind, unix) = match url.scheme().split_once('+') {
            Some((kind, transport)) => (kind.to_string(), transport == "unix"),
            None => (url.scheme().to_string(), false),
        };
        if kind != "spice" {
            return Err(RecordError::DisplayUnavailable(format!(
                "Graphics type \"{kind}\" not supported; must be \"spice\""
            )));
        }

        let tls_port = url
            .query_pairs()
            .find(|(k, _)| k == "tls-port")
            .and_then(|(_, v)| v.parse().ok());
        let host = url.host_str().filter(|h| !h.is_empty()).map(str::to_string);

        Ok(Self {
            kind,
            host,
            port: url.port(),
            tls_port,
            socket: unix.then(|| url.path().to_string()),
        })
    }
}

/// [`DisplayClient`] sampling the console at a fixed rate.
#[derive(Debug, Clone)]
pub struct ScreendumpClient {
    virsh: Virsh,
    framerate: u32,
    period: Duration,
}

impl ScreendumpClient {
    pub fn new(virsh: Virsh, framerate: u32) -> Self {
        let framerate = framerate.max(1);
        Self {
            virsh,
            framerate,
            period: Duration::from_nanos(1_000_000_000 / u64::from(framerate)),
        }
    }
}

fn attach_error(e: VirshError) -> RecordError {
    if e.is_refused() {
        RecordError::ConnectionRefused(e.to_string())
    } else {
        RecordError::DisplayUnavailable(e.to_string())
    }
}

impl DisplayClient for ScreendumpClient {
    type Channel = ScreendumpChannel;

    async fn attach(&self, domain: &Domain) -> Result<ScreendumpChannel, RecordError> {
        let uri = self
            .virsh
            .run(["domdisplay", &domain.name])
            .await
            .map_err(attach_error)?;
        let gfx = GraphicsInfo::parse(&uri)?;
        match (&gfx.host, gfx.port, &gfx.socket) {
            (Some(host), Some(port), _) => info!("Guest graphics address is {host}:{port}"),
            (_, _, Some(sock)) => info!("Guest graphics address is {sock}"),
            _ => info!("Using direct libvirt connection"),
        }
        debug!(?gfx, "graphics");

        let dir = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempdir()
            .map_err(|e| RecordError::io(Stage::Attach, e))?;
        let mut channel = ScreendumpChannel {
            virsh: self.virsh.clone(),
            domain: domain.name.clone(),
            path: dir.path().join("screen.pnm"),
            _dir: dir,
            ticker: {
                let mut t = tokio::time::interval_at(Instant::now() + self.period, self.period);
                t.set_missed_tick_behavior(MissedTickBehavior::Skip);
                t
            },
            started: Instant::now(),
            pending: None,
            ended: false,
            rate: SampleRate::new(self.framerate),
        };

        // The first grab doubles as the handshake: a console that can't be
        // read now won't be readable in the loop either.
        let first = channel.grab().await.map_err(|e| match e {
            GrabError::Virsh(e) => attach_error(e),
            GrabError::Other(e) => e,
        })?;
        channel.pending = Some(first);
        Ok(channel)
    }
}

enum GrabError {
    Virsh(VirshError),
    Other(RecordError),
}

pub struct ScreendumpChannel {
    virsh: Virsh,
    domain: String,
    path: PathBuf,
    _dir: TempDir,
    ticker: Interval,
    started: Instant,
    pending: Option<DisplayFrame>,
    ended: bool,
    rate: SampleRate,
}

/// Grabs per second actually achieved. Every grab is a `virsh` process
/// and a libvirtd round-trip, so this usually trails the target.
struct SampleRate {
    target: u32,
    window_start: Instant,
    grabs: u32,
}

impl SampleRate {
    fn new(target: u32) -> Self {
        Self {
            target,
            window_start: Instant::now(),
            grabs: 0,
        }
    }

    /// Count one grab; every `RATE_LOG_INTERVAL` returns the rate over it.
    fn record(&mut self, now: Instant) -> Option<f64> {
        self.grabs += 1;
        let span = now.duration_since(self.window_start);
        if span < RATE_LOG_INTERVAL {
            return None;
        }
        let fps = f64::from(self.grabs) / span.as_secs_f64();
        self.window_start = now;
        self.grabs = 0;
        Some(fps)
    }
}

impl ScreendumpChannel {
    async fn grab(&mut self) -> Result<DisplayFrame, GrabError> {
        let path = self.path.to_string_lossy().into_owned();
        self.virsh
            .run([
                "screenshot",
                "--domain",
                self.domain.as_str(),
                "--file",
                path.as_str(),
                "--screen",
                "0",
            ])
            .await
            .map_err(GrabError::Virsh)?;
        let pts = self.started.elapsed();
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| GrabError::Other(RecordError::io(Stage::Streaming, e)))?;
        let img = ppm::decode(&bytes).map_err(GrabError::Other)?;
        Ok(DisplayFrame {
            geometry: img.geometry,
            format: img.format,
            data: img.data,
            pts,
        })
    }

    /// After a failed grab: did the guest simply go away?
    async fn domain_gone(&self) -> bool {
        match self.virsh.run(["domstate", self.domain.as_str()]).await {
            Ok(state) => DomainState::from_virsh(&state) != DomainState::Running,
            Err(e) => e.is_no_domain(),
        }
    }
}

impl DisplayChannel for ScreendumpChannel {
    async fn next_frame(&mut self) -> Result<Option<DisplayFrame>, RecordError> {
        if self.ended {
            return Ok(None);
        }
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.ticker.tick().await;
        match self.grab().await {
            Ok(frame) => {
                if let Some(fps) = self.rate.record(Instant::now()) {
                    debug!(target_fps = self.rate.target, "screendump sampling at {fps:.1} fps");
                    if fps < f64::from(self.rate.target) * 0.9 {
                        debug!("virsh screenshot can't keep up; lower --framerate for even pacing");
                    }
                }
                Ok(Some(frame))
            }
            Err(GrabError::Virsh(e)) => {
                if self.domain_gone().await {
                    debug!("domain stopped running; display closed");
                    self.ended = true;
                    return Ok(None);
                }
                warn!("display grab failed: {e}");
                if e.is_refused() {
                    return Err(RecordError::ConnectionRefused(e.to_string()));
                }
                Err(RecordError::Display(e.to_string()))
            }
            Err(GrabError::Other(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_display() {
        let g = GraphicsInfo::parse("spice://127.0.0.1:5900\n").unwrap();
        assert_eq!(g.kind, "spice");
        assert_eq!(g.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(g.port, Some(5900));
        assert_eq!(g.tls_port, None);
        assert_eq!(g.socket, None);
    }

    #[test]
    fn parses_tls_port() {
        let g = GraphicsInfo::parse("spice://localhost:5900?tls-port=5901").unwrap();
        assert_eq!(g.tls_port, Some(5901));
    }

    #[test]
    fn parses_unix_socket() {
        let g = GraphicsInfo::parse("spice+unix:///var/lib/libvirt/qemu/vm1-spice.sock").unwrap();
        assert_eq!(g.kind, "spice");
        assert_eq!(g.socket.as_deref(), Some("/var/lib/libvirt/qemu/vm1-spice.sock"));
    }

    #[test]
    fn rejects_missing_graphics() {
        let err = GraphicsInfo::parse("").unwrap_err();
        assert!(matches!(err, RecordError::DisplayUnavailable(_)));
    }

    #[test]
    fn rejects_vnc() {
        let err = GraphicsInfo::parse("vnc://127.0.0.1:0").unwrap_err();
        assert!(err.to_string().contains("Graphics type \"vnc\" not supported"));
    }

    #[test]
    fn attach_error_mapping() {
        let refused = VirshError::Failed {
            stderr: "error: Connection refused".into(),
        };
        assert!(matches!(attach_error(refused), RecordError::ConnectionRefused(_)));
        let other = VirshError::Failed {
            stderr: "error: internal error: no graphics".into(),
        };
        assert!(matches!(attach_error(other), RecordError::DisplayUnavailable(_)));
    }

    #[test]
    fn sample_rate_reports_per_window() {
        let t0 = Instant::now();
        let mut rate = SampleRate {
            target: 24,
            window_start: t0,
            grabs: 0,
        };
        for i in 1..10 {
            assert_eq!(rate.record(t0 + Duration::from_millis(i * 100)), None);
        }
        let fps = rate.record(t0 + RATE_LOG_INTERVAL).unwrap();
        assert!((fps - 10.0 / RATE_LOG_INTERVAL.as_secs_f64()).abs() < 1e-9);
        assert_eq!(rate.grabs, 0);
    }

    #[test]
    fn sample_period_follows_framerate() {
        let c = ScreendumpClient::new(Virsh::new(None), 25);
        assert_eq!(c.period, Duration::from_millis(40));
    }
}
