//! Defaults and fixed names.

use std::time::Duration;

pub const DEFAULT_VCODEC: &str = "libx264";
pub const DEFAULT_FRAMERATE: u32 = 24;

/// Extension of the final container.
pub const OUTPUT_EXT: &str = "mp4";

// external tools
pub const VIRSH_BIN: &str = "virsh";
pub const FFMPEG_BIN: &str = "ffmpeg";

/// Prefix for the private segment directory and screendump files.
pub const TMP_PREFIX: &str = "spice-record-";

/// Final container pixel format; widest player support.
pub const PIX_FMT_FINAL: &str = "yuv420p";
/// Intermediate format for segments with odd dimensions (x264 rejects
/// yuv420p unless both sides are even).
pub const PIX_FMT_ODD: &str = "yuv444p";

/// Domain state polling while waiting for the guest to run.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on any single `virsh` invocation.
pub const VIRSH_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the achieved screendump rate is logged.
pub const RATE_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// How often the console status line is refreshed.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
