//! Console output for the interactive recorder. Everything here is
//! silenced by `--quiet`; diagnostics go through `tracing` instead.

use std::io::{self, Write};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Console {
    quiet: bool,
}

impl Console {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn line(&self, msg: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", msg.as_ref());
        }
    }

    /// Overwrite the current terminal line.
    pub fn status(&self, msg: impl AsRef<str>) {
        if self.quiet {
            return;
        }
        let mut out = io::stdout().lock();
        let _ = write!(out, "\r{:80}\r{}", "", msg.as_ref());
        let _ = out.flush();
    }
}

/// `1536` → `"1.50 kiB"`.
pub fn format_datasize(bytes: u64) -> String {
    const SUFFIXES: [&str; 5] = ["", "ki", "Mi", "Gi", "Ti"];
    let mut value = bytes as f64;
    let mut suffix = SUFFIXES[0];
    for (i, s) in SUFFIXES.iter().enumerate() {
        suffix = s;
        if value < 1024.0 || i == SUFFIXES.len() - 1 {
            break;
        }
        value /= 1024.0;
    }
    format!("{value:.2} {suffix}B")
}

/// The periodic status line: elapsed, frames, bytes.
pub fn status_line(elapsed: Duration, frames: u64, bytes: u64) -> String {
    format!(
        "{:<20}{:<20}{:<20}",
        format!("{:.2} sec", elapsed.as_secs_f64()),
        format!("{frames} frames"),
        format_datasize(bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datasize() {
        assert_eq!(format_datasize(0), "0.00 B");
        assert_eq!(format_datasize(1023), "1023.00 B");
        assert_eq!(format_datasize(1536), "1.50 kiB");
        assert_eq!(format_datasize(5 * 1024 * 1024), "5.00 MiB");
        assert_eq!(format_datasize(3 << 40), "3.00 TiB");
        assert_eq!(format_datasize(2048 << 40), "2048.00 TiB");
    }

    #[test]
    fn status() {
        let line = status_line(Duration::from_millis(2500), 60, 2048);
        assert!(line.starts_with("2.50 sec"));
        assert!(line.contains("60 frames"));
        assert!(line.contains("2.00 kiB"));
    }
}
