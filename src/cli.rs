use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

use crate::constants::{DEFAULT_FRAMERATE, DEFAULT_VCODEC};

#[derive(Parser, Debug)]
#[command(
    name = "spice-record",
    version = env!("CARGO_PKG_VERSION"),
    about = "Record a libvirt domain's SPICE display to an MP4 video",
    disable_version_flag = true
)]
pub struct Cli {
    /// Set the output video codec (see "ffmpeg -encoders" for choices)
    #[arg(long, value_name = "VCODEC", default_value = DEFAULT_VCODEC)]
    pub vcodec: String,

    /// Set the logging level
    #[arg(long, value_enum, default_value = "WARNING")]
    pub loglevel: LogLevel,

    /// Target output framerate
    #[arg(
        short = 'r',
        long,
        default_value_t = DEFAULT_FRAMERATE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub framerate: u32,

    /// Connect to hypervisor (e.g. qemu:///system)
    #[arg(short = 'c', long = "connect", value_name = "URI", env = "LIBVIRT_DEFAULT_URI")]
    pub libvirt_uri: Option<String>,

    /// Machine to record
    #[arg(value_name = "DOMAIN-NAME|ID|UUID")]
    pub machine: String,

    /// Output filename (defaults to <domain-name>.mp4)
    #[arg(short = 'o', long, value_name = "FILENAME")]
    pub output: Option<PathBuf>,

    /// Don't output anything to the console
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    #[allow(dead_code)]
    version: Option<bool>,
}

/// Console verbosity; also drives ffmpeg's `-loglevel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
    #[value(name = "CRITICAL")]
    Critical,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`. There is no tracing
    /// level above ERROR, so CRITICAL shares it.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }

    pub fn as_ffmpeg(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "fatal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("spice-record").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let cli = parse(&["vm1"]).unwrap();
        assert_eq!(cli.machine, "vm1");
        assert_eq!(cli.vcodec, "libx264");
        assert_eq!(cli.loglevel, LogLevel::Warning);
        assert_eq!(cli.framerate, 24);
        assert!(cli.output.is_none());
        assert!(!cli.quiet);
    }

    #[test]
    fn all_flags() {
        let cli = parse(&[
            "--vcodec", "libx265", "--loglevel", "DEBUG", "-r", "30", "-c", "qemu:///system",
            "-o", "out.mp4", "-q", "42",
        ])
        .unwrap();
        assert_eq!(cli.vcodec, "libx265");
        assert_eq!(cli.loglevel, LogLevel::Debug);
        assert_eq!(cli.framerate, 30);
        assert_eq!(cli.libvirt_uri.as_deref(), Some("qemu:///system"));
        assert_eq!(cli.output, Some(PathBuf::from("out.mp4")));
        assert!(cli.quiet);
        assert_eq!(cli.machine, "42");
    }

    #[test]
    fn rejects_unknown_loglevel() {
        for bad in ["TRACE", "debug", "Warning"] {
            let err = parse(&["--loglevel", bad, "vm1"]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidValue, "accepted {bad:?}");
        }
    }

    #[test]
    fn rejects_bad_framerate() {
        assert!(parse(&["-r", "fast", "vm1"]).is_err());
        assert!(parse(&["-r", "0", "vm1"]).is_err());
        assert!(parse(&["-r", "-5", "vm1"]).is_err());
    }

    #[test]
    fn machine_is_required() {
        let err = parse(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn version_flag() {
        let err = parse(&["-v"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn ffmpeg_levels() {
        assert_eq!(LogLevel::Critical.as_ffmpeg(), "fatal");
        assert_eq!(LogLevel::Warning.as_ffmpeg(), "warning");
        assert_eq!(LogLevel::Critical.as_filter(), "error");
    }
}
