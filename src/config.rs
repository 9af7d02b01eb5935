//! Per-session configuration handed to the pipeline.
//!
//! Everything the pipeline needs is carried here explicitly so two
//! recorders in one process (tests, mostly) never share settings.

use std::path::PathBuf;

use crate::cli::{Cli, LogLevel};
use crate::constants::{DEFAULT_FRAMERATE, DEFAULT_VCODEC};

#[derive(Debug, Clone)]
pub struct RecordConfig {
    pub machine: String,
    pub libvirt_uri: Option<String>,
    pub output: Option<PathBuf>,
    pub vcodec: String,
    pub framerate: u32,
    pub log_level: LogLevel,
    pub quiet: bool,
}

impl RecordConfig {
    pub fn new(machine: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            libvirt_uri: None,
            output: None,
            vcodec: DEFAULT_VCODEC.to_string(),
            framerate: DEFAULT_FRAMERATE,
            log_level: LogLevel::Warning,
            quiet: false,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.framerate = framerate;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

impl From<Cli> for RecordConfig {
    fn from(cli: Cli) -> Self {
        Self {
            machine: cli.machine,
            libvirt_uri: cli.libvirt_uri,
            output: cli.output,
            vcodec: cli.vcodec,
            framerate: cli.framerate,
            log_level: cli.loglevel,
            quiet: cli.quiet,
        }
    }
}
