//! Child processes for the external tools.

use std::ffi::OsStr;

use tokio::process::Command;

/// `program` in a process group of its own. A terminal Ctrl+C then reaches
/// only the recorder, which stops ffmpeg itself by closing its stdin.
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.process_group(0);
    cmd
}
