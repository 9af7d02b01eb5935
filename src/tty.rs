//! Keyboard stop: `Q` on stdin ends the recording.

use std::io::{self, IsTerminal, Read};
use std::thread;

use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Puts a terminal stdin into cbreak mode (no echo, no line buffering)
/// and restores the original mode on drop. A no-op when stdin is not a tty.
pub struct CbreakGuard {
    orig: Option<Termios>,
}

impl CbreakGuard {
    pub fn enter() -> Self {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Self { orig: None };
        }
        let orig = match termios::tcgetattr(&stdin) {
            Ok(t) => t,
            Err(e) => {
                warn!("cannot read terminal mode: {e}");
                return Self { orig: None };
            }
        };
        let mut mode = orig.clone();
        mode.local_flags.remove(LocalFlags::ECHO | LocalFlags::ICANON);
        mode.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        mode.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        if let Err(e) = termios::tcsetattr(&stdin, SetArg::TCSADRAIN, &mode) {
            warn!("cannot switch terminal to cbreak mode: {e}");
            return Self { orig: None };
        }
        Self { orig: Some(orig) }
    }
}

impl Drop for CbreakGuard {
    fn drop(&mut self) {
        if let Some(orig) = self.orig.take() {
            if let Err(e) = termios::tcsetattr(io::stdin(), SetArg::TCSADRAIN, &orig) {
                warn!("cannot restore terminal mode: {e}");
            }
        }
    }
}

/// True if `buf` holds a stop request.
pub fn is_stop_key(buf: &[u8]) -> bool {
    buf.iter().any(|b| b.eq_ignore_ascii_case(&b'q'))
}

/// Watch stdin on a plain thread and cancel `token` when `Q` is pressed.
/// stdin reads can't be interrupted, so the thread is left detached and
/// dies with the process.
pub fn watch_stop_key(token: CancellationToken) {
    let spawned = thread::Builder::new()
        .name("stop-key".into())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 64];
            while !token.is_cancelled() {
                match stdin.read(&mut buf) {
                    Ok(0) => {
                        debug!("stdin closed");
                        return;
                    }
                    Ok(n) if is_stop_key(&buf[..n]) => {
                        info!("Stopping on \"Q\" press");
                        token.cancel();
                        return;
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        debug!("stdin read failed: {e}");
                        return;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!("cannot watch stdin for stop key: {e}");
    }
}
