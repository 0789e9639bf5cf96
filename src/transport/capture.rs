//! Redirect the process's standard output into a pipe
//!
//! While a remote client is attached everything the engine prints to fd 1 is
//! read back line by line and handed to the relay. A dedicated thread drains
//! the pipe so writers never stall on a slow client.

use std::io::{BufRead, BufReader, Write};

use tokio::sync::mpsc;

use crate::common::{Error, Result};

#[cfg(unix)]
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

#[cfg(unix)]
const STDOUT_FD: i32 = 1;

/// An active stdout redirection
pub struct OutputCapture {
    #[cfg(unix)]
    saved: OwnedFd,
    writer: os_pipe::PipeWriter,
}

impl OutputCapture {
    /// Point fd 1 at a fresh pipe and start pumping its lines
    #[cfg(unix)]
    pub fn redirect_stdout() -> Result<(Self, mpsc::UnboundedReceiver<String>)> {
        let (reader, writer) = os_pipe::pipe()?;

        std::io::stdout().flush()?;

        // SAFETY: dup(2) on a valid descriptor number; ownership of the
        // returned descriptor is taken exactly once below.
        let saved = unsafe { libc::dup(STDOUT_FD) };
        if saved < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        // SAFETY: `saved` is a freshly duplicated descriptor nobody else owns.
        let saved = unsafe { OwnedFd::from_raw_fd(saved) };

        // SAFETY: both descriptors are open for the duration of the call.
        if unsafe { libc::dup2(writer.as_raw_fd(), STDOUT_FD) } < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("stdout-capture".to_string())
            .spawn(move || {
                for line in BufReader::new(reader).lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Reading captured output failed");
                            break;
                        }
                    }
                }
                tracing::debug!("Output capture pump finished");
            })?;

        tracing::debug!("Standard output redirected");
        Ok((Self { saved, writer }, rx))
    }

    #[cfg(not(unix))]
    pub fn redirect_stdout() -> Result<(Self, mpsc::UnboundedReceiver<String>)> {
        Err(Error::Transport(
            "capturing standard output is only supported on unix".to_string(),
        ))
    }

    /// Put the original stdout back, then close the pipe
    ///
    /// Output written before the call is still delivered to the receiver; the
    /// pump thread ends on its own once every write end is gone.
    #[cfg(unix)]
    pub fn restore(self) -> Result<()> {
        let _ = std::io::stdout().flush();

        // SAFETY: both descriptors are owned and open.
        if unsafe { libc::dup2(self.saved.as_raw_fd(), STDOUT_FD) } < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        drop(self.writer);
        tracing::debug!("Standard output restored");
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn restore(self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for OutputCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputCapture").finish_non_exhaustive()
    }
}
