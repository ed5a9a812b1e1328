//! Native pseudo-terminal backend.
//!
//! Spawns the protocol child (telnet / ssh) via `forkpty` and exposes
//! non-blocking reads and writes through a tokio `AsyncFd`.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use log::debug;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;

/// Newtype wrapper around the PTY master fd for use with `AsyncFd`.
#[derive(Debug)]
struct PtyFd(OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for PtyFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// A child process running under a pseudo-terminal.
#[derive(Debug)]
pub struct NativePty {
    master: AsyncFd<PtyFd>,
    child: Pid,
    reaped: bool,
}

impl NativePty {
    /// Spawn a child process on a new PTY.
    ///
    /// The child runs with `TERM=VT100` to keep control sequences out of
    /// the dialog, and with terminal echo disabled so sent credentials
    /// never come back in the output stream.
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(argv: &[String], cols: u16, rows: u16) -> io::Result<Self> {
        if argv.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
        }

        let winsize = Winsize {
            ws_col: cols,
            ws_row: rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: forkpty leaves the child partially initialized; the
        // child branch only adjusts termios/env and execs.
        let result = unsafe { forkpty(&winsize, None) }.map_err(io_err)?;

        match result {
            ForkptyResult::Child => {
                // SAFETY: single-threaded child between fork and exec.
                unsafe { std::env::set_var("TERM", "VT100") };

                // Echo must stay off so the expect stream only carries
                // what the remote side prints.
                let stdin = std::io::stdin();
                if let Ok(mut termios) = tcgetattr(&stdin) {
                    termios.local_flags.remove(LocalFlags::ECHO);
                    let _ = tcsetattr(&stdin, SetArg::TCSANOW, &termios);
                }

                let c_args: Vec<CString> = argv
                    .iter()
                    .filter_map(|s| CString::new(s.as_bytes()).ok())
                    .collect();
                if c_args.len() != argv.len() {
                    std::process::exit(127);
                }
                let _ = execvp(&c_args[0], &c_args);
                // exec failed; nothing sensible left to do in the fork.
                std::process::exit(127);
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)?;
                let master = AsyncFd::new(PtyFd(master))?;
                debug!("spawned '{}' as pid {}", argv.join(" "), child);
                Ok(Self {
                    master,
                    child,
                    reaped: false,
                })
            }
        }
    }

    /// Read a chunk from the PTY master.
    ///
    /// A closed slave side surfaces as `EIO` on Linux; callers treat both
    /// `Ok(0)` and `EIO` as end of stream.
    pub async fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.master.readable().await?;
            match guard.try_io(|inner| {
                nix::unistd::read(inner.get_ref(), buf).map_err(io_err)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write the whole payload to the PTY master.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let mut guard = self.master.writable().await?;
            match guard.try_io(|inner| {
                nix::unistd::write(&inner.get_ref().0, &data[offset..]).map_err(io_err)
            }) {
                Ok(Ok(n)) => offset += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Whether the child is still running.
    pub fn is_alive(&self) -> bool {
        if self.reaped {
            return false;
        }
        matches!(
            waitpid(self.child, Some(WaitPidFlag::WNOHANG)),
            Ok(WaitStatus::StillAlive)
        )
    }

    /// Force the child down: SIGHUP, then SIGKILL, then reap.
    pub fn close(&mut self) {
        if self.reaped {
            return;
        }
        let _ = kill(self.child, Signal::SIGHUP);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let _ = kill(self.child, Signal::SIGKILL);
        let _ = waitpid(self.child, Some(WaitPidFlag::WNOHANG));
        self.reaped = true;
    }

    /// Whether an I/O error means the slave side is gone.
    pub fn is_hangup(error: &io::Error) -> bool {
        error.raw_os_error() == Some(libc::EIO)
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        self.close();
    }
}

fn set_nonblocking(fd: &impl AsFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
