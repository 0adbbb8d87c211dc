// Command/response channel over the serial transport.
//
// The link is half-duplex and line-oriented: one command line goes out,
// then the channel scans incoming lines for an expected sentinel. The
// only departures from line discipline are the data-mode transitions
// (raw URL/payload upload, raw body download), which the caller enters
// explicitly after the modem signals `CONNECT`.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Token the modem prints when it switches the link into data mode.
pub const DATA_MODE_SENTINEL: &str = "CONNECT";

/// Terminator byte closing a raw binary upload (CTRL+Z).
pub const DATA_TERMINATOR: u8 = 0x1A;

const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Caps protecting against unbounded buffering on garbage input.
const MAX_RESPONSE_BYTES: usize = 4096;
const MAX_RESPONSE_LINES: usize = 64;

/// One command line in flight: what was sent and when the reply is due.
/// At most one exists per channel; issuing another command while it is
/// outstanding is a caller error.
struct PendingCommand {
    line: String,
    deadline: Instant,
}

pub struct CommandChannel<T: Transport> {
    transport: T,
    pending: Option<PendingCommand>,
}

impl<T: Transport> CommandChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pending: None,
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send one command line (terminator appended).
    ///
    /// The command stays pending until one of the `await_*` calls
    /// consumes its reply or times out.
    pub fn send(&mut self, command: &str, timeout: Duration) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::Protocol(
                "command issued while a previous command is pending",
            ));
        }
        log::debug!("--> {}", command);
        let mut line = Vec::with_capacity(command.len() + LINE_TERMINATOR.len());
        line.extend_from_slice(command.as_bytes());
        line.extend_from_slice(LINE_TERMINATOR);
        self.transport.write(&line)?;
        self.pending = Some(PendingCommand {
            line: command.to_string(),
            deadline: Instant::now() + timeout,
        });
        Ok(())
    }

    /// Wait until an incoming line starts with one of the sentinels.
    ///
    /// Returns the index of the sentinel that matched. Bytes past the
    /// sentinel on the same line stay unread, so result fields can be
    /// pulled off with [`read_line_until`](Self::read_line_until).
    /// Garbage floods hit the byte/line caps and fail as malformed
    /// rather than buffering forever.
    pub fn await_match(&mut self, sentinels: &[&str]) -> Result<usize> {
        let pending = self.pending.take().ok_or(Error::Protocol(
            "await without a pending command",
        ))?;
        let deadline = pending.deadline;
        let mut line: Vec<u8> = Vec::new();
        let mut total = 0usize;
        let mut lines = 0usize;
        loop {
            let b = match self.transport.read_byte(deadline)? {
                Some(b) => b,
                None => {
                    log::warn!("timeout waiting for reply to {}", pending.line);
                    return Err(Error::Timeout("response sentinel"));
                }
            };
            total += 1;
            if total > MAX_RESPONSE_BYTES {
                return Err(Error::MalformedResponse(
                    "response exceeded byte cap before sentinel".into(),
                ));
            }
            match b {
                b'\n' => {
                    lines += 1;
                    if lines > MAX_RESPONSE_LINES {
                        return Err(Error::MalformedResponse(
                            "response exceeded line cap before sentinel".into(),
                        ));
                    }
                    line.clear();
                }
                b'\r' => {}
                _ => {
                    line.push(b);
                    if let Some(idx) = sentinels
                        .iter()
                        .position(|s| s.as_bytes() == line.as_slice())
                    {
                        return Ok(idx);
                    }
                }
            }
        }
    }

    /// Wait for plain command acknowledgement. ERROR and +CME ERROR
    /// replies surface as [`Error::CommandRejected`].
    pub fn await_ok(&mut self) -> Result<()> {
        let command = self
            .pending
            .as_ref()
            .map(|p| p.line.clone())
            .unwrap_or_default();
        match self.await_match(&["OK", "ERROR", "+CME ERROR:"])? {
            0 => Ok(()),
            _ => {
                log::warn!("modem rejected: {}", command);
                Err(Error::CommandRejected(command))
            }
        }
    }

    /// Wait for the data-mode transition token so raw transfer can
    /// begin immediately, without line buffering.
    pub fn await_data_mode(&mut self) -> Result<()> {
        let command = self
            .pending
            .as_ref()
            .map(|p| p.line.clone())
            .unwrap_or_default();
        match self.await_match(&[DATA_MODE_SENTINEL, "ERROR", "+CME ERROR:"])? {
            0 => Ok(()),
            _ => Err(Error::CommandRejected(command)),
        }
    }

    /// Read bytes up to (and excluding) `delim`, bounded by `cap`.
    /// CR/LF handling is the caller's business; this is used for the
    /// residual fields of a result line after its sentinel matched.
    pub fn read_line_until(
        &mut self,
        delim: u8,
        cap: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        loop {
            let b = self
                .transport
                .read_byte(deadline)?
                .ok_or(Error::Timeout("result line"))?;
            if b == delim {
                return Ok(out);
            }
            out.push(b);
            if out.len() > cap {
                return Err(Error::MalformedResponse(
                    "result line exceeded length cap".into(),
                ));
            }
        }
    }

    /// Raw read while the link is in data mode.
    pub fn read_raw(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize> {
        self.transport.read(buf, deadline)
    }

    /// Raw upload followed by the binary-input terminator. The write is
    /// a single transport call so the terminator cannot be separated
    /// from its payload by the driver.
    pub fn write_data_terminated(&mut self, payload: &[u8]) -> Result<()> {
        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.extend_from_slice(payload);
        framed.push(DATA_TERMINATOR);
        self.transport.write(&framed)?;
        // The acknowledgement for the upload is still owed; model it as
        // a pending command so the next await has a deadline to honor.
        Ok(())
    }

    /// Arm a reply deadline for an exchange whose "command" was a raw
    /// upload rather than a command line.
    pub fn expect_reply(&mut self, what: &str, timeout: Duration) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::Protocol(
                "reply armed while a previous command is pending",
            ));
        }
        self.pending = Some(PendingCommand {
            line: what.to_string(),
            deadline: Instant::now() + timeout,
        });
        Ok(())
    }
}
