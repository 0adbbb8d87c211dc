// Byte-level transport seam.
//
// The engine drives a half-duplex serial link to the modem; the UART
// driver itself lives outside this crate. Implementations wrap whatever
// the platform provides (a blocking serial port on the host, a UART
// handle on the device) behind these three primitives.

use std::time::Instant;

use crate::error::Result;

/// A duplex byte channel with deadline-bounded reads.
///
/// No framing is guaranteed beyond byte order. All waits are bounded:
/// a read that produces nothing before its deadline returns without
/// error (`Ok(0)` / `Ok(None)`), and the caller decides whether that
/// silence is a timeout.
pub trait Transport {
    /// Write all bytes to the link.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read whatever is available into `buf`, blocking no later than
    /// `deadline`. Returns the number of bytes read; `0` means nothing
    /// arrived in time.
    fn read(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize>;

    /// Read a single byte, blocking no later than `deadline`.
    /// `None` means the deadline passed first.
    fn read_byte(&mut self, deadline: Instant) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        match self.read(&mut b, deadline)? {
            0 => Ok(None),
            _ => Ok(Some(b[0])),
        }
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn read(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize> {
        (**self).read(buf, deadline)
    }

    fn read_byte(&mut self, deadline: Instant) -> Result<Option<u8>> {
        (**self).read_byte(deadline)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport used by the unit tests in this crate.
    //!
    //! Replies are queued per write: each complete command line (or
    //! data-mode payload) consumes one scripted reply. An exhausted
    //! receive buffer reads as an immediate timeout, which keeps the
    //! deadline paths fast under test.

    use std::collections::VecDeque;
    use std::time::Instant;

    use super::Transport;
    use crate::error::{Error, Result};

    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: VecDeque<Vec<u8>>,
        rx: VecDeque<u8>,
        pub writes: Vec<Vec<u8>>,
        pub fail_writes: bool,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue the reply for the next write.
        pub fn reply(&mut self, bytes: &[u8]) -> &mut Self {
            self.replies.push_back(bytes.to_vec());
            self
        }

        /// Queue a silent (timeout) reply for the next write.
        pub fn no_reply(&mut self) -> &mut Self {
            self.replies.push_back(Vec::new());
            self
        }

        /// All command lines written so far, lossily decoded.
        pub fn command_log(&self) -> Vec<String> {
            self.writes
                .iter()
                .map(|w| String::from_utf8_lossy(w).into_owned())
                .collect()
        }

        pub fn wrote_command(&self, prefix: &str) -> bool {
            self.writes.iter().any(|w| w.starts_with(prefix.as_bytes()))
        }
    }

    impl Transport for ScriptedTransport {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            if self.fail_writes {
                return Err(Error::Transport("write failed".into()));
            }
            self.writes.push(bytes.to_vec());
            if let Some(reply) = self.replies.pop_front() {
                self.rx.extend(reply);
            }
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8], _deadline: Instant) -> Result<usize> {
            let n = buf.len().min(self.rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }
    }
}
