// Streaming body reader for an active read-data-mode session.
//
// Pulls the response dump out of the link in bounded chunks: first the
// header block up to the `\r\n\r\n` boundary (when header visibility is
// configured on), then exactly `content_length` body bytes handed to
// the sink. The working buffer is sized to the chunk, never to the
// firmware image, so memory stays bounded regardless of image size.

use std::time::{Duration, Instant};

use crate::command::CommandChannel;
use crate::error::{Error, Result};
use crate::parse;
use crate::transport::Transport;
use crate::update::CancelToken;

/// Upper bound on a header block preceding the body.
const MAX_HEADER_BYTES: usize = 2048;

/// Raw byte source for data-mode reads. Implemented by the command
/// channel; tests substitute scripted sources.
pub trait RawSource {
    /// Read available bytes, blocking no later than `deadline`.
    /// `Ok(0)` means nothing arrived in time.
    fn read_raw(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize>;
}

impl<T: Transport> RawSource for CommandChannel<T> {
    fn read_raw(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize> {
        CommandChannel::read_raw(self, buf, deadline)
    }
}

/// Sink callback: receives a chunk, returns bytes actually committed.
pub type ChunkSink<'a> = dyn FnMut(&[u8]) -> Result<usize> + 'a;

pub struct ChunkedBodyReader {
    content_length: u64,
    chunk_size: usize,
    idle_timeout: Duration,
    /// Body bytes over-read while locating the header boundary; they
    /// are committed ahead of anything still on the link.
    carry: Vec<u8>,
    committed: u64,
}

impl ChunkedBodyReader {
    pub fn new(content_length: u64, chunk_size: usize, idle_timeout: Duration) -> Self {
        Self {
            content_length,
            chunk_size: chunk_size.max(1),
            idle_timeout,
            carry: Vec::new(),
            committed: 0,
        }
    }

    pub fn bytes_committed(&self) -> u64 {
        self.committed
    }

    /// Consume the header block up to and including the `\r\n\r\n`
    /// boundary, returning the bytes before it. Body bytes read past
    /// the boundary are retained for the streaming phase.
    ///
    /// The boundary search runs over the accumulated window, so a
    /// separator split across two reads is still found.
    pub fn read_headers<S: RawSource>(&mut self, source: &mut S) -> Result<Vec<u8>> {
        let mut acc: Vec<u8> = Vec::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut scanned = 0usize;
        loop {
            let deadline = Instant::now() + self.idle_timeout;
            let n = source.read_raw(&mut buf, deadline)?;
            if n == 0 {
                return Err(Error::StallTimeout(self.idle_timeout));
            }
            acc.extend_from_slice(&buf[..n]);
            // Re-scan from three bytes back so a separator split across
            // two reads is still seen.
            let scan_from = scanned.saturating_sub(3);
            if let Some(off) = parse::find_double_crlf(&acc[scan_from..]) {
                let boundary = scan_from + off;
                self.carry = acc.split_off(boundary + 4);
                acc.truncate(boundary);
                return Ok(acc);
            }
            scanned = acc.len();
            if acc.len() > MAX_HEADER_BYTES {
                return Err(Error::MalformedResponse(
                    "no header/body boundary within scan limit".into(),
                ));
            }
        }
    }

    /// Stream body bytes into the sink in chunks of up to `chunk_size`,
    /// stopping at `content_length` regardless of what the transport
    /// still has to offer.
    ///
    /// Each chunk is filled to its target before being handed over, so
    /// the number of sink calls is determined by the chunk size, not by
    /// how the link happens to fragment the data. Cancellation is
    /// honored only between chunks.
    pub fn stream_into<S: RawSource>(
        &mut self,
        source: &mut S,
        sink: &mut ChunkSink<'_>,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let mut buf = vec![0u8; self.chunk_size];
        while self.committed < self.content_length {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let remaining = self.content_length - self.committed;
            let target = (self.chunk_size as u64).min(remaining) as usize;
            let mut filled = 0usize;
            if !self.carry.is_empty() {
                let take = self.carry.len().min(target);
                buf[..take].copy_from_slice(&self.carry[..take]);
                self.carry.drain(..take);
                filled = take;
            }
            while filled < target {
                let deadline = Instant::now() + self.idle_timeout;
                let n = source.read_raw(&mut buf[filled..target], deadline)?;
                if n == 0 {
                    return Err(Error::StallTimeout(self.idle_timeout));
                }
                filled += n;
            }
            let written = sink(&buf[..target])?;
            if written < target {
                return Err(Error::ShortWrite {
                    given: target,
                    committed: written,
                });
            }
            self.committed += target as u64;
        }
        Ok(self.committed)
    }
}
