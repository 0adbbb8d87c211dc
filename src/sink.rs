// Flash-update sink interface.
//
// The engine only ever talks to the flash backend through this trait:
// declare the total, push sequential chunks, finalize or abort. The
// partition handling behind it (A/B slots, boot flags, verification)
// belongs to the platform layer.

use crate::error::{Error, Result};

pub trait UpdateSink {
    /// Declare the total image size. Fails with
    /// [`Error::InsufficientSpace`] when the backing store cannot take
    /// it; in that case no bytes may ever be written.
    fn begin(&mut self, total: u64) -> Result<()>;

    /// Commit a sequential chunk. Returns the number of bytes actually
    /// committed, which may be fewer than handed over.
    fn write(&mut self, chunk: &[u8]) -> Result<usize>;

    /// Finalize the image. Only valid after all declared bytes were
    /// committed.
    fn end(&mut self) -> Result<()>;

    /// Discard everything written so far. Never fails; a sink that
    /// cannot clean up should log and carry on.
    fn abort(&mut self);

    /// True once `end` succeeded on a complete image.
    fn is_finished(&self) -> bool;
}

/// In-memory sink: the host-side stand-in used by tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    data: Vec<u8>,
    total: u64,
    capacity: Option<u64>,
    began: bool,
    finished: bool,
    pub abort_calls: u32,
    pub end_calls: u32,
    /// Commit at most this many bytes per write (short-write injection).
    pub max_commit: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects any image larger than `capacity`.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn began(&self) -> bool {
        self.began
    }
}

impl UpdateSink for MemorySink {
    fn begin(&mut self, total: u64) -> Result<()> {
        if let Some(cap) = self.capacity {
            if total > cap {
                return Err(Error::InsufficientSpace(total));
            }
        }
        self.began = true;
        self.finished = false;
        self.total = total;
        self.data.clear();
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize> {
        if !self.began {
            return Err(Error::Sink("write before begin".into()));
        }
        let take = match self.max_commit {
            Some(cap) => chunk.len().min(cap),
            None => chunk.len(),
        };
        self.data.extend_from_slice(&chunk[..take]);
        Ok(take)
    }

    fn end(&mut self) -> Result<()> {
        self.end_calls += 1;
        if !self.began || self.data.len() as u64 != self.total {
            return Err(Error::Sink(format!(
                "finalized with {} of {} bytes",
                self.data.len(),
                self.total
            )));
        }
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.abort_calls += 1;
        self.began = false;
        self.finished = false;
        self.data.clear();
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_write_cycle() {
        let mut sink = MemorySink::new();
        sink.begin(8).unwrap();
        assert_eq!(sink.write(b"1234").unwrap(), 4);
        assert_eq!(sink.write(b"5678").unwrap(), 4);
        sink.end().unwrap();
        assert!(sink.is_finished());
        assert_eq!(sink.data(), b"12345678");
    }

    #[test]
    fn capacity_is_enforced_at_begin() {
        let mut sink = MemorySink::with_capacity(16);
        assert!(matches!(
            sink.begin(1024),
            Err(Error::InsufficientSpace(1024))
        ));
        assert!(!sink.began());
    }

    #[test]
    fn end_with_missing_bytes_fails() {
        let mut sink = MemorySink::new();
        sink.begin(10).unwrap();
        sink.write(b"12345").unwrap();
        assert!(sink.end().is_err());
        assert!(!sink.is_finished());
    }

    #[test]
    fn abort_discards_progress() {
        let mut sink = MemorySink::new();
        sink.begin(4).unwrap();
        sink.write(b"12").unwrap();
        sink.abort();
        assert!(!sink.began());
        assert!(sink.data().is_empty());
        assert_eq!(sink.abort_calls, 1);
    }
}
