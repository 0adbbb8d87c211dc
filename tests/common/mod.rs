// Shared test utilities: a scripted serial transport that plays back a
// canned modem dialogue, plus builders for response dumps.

use std::collections::VecDeque;
use std::time::Instant;

use cellular_ota::{Result, Transport};

/// Plays one scripted reply per write. Each command line (or raw
/// data-mode upload) the engine sends consumes the next reply; an empty
/// reply models modem silence, which reads as an immediate timeout so
/// deadline paths stay fast under test.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: VecDeque<Vec<u8>>,
    rx: VecDeque<u8>,
    pub writes: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&mut self, bytes: &[u8]) -> &mut Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    pub fn no_reply(&mut self) -> &mut Self {
        self.replies.push_back(Vec::new());
        self
    }

    pub fn wrote_command(&self, prefix: &str) -> bool {
        self.writes.iter().any(|w| w.starts_with(prefix.as_bytes()))
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writes.push(bytes.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.rx.extend(reply);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _deadline: Instant) -> Result<usize> {
        let n = buf.len().min(self.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.rx.pop_front().expect("rx byte available");
        }
        Ok(n)
    }
}

/// Replies covering a default `activate()`: echo off, context
/// activation and the three QHTTPCFG commands.
pub fn script_activation(t: &mut ScriptedTransport) {
    for _ in 0..5 {
        t.reply(b"OK\r\n");
    }
}

/// Replies covering the best-effort teardown commands.
pub fn script_teardown(t: &mut ScriptedTransport) {
    t.reply(b"OK\r\n"); // QHTTPSTOP
    t.reply(b"OK\r\n"); // QIDEACT
}

/// Build a response header block padded to exactly `total` bytes,
/// terminator included.
pub fn header_block(version: &str, total: usize) -> Vec<u8> {
    let mut headers = String::new();
    headers.push_str("HTTP/1.1 200 OK\r\n");
    headers.push_str("Content-Type: application/octet-stream\r\n");
    headers.push_str(&format!("X-Firmware-Version: {version}\r\n"));
    let padding = total
        .checked_sub(headers.len() + 2)
        .expect("total too small for header block");
    assert!(padding >= 7, "no room for the padding header");
    headers.push_str("X-P: ");
    headers.push_str(&"a".repeat(padding - 7));
    headers.push_str("\r\n\r\n");
    assert_eq!(headers.len(), total);
    headers.into_bytes()
}

/// Deterministic firmware image bytes.
pub fn firmware_image(size: usize) -> Vec<u8> {
    let pattern = b"FWIMAGE!";
    (0..size).map(|i| pattern[i % pattern.len()]).collect()
}
