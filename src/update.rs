// Update orchestration.
//
// Drives one full attempt: activate, upload URL, GET, validate the
// preconditions, then stream the body into the flash sink with progress
// accounting. Every failure funnels through exactly one cleanup pass
// (abort the sink if it was opened, then tear the session down) and
// surfaces a single terminal error; partial success is never reported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::OtaConfig;
use crate::error::{Error, Result};
use crate::progress::TransferProgress;
use crate::session::ModemHttp;
use crate::sink::UpdateSink;
use crate::version;

/// Cooperative cancellation flag, honored between chunks only; a chunk
/// in flight always completes or fails on its own terms.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Terminal result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The image was streamed and finalized.
    Updated {
        bytes: u64,
        version: Option<String>,
    },
    /// The server's image is not newer than what is running; nothing
    /// was written.
    AlreadyCurrent { current: String, offered: String },
}

/// One queued update request. An external trigger (button interrupt,
/// periodic check) enqueues these; the orchestration owns its own
/// lifecycle instead of being inferred from a shared task handle.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub url: String,
    pub expected_sha256: Option<String>,
}

impl UpdateRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            expected_sha256: None,
        }
    }
}

pub struct Updater<M: ModemHttp> {
    modem: M,
    config: OtaConfig,
    cancel: CancelToken,
}

impl<M: ModemHttp> Updater<M> {
    pub fn new(modem: M, config: OtaConfig) -> Self {
        Self {
            modem,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Token external code can use to abort the attempt at the next
    /// chunk boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn into_modem(self) -> M {
        self.modem
    }

    /// Run one attempt against the configured firmware URL.
    pub fn run<S: UpdateSink>(
        &mut self,
        sink: &mut S,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<Outcome> {
        let request = UpdateRequest {
            url: self.config.firmware_url.clone(),
            expected_sha256: self.config.expected_sha256.clone(),
        };
        self.run_request(&request, sink, on_progress)
    }

    /// Run one attempt for an explicit request.
    pub fn run_request<S: UpdateSink>(
        &mut self,
        request: &UpdateRequest,
        sink: &mut S,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<Outcome> {
        let mut sink_open = false;
        let outcome = self.attempt(request, sink, &mut sink_open, on_progress);
        match &outcome {
            Ok(Outcome::Updated { bytes, .. }) => {
                log::info!("update complete: {} bytes committed", bytes)
            }
            Ok(Outcome::AlreadyCurrent { current, offered }) => {
                log::info!(
                    "no update needed: running {}, server offers {}",
                    current,
                    offered
                )
            }
            Err(err) => {
                log::error!("update attempt failed: {}", err);
                if sink_open {
                    sink.abort();
                }
            }
        }
        // Teardown runs on every path so a retry never inherits an
        // active context.
        self.modem.end();
        outcome
    }

    fn attempt<S: UpdateSink>(
        &mut self,
        request: &UpdateRequest,
        sink: &mut S,
        sink_open: &mut bool,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<Outcome> {
        self.modem.activate()?;
        self.modem.set_url(&request.url)?;
        let meta = self.modem.get()?;
        if meta.content_length == 0 {
            return Err(Error::MalformedResponse(
                "server reported an empty firmware image".into(),
            ));
        }
        log::info!("firmware size: {} KB", meta.content_length / 1024);

        let headers = self.modem.open_body()?;
        if self.config.require_octet_stream {
            match headers.content_type() {
                Some("application/octet-stream") => {}
                other => {
                    return Err(Error::UnexpectedContentType(
                        other.unwrap_or("<missing>").to_string(),
                    ))
                }
            }
        }
        let offered_version = headers.firmware_version().map(str::to_string);
        if self.config.version_gate {
            let offered = offered_version.as_deref().ok_or(Error::MissingVersion)?;
            log::info!(
                "current firmware {}, available firmware {}",
                self.config.current_version,
                offered
            );
            if !version::is_newer(offered, &self.config.current_version) {
                return Ok(Outcome::AlreadyCurrent {
                    current: self.config.current_version.clone(),
                    offered: offered.to_string(),
                });
            }
        }

        // Preconditions hold; only now may the write session open.
        sink.begin(meta.content_length)?;
        *sink_open = true;

        let mut progress = TransferProgress::new(meta.content_length);
        let expected_digest = request.expected_sha256.as_deref();
        let mut hasher = expected_digest.map(|_| Sha256::new());
        let bytes = {
            let mut chunk_sink = |chunk: &[u8]| -> Result<usize> {
                let committed = sink.write(chunk)?;
                if let Some(h) = hasher.as_mut() {
                    h.update(&chunk[..committed]);
                }
                if let Some(pct) = progress.commit(committed as u64) {
                    log::info!("download progress: {}%", pct);
                    on_progress(pct);
                }
                Ok(committed)
            };
            self.modem.stream_body(&mut chunk_sink, &self.cancel)?
        };

        if let (Some(expected), Some(hasher)) = (expected_digest, hasher) {
            let digest = hasher.finalize();
            let actual: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        sink.end()?;
        *sink_open = false;
        if !sink.is_finished() {
            return Err(Error::Sink("sink did not report a finished image".into()));
        }
        Ok(Outcome::Updated {
            bytes,
            version: offered_version,
        })
    }
}

/// Enqueues update requests for the single service loop.
#[derive(Clone)]
pub struct UpdateTrigger {
    tx: Sender<UpdateRequest>,
}

impl UpdateTrigger {
    /// Returns false when the service side is gone.
    pub fn request(&self, request: UpdateRequest) -> bool {
        self.tx.send(request).is_ok()
    }
}

/// Receiving half: processes requests strictly one at a time, so no
/// two attempts ever share the transport or a half-torn-down session.
pub struct UpdateQueue {
    rx: Receiver<UpdateRequest>,
}

pub fn update_queue() -> (UpdateTrigger, UpdateQueue) {
    let (tx, rx) = mpsc::channel();
    (UpdateTrigger { tx }, UpdateQueue { rx })
}

impl UpdateQueue {
    /// Serve the next pending request, if any.
    pub fn serve_next<M: ModemHttp, S: UpdateSink>(
        &self,
        updater: &mut Updater<M>,
        sink: &mut S,
        on_progress: &mut dyn FnMut(u8),
    ) -> Option<Result<Outcome>> {
        match self.rx.try_recv() {
            Ok(request) => Some(updater.run_request(&request, sink, on_progress)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block on the queue and serve requests until every trigger is
    /// dropped. Meant for a dedicated worker task; the protocol engine
    /// blocks only this task while waiting on the link.
    pub fn serve<M: ModemHttp, S: UpdateSink>(
        &self,
        updater: &mut Updater<M>,
        sink: &mut S,
        on_progress: &mut dyn FnMut(u8),
    ) {
        while let Ok(request) = self.rx.recv() {
            updater.cancel_token().reset();
            match updater.run_request(&request, sink, on_progress) {
                Ok(outcome) => log::info!("update request done: {:?}", outcome),
                Err(err) => log::warn!("update request failed: {}", err),
            }
        }
    }
}
