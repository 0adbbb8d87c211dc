// HTTP-over-AT session state machine.
//
// Models the modem's URL/GET/POST/READ command family as a forward-only
// state machine. Every network-facing primitive is two-step: announce
// the length or intent on the command line, then switch to data mode
// for the raw bytes. Uploads are closed by the terminator byte,
// downloads are bounded by the declared content length; the line
// protocol has no other way to know where binary payload ends.

use std::time::Duration;

use crate::body::{ChunkSink, ChunkedBodyReader};
use crate::command::CommandChannel;
use crate::config::HttpContentType;
use crate::error::{Error, ErrorKind, Result};
use crate::parse;
use crate::transport::Transport;
use crate::update::CancelToken;
use crate::version;

/// Result fields of one request, parsed from the modem's result URC.
/// Fixed once parsed; all body reads are bounded by `content_length`,
/// never by what the transport happens to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponseMeta {
    pub result_code: u32,
    pub status_code: u16,
    pub content_length: u64,
}

impl HttpResponseMeta {
    pub fn is_success(&self) -> bool {
        self.result_code == 0 && (200..300).contains(&self.status_code)
    }
}

/// Session lifecycle. Moves forward through the request cycle only;
/// `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ContextActive,
    UrlSet,
    RequestInFlight,
    ResponseReady,
    BodyOpen,
    BodyStreaming,
    Closed,
    Failed(ErrorKind),
}

/// Raw header block preceding the body. Retained only long enough to
/// check the version and content-type preconditions.
pub struct HeaderBlock(Vec<u8>);

impl HeaderBlock {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        parse::header_value(&self.0, key)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.value("Content-Type")
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.value(version::VERSION_HEADER)
    }
}

impl From<Vec<u8>> for HeaderBlock {
    fn from(raw: Vec<u8>) -> Self {
        Self(raw)
    }
}

/// Protocol timing and request shape, derived from
/// [`OtaConfig`](crate::config::OtaConfig).
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub command_timeout: Duration,
    pub network_timeout: Duration,
    pub url_timeout_secs: u32,
    pub request_timeout_secs: u32,
    pub input_timeout_secs: u32,
    pub read_wait_secs: u32,
    pub chunk_size: usize,
    pub idle_timeout: Duration,
    pub content_type: HttpContentType,
    pub ssl_context: Option<u8>,
    pub custom_headers: Vec<(String, String)>,
    pub response_headers: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(3),
            network_timeout: Duration::from_secs(60),
            url_timeout_secs: 60,
            request_timeout_secs: 60,
            input_timeout_secs: 10,
            read_wait_secs: 80,
            chunk_size: 1024,
            idle_timeout: Duration::from_secs(10),
            content_type: HttpContentType::OctetStream,
            ssl_context: None,
            custom_headers: Vec::new(),
            response_headers: true,
        }
    }
}

/// Capability set the orchestration depends on. One implementation per
/// modem family; callers never name a concrete modem type.
pub trait ModemHttp {
    /// Bring up the data context and push the HTTP configuration.
    /// Idempotent: a non-idle session is torn down first.
    fn activate(&mut self) -> Result<()>;

    /// Two-phase URL upload: announce the byte length, enter data
    /// mode, send the raw URL closed by the terminator byte.
    fn set_url(&mut self, url: &str) -> Result<()>;

    /// Issue a GET and wait for the result URC.
    fn get(&mut self) -> Result<HttpResponseMeta>;

    /// Issue a POST with a raw payload and wait for the result URC.
    fn post(&mut self, payload: &[u8]) -> Result<HttpResponseMeta>;

    /// Enter read-data mode and consume the header block, leaving
    /// exactly the body bytes pending. Lets the caller validate
    /// preconditions before any sink is opened.
    fn open_body(&mut self) -> Result<HeaderBlock>;

    /// Stream the body into the sink in bounded chunks.
    fn stream_body(&mut self, sink: &mut ChunkSink<'_>, cancel: &CancelToken) -> Result<u64>;

    /// Best-effort teardown. Never fails the caller; failures are
    /// logged so retries never inherit a dangling active context.
    fn end(&mut self);
}

/// Quectel EC200U-family implementation of [`ModemHttp`].
pub struct Ec200uHttp<T: Transport> {
    chan: CommandChannel<T>,
    opts: SessionOptions,
    state: SessionState,
    meta: Option<HttpResponseMeta>,
    body: Option<ChunkedBodyReader>,
}

const RESULT_LINE_CAP: usize = 64;

impl<T: Transport> Ec200uHttp<T> {
    pub fn new(transport: T, opts: SessionOptions) -> Self {
        Self {
            chan: CommandChannel::new(transport),
            opts,
            state: SessionState::Idle,
            meta: None,
            body: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Metadata of the last parsed response, kept across failures for
    /// diagnostics.
    pub fn last_response(&self) -> Option<&HttpResponseMeta> {
        self.meta.as_ref()
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel<T> {
        &mut self.chan
    }

    fn fail(&mut self, err: Error) -> Error {
        log::warn!("session failed in {:?}: {}", self.state, err);
        self.state = SessionState::Failed(err.kind());
        err
    }

    fn require(&self, expected: SessionState, what: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Protocol(what))
        }
    }

    /// Send a command and wait for plain acknowledgement.
    fn command(&mut self, cmd: &str, timeout: Duration) -> Result<()> {
        self.chan.send(cmd, timeout)?;
        self.chan.await_ok()
    }

    /// Read and parse the `<result>,<status>,<length>` residue of a
    /// result URC whose sentinel already matched.
    fn read_result_meta(&mut self) -> Result<HttpResponseMeta> {
        let line = self
            .chan
            .read_line_until(b'\r', RESULT_LINE_CAP, self.opts.command_timeout)?;
        let (result_code, status_code, content_length) = parse::parse_result_triple(&line)?;
        Ok(HttpResponseMeta {
            result_code,
            status_code,
            content_length,
        })
    }

    /// Validate a parsed result and move to `ResponseReady`. The meta
    /// is stored before any failure so diagnostics survive.
    fn accept_response(&mut self, meta: HttpResponseMeta) -> Result<HttpResponseMeta> {
        self.meta = Some(meta);
        if meta.result_code != 0 {
            return Err(self.fail(Error::RequestFailed(meta.result_code)));
        }
        if !(200..300).contains(&meta.status_code) {
            return Err(self.fail(Error::Http {
                status: meta.status_code,
            }));
        }
        log::info!(
            "HTTP {} ({} body bytes)",
            meta.status_code,
            meta.content_length
        );
        self.state = SessionState::ResponseReady;
        Ok(meta)
    }

    /// Best-effort drain of the `OK` / result URC trailing a body dump.
    fn drain_read_trailer(&mut self) {
        if self
            .chan
            .expect_reply("read trailer", self.opts.command_timeout)
            .is_err()
        {
            return;
        }
        match self.chan.await_match(&["+QHTTPREAD: "]) {
            Ok(_) => {
                let _ = self
                    .chan
                    .read_line_until(b'\r', RESULT_LINE_CAP, self.opts.command_timeout);
            }
            Err(err) => log::debug!("read trailer not drained: {}", err),
        }
    }
}

impl<T: Transport> ModemHttp for Ec200uHttp<T> {
    fn activate(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            self.end();
        }
        log::info!("activating data context");
        let timeout = self.opts.command_timeout;
        self.command("ATE0", timeout).map_err(|e| self.fail(e))?;
        self.command("AT+QIACT=1", Duration::from_secs(10))
            .map_err(|e| self.fail(e))?;
        self.command("AT+QHTTPCFG=\"contextid\",1", timeout)
            .map_err(|e| self.fail(e))?;
        if self.opts.response_headers {
            self.command("AT+QHTTPCFG=\"responseheader\",1", timeout)
                .map_err(|e| self.fail(e))?;
        }
        let content_type = format!(
            "AT+QHTTPCFG=\"contenttype\",{}",
            self.opts.content_type.code()
        );
        self.command(&content_type, timeout)
            .map_err(|e| self.fail(e))?;
        if let Some(ssl) = self.opts.ssl_context {
            let cmd = format!("AT+QHTTPCFG=\"sslctxid\",{}", ssl);
            self.command(&cmd, timeout).map_err(|e| self.fail(e))?;
        }
        let headers = self.opts.custom_headers.clone();
        for (name, value) in &headers {
            let cmd = format!("AT+QHTTPCFG=\"header\",\"{}: {}\"", name, value);
            self.command(&cmd, timeout).map_err(|e| self.fail(e))?;
        }
        self.meta = None;
        self.state = SessionState::ContextActive;
        Ok(())
    }

    fn set_url(&mut self, url: &str) -> Result<()> {
        self.require(SessionState::ContextActive, "set_url before activate")?;
        log::info!("uploading URL ({} bytes)", url.len());
        let announce = format!("AT+QHTTPURL={},{}", url.len(), self.opts.url_timeout_secs);
        self.chan
            .send(&announce, self.opts.command_timeout)
            .map_err(|e| self.fail(e))?;
        match self.chan.await_data_mode() {
            Ok(()) => {}
            Err(Error::Timeout(_)) => return Err(self.fail(Error::UrlTimeout)),
            Err(Error::CommandRejected(_)) => return Err(self.fail(Error::UrlRejected)),
            Err(err) => return Err(self.fail(err)),
        }
        self.chan
            .write_data_terminated(url.as_bytes())
            .map_err(|e| self.fail(e))?;
        self.chan
            .expect_reply(
                "URL acknowledgement",
                Duration::from_secs(u64::from(self.opts.url_timeout_secs)),
            )
            .map_err(|e| self.fail(e))?;
        match self.chan.await_ok() {
            Ok(()) => {
                self.state = SessionState::UrlSet;
                Ok(())
            }
            Err(Error::Timeout(_)) => Err(self.fail(Error::UrlTimeout)),
            Err(Error::CommandRejected(_)) => Err(self.fail(Error::UrlRejected)),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn get(&mut self) -> Result<HttpResponseMeta> {
        self.require(SessionState::UrlSet, "get before set_url")?;
        self.state = SessionState::RequestInFlight;
        let cmd = format!("AT+QHTTPGET={}", self.opts.request_timeout_secs);
        self.command(&cmd, self.opts.command_timeout)
            .map_err(|e| self.fail(e))?;
        // The request was accepted; the result URC arrives under the
        // longer deadline bounding the network round trip.
        self.chan
            .expect_reply("+QHTTPGET result", self.opts.network_timeout)
            .map_err(|e| self.fail(e))?;
        self.chan
            .await_match(&["+QHTTPGET: "])
            .map_err(|e| self.fail(e))?;
        let meta = self.read_result_meta().map_err(|e| self.fail(e))?;
        self.accept_response(meta)
    }

    fn post(&mut self, payload: &[u8]) -> Result<HttpResponseMeta> {
        self.require(SessionState::UrlSet, "post before set_url")?;
        self.state = SessionState::RequestInFlight;
        log::info!("posting {} payload bytes", payload.len());
        let announce = format!(
            "AT+QHTTPPOST={},{},{}",
            payload.len(),
            self.opts.input_timeout_secs,
            self.opts.request_timeout_secs
        );
        self.chan
            .send(&announce, self.opts.network_timeout)
            .map_err(|e| self.fail(e))?;
        self.chan.await_data_mode().map_err(|e| self.fail(e))?;
        self.chan
            .write_data_terminated(payload)
            .map_err(|e| self.fail(e))?;
        self.chan
            .expect_reply("+QHTTPPOST result", self.opts.network_timeout)
            .map_err(|e| self.fail(e))?;
        self.chan
            .await_match(&["+QHTTPPOST: "])
            .map_err(|e| self.fail(e))?;
        let meta = self.read_result_meta().map_err(|e| self.fail(e))?;
        self.accept_response(meta)
    }

    fn open_body(&mut self) -> Result<HeaderBlock> {
        self.require(SessionState::ResponseReady, "open_body before request")?;
        let meta = self
            .meta
            .ok_or(Error::Protocol("open_body without response metadata"))?;
        let cmd = format!("AT+QHTTPREAD={}", self.opts.read_wait_secs);
        self.chan
            .send(&cmd, self.opts.command_timeout)
            .map_err(|e| self.fail(e))?;
        self.chan.await_data_mode().map_err(|e| self.fail(e))?;
        let mut reader = ChunkedBodyReader::new(
            meta.content_length,
            self.opts.chunk_size,
            self.opts.idle_timeout,
        );
        let headers = if self.opts.response_headers {
            let raw = reader
                .read_headers(&mut self.chan)
                .map_err(|e| self.fail(e))?;
            log::debug!("consumed {} header bytes", raw.len());
            HeaderBlock::from(raw)
        } else {
            HeaderBlock::empty()
        };
        self.body = Some(reader);
        self.state = SessionState::BodyOpen;
        Ok(headers)
    }

    fn stream_body(&mut self, sink: &mut ChunkSink<'_>, cancel: &CancelToken) -> Result<u64> {
        self.require(SessionState::BodyOpen, "stream_body before open_body")?;
        self.state = SessionState::BodyStreaming;
        let this = &mut *self;
        let reader = this
            .body
            .as_mut()
            .ok_or(Error::Protocol("stream_body without an open body"))?;
        let streamed = reader.stream_into(&mut this.chan, sink, cancel);
        let bytes = match streamed {
            Ok(n) => n,
            Err(err) => return Err(self.fail(err)),
        };
        self.drain_read_trailer();
        self.body = None;
        self.state = SessionState::Closed;
        log::info!("body stream complete: {} bytes", bytes);
        Ok(bytes)
    }

    fn end(&mut self) {
        log::info!("closing HTTP session from {:?}", self.state);
        // Both commands are best-effort: a dangling context across
        // retries is worse than an ignored ERROR here.
        if let Err(err) = self.command("AT+QHTTPSTOP", Duration::from_secs(5)) {
            log::debug!("QHTTPSTOP not acknowledged: {}", err);
        }
        if let Err(err) = self.command("AT+QIDEACT=1", Duration::from_secs(40)) {
            log::warn!("context deactivation not acknowledged: {}", err);
        }
        self.body = None;
        self.state = SessionState::Closed;
    }
}
