use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::session::SessionOptions;

/// Content type announced to the modem for POST payloads, mirroring the
/// modem's own content-type table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HttpContentType {
    UrlEncoded,
    Text,
    OctetStream,
    Multipart,
    Json,
    Jpeg,
}

impl HttpContentType {
    /// The numeric code the modem expects in `+QHTTPCFG="contenttype"`.
    pub fn code(self) -> u8 {
        match self {
            HttpContentType::UrlEncoded => 0,
            HttpContentType::Text => 1,
            HttpContentType::OctetStream => 2,
            HttpContentType::Multipart => 3,
            HttpContentType::Json => 4,
            HttpContentType::Jpeg => 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtaConfig {
    /// Firmware image URL handed to the modem.
    pub firmware_url: String,
    /// Version currently running; the gate compares against this.
    pub current_version: String,

    // Streaming settings
    pub chunk_size: usize,
    /// Max silence mid-transfer before the attempt is declared stalled.
    pub idle_timeout_ms: u64,

    // Command timing (per the modem's command set)
    /// Budget announced in the URL-upload command.
    pub url_timeout_secs: u32,
    /// Budget announced in the GET/POST commands.
    pub request_timeout_secs: u32,
    /// How long to wait for the result URC after a request is accepted.
    pub network_timeout_secs: u64,
    /// Plain command acknowledgement deadline.
    pub command_timeout_ms: u64,
    /// Input window announced when uploading a POST payload.
    pub input_timeout_secs: u32,
    /// Wait parameter of the body-read command.
    pub read_wait_secs: u32,

    // Request shape
    pub content_type: HttpContentType,
    pub ssl_context: Option<u8>,
    pub custom_headers: Vec<(String, String)>,
    /// Ask the modem to include response headers in the body dump.
    pub response_headers: bool,

    // Preconditions
    /// Refuse images not served as application/octet-stream.
    pub require_octet_stream: bool,
    /// Require a strictly newer advertised version before writing.
    pub version_gate: bool,
    /// Optional SHA-256 (hex) the streamed image must hash to.
    pub expected_sha256: Option<String>,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            firmware_url: String::new(),
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            chunk_size: 1024,
            idle_timeout_ms: 10_000,
            url_timeout_secs: 60,
            request_timeout_secs: 60,
            network_timeout_secs: 60,
            command_timeout_ms: 3_000,
            input_timeout_secs: 10,
            read_wait_secs: 80,
            content_type: HttpContentType::OctetStream,
            ssl_context: None,
            custom_headers: Vec::new(),
            response_headers: true,
            require_octet_stream: true,
            version_gate: true,
            expected_sha256: None,
        }
    }
}

impl OtaConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: OtaConfig =
            serde_json::from_slice(bytes).context("failed to parse OTA config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("failed to serialize OTA config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.firmware_url.is_empty() {
            bail!("firmware_url must not be empty");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        if self.idle_timeout_ms == 0 {
            bail!("idle_timeout_ms must be non-zero");
        }
        if let Some(hex) = &self.expected_sha256 {
            if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                bail!("expected_sha256 must be 64 hex characters");
            }
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// The subset of settings the protocol session needs.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            network_timeout: Duration::from_secs(self.network_timeout_secs),
            url_timeout_secs: self.url_timeout_secs,
            request_timeout_secs: self.request_timeout_secs,
            input_timeout_secs: self.input_timeout_secs,
            read_wait_secs: self.read_wait_secs,
            chunk_size: self.chunk_size,
            idle_timeout: self.idle_timeout(),
            content_type: self.content_type,
            ssl_context: self.ssl_context,
            custom_headers: self.custom_headers.clone(),
            response_headers: self.response_headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> OtaConfig {
        OtaConfig {
            firmware_url: "http://firmware.example.com/firmware.bin".into(),
            ..OtaConfig::default()
        }
    }

    #[test]
    fn json_round_trip() {
        let config = valid();
        let json = config.to_json().unwrap();
        let back = OtaConfig::from_json(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(OtaConfig::default().validate().is_err());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut config = valid();
        config.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_digest_is_rejected() {
        let mut config = valid();
        config.expected_sha256 = Some("abc123".into());
        assert!(config.validate().is_err());
        config.expected_sha256 = Some("a".repeat(64));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn content_type_codes_match_the_modem_table() {
        assert_eq!(HttpContentType::UrlEncoded.code(), 0);
        assert_eq!(HttpContentType::OctetStream.code(), 2);
        assert_eq!(HttpContentType::Jpeg.code(), 5);
    }
}
