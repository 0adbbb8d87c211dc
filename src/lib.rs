//! Firmware updates over a cellular modem's AT command interface.
//!
//! The modem exposes HTTP(S) only through a half-duplex, line-oriented
//! command channel that switches into raw data mode for URL upload,
//! POST payloads and body download. This crate drives that channel as
//! an explicit state machine and streams the downloaded image into a
//! flash-update sink in bounded chunks, with progress accounting and
//! strict validate-before-write ordering.
//!
//! The serial driver and the flash backend stay outside: implement
//! [`Transport`] over your UART and [`UpdateSink`] over your partition
//! scheme, then let [`Updater`] run the attempt.
//!
//! ```no_run
//! use cellular_ota::{Ec200uHttp, MemorySink, OtaConfig, Updater};
//! # fn demo(transport: impl cellular_ota::Transport) -> cellular_ota::Result<()> {
//! let config = OtaConfig {
//!     firmware_url: "http://firmware.example.com/firmware.bin".into(),
//!     current_version: "1.2.6".into(),
//!     ..OtaConfig::default()
//! };
//! let session = Ec200uHttp::new(transport, config.session_options());
//! let mut updater = Updater::new(session, config);
//! let mut sink = MemorySink::new();
//! let outcome = updater.run(&mut sink, &mut |pct| println!("{pct}%"))?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod command;
pub mod config;
pub mod error;
pub mod parse;
pub mod progress;
pub mod session;
pub mod sink;
pub mod transport;
pub mod update;
pub mod version;

pub use body::{ChunkedBodyReader, RawSource};
pub use command::{CommandChannel, DATA_MODE_SENTINEL, DATA_TERMINATOR};
pub use config::{HttpContentType, OtaConfig};
pub use error::{Error, ErrorKind, Result};
pub use progress::TransferProgress;
pub use session::{
    Ec200uHttp, HeaderBlock, HttpResponseMeta, ModemHttp, SessionOptions, SessionState,
};
pub use sink::{MemorySink, UpdateSink};
pub use transport::Transport;
pub use update::{
    update_queue, CancelToken, Outcome, UpdateQueue, UpdateRequest, UpdateTrigger, Updater,
};
