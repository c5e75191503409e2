//! Byte stream reader for the EtherWave playback engine
//!
//! This crate turns a remote audio URL into an ordered flow of byte
//! chunks with explicit backpressure and teardown:
//!
//! - streaming HTTP(S) GET with optional `Range` resume
//! - HTTP or SOCKS proxy routing, system proxy by default
//! - response header capture (content type/length, ICY station headers)
//! - pause/resume delivery without dropping the connection
//! - connection resets surfaced distinctly so the owner can retry
//!
//! # Example
//!
//! ```no_run
//! use ewstream::{ByteStreamReader, NetworkConfig, ReaderEvent};
//!
//! # async fn example() -> Result<(), ewstream::StreamError> {
//! let net = NetworkConfig::with_proxy(None)?;
//! let mut reader = ByteStreamReader::open("https://example.com/stream.mp3", 0, &net).await?;
//! let mut events = reader.take_events().unwrap();
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ReaderEvent::Data(chunk) => println!("{} bytes", chunk.len()),
//!         ReaderEvent::End => break,
//!         ReaderEvent::Failed(e) => return Err(e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod headers;
mod reader;

pub use error::{Result, StreamError};
pub use headers::StreamHeaders;
pub use reader::{ByteStreamReader, NetworkConfig, ReaderEvent};
