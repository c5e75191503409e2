//! Streaming byte reader
//!
//! Opens a streaming HTTP(S) GET and forwards the body as events over a
//! bounded channel. The channel bound plus the pause gate give the owner
//! explicit backpressure: while paused, or while the owner stops draining
//! the channel, no new bytes are pulled off the socket.

use crate::error::{classify_body_error, Result, StreamError};
use crate::headers::StreamHeaders;
use bytes::Bytes;
use ewconfig::{PlayerConfig, ProxyConfig};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Capacity of the reader event channel. Together with the sender-side
/// gate this bounds bytes held in flight while the ring is full.
const EVENT_CHANNEL_SIZE: usize = 32;

/// Time allowed for the TCP/TLS handshake before `open` fails
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

const USER_AGENT: &str = concat!("etherwave/", env!("CARGO_PKG_VERSION"));

/// Events delivered by an open reader, in order: zero or more `Data`,
/// then exactly one `End` or `Failed`.
#[derive(Debug)]
pub enum ReaderEvent {
    /// A chunk of the response body, in arrival order
    Data(Bytes),
    /// Body finished normally
    End,
    /// Body failed; `ConnectionReset` is retryable, the rest are not
    Failed(StreamError),
}

/// Shared HTTP client plus the proxy routing it was built with
///
/// Build one per engine and reuse it across reconnects; reqwest pools
/// connections internally.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    client: reqwest::Client,
}

impl NetworkConfig {
    /// Build a client honoring the configured proxy. `None` keeps
    /// reqwest's default system-proxy behavior. TLS certificate
    /// validation is never disabled.
    pub fn new(config: &PlayerConfig) -> Result<Self> {
        Self::with_proxy(config.proxy.as_ref())
    }

    pub fn with_proxy(proxy: Option<&ProxyConfig>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy.url())
                .map_err(|e| StreamError::Proxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build()?;
        Ok(Self { client })
    }
}

/// One open connection to a streaming URL
///
/// Dropping the reader closes the connection.
pub struct ByteStreamReader {
    headers: StreamHeaders,
    events: Option<mpsc::Receiver<ReaderEvent>>,
    gate: watch::Sender<bool>,
    cancel: CancellationToken,
    start_offset: u64,
}

impl ByteStreamReader {
    /// Open a streaming GET at `url`, resuming from `start_offset` bytes
    /// when it is non-zero (via a `Range` header).
    ///
    /// Returns once response headers are available; body bytes follow as
    /// [`ReaderEvent`]s on the channel obtained from [`take_events`].
    ///
    /// [`take_events`]: ByteStreamReader::take_events
    pub async fn open(url: &str, start_offset: u64, net: &NetworkConfig) -> Result<Self> {
        let parsed = url::Url::parse(url)?;
        let mut request = net.client.get(parsed);
        if start_offset > 0 {
            request = request.header("Range", format!("bytes={}-", start_offset));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StreamError::Status(response.status().as_u16()));
        }
        let headers = StreamHeaders::from_response(&response);
        debug!(
            url,
            start_offset,
            status = headers.status,
            content_type = headers.content_type.as_deref().unwrap_or("-"),
            content_length = headers.content_length,
            "stream opened"
        );

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (gate, gate_rx) = watch::channel(true);
        let cancel = CancellationToken::new();

        tokio::spawn(fetch_loop(response, tx, gate_rx, cancel.clone()));

        Ok(Self {
            headers,
            events: Some(rx),
            gate,
            cancel,
            start_offset,
        })
    }

    /// Headers captured when the connection was opened
    pub fn headers(&self) -> &StreamHeaders {
        &self.headers
    }

    /// Byte offset this connection was opened at
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Total stream length in bytes, when the server reported one. A 206
    /// body resumes mid-stream, so its length is offset by where it
    /// started; a 200 body is the whole stream even when a range was
    /// requested.
    pub fn total_length(&self) -> Option<u64> {
        let len = self.headers.content_length?;
        if self.headers.status == 206 {
            Some(len + self.start_offset)
        } else {
            Some(len)
        }
    }

    /// Take the event channel; yields `None` on the second call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ReaderEvent>> {
        self.events.take()
    }

    /// Unschedule delivery: the fetch task stops pulling body bytes until
    /// [`resume`](ByteStreamReader::resume).
    pub fn pause(&self) {
        let _ = self.gate.send(false);
    }

    /// Resume delivery after [`pause`](ByteStreamReader::pause).
    pub fn resume(&self) {
        let _ = self.gate.send(true);
    }

    /// Tear down the connection; buffered events may still drain from the
    /// channel but no new bytes arrive.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ByteStreamReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn fetch_loop(
    response: reqwest::Response,
    tx: mpsc::Sender<ReaderEvent>,
    mut gate: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let mut body = response.bytes_stream();
    let mut delivered = 0u64;

    loop {
        // Hold here while unscheduled
        while !*gate.borrow() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = gate.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let item = tokio::select! {
            _ = cancel.cancelled() => return,
            item = body.next() => item,
        };

        match item {
            None => {
                trace!(delivered, "body finished");
                let _ = tx.send(ReaderEvent::End).await;
                return;
            }
            Some(Ok(chunk)) => {
                delivered += chunk.len() as u64;
                let send = tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(ReaderEvent::Data(chunk)) => sent,
                };
                if send.is_err() {
                    // Owner dropped the channel; nothing left to do
                    return;
                }
            }
            Some(Err(e)) => {
                let classified = classify_body_error(e);
                warn!(delivered, error = %classified, "body failed");
                let _ = tx.send(ReaderEvent::Failed(classified)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect_body(reader: &mut ByteStreamReader) -> (Vec<u8>, bool) {
        let mut rx = reader.take_events().unwrap();
        let mut body = Vec::new();
        let mut ended = false;
        while let Some(event) = rx.recv().await {
            match event {
                ReaderEvent::Data(chunk) => body.extend_from_slice(&chunk),
                ReaderEvent::End => {
                    ended = true;
                    break;
                }
                ReaderEvent::Failed(e) => panic!("unexpected failure: {e}"),
            }
        }
        (body, ended)
    }

    #[tokio::test]
    async fn delivers_body_then_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![7u8; 4096])
                    .insert_header("content-type", "audio/mpeg"),
            )
            .mount(&server)
            .await;

        let net = NetworkConfig::with_proxy(None).unwrap();
        let mut reader = ByteStreamReader::open(&format!("{}/stream", server.uri()), 0, &net)
            .await
            .unwrap();

        assert_eq!(reader.headers().content_type.as_deref(), Some("audio/mpeg"));
        assert_eq!(reader.headers().content_length, Some(4096));

        let (body, ended) = collect_body(&mut reader).await;
        assert_eq!(body.len(), 4096);
        assert!(ended);
    }

    #[tokio::test]
    async fn resuming_sends_range_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .and(header("Range", "bytes=100-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8; 50]))
            .mount(&server)
            .await;

        let net = NetworkConfig::with_proxy(None).unwrap();
        let mut reader = ByteStreamReader::open(&format!("{}/stream", server.uri()), 100, &net)
            .await
            .unwrap();

        // 206 body is 50 bytes; total length accounts for the offset
        assert_eq!(reader.total_length(), Some(150));
        let (body, ended) = collect_body(&mut reader).await;
        assert_eq!(body.len(), 50);
        assert!(ended);
    }

    #[tokio::test]
    async fn ignored_range_reports_the_full_body_length() {
        let server = MockServer::start().await;
        // No Range matcher: the server answers 200 from byte 0 no
        // matter what was asked for
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![2u8; 50]))
            .mount(&server)
            .await;

        let net = NetworkConfig::with_proxy(None).unwrap();
        let reader = ByteStreamReader::open(&format!("{}/stream", server.uri()), 100, &net)
            .await
            .unwrap();

        assert_eq!(reader.headers().status, 200);
        assert_eq!(reader.total_length(), Some(50));
    }

    #[tokio::test]
    async fn non_success_status_fails_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let net = NetworkConfig::with_proxy(None).unwrap();
        let result = ByteStreamReader::open(&format!("{}/missing", server.uri()), 0, &net).await;
        assert!(matches!(result, Err(StreamError::Status(404))));
    }

    #[tokio::test]
    async fn icy_headers_are_captured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/radio"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 16])
                    .insert_header("icy-name", "Test Radio")
                    .insert_header("icy-br", "128"),
            )
            .mount(&server)
            .await;

        let net = NetworkConfig::with_proxy(None).unwrap();
        let reader = ByteStreamReader::open(&format!("{}/radio", server.uri()), 0, &net)
            .await
            .unwrap();
        assert_eq!(reader.headers().icy_name.as_deref(), Some("Test Radio"));
        assert_eq!(reader.headers().icy_bitrate_kbps, Some(128));
    }

    #[tokio::test]
    async fn pause_holds_delivery_until_resume() {
        let server = MockServer::start().await;
        // Body larger than the channel bound so the fetch task cannot
        // finish while paused
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![3u8; 1 << 20]))
            .mount(&server)
            .await;

        let net = NetworkConfig::with_proxy(None).unwrap();
        let mut reader = ByteStreamReader::open(&format!("{}/stream", server.uri()), 0, &net)
            .await
            .unwrap();
        let mut rx = reader.take_events().unwrap();

        // Drain the first chunk, then pause and flush what was already
        // queued before the gate closed.
        assert!(matches!(rx.recv().await, Some(ReaderEvent::Data(_))));
        reader.pause();
        while let Ok(event) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            match event {
                Some(ReaderEvent::Data(_)) => continue,
                other => panic!("stream should not finish while paused: {other:?}"),
            }
        }

        reader.resume();
        let mut saw_end = false;
        while let Some(event) = rx.recv().await {
            if matches!(event, ReaderEvent::End) {
                saw_end = true;
                break;
            }
        }
        assert!(saw_end);
    }

    #[tokio::test]
    async fn close_stops_event_flow() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 1 << 20]))
            .mount(&server)
            .await;

        let net = NetworkConfig::with_proxy(None).unwrap();
        let mut reader = ByteStreamReader::open(&format!("{}/stream", server.uri()), 0, &net)
            .await
            .unwrap();
        let mut rx = reader.take_events().unwrap();
        reader.close();

        // Whatever was in flight drains, then the channel closes without
        // an End event.
        while let Some(event) = rx.recv().await {
            assert!(matches!(event, ReaderEvent::Data(_)));
        }
    }
}
