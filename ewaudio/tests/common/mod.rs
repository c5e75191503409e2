//! Shared test fixtures: synthetic MP3 streams and a minimal HTTP
//! server that can resume from Range requests, reset connections
//! mid-body, and stall without closing. wiremock cannot fault-inject at
//! the TCP level, hence the hand-rolled server.

use ewaudio::{Streamer, StreamerState};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// 128 kbit/s, 44.1 kHz MPEG-1 Layer III frame: 417 bytes
pub const FRAME_LEN: usize = 417;

pub fn mp3_frame() -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
    frame
}

pub fn mp3_frames(n: usize) -> Vec<u8> {
    (0..n).flat_map(|_| mp3_frame()).collect()
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Serve the whole (ranged) body and close cleanly
    Complete,
    /// Send `bytes` of the body then RST, for the first `times` requests
    ResetAfter { bytes: usize, times: usize },
    /// Send `bytes` then hold the connection open without data
    StallAfter { bytes: usize },
}

/// Byte-serving HTTP server for fault-injection tests
pub struct StreamServer {
    addr: SocketAddr,
    offsets: Arc<Mutex<Vec<u64>>>,
}

impl StreamServer {
    pub async fn start(body: Vec<u8>, behavior: Behavior) -> Self {
        Self::spawn(body, behavior, true).await
    }

    /// Like [`start`](StreamServer::start), but always answers 200 from
    /// byte 0, the way servers without range support behave. Requested
    /// offsets are still recorded.
    pub async fn start_ignoring_range(body: Vec<u8>, behavior: Behavior) -> Self {
        Self::spawn(body, behavior, false).await
    }

    async fn spawn(body: Vec<u8>, behavior: Behavior, honor_range: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let offsets = Arc::new(Mutex::new(Vec::new()));
        let resets_left = Arc::new(AtomicUsize::new(match behavior {
            Behavior::ResetAfter { times, .. } => times,
            _ => 0,
        }));
        let body = Arc::new(body);

        let accept_offsets = Arc::clone(&offsets);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_one(
                    stream,
                    Arc::clone(&body),
                    behavior,
                    honor_range,
                    Arc::clone(&accept_offsets),
                    Arc::clone(&resets_left),
                ));
            }
        });

        Self { addr, offsets }
    }

    pub fn url(&self) -> String {
        format!("http://{}/stream.mp3", self.addr)
    }

    /// Start offsets of every request received, in order
    pub fn request_offsets(&self) -> Vec<u64> {
        self.offsets.lock().unwrap().clone()
    }
}

async fn serve_one(
    mut stream: TcpStream,
    body: Arc<Vec<u8>>,
    behavior: Behavior,
    honor_range: bool,
    offsets: Arc<Mutex<Vec<u64>>>,
    resets_left: Arc<AtomicUsize>,
) {
    let Some(head) = read_head(&mut stream).await else {
        return;
    };
    let offset = head
        .lines()
        .find_map(|line| {
            line.to_ascii_lowercase()
                .strip_prefix("range: bytes=")
                .and_then(|range| range.split('-').next()?.trim().parse::<u64>().ok())
        })
        .unwrap_or(0);
    offsets.lock().unwrap().push(offset);

    let start = if honor_range {
        (offset as usize).min(body.len())
    } else {
        0
    };
    let payload = &body[start..];
    let head = if start > 0 {
        format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Type: audio/mpeg\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
            payload.len(),
            start,
            body.len().saturating_sub(1),
            body.len(),
        )
    } else {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            payload.len(),
        )
    };
    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    match behavior {
        Behavior::Complete => {
            let _ = stream.write_all(payload).await;
        }
        Behavior::ResetAfter { bytes, .. } => {
            let reset = resets_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok();
            if reset {
                let n = bytes.min(payload.len());
                let _ = stream.write_all(&payload[..n]).await;
                let _ = stream.flush().await;
                // Let the client drain the sent bytes before the RST
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = stream.set_linger(Some(Duration::ZERO));
            } else {
                let _ = stream.write_all(payload).await;
            }
        }
        Behavior::StallAfter { bytes } => {
            let n = bytes.min(payload.len());
            let _ = stream.write_all(&payload[..n]).await;
            let _ = stream.flush().await;
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
    }
}

async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 || buf.len() > 16 * 1024 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Block until the streamer state satisfies `pred`, or panic after
/// `timeout`.
pub async fn wait_for_state(
    streamer: &Streamer,
    timeout: Duration,
    pred: impl Fn(&StreamerState) -> bool,
) -> StreamerState {
    let mut rx = streamer.watch_state();
    tokio::time::timeout(timeout, async {
        loop {
            let state = rx.borrow_and_update().clone();
            if pred(&state) {
                return state;
            }
            rx.changed().await.expect("streamer actor gone");
        }
    })
    .await
    .expect("timed out waiting for streamer state")
}
