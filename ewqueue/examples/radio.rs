//! Play one or more stream URLs through the default audio device.
//!
//! ```sh
//! cargo run --example radio -- https://radio.example/stream.mp3
//! ```

use ewaudio::output::CpalOutputFactory;
use ewaudio::PlayerConfig;
use ewqueue::{PlaybackQueue, QueueEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        eprintln!("usage: radio <stream-url>...");
        std::process::exit(2);
    }

    let config = Arc::new(PlayerConfig::from_env_or_default()?);
    let queue = PlaybackQueue::new(config, Arc::new(CpalOutputFactory))?;
    let (tx, mut rx) = mpsc::channel(32);
    queue.subscribe(tx).await;

    for url in urls {
        queue.add_song(url, false).await;
    }
    queue.play().await;

    while let Some(event) = rx.recv().await {
        match event {
            QueueEvent::AttemptingNewSong { url } => println!("tuning in {url}"),
            QueueEvent::CreatedNewStream { .. } => {}
            QueueEvent::NowPlaying { url } => println!("playing {url}"),
            QueueEvent::RunningLow { remaining } => {
                println!("{remaining} song(s) left in the queue")
            }
            QueueEvent::StreamError { url, error } => {
                eprintln!("{url}: {error}");
                queue.next().await;
            }
            QueueEvent::NoSongsLeft => break,
        }
    }
    Ok(())
}
