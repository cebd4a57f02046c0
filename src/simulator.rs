/// Fake scale that streams random stable weights for local testing
use log::{debug, error, info};
use rand::seq::SliceRandom;
use rand::Rng;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

const MIN_WEIGHT: f64 = 5.0;
const MAX_WEIGHT: f64 = 50.0;

/// Frame layouts the simulator picks from, one per supported wire pattern.
#[derive(Debug, Clone, Copy)]
enum FrameLayout {
    MarkerFirst,
    MarkerLast,
    WithUnit,
}

const LAYOUTS: [FrameLayout; 3] = [
    FrameLayout::MarkerFirst,
    FrameLayout::MarkerLast,
    FrameLayout::WithUnit,
];

fn format_frame(layout: FrameLayout, weight: f64) -> String {
    match layout {
        FrameLayout::MarkerFirst => format!("ST,{:+.2}", weight),
        FrameLayout::MarkerLast => format!("{:+.2},ST", weight),
        FrameLayout::WithUnit => format!("{:+.2} kg ST", weight),
    }
}

/// A random stable weight in one of the supported layouts, without line ending.
pub fn random_frame<R: Rng + ?Sized>(rng: &mut R) -> String {
    let weight = rng.gen_range(MIN_WEIGHT..MAX_WEIGHT);
    let layout = LAYOUTS
        .choose(rng)
        .copied()
        .unwrap_or(FrameLayout::MarkerFirst);
    format_frame(layout, weight)
}

/// Write each frame followed by `\r\n`, pausing `interval` after each one.
///
/// Returns when the frames run out, the client goes away, or `cancel` fires.
pub async fn serve_frames<I>(
    mut stream: TcpStream,
    frames: I,
    interval: Duration,
    cancel: CancellationToken,
) -> io::Result<()>
where
    I: Iterator<Item = String>,
{
    for frame in frames {
        info!("Sending: {}", frame);
        stream.write_all(format!("{}\r\n", frame).as_bytes()).await?;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
    stream.shutdown().await
}

/// Accept loggers on `listener` and feed each one random frames until cancelled.
pub async fn run_simulator(
    listener: TcpListener,
    interval: Duration,
    cancel: CancellationToken,
) -> io::Result<()> {
    info!(
        "Fake scale running on {}, waiting for connections",
        listener.local_addr()?
    );

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        info!("Logger connected from {}", peer);

        let frames = std::iter::repeat_with(|| random_frame(&mut rand::thread_rng()));
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            match serve_frames(stream, frames, interval, cancel).await {
                Ok(()) => debug!("Stopped serving {}", peer),
                Err(e) => error!("Logger {} dropped: {}", peer, e),
            }
        });
    }

    info!("Fake scale stopped");
    Ok(())
}
