/// TCP polling session for a single scale
use log::{error, info, warn};
use std::fmt;
use std::io;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::models::{DeviceEndpoint, Reading};
use crate::scale::framing::FrameBuffer;
use crate::scale::parser::FrameParser;

const CONNECT_TIMEOUT_MS: u64 = 3000;
const RECEIVE_TIMEOUT_MS: u64 = 1000;
const POLL_DELAY_MS: u64 = 200; // Rate limit between receive attempts
const READ_CHUNK_BYTES: usize = 1024;

/// Timing bounds for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// How long the session keeps reading once connected.
    pub duration: Duration,
    pub connect_timeout: Duration,
    /// Upper bound for a single receive, so the deadline and stop flag get checked.
    pub receive_timeout: Duration,
    pub poll_delay: Duration,
}

impl SessionSettings {
    pub fn new(duration: Duration) -> Self {
        SessionSettings {
            duration,
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            receive_timeout: Duration::from_millis(RECEIVE_TIMEOUT_MS),
            poll_delay: Duration::from_millis(POLL_DELAY_MS),
        }
    }
}

/// Why a session terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The duration bound expired.
    Completed,
    /// A stop request was observed.
    Cancelled,
    ConnectFailed(String),
    ReceiveFailed(String),
    /// The device closed the connection.
    PeerClosed,
    /// The session task panicked or was aborted.
    Aborted(String),
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Completed => write!(f, "completed"),
            SessionOutcome::Cancelled => write!(f, "cancelled"),
            SessionOutcome::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            SessionOutcome::ReceiveFailed(e) => write!(f, "receive failed: {}", e),
            SessionOutcome::PeerClosed => write!(f, "closed by device"),
            SessionOutcome::Aborted(e) => write!(f, "aborted: {}", e),
        }
    }
}

/// Everything a finished session hands back to its supervisor.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub name: String,
    pub outcome: SessionOutcome,
    pub readings: Vec<Reading>,
}

/// Owns the connection to one scale and the stable readings taken from it.
///
/// A constructed session is idle. `run` consumes it, connects, reads, and
/// hands back a `SessionReport` once it has terminated.
pub struct ScaleSession {
    endpoint: DeviceEndpoint,
    settings: SessionSettings,
    parser: Arc<FrameParser>,
    readings: Vec<Reading>,
}

impl ScaleSession {
    pub fn new(
        endpoint: DeviceEndpoint,
        settings: SessionSettings,
        parser: Arc<FrameParser>,
    ) -> Self {
        ScaleSession {
            endpoint,
            settings,
            parser,
            readings: Vec::new(),
        }
    }

    /// Connect, read until the deadline, a stop request or an I/O failure,
    /// then disconnect. Never fails: problems end up in the report outcome.
    pub async fn run(mut self, cancel: CancellationToken) -> SessionReport {
        let outcome = match self.connect(&cancel).await {
            Ok(stream) => {
                let outcome = self.read_loop(stream, &cancel).await;
                // The stream was moved into read_loop and is closed by now
                info!("Disconnected from {}", self.endpoint.display_name);
                outcome
            }
            Err(outcome) => outcome,
        };

        SessionReport {
            name: self.endpoint.display_name,
            outcome,
            readings: self.readings,
        }
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<TcpStream, SessionOutcome> {
        let addr = (self.endpoint.host.as_str(), self.endpoint.port);

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Stop requested before {} connected", self.endpoint.display_name);
                return Err(SessionOutcome::Cancelled);
            }
            attempt = timeout(self.settings.connect_timeout, TcpStream::connect(addr)) => attempt,
        };

        let reason = match attempt {
            Ok(Ok(stream)) => {
                info!("Connected to {}", self.endpoint);
                return Ok(stream);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "no response within {} ms",
                self.settings.connect_timeout.as_millis()
            ),
        };
        error!("Failed to connect to {}: {}", self.endpoint.display_name, reason);
        Err(SessionOutcome::ConnectFailed(reason))
    }

    async fn read_loop(
        &mut self,
        mut stream: TcpStream,
        cancel: &CancellationToken,
    ) -> SessionOutcome {
        let deadline = Instant::now() + self.settings.duration;
        let mut buffer = FrameBuffer::new();
        let mut chunk = [0u8; READ_CHUNK_BYTES];

        loop {
            if cancel.is_cancelled() {
                return SessionOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return SessionOutcome::Completed;
            }
            let wait = self.settings.receive_timeout.min(deadline - now);

            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionOutcome::Cancelled,
                received = timeout(wait, stream.read(&mut chunk)) => received,
            };

            match received {
                Ok(Ok(0)) => {
                    if let Some(frame) = buffer.flush() {
                        self.handle_frame(frame);
                    }
                    warn!("{} closed the connection", self.endpoint.display_name);
                    return SessionOutcome::PeerClosed;
                }
                Ok(Ok(n)) => {
                    for frame in buffer.push(&chunk[..n]) {
                        self.handle_frame(frame);
                    }
                }
                Ok(Err(e)) if is_receive_timeout(&e) => {}
                Ok(Err(e)) => {
                    error!("Error {}: {}", self.endpoint.display_name, e);
                    return SessionOutcome::ReceiveFailed(e.to_string());
                }
                // Nothing arrived in this window
                Err(_) => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionOutcome::Cancelled,
                _ = sleep(self.settings.poll_delay) => {}
            }
        }
    }

    fn handle_frame(&mut self, frame: String) {
        info!("RAW → {}: {:?}", self.endpoint.display_name, frame);

        if let Some(weight) = self.parser.parse_weight(&frame) {
            info!("Stable {}: {} kg", self.endpoint.display_name, weight);
            self.readings.push(Reading {
                timestamp: OffsetDateTime::now_utc(),
                source_name: self.endpoint.display_name.clone(),
                weight,
                raw_frame: frame,
            });
        }
    }
}

fn is_receive_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::serve_frames;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn fast_settings(duration: Duration) -> SessionSettings {
        SessionSettings {
            duration,
            connect_timeout: Duration::from_millis(500),
            receive_timeout: Duration::from_millis(100),
            poll_delay: Duration::from_millis(20),
        }
    }

    /// Serve `frames` to the first client, one every `interval`, then hang up.
    async fn scripted_scale(frames: Vec<String>, interval: Duration) -> DeviceEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let frames = frames.into_iter();
            let _ = serve_frames(stream, frames, interval, CancellationToken::new()).await;
        });
        DeviceEndpoint::new("127.0.0.1", port, "TestScale")
    }

    /// Accept one client and never send anything.
    async fn silent_scale() -> DeviceEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            sleep(Duration::from_secs(60)).await;
        });
        DeviceEndpoint::new("127.0.0.1", port, "Silent")
    }

    fn session(endpoint: DeviceEndpoint, settings: SessionSettings) -> ScaleSession {
        ScaleSession::new(endpoint, settings, Arc::new(FrameParser::default()))
    }

    #[tokio::test]
    async fn mixed_frames_yield_only_stable_weights_in_order() {
        init_logger();
        let frames = ["ST,+5.00", "garbage", "+6.50,ST", "+7.25 kg ST"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let endpoint = scripted_scale(frames, Duration::from_millis(50)).await;

        let report = session(endpoint, fast_settings(Duration::from_millis(800)))
            .run(CancellationToken::new())
            .await;

        let weights: Vec<f64> = report.readings.iter().map(|r| r.weight).collect();
        assert_eq!(weights, vec![5.0, 6.5, 7.25]);
        assert_eq!(report.readings[1].raw_frame, "+6.50,ST");
        assert!(report.readings.iter().all(|r| r.source_name == "TestScale"));
        assert_eq!(report.outcome, SessionOutcome::PeerClosed);
    }

    #[tokio::test]
    async fn refused_connection_ends_without_readings() {
        init_logger();
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let report = session(
            DeviceEndpoint::new("127.0.0.1", port, "Offline"),
            fast_settings(Duration::from_secs(5)),
        )
        .run(CancellationToken::new())
        .await;

        assert!(matches!(report.outcome, SessionOutcome::ConnectFailed(_)));
        assert!(report.readings.is_empty());
    }

    #[tokio::test]
    async fn periodic_frames_accumulate_until_deadline() {
        init_logger();
        let frames = (0..100).map(|i| format!("ST,+{}.00", i)).collect::<Vec<_>>();
        let endpoint = scripted_scale(frames, Duration::from_millis(200)).await;

        let report = session(endpoint, fast_settings(Duration::from_millis(1000)))
            .run(CancellationToken::new())
            .await;

        assert_eq!(report.outcome, SessionOutcome::Completed);
        // floor(1000 / 200) = 5, give or take a boundary frame
        let count = report.readings.len();
        assert!((4..=6).contains(&count), "got {} readings", count);
        assert!(report
            .readings
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
        for (i, reading) in report.readings.iter().enumerate() {
            assert_eq!(reading.weight, i as f64);
        }
    }

    #[tokio::test]
    async fn connection_reset_ends_session_and_keeps_earlier_readings() {
        init_logger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"ST,+1.50\r\n+2.25,ST\r\n").await.unwrap();
            sleep(Duration::from_millis(300)).await;
            // Zero linger turns the close into a reset
            #[allow(deprecated)]
            stream.set_linger(Some(Duration::ZERO)).unwrap();
            drop(stream);
        });

        let report = session(
            DeviceEndpoint::new("127.0.0.1", port, "Resetting"),
            fast_settings(Duration::from_secs(5)),
        )
        .run(CancellationToken::new())
        .await;

        assert!(
            matches!(report.outcome, SessionOutcome::ReceiveFailed(_)),
            "{:?}",
            report.outcome
        );
        let weights: Vec<f64> = report.readings.iter().map(|r| r.weight).collect();
        assert_eq!(weights, vec![1.5, 2.25]);
    }

    #[tokio::test]
    async fn silent_device_times_out_quietly() {
        init_logger();
        let endpoint = silent_scale().await;

        let started = Instant::now();
        let report = session(endpoint, fast_settings(Duration::from_millis(400)))
            .run(CancellationToken::new())
            .await;

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert!(report.readings.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn stop_request_ends_the_read_loop() {
        init_logger();
        let endpoint = silent_scale().await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            session(endpoint, fast_settings(Duration::from_secs(30))).run(cancel.clone()),
        );

        sleep(Duration::from_millis(200)).await;
        let stopped_at = Instant::now();
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::Cancelled);
        assert!(stopped_at.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn cancelled_before_start_never_connects() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = session(
            DeviceEndpoint::new("127.0.0.1", 9, "Never"),
            fast_settings(Duration::from_secs(1)),
        )
        .run(cancel)
        .await;

        assert_eq!(report.outcome, SessionOutcome::Cancelled);
        assert!(report.readings.is_empty());
    }
}
