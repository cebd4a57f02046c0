/// Concurrent polling of several scales with graceful cancellation
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::{DeviceEndpoint, Reading};
use crate::scale::parser::FrameParser;
use crate::scale::session::{ScaleSession, SessionOutcome, SessionReport, SessionSettings};

/// How one session ended, for the run summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub name: String,
    pub outcome: SessionOutcome,
    pub readings: usize,
}

/// Readings from every session, in session-start order then receipt order.
#[derive(Debug, Clone, Default)]
pub struct AggregateResult {
    pub readings: Vec<Reading>,
    pub sessions: Vec<SessionSummary>,
}

impl AggregateResult {
    /// Merge finished session reports, preserving their order.
    pub fn merge(reports: Vec<SessionReport>) -> Self {
        let mut result = AggregateResult::default();
        for report in reports {
            result.sessions.push(SessionSummary {
                name: report.name,
                outcome: report.outcome,
                readings: report.readings.len(),
            });
            result.readings.extend(report.readings);
        }
        result
    }
}

/// Runs one `ScaleSession` per endpoint and collects their readings.
pub struct SessionSupervisor {
    endpoints: Vec<DeviceEndpoint>,
    settings: SessionSettings,
    parser: Arc<FrameParser>,
}

impl SessionSupervisor {
    pub fn new(
        endpoints: Vec<DeviceEndpoint>,
        settings: SessionSettings,
        parser: FrameParser,
    ) -> Self {
        SessionSupervisor {
            endpoints,
            settings,
            parser: Arc::new(parser),
        }
    }

    /// Poll every endpoint concurrently until each session terminates.
    ///
    /// Cancelling `cancel` asks all sessions to stop; they are still awaited,
    /// so the result holds everything captured before the stop request.
    pub async fn run(&self, cancel: CancellationToken) -> AggregateResult {
        info!("Starting {} scale session(s)", self.endpoints.len());

        let handles: Vec<_> = self
            .endpoints
            .iter()
            .cloned()
            .map(|endpoint| {
                let name = endpoint.display_name.clone();
                let session = ScaleSession::new(endpoint, self.settings, Arc::clone(&self.parser));
                (name, tokio::spawn(session.run(cancel.child_token())))
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(report) => {
                    info!("Session {} ended: {}", report.name, report.outcome);
                    reports.push(report);
                }
                Err(e) => {
                    // A crashed session loses its readings but not its siblings'
                    error!("Session {} aborted: {}", name, e);
                    reports.push(SessionReport {
                        name,
                        outcome: SessionOutcome::Aborted(e.to_string()),
                        readings: Vec::new(),
                    });
                }
            }
        }

        AggregateResult::merge(reports)
    }
}
