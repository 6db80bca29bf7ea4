use crate::camera::StreamLease;
use crate::config::RecordingConfig;
use crate::error::PipelineError;
use crate::frame::FrameData;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    /// Minimum spacing between captures
    pub frame_interval: Duration,
    /// Wait on a full queue before the frame is dropped
    pub send_timeout: Duration,
    pub retry_limit: u32,
    pub retry_backoff: Duration,
}

impl ProducerSettings {
    pub fn from_config(config: &RecordingConfig) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            retry_limit: config.capture_retry_limit,
            retry_backoff: Duration::from_millis(config.capture_retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    /// Gave up after too many consecutive capture failures
    pub aborted: bool,
}

/// Capture main-stream frames into the session queue until cancelled
///
/// The lease is held for the lifetime of the loop and released on return.
/// Returning also drops `tx`, which the session observes as end of source.
pub async fn run_producer(
    lease: StreamLease,
    tx: mpsc::Sender<FrameData>,
    token: CancellationToken,
    settings: ProducerSettings,
) -> ProducerReport {
    let stream = lease.stream();
    let mut report = ProducerReport::default();
    let mut failures: u32 = 0;

    info!(
        "Frame producer started on {} stream (interval {:?})",
        stream, settings.frame_interval
    );

    loop {
        let started = Instant::now();

        let captured = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = lease.capture() => result,
        };

        match captured {
            Ok(frame) => {
                failures = 0;
                let sent = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = tx.send_timeout(frame, settings.send_timeout) => result,
                };
                match sent {
                    Ok(()) => report.frames_sent += 1,
                    Err(SendTimeoutError::Timeout(frame)) => {
                        report.frames_dropped += 1;
                        warn!(
                            "{} (frame {})",
                            PipelineError::QueueBackpressure {
                                waited_ms: settings.send_timeout.as_millis() as u64,
                            },
                            frame.id
                        );
                    }
                    Err(SendTimeoutError::Closed(_)) => {
                        debug!("Frame queue closed by consumer");
                        break;
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "Capture failed on {} stream ({}/{}): {}",
                    stream, failures, settings.retry_limit, e
                );
                if failures >= settings.retry_limit {
                    error!(
                        "{}",
                        PipelineError::CaptureAborted { stream, failures }
                    );
                    report.aborted = true;
                    break;
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(settings.retry_backoff) => {}
                }
                continue;
            }
        }

        let elapsed = started.elapsed();
        if elapsed < settings.frame_interval {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(settings.frame_interval - elapsed) => {}
            }
        }
    }

    drop(lease);
    info!(
        "Frame producer stopped: {} sent, {} dropped{}",
        report.frames_sent,
        report.frames_dropped,
        if report.aborted { ", aborted" } else { "" }
    );
    report
}
