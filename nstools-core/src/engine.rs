use std::fmt;
use std::time::{Duration, Instant};

use nstools_packet::{CorruptionFlags, Datagram, FaultInjector, PacketError, PacketSender};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Consecutive interrupted sends tolerated before giving up.
pub const MAX_CONSECUTIVE_RETRIES: u32 = 100;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("datagram is empty")]
    EmptyDatagram,
    #[error("transmit failed: {0}")]
    Send(#[from] PacketError),
    #[error("send interrupted {0} times in a row")]
    RetriesExhausted(u32),
}

/// How long the loop keeps sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Exactly one datagram.
    Once,
    /// Until the duration has elapsed (checked after each send).
    For(Duration),
    /// Until cancelled.
    UntilStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitConfig {
    pub mode: SendMode,
    /// Pause between sends; zero sends back to back.
    pub interval: Duration,
    pub flags: CorruptionFlags,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            mode: SendMode::Once,
            interval: Duration::ZERO,
            flags: CorruptionFlags::NONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Once,
    Deadline,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Once => f.write_str("single datagram sent"),
            StopReason::Deadline => f.write_str("timeout reached"),
            StopReason::Cancelled => f.write_str("stopped by signal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitSummary {
    pub sent: u64,
    /// Sends whose header was actually disturbed.
    pub corrupted: u64,
    /// Interrupted sends that were retried.
    pub retried: u64,
    pub elapsed: Duration,
    pub stop: StopReason,
}

/// Repeatedly sends a datagram, corrupting a fresh copy per send when
/// corruption flags are set.
pub struct Transmitter {
    sender: Box<dyn PacketSender>,
    injector: Option<FaultInjector>,
    config: TransmitConfig,
}

impl Transmitter {
    /// Without [`with_injector`](Self::with_injector), the first corrupting
    /// run creates an injector seeded from the process id.
    pub fn new(sender: Box<dyn PacketSender>, config: TransmitConfig) -> Self {
        Self {
            sender,
            injector: None,
            config,
        }
    }

    pub fn with_injector(mut self, injector: FaultInjector) -> Self {
        self.injector = Some(injector);
        self
    }

    pub fn config(&self) -> &TransmitConfig {
        &self.config
    }

    /// Run the loop until the mode's stop condition or cancellation.
    ///
    /// `clean` is never modified. The sender receives the network-layer
    /// bytes; any link header in `clean` is left to the transport.
    pub async fn run(
        &mut self,
        clean: &Datagram,
        cancel: CancellationToken,
    ) -> Result<TransmitSummary, EngineError> {
        if clean.network_bytes().is_empty() {
            return Err(EngineError::EmptyDatagram);
        }

        let config = self.config;
        let start = Instant::now();
        let deadline = match config.mode {
            SendMode::For(duration) => Some(start + duration),
            _ => None,
        };

        info!(
            kind = %clean.kind(),
            bytes = clean.network_bytes().len(),
            mode = ?config.mode,
            interval_ms = config.interval.as_millis() as u64,
            flags = %config.flags,
            interface = self.sender.interface_name().unwrap_or("-"),
            "transmission started"
        );

        let mut sent: u64 = 0;
        let mut corrupted: u64 = 0;
        let mut retried: u64 = 0;
        let mut consecutive_retries: u32 = 0;

        let stop = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let result = if config.flags.is_empty() {
                self.sender.send_datagram(clean.network_bytes()).await
            } else {
                let injector = self
                    .injector
                    .get_or_insert_with(FaultInjector::from_process_id);
                let mut variant = clean.clone();
                let report = injector.corrupt(&mut variant, config.flags);
                if !report.is_clean() {
                    corrupted += 1;
                }
                self.sender.send_datagram(variant.network_bytes()).await
            };

            match result {
                Ok(()) => {
                    sent += 1;
                    consecutive_retries = 0;
                }
                Err(e) if e.is_transient() => {
                    if cancel.is_cancelled() {
                        break StopReason::Cancelled;
                    }
                    consecutive_retries += 1;
                    retried += 1;
                    if consecutive_retries >= MAX_CONSECUTIVE_RETRIES {
                        warn!(retries = consecutive_retries, "giving up on interrupted sends");
                        return Err(EngineError::RetriesExhausted(consecutive_retries));
                    }
                    debug!(error = %e, "send interrupted, retrying");
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) => return Err(EngineError::Send(e)),
            }

            if config.mode == SendMode::Once {
                break StopReason::Once;
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                break StopReason::Deadline;
            }
            if wait_or_cancel(&cancel, config.interval, deadline).await {
                break StopReason::Cancelled;
            }
        };

        let summary = TransmitSummary {
            sent,
            corrupted,
            retried,
            elapsed: start.elapsed(),
            stop,
        };
        info!(
            sent = summary.sent,
            corrupted = summary.corrupted,
            retried = summary.retried,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            stop = %summary.stop,
            "transmission finished"
        );
        Ok(summary)
    }
}

/// Pause for `interval` (clipped to `deadline`), returning `true` if
/// cancelled meanwhile. A zero interval still yields to the scheduler so a
/// signal task can run.
async fn wait_or_cancel(
    cancel: &CancellationToken,
    interval: Duration,
    deadline: Option<Instant>,
) -> bool {
    let wait = match deadline {
        Some(deadline) => interval.min(deadline.saturating_duration_since(Instant::now())),
        None => interval,
    };
    if wait.is_zero() {
        tokio::task::yield_now().await;
        return cancel.is_cancelled();
    }
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(wait) => false,
    }
}
