//! Exchange reports
//!
//! Every farmer transfer attempt yields an exchange report. Reports travel
//! over a channel to a background task that posts them to the bridge; a
//! failed post is logged and dropped.

use crate::bridge::Bridge;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

pub const REPORT_SUCCESS: u32 = 1000;
pub const REPORT_FAILURE: u32 = 1100;

pub const SHARD_DOWNLOADED: &str = "SHARD_DOWNLOADED";
pub const SHARD_UPLOADED: &str = "SHARD_UPLOADED";
pub const DOWNLOAD_ERROR: &str = "DOWNLOAD_ERROR";
pub const TRANSFER_FAILED: &str = "TRANSFER_FAILED";
pub const FAILED_INTEGRITY: &str = "FAILED_INTEGRITY";

/// Outcome of the latest transfer attempt, timestamps in unix milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeReport {
    pub start: i64,
    pub end: i64,
    pub code: u32,
    pub message: String,
}

impl ExchangeReport {
    /// Reset for a new attempt
    pub fn begin(&mut self) {
        *self = Self {
            start: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        };
    }

    pub fn succeed(&mut self, message: &str) {
        self.conclude(REPORT_SUCCESS, message);
    }

    pub fn fail(&mut self, message: &str) {
        self.conclude(REPORT_FAILURE, message);
    }

    fn conclude(&mut self, code: u32, message: &str) {
        self.end = chrono::Utc::now().timestamp_millis();
        self.code = code;
        self.message = message.to_string();
    }

    pub fn is_success(&self) -> bool {
        self.code == REPORT_SUCCESS
    }
}

/// A report addressed to the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRecord {
    pub data_hash: String,
    pub farmer_id: String,
    pub report: ExchangeReport,
}

/// Cloneable sender side of the reporter
#[derive(Clone)]
pub struct ReportSender {
    tx: mpsc::UnboundedSender<ExchangeRecord>,
}

impl ReportSender {
    /// Queue a report; never blocks and never fails the caller
    pub fn submit(&self, record: ExchangeRecord) {
        if self.tx.send(record).is_err() {
            debug!("Exchange reporter closed, dropping report");
        }
    }
}

/// Background task posting exchange reports
pub struct ExchangeReporter {
    sender: ReportSender,
    task: JoinHandle<()>,
}

impl ExchangeReporter {
    pub fn spawn(bridge: Arc<dyn Bridge>, timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ExchangeRecord>();

        let task = tokio::spawn(async move {
            let mut inflight = JoinSet::new();

            while let Some(record) = rx.recv().await {
                let bridge = bridge.clone();
                inflight.spawn(async move {
                    match tokio::time::timeout(timeout, bridge.send_exchange_report(&record)).await {
                        Ok(Ok(())) => {
                            metrics::report_sent(true);
                        }
                        Ok(Err(e)) => {
                            metrics::report_sent(false);
                            warn!(hash = %record.data_hash, error = %e, "Failed to send exchange report");
                        }
                        Err(_) => {
                            metrics::report_sent(false);
                            warn!(hash = %record.data_hash, "Exchange report timed out");
                        }
                    }
                });

                while inflight.try_join_next().is_some() {}
            }

            while inflight.join_next().await.is_some() {}
        });

        Self {
            sender: ReportSender { tx },
            task,
        }
    }

    pub fn sender(&self) -> ReportSender {
        self.sender.clone()
    }

    /// Stop accepting reports and give queued ones up to `grace` to be
    /// posted. Reports still in flight after that keep going in the
    /// background. Senders handed out earlier must be dropped first.
    pub async fn shutdown(self, grace: Duration) {
        drop(self.sender);
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Exchange reporter task failed"),
            Err(_) => debug!("Exchange reports still in flight, continuing in background"),
        }
    }
}
