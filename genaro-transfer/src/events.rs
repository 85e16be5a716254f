//! Transfer events, handles and progress aggregation

use genaro_core::GenaroError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What a finished transfer produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Bridge file id (the uploaded file, or the downloaded one)
    pub file_id: String,
    /// Plaintext bytes transferred
    pub size: u64,
}

/// Events emitted by an upload or download
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Begin,
    /// Monotonically non-decreasing fraction in [0, 1]
    Progress(f64),
    Finish(Completion),
    Fail(GenaroError),
    Cancel,
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Finish(_) | TransferEvent::Fail(_) | TransferEvent::Cancel
        )
    }
}

/// Terminal state of a transfer
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Finished(Completion),
    Failed(GenaroError),
    Canceled,
}

/// Handle to a running upload or download
pub struct TransferHandle {
    events: mpsc::UnboundedReceiver<TransferEvent>,
    cancel: CancellationToken,
    task: JoinHandle<TransferOutcome>,
}

impl TransferHandle {
    /// Stream of events; ends after the terminal event
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<TransferEvent> {
        &mut self.events
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the transfer to end
    pub async fn wait(self) -> TransferOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Transfer task panicked");
                TransferOutcome::Failed(GenaroError::Unknown)
            }
        }
    }
}

/// Sending side of the event stream
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl EventSink {
    pub fn emit(&self, event: TransferEvent) {
        // The caller may have dropped the receiver; the transfer goes on
        let _ = self.tx.send(event);
    }
}

/// Run `work` as a transfer: emit `Begin`, then exactly one terminal event.
/// Cancellation wins over any error discovered at the same time.
pub(crate) fn spawn_transfer<F, Fut>(work: F) -> TransferHandle
where
    F: FnOnce(EventSink, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = genaro_core::Result<Completion>> + Send + 'static,
{
    let (tx, events) = mpsc::unbounded_channel();
    let sink = EventSink { tx };
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        sink.emit(TransferEvent::Begin);
        let result = work(sink.clone(), token.clone()).await;

        let outcome = match result {
            Ok(completion) => TransferOutcome::Finished(completion),
            Err(e) if e.is_canceled() || token.is_cancelled() => TransferOutcome::Canceled,
            Err(e) => TransferOutcome::Failed(e),
        };

        match &outcome {
            TransferOutcome::Finished(c) => {
                info!(file_id = %c.file_id, size = c.size, "Transfer finished");
                sink.emit(TransferEvent::Progress(1.0));
                sink.emit(TransferEvent::Finish(c.clone()));
            }
            TransferOutcome::Failed(e) => {
                warn!(error = %e, "Transfer failed");
                sink.emit(TransferEvent::Fail(e.clone()));
            }
            TransferOutcome::Canceled => {
                info!("Transfer canceled");
                sink.emit(TransferEvent::Cancel);
            }
        }
        outcome
    });

    TransferHandle {
        events,
        cancel,
        task,
    }
}

/// Await `fut` unless the transfer is canceled first
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = genaro_core::Result<T>>,
) -> genaro_core::Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GenaroError::TransferCanceled),
        result = fut => result,
    }
}

/// Aggregates per-shard byte counts into a progress fraction
pub struct ProgressTracker {
    total: u64,
    slots: Vec<AtomicU64>,
    /// Bits of the largest fraction emitted so far. Non-negative f64 values
    /// order the same as their bit patterns.
    emitted: AtomicU64,
    sink: EventSink,
}

impl ProgressTracker {
    pub fn new(slots: usize, total: u64, sink: EventSink) -> Arc<Self> {
        Arc::new(Self {
            total,
            slots: (0..slots).map(|_| AtomicU64::new(0)).collect(),
            emitted: AtomicU64::new(0f64.to_bits()),
            sink,
        })
    }

    /// Set the bytes transferred for one slot and emit progress if it grew
    pub fn update(&self, slot: usize, bytes: u64) {
        if let Some(s) = self.slots.get(slot) {
            s.store(bytes, Ordering::Relaxed);
        }
        self.emit();
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let done: u64 = self.slots.iter().map(|s| s.load(Ordering::Relaxed)).sum();
        (done as f64 / self.total as f64).min(1.0)
    }

    fn emit(&self) {
        let fraction = self.fraction();
        let previous = self.emitted.fetch_max(fraction.to_bits(), Ordering::AcqRel);
        if fraction.to_bits() > previous {
            self.sink.emit(TransferEvent::Progress(fraction));
        }
    }
}
