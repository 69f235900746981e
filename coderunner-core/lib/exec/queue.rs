//! Admission queue: FIFO dispatch under the global concurrency cap.
//!
//! A single owner task holds the pending queue and the in-flight counter;
//! admit, dispatch, and completion all arrive as messages, so no worker ever
//! shares mutable queue state. `enqueue` never blocks its caller —
//! backpressure is simply the time a task spends admitted. Completion is
//! signalled by a drop guard, so a slot is returned even when a task panics.

use std::collections::VecDeque;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::{CoderunnerError, CoderunnerResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A unit of admitted work, run to completion once dispatched.
pub type AdmittedTask = BoxFuture<'static, ()>;

enum QueueMessage {
    Enqueue(AdmittedTask),
    Complete,
}

/// Handle to the admission queue owner task.
#[derive(Clone)]
pub struct AdmissionQueue {
    tx: mpsc::UnboundedSender<QueueMessage>,
}

/// Returns the slot when the task finishes, panics included.
struct CompletionGuard {
    tx: mpsc::UnboundedSender<QueueMessage>,
}

//--------------------------------------------------------------------------------------------------
// Implementations
//--------------------------------------------------------------------------------------------------

impl AdmissionQueue {
    /// Spawn the queue owner with the given concurrency cap.
    pub fn new(max_concurrent: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_queue(max_concurrent, rx, tx.clone()));

        Self { tx }
    }

    /// Append a task in FIFO order; never blocks.
    pub fn enqueue(&self, task: AdmittedTask) -> CoderunnerResult<()> {
        self.tx
            .send(QueueMessage::Enqueue(task))
            .map_err(|_| CoderunnerError::QueueClosed)
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(QueueMessage::Complete);
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn run_queue(
    max_concurrent: usize,
    mut rx: mpsc::UnboundedReceiver<QueueMessage>,
    tx: mpsc::UnboundedSender<QueueMessage>,
) {
    let mut pending: VecDeque<AdmittedTask> = VecDeque::new();
    let mut in_flight = 0usize;

    while let Some(message) = rx.recv().await {
        match message {
            QueueMessage::Enqueue(task) => pending.push_back(task),
            QueueMessage::Complete => in_flight = in_flight.saturating_sub(1),
        }

        while in_flight < max_concurrent {
            let Some(task) = pending.pop_front() else {
                break;
            };
            in_flight += 1;

            let guard = CompletionGuard { tx: tx.clone() };
            tokio::spawn(async move {
                let _guard = guard;
                task.await;
            });
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
