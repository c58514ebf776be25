//! Action Dispatch Lane
//!
//! One lane per Work. Actions are appended to an unbounded queue in emission
//! order and a single drainer task executes them one at a time against the
//! `ToolRegistry`, so tool side effects happen in the order their closing
//! tags appeared in the stream.
//!
//! The lane outlives individual model rounds: the parser's stream generation
//! keeps identities from different rounds apart, while a reparse of the same
//! round reproduces the opening-tag positions the lane has already accepted.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use autoprovider_core::{OperationRecord, SessionContext, StopFlag, ToolOutcome, ToolRegistry};

use crate::executor::PathNormalizer;
use crate::tag_parser::{Action, ActionIdentity};

/// Callbacks fired by the drainer around each tool invocation.
pub trait LaneObserver: Send + Sync {
    fn on_start(&self, _action: &Action, _index: usize) {}

    fn on_complete(&self, _action: &Action, _outcome: &ToolOutcome, _index: usize) {}
}

/// Result of `DispatchLane::enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// Same identity already accepted by this lane.
    Duplicate,
    /// The Work has been cancelled; nothing new is accepted.
    Stopped,
}

/// An executed action together with its tool outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchedAction {
    pub action: Action,
    pub outcome: ToolOutcome,
    /// Dispatch order within the lane
    pub index: usize,
}

/// Everything the lane did, returned by `finish`.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub executed: Vec<DispatchedAction>,
    pub operations: Vec<OperationRecord>,
}

enum LaneMessage {
    Run(usize, Action),
    Flush(oneshot::Sender<Vec<DispatchedAction>>),
}

type SharedOperations = Arc<Mutex<Vec<OperationRecord>>>;

fn lock_operations(operations: &SharedOperations) -> std::sync::MutexGuard<'_, Vec<OperationRecord>> {
    operations.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serialized per-Work execution lane.
pub struct DispatchLane {
    tx: mpsc::UnboundedSender<LaneMessage>,
    drainer: JoinHandle<Vec<DispatchedAction>>,
    seen: HashSet<ActionIdentity>,
    operations: SharedOperations,
    stop: StopFlag,
    normalizer: PathNormalizer,
    next_index: usize,
}

impl DispatchLane {
    /// Spawn the drainer task. Must be called inside a tokio runtime.
    pub fn spawn(
        registry: Arc<ToolRegistry>,
        ctx: SessionContext,
        stop: StopFlag,
        normalizer: PathNormalizer,
        observer: Option<Arc<dyn LaneObserver>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let operations: SharedOperations = Arc::new(Mutex::new(Vec::new()));
        let drainer = tokio::spawn(drain(rx, registry, ctx, observer, operations.clone()));

        Self {
            tx,
            drainer,
            seen: HashSet::new(),
            operations,
            stop,
            normalizer,
            next_index: 0,
        }
    }

    /// Queue an action behind everything already queued. Never waits for
    /// execution.
    pub fn enqueue(&mut self, action: Action) -> EnqueueOutcome {
        if self.stop.is_stopped() {
            tracing::debug!("[DispatchLane] work stopped, dropping {}", action.name);
            return EnqueueOutcome::Stopped;
        }
        if !self.seen.insert(action.identity()) {
            tracing::debug!(
                "[DispatchLane] duplicate {} at {} skipped",
                action.name,
                action.origin
            );
            return EnqueueOutcome::Duplicate;
        }

        let mut action = action;
        action.parameters = self
            .normalizer
            .normalize_parameters(&action.name, std::mem::take(&mut action.parameters));

        let index = self.next_index;
        self.next_index += 1;

        let mut code = serde_json::Map::new();
        code.insert(action.name.clone(), action.parameters.clone());
        lock_operations(&self.operations).push(OperationRecord {
            method: action.name.clone(),
            code: serde_json::Value::Object(code).to_string(),
            status: None,
            index,
        });

        if self.tx.send(LaneMessage::Run(index, action)).is_err() {
            tracing::error!("[DispatchLane] drainer gone, action {} not executed", index);
            return EnqueueOutcome::Stopped;
        }
        EnqueueOutcome::Enqueued
    }

    /// Wait until everything queued so far has run and return the results
    /// produced since the previous flush.
    pub async fn flush(&self) -> Vec<DispatchedAction> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(LaneMessage::Flush(reply_tx)).is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Snapshot of operation records appended so far.
    pub fn pending_operations(&self) -> Vec<OperationRecord> {
        lock_operations(&self.operations).clone()
    }

    /// Remove and return the operation records appended so far.
    pub fn take_operations(&self) -> Vec<OperationRecord> {
        std::mem::take(&mut *lock_operations(&self.operations))
    }

    /// Number of actions accepted by the lane.
    pub fn accepted(&self) -> usize {
        self.next_index
    }

    /// Close the queue, wait for the drainer and report everything executed.
    pub async fn finish(self) -> DispatchReport {
        drop(self.tx);
        let executed = match self.drainer.await {
            Ok(executed) => executed,
            Err(e) => {
                tracing::error!("[DispatchLane] drainer task failed: {}", e);
                Vec::new()
            }
        };
        let operations = std::mem::take(&mut *lock_operations(&self.operations));
        DispatchReport {
            executed,
            operations,
        }
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<LaneMessage>,
    registry: Arc<ToolRegistry>,
    ctx: SessionContext,
    observer: Option<Arc<dyn LaneObserver>>,
    operations: SharedOperations,
) -> Vec<DispatchedAction> {
    let mut executed: Vec<DispatchedAction> = Vec::new();
    let mut flushed = 0;

    while let Some(message) = rx.recv().await {
        match message {
            LaneMessage::Run(index, action) => {
                if let Some(observer) = &observer {
                    observer.on_start(&action, index);
                }
                tracing::info!(
                    session_id = %ctx.session_id,
                    work_id = %ctx.work_id,
                    "[DispatchLane] executing #{} {}",
                    index,
                    action.name
                );

                let outcome = registry
                    .execute(&action.name, action.parameters.clone(), &ctx)
                    .await;
                if !outcome.is_success() {
                    tracing::warn!(
                        session_id = %ctx.session_id,
                        "[DispatchLane] #{} {} failed: {}",
                        index,
                        action.name,
                        outcome.message
                    );
                }

                if let Some(record) = lock_operations(&operations)
                    .iter_mut()
                    .find(|record| record.index == index)
                {
                    record.status = Some(outcome.status);
                }
                if let Some(observer) = &observer {
                    observer.on_complete(&action, &outcome, index);
                }
                executed.push(DispatchedAction {
                    action,
                    outcome,
                    index,
                });
            }
            LaneMessage::Flush(reply) => {
                let _ = reply.send(executed[flushed..].to_vec());
                flushed = executed.len();
            }
        }
    }

    executed
}
