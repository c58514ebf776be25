//! Agent Work Loop
//!
//! One Work is a sequence of model rounds started by a single chat request.
//! Each round assembles the prompt, streams the answer through the fallback
//! chain, dispatches the actions it contains and persists the result. The
//! loop continues while tools ran or todos stay open, and ends on
//! cancellation, timeout, the round limit or a fatal error.
//!
//! The Work runs inside the request-context scope set up by the session
//! controller and always tears itself down: the stream of the connection it
//! is bound to is closed with the exit reason and the registry entry is
//! removed by work id.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use autoprovider_core::{
    DialogueMessage, DialogueRole, OperationRecord, PushFrame, SessionContext, ToolCallDescriptor,
    ToolRegistry,
};
use autoprovider_llm::{ChatMessage, UsageStats, DEFAULT_TOKEN_LIMIT};
use autoprovider_tools::{
    format_tool_results, DispatchLane, DispatchedAction, LaneObserver, PathNormalizer,
    TagStreamParser, TagVocabulary,
};

use super::echo::WorkSink;
use super::prompts::ContinuationReason;
use super::round::{RoundStream, RoundTranscript};
use crate::models::config::AgentConfig;
use crate::services::context::ContextAssembler;
use crate::services::fallback::{FallbackError, ModelFallbackChain};
use crate::services::session::{current, PushRegistry, RequestContext, WorkHandle, WorkRegistry};
use crate::services::store::DialogueStore;
use crate::utils::error::AppResult;

/// Usage recorded when the provider reports none.
const FALLBACK_USAGE: UsageStats = UsageStats {
    input_tokens: 7000,
    output_tokens: 4000,
};

/// Capacity of the channel between the fallback chain and the round stream.
const STREAM_CAPACITY: usize = 256;

/// Sender recorded on continuation prompts written by the loop itself.
pub const SYSTEM_SENDER: &str = "system";

/// How a Work ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkExit {
    Completed,
    Cancelled,
    Failed(String),
}

impl WorkExit {
    /// Close reason sent to the client.
    pub fn reason(&self) -> &'static str {
        match self {
            WorkExit::Completed => "completed",
            WorkExit::Cancelled => "cancelled",
            WorkExit::Failed(_) => "failed",
        }
    }
}

/// How one round ended.
#[derive(Debug)]
enum RoundEnd {
    Continue(ContinuationReason),
    Done,
    Cancelled,
    /// Every model failed; the message is reported to the client
    ModelFailed(String),
}

/// Shared collaborators of every Work.
pub struct AgentRuntime {
    store: Arc<dyn DialogueStore>,
    assembler: Arc<ContextAssembler>,
    chain: Arc<ModelFallbackChain>,
    tools: Arc<ToolRegistry>,
    push: Arc<PushRegistry>,
    works: Arc<WorkRegistry>,
    config: AgentConfig,
    vocabulary: TagVocabulary,
    normalizer: PathNormalizer,
}

impl AgentRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DialogueStore>,
        assembler: Arc<ContextAssembler>,
        chain: Arc<ModelFallbackChain>,
        tools: Arc<ToolRegistry>,
        push: Arc<PushRegistry>,
        works: Arc<WorkRegistry>,
        config: AgentConfig,
    ) -> Self {
        let vocabulary = TagVocabulary::default().with_marker(&config.marker_tag);
        let normalizer = PathNormalizer::new(&config.path_root);
        Self {
            store,
            assembler,
            chain,
            tools,
            push,
            works,
            config,
            vocabulary,
            normalizer,
        }
    }

    /// Replace the path normalizer used by new Works.
    pub fn with_normalizer(mut self, normalizer: PathNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn store(&self) -> &Arc<dyn DialogueStore> {
        &self.store
    }

    pub fn push(&self) -> &Arc<PushRegistry> {
        &self.push
    }

    pub fn works(&self) -> &Arc<WorkRegistry> {
        &self.works
    }

    /// Run a Work to completion. Must be called inside a request scope.
    pub async fn run(&self, handle: WorkHandle, prompt: String) -> WorkExit {
        let Some(ctx) = current() else {
            tracing::error!(work_id = %handle.work_id, "[AgentWork] started outside a request scope");
            self.push
                .disconnect_connection(&handle.client_id, handle.connection, "failed");
            return WorkExit::Failed("missing request context".to_string());
        };

        let sink = WorkSink::new(self.push.clone(), self.works.clone(), &ctx.session_id, &handle);
        tracing::info!(
            session_id = %ctx.session_id,
            work_id = %ctx.work_id,
            client_id = %ctx.client_id,
            "[AgentWork] started"
        );

        let work_timeout = self.config.work_timeout();
        let exit = match tokio::time::timeout(work_timeout, self.drive(&ctx, &handle, &sink, prompt)).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => {
                tracing::error!(work_id = %ctx.work_id, "[AgentWork] failed: {}", e);
                sink.send(PushFrame::error(&e.to_string()));
                WorkExit::Failed(e.to_string())
            }
            Err(_) => {
                tracing::warn!(work_id = %ctx.work_id, "[AgentWork] timed out after {:?}", work_timeout);
                handle.cancel();
                sink.send(PushFrame::error("task timed out"));
                WorkExit::Failed("task timed out".to_string())
            }
        };

        sink.disconnect(exit.reason());
        self.works.remove_work(&ctx.session_id, &ctx.work_id);
        tracing::info!(
            session_id = %ctx.session_id,
            work_id = %ctx.work_id,
            exit = exit.reason(),
            "[AgentWork] finished"
        );
        exit
    }

    async fn drive(
        &self,
        ctx: &RequestContext,
        handle: &WorkHandle,
        sink: &WorkSink,
        prompt: String,
    ) -> AppResult<WorkExit> {
        self.store.create_work(&ctx.session_id, &ctx.work_id).await?;

        let session_ctx = ctx.session_context();
        let observer: Arc<dyn LaneObserver> = Arc::new(sink.clone());
        let mut lane = DispatchLane::spawn(
            self.tools.clone(),
            session_ctx.clone(),
            handle.stop.clone(),
            self.normalizer.clone(),
            Some(observer),
        );
        let mut parser = TagStreamParser::new(self.vocabulary.clone());

        let mut next = Some(DialogueMessage::user(prompt));
        let mut rounds = 0usize;
        let exit = loop {
            let Some(message) = next.take() else {
                break WorkExit::Completed;
            };
            if handle.stop.is_stopped() {
                break WorkExit::Cancelled;
            }
            if rounds >= self.config.max_rounds {
                tracing::warn!(work_id = %ctx.work_id, rounds, "[AgentWork] round limit reached");
                break WorkExit::Completed;
            }
            if !self.pause(handle, self.config.loop_delay()).await {
                break WorkExit::Cancelled;
            }
            rounds += 1;

            let end = self
                .round(&session_ctx, handle, sink, message, &mut parser, &mut lane)
                .await;
            match end {
                Ok(RoundEnd::Continue(reason)) => {
                    tracing::debug!(work_id = %ctx.work_id, ?reason, "[AgentWork] continuing");
                    next = Some(DialogueMessage::user(reason.prompt()).with_sender(SYSTEM_SENDER));
                }
                Ok(RoundEnd::Done) => break WorkExit::Completed,
                Ok(RoundEnd::Cancelled) => break WorkExit::Cancelled,
                Ok(RoundEnd::ModelFailed(message)) => {
                    sink.send(PushFrame::error(&message));
                    break WorkExit::Failed(message);
                }
                Err(e) => {
                    lane.finish().await;
                    return Err(e);
                }
            }
        };

        let leftover = lane.finish().await;
        if !leftover.executed.is_empty() {
            tracing::debug!(
                work_id = %ctx.work_id,
                count = leftover.executed.len(),
                "[AgentWork] actions drained after the last round"
            );
        }
        Ok(exit)
    }

    /// Sleep before a round; false when the Work was cancelled meanwhile.
    async fn pause(&self, handle: &WorkHandle, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = handle.abort.cancelled() => false,
            _ = tokio::time::sleep(delay) => !handle.stop.is_stopped(),
        }
    }

    async fn round(
        &self,
        ctx: &SessionContext,
        handle: &WorkHandle,
        sink: &WorkSink,
        message: DialogueMessage,
        parser: &mut TagStreamParser,
        lane: &mut DispatchLane,
    ) -> AppResult<RoundEnd> {
        let token_limit = self
            .chain
            .primary()
            .map(|p| p.context_window())
            .unwrap_or(DEFAULT_TOKEN_LIMIT);
        let prompt = self
            .assembler
            .assemble(ctx, &ChatMessage::user(message.content.clone()), token_limit)
            .await?;
        if prompt.compression.did_compress() {
            tracing::info!(
                work_id = %ctx.work_id,
                before = prompt.compression.tokens_before,
                after = prompt.compression.tokens_after,
                "[AgentWork] history compressed"
            );
        }

        let index = self.store.next_index(&ctx.work_id).await?;
        self.store
            .append_message(message.in_work(&ctx.session_id, &ctx.work_id).with_index(index))
            .await?;

        let (tx, mut rx) = mpsc::channel(STREAM_CAPACITY);
        let mut stream = RoundStream::new(parser, lane, sink);
        let call = self.chain.stream(prompt.messages, tx, &handle.abort);
        let consume = async {
            while let Some(event) = rx.recv().await {
                stream.handle(event);
            }
        };
        let (result, ()) = tokio::join!(call, consume);

        let failure = match &result {
            Ok((response, log)) => {
                tracing::debug!(
                    work_id = %ctx.work_id,
                    model = ?log.successful_model,
                    attempts = log.attempts.len(),
                    "[AgentWork] model answered"
                );
                stream.absorb_response(response.content.as_deref(), response.thinking.as_deref());
                None
            }
            Err(e) => Some(e),
        };
        let mut transcript = stream.finish();
        if transcript.usage.is_none() {
            transcript.usage = result.as_ref().ok().and_then(|(response, _)| response.usage);
        }

        let executed = lane.flush().await;
        let operations = lane.take_operations();

        match failure {
            None => {}
            Some(FallbackError::Cancelled) => {
                if !executed.is_empty() {
                    self.persist(ctx, &transcript, executed, operations).await?;
                }
                return Ok(RoundEnd::Cancelled);
            }
            Some(e) => {
                if !executed.is_empty() {
                    self.persist(ctx, &transcript, executed, operations).await?;
                }
                return Ok(RoundEnd::ModelFailed(e.to_string()));
            }
        }

        let ran_tools = !executed.is_empty();
        self.persist(ctx, &transcript, executed, operations).await?;
        self.store
            .record_usage(&ctx.work_id, transcript.usage.unwrap_or(FALLBACK_USAGE))
            .await?;

        if handle.stop.is_stopped() {
            return Ok(RoundEnd::Cancelled);
        }
        if ran_tools {
            return Ok(RoundEnd::Continue(ContinuationReason::ToolResults));
        }
        if self.store.has_pending_todos(&ctx.session_id).await? {
            return Ok(RoundEnd::Continue(ContinuationReason::PendingTodos));
        }
        Ok(RoundEnd::Done)
    }

    /// Store the assistant message, its operation records and one tool
    /// message per executed action.
    async fn persist(
        &self,
        ctx: &SessionContext,
        transcript: &RoundTranscript,
        executed: Vec<DispatchedAction>,
        operations: Vec<OperationRecord>,
    ) -> AppResult<()> {
        let call_ids: Vec<String> = executed.iter().map(|_| Uuid::new_v4().to_string()).collect();
        let calls = executed
            .iter()
            .zip(&call_ids)
            .map(|(done, id)| ToolCallDescriptor::new(id, &done.action.name, done.action.parameters.to_string()))
            .collect();

        let mut index = self.store.next_index(&ctx.work_id).await?;
        let assistant = self
            .store
            .append_message(
                DialogueMessage::new(DialogueRole::Assistant, transcript.content.clone())
                    .with_tool_calls(calls)
                    .in_work(&ctx.session_id, &ctx.work_id)
                    .with_index(index),
            )
            .await?;

        let records = message_records(transcript, operations, &executed);
        if !records.is_empty() {
            self.store.record_operations(&assistant.id, records).await?;
        }

        for (done, id) in executed.iter().zip(call_ids) {
            index += 1;
            let content = format_tool_results(std::slice::from_ref(done));
            self.store
                .append_message(
                    DialogueMessage::tool(id, content)
                        .in_work(&ctx.session_id, &ctx.work_id)
                        .with_index(index),
                )
                .await?;
        }
        tracing::debug!(
            work_id = %ctx.work_id,
            message_id = %assistant.id,
            actions = executed.len(),
            recovered = transcript.recovered,
            "[AgentWork] round persisted"
        );
        Ok(())
    }
}

/// Operation records of one assistant message: reasoning, words, then the
/// dispatched actions with their final status, numbered in that order.
fn message_records(
    transcript: &RoundTranscript,
    operations: Vec<OperationRecord>,
    executed: &[DispatchedAction],
) -> Vec<OperationRecord> {
    let mut records = Vec::with_capacity(operations.len() + 2);
    if !transcript.reasoning.is_empty() {
        records.push(OperationRecord {
            method: "reasoning".to_string(),
            code: format!("<through>{}</through>", transcript.reasoning),
            status: None,
            index: 0,
        });
    }
    if !transcript.content.is_empty() {
        records.push(OperationRecord {
            method: "words".to_string(),
            code: format!("<words>{}</words>", transcript.content),
            status: None,
            index: 0,
        });
    }
    for mut record in operations {
        if record.status.is_none() {
            record.status = executed
                .iter()
                .find(|done| done.index == record.index)
                .map(|done| done.outcome.status);
        }
        records.push(record);
    }
    for (position, record) in records.iter_mut().enumerate() {
        record.index = position;
    }
    records
}
