//! Agent Flow Integration Tests
//!
//! Whole Works driven through `SessionController` with a scripted model and a
//! recording `createFile` tool:
//! - a streamed action runs exactly once and its result is persisted
//! - actions run one at a time in emission order
//! - the recovery reparse completes mismatched tags without re-running
//!   actions already dispatched while streaming
//! - duplicate runs are rejected until the running Work finishes
//! - cancellation drains queued actions and stops the loop

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use autoprovider::models::config::{AgentConfig, ContextConfig, PushConfig};
use autoprovider::services::agent::prompts::TERMINATED_BY_USER;
use autoprovider::services::agent::{AgentRuntime, SYSTEM_SENDER};
use autoprovider::services::context::ContextAssembler;
use autoprovider::services::core::{HistoryCompressor, UnavailableSummarizer};
use autoprovider::services::fallback::ModelFallbackChain;
use autoprovider::services::session::{
    ChatRequest, PushRegistry, SessionController, WorkRegistry, CANCELLED_REASON,
};
use autoprovider::services::store::{DialogueStore, InMemoryDialogueStore};
use autoprovider::AppError;
use autoprovider_core::{
    DialogueRole, PushFrame, SessionContext, Tool, ToolOutcome, ToolRegistry, UnifiedStreamEvent,
};
use autoprovider_llm::{
    ChatMessage, LlmError, LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, ModelConfig,
    StopReason, UsageStats,
};
use autoprovider_tools::PathNormalizer;

// ============================================================================
// Helpers
// ============================================================================

/// One scripted model answer.
#[derive(Clone, Default)]
struct Script {
    deltas: Vec<String>,
    /// Wait after the deltas before answering
    delay: Duration,
}

impl Script {
    fn text(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Model that plays back scripts in order, then answers "All done."
struct ScriptedModel {
    config: ModelConfig,
    scripts: Mutex<VecDeque<Script>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            config: ModelConfig {
                label: "scripted".to_string(),
                model: "scripted".to_string(),
                ..Default::default()
            },
            scripts: Mutex::new(scripts.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompt(&self, call: usize) -> Vec<ChatMessage> {
        self.prompts.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn config(&self) -> &ModelConfig {
        &self.config
    }

    async fn send_message(&self, _messages: Vec<ChatMessage>, _opts: LlmRequestOptions) -> LlmResult<LlmResponse> {
        Err(LlmError::Other {
            message: "not scripted".into(),
        })
    }

    async fn stream_message(
        &self,
        messages: Vec<ChatMessage>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        _opts: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        self.prompts.lock().unwrap().push(messages);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::text(&["All done."]));

        for delta in &script.deltas {
            let _ = tx
                .send(UnifiedStreamEvent::TextDelta {
                    content: delta.clone(),
                })
                .await;
        }
        tokio::time::sleep(script.delay).await;

        Ok(LlmResponse {
            content: Some(script.deltas.concat()),
            thinking: None,
            stop_reason: StopReason::EndTurn,
            usage: Some(UsageStats::new(10, 5)),
            model: self.config.model.clone(),
        })
    }
}

/// `createFile` stand-in recording the file names it was called with.
struct RecordingTool {
    delay: Duration,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingTool {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        "createFile"
    }

    async fn execute(&self, params: Value, _ctx: &SessionContext) -> ToolOutcome {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let file = params["fileName"].as_str().unwrap_or_default().to_string();
        tokio::time::sleep(self.delay).await;
        self.calls.lock().unwrap().push(file.clone());

        self.active.fetch_sub(1, Ordering::SeqCst);
        ToolOutcome::success(format!("created {}", file), Value::Null)
    }
}

struct Harness {
    store: InMemoryDialogueStore,
    controller: SessionController,
    model: Arc<ScriptedModel>,
    tool: Arc<RecordingTool>,
}

fn harness(scripts: Vec<Script>, tool_delay: Duration) -> Harness {
    let store = InMemoryDialogueStore::new();
    let shared: Arc<dyn DialogueStore> = Arc::new(store.clone());
    let config = AgentConfig {
        loop_delay_ms: 0,
        marker_tag: "work".to_string(),
        ..AgentConfig::default()
    };

    let compressor = HistoryCompressor::new(Arc::new(UnavailableSummarizer), shared.clone(), ContextConfig::default());
    let assembler = ContextAssembler::new(shared.clone(), Arc::new(compressor), ContextConfig::default(), "");

    let model = Arc::new(ScriptedModel::new(scripts));
    let providers: Vec<Arc<dyn LlmProvider>> = vec![model.clone() as Arc<dyn LlmProvider>];
    let chain = ModelFallbackChain::new(providers, config.call_timeout());

    let tool = Arc::new(RecordingTool::new(tool_delay));
    let mut tools = ToolRegistry::new();
    tools.register(tool.clone());

    let runtime = AgentRuntime::new(
        shared,
        Arc::new(assembler),
        Arc::new(chain),
        Arc::new(tools),
        Arc::new(PushRegistry::new(PushConfig::default())),
        Arc::new(WorkRegistry::new()),
        config,
    )
    .with_normalizer(PathNormalizer::disabled());

    Harness {
        store,
        controller: SessionController::new(Arc::new(runtime)),
        model,
        tool,
    }
}

fn request(prompt: &str) -> ChatRequest {
    ChatRequest {
        session_id: "s1".into(),
        project_id: "p1".into(),
        prompt: prompt.into(),
        client_id: Some("c1".into()),
    }
}

/// Every frame until the stream is closed.
async fn collect(mut frames: mpsc::UnboundedReceiver<PushFrame>) -> Vec<PushFrame> {
    tokio::time::timeout(Duration::from_secs(10), async move {
        let mut out = Vec::new();
        while let Some(frame) = frames.recv().await {
            out.push(frame);
        }
        out
    })
    .await
    .expect("stream was not closed")
}

async fn wait_until_idle(controller: &SessionController) {
    for _ in 0..200 {
        if controller.running_works() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("work still registered");
}

fn close_reason(frames: &[PushFrame]) -> String {
    frames
        .iter()
        .rev()
        .find(|f| f.event_name() == Some("close"))
        .and_then(|f| f.data())
        .map(str::to_string)
        .unwrap_or_default()
}

fn create_file(name: &str) -> String {
    format!("<CREATE-FILE><FILE-NAME>{}</FILE-NAME></CREATE-FILE>", name)
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_streamed_action_runs_once_and_persists() {
    let h = harness(
        vec![Script::text(&[
            "I'll create it.\n<work><CREATE-",
            "FILE><FILE-NAME>/a",
            ".txt</FILE-NAME></CREATE-FILE></work>",
        ])],
        Duration::ZERO,
    );

    let stream = h.controller.start_chat(request("create a.txt")).await.unwrap();
    let work_id = stream.work_id.clone();
    let frames = collect(stream.frames).await;

    assert_eq!(h.tool.calls(), vec!["/a.txt".to_string()]);
    assert!(frames
        .iter()
        .any(|f| f.data() == Some("<create>/a.txt</create>")));
    assert!(close_reason(&frames).contains("completed"));

    // tool round plus the closing answer
    assert_eq!(h.model.calls(), 2);
    assert!(h.model.prompt(1).iter().any(|m| m.role == DialogueRole::Tool));

    let messages = h.store.session_messages("s1").await;
    let roles: Vec<DialogueRole> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            DialogueRole::User,
            DialogueRole::Assistant,
            DialogueRole::Tool,
            DialogueRole::User,
            DialogueRole::Assistant,
        ]
    );
    assert_eq!(messages[1].tool_calls.len(), 1);
    assert_eq!(messages[1].tool_calls[0].name, "createFile");
    assert_eq!(messages[2].tool_call_id.as_deref(), Some(messages[1].tool_calls[0].id.as_str()));
    assert!(messages[2].content.contains("created /a.txt"));
    assert_eq!(messages[3].sender.as_deref(), Some(SYSTEM_SENDER));
    assert_eq!(messages[4].content, "All done.");

    let operations = h.store.operations_for(&messages[1].id).await.unwrap();
    let methods: Vec<&str> = operations.iter().map(|o| o.method.as_str()).collect();
    assert_eq!(methods, vec!["words", "createFile"]);
    assert_eq!(operations[1].status, Some(ToolOutcome::SUCCESS));

    let usage = h.store.usage_for(&work_id).await.unwrap();
    assert_eq!((usage.input_tokens, usage.output_tokens), (20, 10));
    assert_eq!(h.controller.running_works(), 0);
}

#[tokio::test]
async fn test_actions_run_in_emission_order() {
    let block = format!(
        "<work>{}{}{}</work>",
        create_file("/1.txt"),
        create_file("/2.txt"),
        create_file("/3.txt")
    );
    let h = harness(vec![Script::text(&[block.as_str()])], Duration::from_millis(20));

    let stream = h.controller.start_chat(request("create three files")).await.unwrap();
    collect(stream.frames).await;

    assert_eq!(h.tool.calls(), vec!["/1.txt", "/2.txt", "/3.txt"]);
    assert_eq!(h.tool.max_active.load(Ordering::SeqCst), 1);

    let results: Vec<String> = h
        .store
        .session_messages("s1")
        .await
        .into_iter()
        .filter(|m| m.role == DialogueRole::Tool)
        .map(|m| m.content)
        .collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].contains("/1.txt"));
    assert!(results[2].contains("/3.txt"));
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn test_mismatched_tags_are_completed() {
    let h = harness(
        vec![Script::text(&[
            "<work><CREATE-FILE><FILE-NAME>/b.txt</CREATE-FILE></FILE-NAME></work>",
        ])],
        Duration::ZERO,
    );

    let stream = h.controller.start_chat(request("create b.txt")).await.unwrap();
    collect(stream.frames).await;

    assert_eq!(h.tool.calls(), vec!["/b.txt".to_string()]);
    let messages = h.store.session_messages("s1").await;
    assert!(messages[1]
        .content
        .contains("/b.txt</FILE-NAME></CREATE-FILE>"));
}

#[tokio::test]
async fn test_reparse_does_not_rerun_streamed_actions() {
    let h = harness(
        vec![Script::text(&[
            "<work>",
            create_file("/ok.txt").as_str(),
            "<CREATE-FILE><FILE-NAME>/fix.txt</CREATE-FILE></FILE-NAME></work>",
        ])],
        Duration::ZERO,
    );

    let stream = h.controller.start_chat(request("create two files")).await.unwrap();
    collect(stream.frames).await;

    assert_eq!(h.tool.calls(), vec!["/ok.txt", "/fix.txt"]);
}

#[tokio::test]
async fn test_repair_does_not_rerun_action_with_changed_parameters() {
    let h = harness(
        vec![Script::text(&[
            "<work><CREATE-FILE><FILE-NAME>/a.txt</CREATE-FILE>",
            "x</FILE-NAME></CREATE-FILE></work>",
        ])],
        Duration::ZERO,
    );

    let stream = h.controller.start_chat(request("create a file")).await.unwrap();
    collect(stream.frames).await;

    // the streamed parse already ran it; the repaired reparse reads "/a.txt"
    assert_eq!(h.tool.calls(), vec!["/a.txtx"]);
}

// ============================================================================
// Run Guard
// ============================================================================

#[tokio::test]
async fn test_duplicate_run_rejected_until_finished() {
    let h = harness(
        vec![Script::text(&["working on it"]).delayed(Duration::from_millis(200))],
        Duration::ZERO,
    );

    let first = h.controller.start_chat(request("one")).await.unwrap();
    let err = h.controller.start_chat(request("two")).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let frames = collect(first.frames).await;
    assert!(close_reason(&frames).contains("completed"));
    wait_until_idle(&h.controller).await;

    let third = h.controller.start_chat(request("three")).await.unwrap();
    assert_ne!(third.work_id, first.work_id);
    collect(third.frames).await;
    assert_eq!(h.model.calls(), 2);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_drains_queued_actions() {
    let block = format!("<work>{}{}", create_file("/c1.txt"), create_file("/c2.txt"));
    let h = harness(
        vec![Script::text(&[block.as_str()]).delayed(Duration::from_secs(3600))],
        Duration::from_millis(100),
    );

    let mut stream = h.controller.start_chat(request("create files")).await.unwrap();
    loop {
        let frame = stream.frames.recv().await.expect("stream closed early");
        if frame.data() == Some("<create>/c1.txt</create>") {
            break;
        }
    }
    assert!(h.controller.cancel("s1").await.unwrap());

    let rest = collect(stream.frames).await;
    assert!(close_reason(&rest).contains(CANCELLED_REASON));
    wait_until_idle(&h.controller).await;

    assert_eq!(h.tool.calls(), vec!["/c1.txt", "/c2.txt"]);
    assert_eq!(h.model.calls(), 1);

    let messages = h.store.session_messages("s1").await;
    assert!(messages
        .iter()
        .any(|m| m.role == DialogueRole::Assistant && m.content == TERMINATED_BY_USER));
    assert_eq!(
        messages.iter().filter(|m| m.role == DialogueRole::Tool).count(),
        2
    );
}
