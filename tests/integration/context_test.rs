//! Context Assembly Integration Tests
//!
//! Prompt assembly over a stored history:
//! - an oversized history is summarized until it fits the budget, and the
//!   summary pair replaces the compressed rows in the store
//! - broken tool-call pairs in stored history are repaired before sending

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use autoprovider::models::config::ContextConfig;
use autoprovider::services::agent::prompts::SUMMARY_PREFIX;
use autoprovider::services::context::ContextAssembler;
use autoprovider::services::core::pairing::ORPHAN_RESULT_PREFIX;
use autoprovider::services::core::{HistoryCompressor, Summarizer};
use autoprovider::services::store::{DialogueStore, InMemoryDialogueStore};
use autoprovider::AppResult;
use autoprovider_core::{DialogueMessage, DialogueRole, SessionContext, ToolCallDescriptor};
use autoprovider_llm::ChatMessage;

// ============================================================================
// Helpers
// ============================================================================

struct FixedSummarizer {
    calls: AtomicUsize,
}

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(&self, _transcript: &str) -> AppResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(r#"{"userSummary":"asked for pages","assistantSummary":"built the pages"}"#.to_string())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

fn assembler(store: &InMemoryDialogueStore, summarizer: Arc<FixedSummarizer>) -> ContextAssembler {
    let shared: Arc<dyn DialogueStore> = Arc::new(store.clone());
    let compressor = HistoryCompressor::new(summarizer, shared.clone(), ContextConfig::default());
    ContextAssembler::new(shared, Arc::new(compressor), ContextConfig::default(), "")
}

async fn append(store: &InMemoryDialogueStore, work_id: &str, message: DialogueMessage) -> DialogueMessage {
    let index = store.next_index(work_id).await.unwrap();
    store
        .append_message(message.in_work("s1", work_id).with_index(index))
        .await
        .unwrap()
}

fn ctx() -> SessionContext {
    SessionContext::new("s1", "w-new", "p1")
}

// ============================================================================
// Compression
// ============================================================================

#[tokio::test]
async fn test_oversized_history_converges_under_budget() {
    let store = InMemoryDialogueStore::new();
    store.ensure_session("s1", "p1").await.unwrap();
    store.create_work("s1", "w1").await.unwrap();

    let filler = "a".repeat(400);
    for turn in 0..8 {
        append(&store, "w1", DialogueMessage::user(format!("request {} {}", turn, filler))).await;
        append(&store, "w1", DialogueMessage::assistant(format!("answer {} {}", turn, filler))).await;
    }

    let summarizer = Arc::new(FixedSummarizer {
        calls: AtomicUsize::new(0),
    });
    let assembler = assembler(&store, summarizer.clone());
    let prompt = assembler
        .assemble(&ctx(), &ChatMessage::user("continue"), 1_000)
        .await
        .unwrap();

    let threshold = (prompt.budget.history_budget as f64 * ContextConfig::default().compress_threshold) as usize;
    assert!(prompt.compression.did_compress());
    assert!(prompt.compression.tokens_after <= threshold);
    assert!(prompt.compression.tokens_after < prompt.compression.tokens_before);
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), prompt.compression.iterations);
    // summary turn plus the two newest turns
    assert_eq!(prompt.history_turns, 3);

    let summary_at = prompt
        .messages
        .iter()
        .position(|m| m.role == DialogueRole::User && m.content.starts_with(SUMMARY_PREFIX))
        .expect("summary pair in prompt");
    assert!(prompt.messages[summary_at + 1].content.starts_with(SUMMARY_PREFIX));
    assert_eq!(prompt.messages.last().map(|m| m.content.as_str()), Some("continue"));

    // A second assembly sees only the summary and the uncompressed turns.
    let history = assembler.load_history("s1").await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history[0].is_summary());

    let rows = store.session_messages("s1").await;
    assert_eq!(rows.iter().filter(|m| m.compressed).count(), 12);
}

#[tokio::test]
async fn test_small_history_is_left_alone() {
    let store = InMemoryDialogueStore::new();
    store.ensure_session("s1", "p1").await.unwrap();
    store.create_work("s1", "w1").await.unwrap();
    append(&store, "w1", DialogueMessage::user("hello")).await;
    append(&store, "w1", DialogueMessage::assistant("hi")).await;

    let summarizer = Arc::new(FixedSummarizer {
        calls: AtomicUsize::new(0),
    });
    let prompt = assembler(&store, summarizer.clone())
        .assemble(&ctx(), &ChatMessage::user("next"), 130_000)
        .await
        .unwrap();

    assert!(!prompt.compression.did_compress());
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(prompt.history_turns, 1);
    // preamble is merged into one leading system message
    assert_eq!(prompt.messages[0].role, DialogueRole::System);
    assert_eq!(
        prompt.messages.iter().filter(|m| m.role == DialogueRole::System).count(),
        1
    );
}

// ============================================================================
// Pairing
// ============================================================================

#[tokio::test]
async fn test_unpaired_history_is_repaired() {
    let store = InMemoryDialogueStore::new();
    store.ensure_session("s1", "p1").await.unwrap();
    store.create_work("s1", "w1").await.unwrap();

    // a round interrupted before its tool result was stored
    append(&store, "w1", DialogueMessage::user("create a page")).await;
    append(
        &store,
        "w1",
        DialogueMessage::assistant("").with_tool_calls(vec![ToolCallDescriptor::new(
            "call-1",
            "createFile",
            r#"{"fileName":"/index.html"}"#,
        )]),
    )
    .await;
    // a result whose call was lost
    append(&store, "w1", DialogueMessage::user("and a style sheet")).await;
    append(&store, "w1", DialogueMessage::tool("call-9", "created /style.css")).await;

    let summarizer = Arc::new(FixedSummarizer {
        calls: AtomicUsize::new(0),
    });
    let prompt = assembler(&store, summarizer)
        .assemble(&ctx(), &ChatMessage::user("next"), 130_000)
        .await
        .unwrap();

    assert!(prompt.messages.iter().all(|m| m.tool_calls.is_empty()));
    assert!(prompt.messages.iter().all(|m| m.role != DialogueRole::Tool));
    assert!(prompt
        .messages
        .iter()
        .any(|m| m.role == DialogueRole::Assistant && m.content.starts_with(ORPHAN_RESULT_PREFIX)));
    assert!(prompt
        .messages
        .iter()
        .any(|m| m.role == DialogueRole::Assistant && m.content.contains("createFile")));
}
