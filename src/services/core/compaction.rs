//! History Compression
//!
//! Keeps the loaded dialogue history inside its token budget by replacing
//! older turns with one summary turn produced by a secondary model call.
//!
//! The originals are never deleted: they are flagged `compressed` in the
//! store and the summary pair is written in the same store call, so later
//! assemblies see either the old turns or the summary, never both.
//!
//! Compression is best-effort. Summarizer failures leave the history as it
//! is for this round; the next assembly tries again if still over budget.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use autoprovider_core::{DialogueMessage, DialogueTurn, SUMMARY_ASSISTANT_INDEX, SUMMARY_USER_INDEX};
use autoprovider_llm::{estimate_message_tokens, ChatMessage, LlmProvider, LlmRequestOptions};

use crate::models::config::ContextConfig;
use crate::services::agent::prompts::{COMPRESSION_INSTRUCTION, SUMMARY_PREFIX};
use crate::services::store::{DialogueStore, SummaryPair};
use crate::utils::error::{AppError, AppResult};

/// Fallback text when the summarizer omits the user summary.
const MISSING_USER_SUMMARY: &str = "(user request summary unavailable)";

/// Fallback text when the summarizer omits the assistant summary.
const MISSING_ASSISTANT_SUMMARY: &str = "(assistant reply summary unavailable)";

/// Sender recorded on summary rows.
const SUMMARY_SENDER: &str = "system";

// ============================================================================
// Summarizer
// ============================================================================

/// Produces the raw summary text for a serialized transcript.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `transcript` (a JSON array of turns, oldest first).
    ///
    /// The answer is expected to be a JSON object with `userSummary` and
    /// `assistantSummary` fields.
    async fn summarize(&self, transcript: &str) -> AppResult<String>;

    /// Human-readable name for logs.
    fn name(&self) -> &str;
}

/// Summarizer backed by a chat model in JSON-object mode.
pub struct LlmSummarizer {
    provider: Arc<dyn LlmProvider>,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, transcript: &str) -> AppResult<String> {
        let messages = vec![
            ChatMessage::system(COMPRESSION_INSTRUCTION),
            ChatMessage::user(format!(
                "Compress the following conversation history:\n\n{}",
                transcript
            )),
        ];
        let options = LlmRequestOptions {
            json_response: true,
            ..Default::default()
        };
        let response = self.provider.send_message(messages, options).await?;
        Ok(response.content.unwrap_or_default())
    }

    fn name(&self) -> &str {
        self.provider.model()
    }
}

/// Used when no summarizer model is configured. Every attempt fails, so
/// history is kept uncompressed.
pub struct UnavailableSummarizer;

#[async_trait]
impl Summarizer for UnavailableSummarizer {
    async fn summarize(&self, _transcript: &str) -> AppResult<String> {
        Err(AppError::config("no summarizer model configured"))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// Parsed summarizer answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSummary {
    pub user_summary: String,
    pub assistant_summary: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSummary {
    #[serde(default)]
    user_summary: Option<String>,
    #[serde(default)]
    assistant_summary: Option<String>,
}

/// Parse a summarizer answer. Code fences and text around the object are
/// tolerated; missing or blank fields get placeholder text.
pub fn parse_summary(raw: &str) -> AppResult<ParsedSummary> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &raw[s..=e],
        _ => return Err(AppError::validation("summary is not a JSON object")),
    };
    let parsed: RawSummary = serde_json::from_str(body)?;
    let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    Ok(ParsedSummary {
        user_summary: non_blank(parsed.user_summary).unwrap_or_else(|| MISSING_USER_SUMMARY.to_string()),
        assistant_summary: non_blank(parsed.assistant_summary)
            .unwrap_or_else(|| MISSING_ASSISTANT_SUMMARY.to_string()),
    })
}

// ============================================================================
// HistoryCompressor
// ============================================================================

/// Outcome of one compression pass, with metrics.
#[derive(Debug, Clone)]
pub struct CompressionResult {
    /// Turns after compression, oldest first.
    pub turns: Vec<DialogueTurn>,
    /// Summarization rounds performed.
    pub iterations: usize,
    /// Original turns folded into summaries.
    pub compressed_turns: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

impl CompressionResult {
    pub fn did_compress(&self) -> bool {
        self.compressed_turns > 0
    }
}

/// Token count of a turn list as it would appear in the prompt.
pub fn turn_tokens(turns: &[DialogueTurn]) -> usize {
    let messages: Vec<ChatMessage> = turns
        .iter()
        .flat_map(|t| t.messages.iter().map(ChatMessage::from))
        .collect();
    estimate_message_tokens(&messages)
}

/// Summarizes older turns until the history fits its budget.
pub struct HistoryCompressor {
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn DialogueStore>,
    config: ContextConfig,
}

impl HistoryCompressor {
    pub fn new(summarizer: Arc<dyn Summarizer>, store: Arc<dyn DialogueStore>, config: ContextConfig) -> Self {
        Self {
            summarizer,
            store,
            config,
        }
    }

    /// Token count above which compression starts for `budget`.
    pub fn threshold(&self, budget: u32) -> usize {
        (budget as f64 * self.config.compress_threshold).floor() as usize
    }

    /// Compress `turns` (oldest first) against `budget`.
    ///
    /// `fallback_work_id` receives the summary rows when the compressed turns
    /// carry no Work id of their own.
    pub async fn compress(
        &self,
        turns: Vec<DialogueTurn>,
        budget: u32,
        session_id: &str,
        fallback_work_id: &str,
    ) -> CompressionResult {
        let threshold = self.threshold(budget);
        let tokens_before = turn_tokens(&turns);
        let mut tokens = tokens_before;

        // newest first from here on
        let mut turns: Vec<DialogueTurn> = turns.into_iter().rev().collect();
        let mut iterations = 0;
        let mut compressed_turns = 0;
        let mut last_tokens = tokens;

        if tokens > threshold {
            tracing::info!(
                session_id = %session_id,
                budget,
                threshold,
                tokens,
                turns = turns.len(),
                "[Compressor] history over budget, compressing"
            );
        }

        while tokens > threshold && !turns.is_empty() {
            if iterations >= self.config.max_compress_iterations {
                tracing::info!(iterations, "[Compressor] iteration limit reached");
                break;
            }
            iterations += 1;

            let keep = match turns.len() {
                n if n > 2 => 2,
                2 => 1,
                _ => 0,
            };
            let older = turns.split_off(keep);

            match self.summarize_turns(&older, session_id, fallback_work_id).await {
                Ok(summary) => {
                    compressed_turns += older.len();
                    turns.push(summary);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        summarizer = %self.summarizer.name(),
                        "[Compressor] summarization failed, keeping history unchanged: {}",
                        e
                    );
                    turns.extend(older);
                    break;
                }
            }

            tokens = turn_tokens(&turns);

            if turns.len() <= 1 && tokens > threshold {
                tracing::info!(tokens, threshold, "[Compressor] single turn still over budget, giving up");
                break;
            }

            let reduction = last_tokens.saturating_sub(tokens) as f64 / last_tokens.max(1) as f64;
            if iterations > 1 && reduction < self.config.min_shrink_ratio {
                tracing::info!(
                    reduction = %format!("{:.1}%", reduction * 100.0),
                    "[Compressor] compression stalled"
                );
                break;
            }
            last_tokens = tokens;
        }

        turns.reverse();
        if compressed_turns > 0 {
            tracing::info!(
                session_id = %session_id,
                iterations,
                compressed_turns,
                tokens_before,
                tokens_after = tokens,
                "[Compressor] compression finished"
            );
        }
        CompressionResult {
            turns,
            iterations,
            compressed_turns,
            tokens_before,
            tokens_after: tokens,
        }
    }

    /// Summarize `older` (newest first) into one summary turn and persist it.
    async fn summarize_turns(
        &self,
        older: &[DialogueTurn],
        session_id: &str,
        fallback_work_id: &str,
    ) -> AppResult<DialogueTurn> {
        let chronological: Vec<&DialogueTurn> = older.iter().rev().collect();
        let transcript = serialize_turns(&chronological)?;
        let raw = self.summarizer.summarize(&transcript).await?;
        let summary = parse_summary(&raw)?;

        // The pair sorts first within the Work of the newest compressed turn,
        // which keeps it ahead of every turn that stays uncompressed.
        let work_id = older
            .first()
            .and_then(|t| t.messages.first())
            .map(|m| m.work_id.as_str())
            .filter(|w| !w.is_empty())
            .unwrap_or(fallback_work_id);

        let pair = SummaryPair {
            user: summary_row(
                DialogueMessage::user(format!("{} {}", SUMMARY_PREFIX, summary.user_summary)),
                session_id,
                work_id,
                SUMMARY_USER_INDEX,
            ),
            assistant: summary_row(
                DialogueMessage::assistant(format!("{} {}", SUMMARY_PREFIX, summary.assistant_summary)),
                session_id,
                work_id,
                SUMMARY_ASSISTANT_INDEX,
            ),
        };

        let ids: Vec<String> = older
            .iter()
            .flat_map(|t| t.message_ids())
            .filter(|id| !id.is_empty())
            .collect();
        self.store.apply_compression(&ids, pair.clone()).await?;

        Ok(DialogueTurn::new(vec![pair.user, pair.assistant]))
    }
}

fn summary_row(message: DialogueMessage, session_id: &str, work_id: &str, index: i64) -> DialogueMessage {
    let mut row = message
        .in_work(session_id, work_id)
        .with_index(index)
        .with_sender(SUMMARY_SENDER);
    row.id = uuid::Uuid::new_v4().to_string();
    row
}

fn serialize_turns(turns: &[&DialogueTurn]) -> AppResult<String> {
    let groups: Vec<Vec<serde_json::Value>> = turns
        .iter()
        .map(|turn| {
            turn.messages
                .iter()
                .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
                .collect()
        })
        .collect();
    Ok(serde_json::to_string_pretty(&groups)?)
}
