//! Round Streaming
//!
//! Consumes the unified events of one model call. Inline `<think>` blocks and
//! provider reasoning go out as reasoning frames; everything else goes out as
//! words, is appended to the cumulative buffer and fed to the tag parser.
//! Actions the parser completes are queued on the Work's lane right away.

use autoprovider_core::{PushFrame, UnifiedStreamEvent};
use autoprovider_llm::{ThinkTagSplitter, UsageStats};
use autoprovider_tools::{recover, Action, DispatchLane, EnqueueOutcome, TagStreamParser};

use super::echo::WorkSink;

/// Text and accounting gathered from one model call.
#[derive(Debug, Clone, Default)]
pub struct RoundTranscript {
    /// Visible content; replaced by the corrected text after recovery
    pub content: String,
    pub reasoning: String,
    pub usage: Option<UsageStats>,
    /// Actions accepted by the lane during this round
    pub enqueued: usize,
    pub recovered: bool,
}

pub struct RoundStream<'a> {
    parser: &'a mut TagStreamParser,
    lane: &'a mut DispatchLane,
    sink: &'a WorkSink,
    splitter: ThinkTagSplitter,
    words_open: bool,
    thinking_open: bool,
    transcript: RoundTranscript,
}

impl<'a> RoundStream<'a> {
    /// Start a round; the parser moves to a new stream generation.
    pub fn new(parser: &'a mut TagStreamParser, lane: &'a mut DispatchLane, sink: &'a WorkSink) -> Self {
        parser.begin_stream();
        Self {
            parser,
            lane,
            sink,
            splitter: ThinkTagSplitter::new(),
            words_open: false,
            thinking_open: false,
            transcript: RoundTranscript::default(),
        }
    }

    pub fn handle(&mut self, event: UnifiedStreamEvent) {
        for event in self.splitter.process(event) {
            self.apply(event);
        }
    }

    /// Content of a non-streaming answer, used only when nothing was streamed.
    pub fn absorb_response(&mut self, content: Option<&str>, thinking: Option<&str>) {
        if self.transcript.reasoning.is_empty() {
            if let Some(thinking) = thinking.filter(|t| !t.is_empty()) {
                self.apply(UnifiedStreamEvent::thinking(thinking));
                self.apply(UnifiedStreamEvent::ThinkingEnd);
            }
        }
        if self.transcript.content.is_empty() {
            if let Some(content) = content.filter(|c| !c.is_empty()) {
                self.apply(UnifiedStreamEvent::text(content));
            }
        }
    }

    /// Flush split state, close open segments and run the recovery pass.
    pub fn finish(mut self) -> RoundTranscript {
        for event in self.splitter.finish() {
            self.apply(event);
        }
        self.close_thinking();
        self.close_words();

        let outcome = recover(&mut *self.parser, &self.transcript.content);
        if outcome.changed {
            for action in outcome.actions {
                self.enqueue(action);
            }
            self.transcript.content = outcome.corrected;
            self.transcript.recovered = true;
        }
        self.transcript
    }

    fn apply(&mut self, event: UnifiedStreamEvent) {
        match event {
            UnifiedStreamEvent::TextDelta { content } => {
                if content.is_empty() {
                    return;
                }
                self.close_thinking();
                self.words_open = true;
                self.sink.send(PushFrame::words(&content));
                self.transcript.content.push_str(&content);
                for action in self.parser.feed_all(&self.transcript.content) {
                    self.enqueue(action);
                }
            }
            UnifiedStreamEvent::ThinkingStart => {
                self.close_words();
                self.thinking_open = true;
            }
            UnifiedStreamEvent::ThinkingDelta { content } => {
                if !self.thinking_open {
                    self.close_words();
                    self.thinking_open = true;
                }
                self.sink.send(PushFrame::thinking(&content));
                self.transcript.reasoning.push_str(&content);
            }
            UnifiedStreamEvent::ThinkingEnd => self.close_thinking(),
            UnifiedStreamEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                self.transcript.usage = Some(UsageStats::new(input_tokens, output_tokens));
            }
            UnifiedStreamEvent::Error { message, .. } => {
                tracing::debug!("[AgentWork] stream reported error: {}", message);
            }
            UnifiedStreamEvent::Complete { .. } => {}
        }
    }

    fn enqueue(&mut self, action: Action) {
        if self.lane.enqueue(action) == EnqueueOutcome::Enqueued {
            self.transcript.enqueued += 1;
        }
    }

    fn close_words(&mut self) {
        if self.words_open {
            self.sink.send(PushFrame::words_end());
            self.words_open = false;
        }
    }

    fn close_thinking(&mut self) {
        if self.thinking_open {
            self.sink.send(PushFrame::thinking_end());
            self.thinking_open = false;
        }
    }
}
