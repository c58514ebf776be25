//! Inline `<think>` Tag Splitter
//!
//! Some models stream their reasoning inline as `<think>...</think>` inside
//! ordinary content. The splitter turns those text deltas into thinking
//! events, buffering just enough of the tail to catch a tag split across
//! chunk boundaries.

use autoprovider_core::streaming::UnifiedStreamEvent;

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Stateful splitter over a stream of unified events.
#[derive(Debug, Default)]
pub struct ThinkTagSplitter {
    buffer: String,
    in_think: bool,
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    let max = text.len().min(tag.len() - 1);
    (1..=max)
        .rev()
        .find(|&n| text.is_char_boundary(text.len() - n) && tag.starts_with(&text[text.len() - n..]))
        .unwrap_or(0)
}

impl ThinkTagSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the splitter is currently inside a `<think>` block.
    pub fn in_think(&self) -> bool {
        self.in_think
    }

    /// Process one event. Text deltas are split; everything else passes through.
    pub fn process(&mut self, event: UnifiedStreamEvent) -> Vec<UnifiedStreamEvent> {
        match event {
            UnifiedStreamEvent::TextDelta { content } => self.push_text(&content),
            other => vec![other],
        }
    }

    fn push_text(&mut self, content: &str) -> Vec<UnifiedStreamEvent> {
        self.buffer.push_str(content);
        let mut events = Vec::new();

        loop {
            if self.in_think {
                if let Some(end) = self.buffer.find(CLOSE_TAG) {
                    let thought: String = self.buffer.drain(..end).collect();
                    self.buffer.drain(..CLOSE_TAG.len());
                    if !thought.is_empty() {
                        events.push(UnifiedStreamEvent::thinking(thought));
                    }
                    events.push(UnifiedStreamEvent::ThinkingEnd);
                    self.in_think = false;
                    continue;
                }
                let keep = partial_tag_len(&self.buffer, CLOSE_TAG);
                let safe: String = self.buffer.drain(..self.buffer.len() - keep).collect();
                if !safe.is_empty() {
                    events.push(UnifiedStreamEvent::thinking(safe));
                }
                break;
            }

            if let Some(start) = self.buffer.find(OPEN_TAG) {
                let before: String = self.buffer.drain(..start).collect();
                self.buffer.drain(..OPEN_TAG.len());
                if !before.is_empty() {
                    events.push(UnifiedStreamEvent::text(before));
                }
                events.push(UnifiedStreamEvent::ThinkingStart);
                self.in_think = true;
                continue;
            }
            let keep = partial_tag_len(&self.buffer, OPEN_TAG);
            let safe: String = self.buffer.drain(..self.buffer.len() - keep).collect();
            if !safe.is_empty() {
                events.push(UnifiedStreamEvent::text(safe));
            }
            break;
        }

        events
    }

    /// Flush whatever is still buffered at end of stream.
    pub fn finish(&mut self) -> Vec<UnifiedStreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        if self.in_think {
            if !rest.is_empty() {
                events.push(UnifiedStreamEvent::thinking(rest));
            }
            events.push(UnifiedStreamEvent::ThinkingEnd);
            self.in_think = false;
        } else if !rest.is_empty() {
            events.push(UnifiedStreamEvent::text(rest));
        }
        events
    }
}
