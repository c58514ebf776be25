//! Tag Stream Parser
//!
//! Incremental parser over the *cumulative* text a model has produced so far.
//! Each call scans forward from the last fully consumed position, maintains a
//! stack of open frames and returns every action whose closing tag completed
//! during the call.
//!
//! Frames live in an arena (`Vec<ParseFrame>`) and refer to their parent by
//! index; the open-frame stack is a list of arena indices. The arena is
//! cleared whenever the stack empties.
//!
//! Mismatched closing tags never mutate the stack. They are recorded as
//! deferred `CompletionTask`s which the recovery pass applies once the stream
//! has ended.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::vocabulary::{to_camel_case, TagVocabulary};

/// Completion tasks for the same expected tag closer than this are merged.
const COMPLETION_DEDUP_WINDOW: usize = 10;

// ============================================================================
// Public types
// ============================================================================

/// A fully closed action tag resolved into a dispatchable call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// camelCase action name, e.g. `createFile`
    pub name: String,
    /// Original tag name, e.g. `CREATE-FILE`
    pub tag: String,
    /// Object built from the child parameter tags
    pub parameters: Value,
    /// Byte offset of the opening tag
    pub start: usize,
    /// Byte offset just past the closing tag
    pub end: usize,
    /// Stream generation that produced the action
    pub generation: u64,
    /// Offset of the opening tag in the text as the model streamed it.
    /// Equal to `start` unless a repair inserted closing tags before it.
    pub origin: usize,
}

/// Stable identity used to recognize an action re-emitted by a reparse.
///
/// Keyed by position rather than content: a repair may change the
/// parameters of an action that was already dispatched while streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionIdentity {
    pub generation: u64,
    pub origin: usize,
}

impl Action {
    pub fn identity(&self) -> ActionIdentity {
        ActionIdentity {
            generation: self.generation,
            origin: self.origin,
        }
    }
}

/// Deferred fix: insert `</expected>` at `insert_position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTask {
    pub expected: String,
    pub actual: String,
    pub insert_position: usize,
}

// ============================================================================
// Tag scanning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TagMatch<'a> {
    start: usize,
    end: usize,
    closing: bool,
    name: &'a str,
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Find the next complete `<NAME>` or `</NAME>` at or after `from`.
///
/// A tag cut off at the end of the buffer is not matched; it is picked up by
/// a later call once the rest has arrived.
fn next_tag(text: &str, from: usize) -> Option<TagMatch<'_>> {
    let bytes = text.as_bytes();
    let mut cursor = from;
    while let Some(rel) = text.get(cursor..)?.find('<') {
        let start = cursor + rel;
        let mut pos = start + 1;
        let closing = bytes.get(pos) == Some(&b'/');
        if closing {
            pos += 1;
        }
        let name_start = pos;
        while pos < bytes.len() && is_name_byte(bytes[pos]) {
            pos += 1;
        }
        if pos > name_start && bytes.get(pos) == Some(&b'>') {
            return Some(TagMatch {
                start,
                end: pos + 1,
                closing,
                name: &text[name_start..pos],
            });
        }
        cursor = start + 1;
    }
    None
}

/// Insert `value` under `key`, collapsing repeated keys into an ordered list.
fn insert_merged(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        None => {
            map.insert(key, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone)]
struct ParseFrame {
    tag: String,
    start: usize,
    content_start: usize,
    children: Map<String, Value>,
    parent: Option<usize>,
}

/// Incremental tag-stream parser.
#[derive(Debug)]
pub struct TagStreamParser {
    vocabulary: TagVocabulary,
    frames: Vec<ParseFrame>,
    stack: Vec<usize>,
    processed_position: usize,
    working: bool,
    completion_tasks: Vec<CompletionTask>,
    generation: u64,
}

impl TagStreamParser {
    pub fn new(vocabulary: TagVocabulary) -> Self {
        Self {
            vocabulary,
            frames: Vec::new(),
            stack: Vec::new(),
            processed_position: 0,
            working: false,
            completion_tasks: Vec::new(),
            generation: 0,
        }
    }

    pub fn vocabulary(&self) -> &TagVocabulary {
        &self.vocabulary
    }

    /// Offset just past the last fully consumed tag.
    pub fn processed_position(&self) -> usize {
        self.processed_position
    }

    /// Whether the parser is inside the marker-bracketed region.
    pub fn is_working(&self) -> bool {
        self.working
    }

    /// Number of currently open frames.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn completion_tasks(&self) -> &[CompletionTask] {
        &self.completion_tasks
    }

    /// Clear all parse state for a reparse of the same stream.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.stack.clear();
        self.processed_position = 0;
        self.working = false;
        self.completion_tasks.clear();
    }

    /// Start parsing a new stream. Actions from the new stream never collide
    /// with identities emitted for an earlier one.
    pub fn begin_stream(&mut self) {
        self.reset();
        self.generation += 1;
    }

    /// Feed until the scan position stops moving. A closing marker ends a
    /// single `feed` pass, so text holding several marker blocks needs more
    /// than one.
    pub fn feed_all(&mut self, buffer: &str) -> Vec<Action> {
        let mut actions = Vec::new();
        loop {
            let before = self.processed_position;
            let generation = self.generation;
            actions.extend(self.feed(buffer));
            if self.processed_position == before && self.generation == generation {
                return actions;
            }
        }
    }

    /// Scan `buffer` (the whole text so far) and return newly closed actions.
    ///
    /// Stops right after a closing marker; see `feed_all`.
    pub fn feed(&mut self, buffer: &str) -> Vec<Action> {
        if buffer.len() < self.processed_position || !buffer.is_char_boundary(self.processed_position) {
            tracing::debug!(
                "[TagParser] buffer shorter than processed position ({} < {}), starting new stream",
                buffer.len(),
                self.processed_position
            );
            self.begin_stream();
        }

        let mut actions = Vec::new();
        let mut cursor = self.processed_position;

        while let Some(tag) = next_tag(buffer, cursor) {
            cursor = tag.end;

            if self.vocabulary.is_marker(tag.name) {
                if tag.closing {
                    self.working = false;
                    break;
                }
                self.working = true;
                continue;
            }

            if !self.working || !self.vocabulary.recognizes(tag.name) {
                continue;
            }

            if tag.closing {
                if let Some(action) = self.close_frame(buffer, &tag) {
                    actions.push(action);
                }
            } else {
                self.open_frame(&tag);
            }
        }

        self.processed_position = cursor;
        actions
    }

    fn open_frame(&mut self, tag: &TagMatch<'_>) {
        let parent = self.stack.last().copied();
        self.frames.push(ParseFrame {
            tag: tag.name.to_string(),
            start: tag.start,
            content_start: tag.end,
            children: Map::new(),
            parent,
        });
        self.stack.push(self.frames.len() - 1);
    }

    fn close_frame(&mut self, buffer: &str, tag: &TagMatch<'_>) -> Option<Action> {
        let Some(&top) = self.stack.last() else {
            tracing::debug!("[TagParser] closing </{}> with empty stack, ignored", tag.name);
            return None;
        };

        if self.frames[top].tag != tag.name {
            let expected = self.frames[top].tag.clone();
            tracing::debug!(
                "[TagParser] mismatched </{}> at {}, expected </{}>",
                tag.name,
                tag.start,
                expected
            );
            self.record_completion(CompletionTask {
                expected,
                actual: tag.name.to_string(),
                insert_position: tag.start,
            });
            return None;
        }

        self.stack.pop();
        let children = std::mem::take(&mut self.frames[top].children);
        let frame_start = self.frames[top].start;
        let content_start = self.frames[top].content_start;
        let parent = self.frames[top].parent;

        let action = if self.vocabulary.is_action(tag.name) {
            Some(self.make_action(tag.name, Value::Object(children), frame_start, tag.end))
        } else {
            let value = if children.is_empty() {
                let text = self.strip_vocabulary_tags(buffer[content_start..tag.start].trim());
                (!text.is_empty()).then_some(Value::String(text))
            } else {
                Some(Value::Object(children))
            };
            match (value, parent) {
                (Some(value), Some(parent)) => {
                    insert_merged(&mut self.frames[parent].children, to_camel_case(tag.name), value);
                }
                (Some(_), None) => {
                    tracing::debug!("[TagParser] parameter <{}> outside any action, dropped", tag.name);
                }
                (None, _) => {}
            }
            None
        };

        if self.stack.is_empty() {
            self.frames.clear();
        }
        action
    }

    fn make_action(&self, tag: &str, parameters: Value, start: usize, end: usize) -> Action {
        let action = Action {
            name: to_camel_case(tag),
            tag: tag.to_string(),
            parameters,
            start,
            end,
            generation: self.generation,
            origin: start,
        };
        tracing::debug!("[TagParser] action {} closed at {}", action.name, end);
        action
    }

    fn record_completion(&mut self, task: CompletionTask) {
        let duplicate = self.completion_tasks.iter().any(|existing| {
            existing.expected == task.expected
                && existing.insert_position.abs_diff(task.insert_position) <= COMPLETION_DEDUP_WINDOW
        });
        if !duplicate {
            self.completion_tasks.push(task);
        }
    }

    /// Remove stray vocabulary and marker tags from a leaf value; any other
    /// markup (HTML, generics) is content and stays.
    fn strip_vocabulary_tags(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        while let Some(tag) = next_tag(text, cursor) {
            if self.vocabulary.recognizes(tag.name) || self.vocabulary.is_marker(tag.name) {
                out.push_str(&text[cursor..tag.start]);
            } else {
                out.push_str(&text[cursor..tag.end]);
            }
            cursor = tag.end;
        }
        out.push_str(&text[cursor..]);
        out.trim().to_string()
    }
}

impl Default for TagStreamParser {
    fn default() -> Self {
        Self::new(TagVocabulary::default())
    }
}

// ============================================================================
// Tests
// ============================================================================
