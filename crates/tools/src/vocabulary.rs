//! Tag Vocabulary
//!
//! Two closed, case-sensitive tag sets plus one reserved marker that brackets
//! the actionable region of a reply:
//!
//! - action tags become an `Action` when closed (one per tool)
//! - parameter tags become fields of the enclosing frame

use std::collections::HashSet;

use autoprovider_core::{CoreError, CoreResult};

/// Default begin/end marker (`<function-call>` ... `</function-call>`).
pub const DEFAULT_MARKER_TAG: &str = "function-call";

/// Tags that produce a dispatchable action.
pub const ACTION_TAGS: &[&str] = &[
    "CHAT-TO-USER",
    "CREATE-FILE",
    "DELETE-FILE",
    "EDIT-FILE",
    "READ-FILE",
    "WEB_SEARCH",
    "FILE-SEARCH",
    "SQL-OPERATION",
    "BASH-OPERATION",
    "CREATE-TODOLIST",
    "DONE-TODO",
    "LINTER",
    "DEPLOY",
    "REASONERS",
];

/// Tags that become parameters of the enclosing action or parameter.
pub const PARAMETER_TAGS: &[&str] = &[
    "CONTENT",
    "FILE-NAME",
    "EDIT",
    "EDIT-OPERATION",
    "EDIT-POSITION",
    "FRONT-POSITION",
    "BACK-POSITION",
    "EDIT-CONTENT",
    "SEARCH_CONTENT",
    "SQL",
    "BASH",
    "OPERATION-POSITIOM",
    "BASH-INSTRUCT",
    "TODOLIST",
    "TODOLIST-NAME",
    "TODOCONTENT",
    "TODO",
    "TODO-TITLE",
    "REASON-CONTENT",
];

/// The tag sets a parser recognizes.
#[derive(Debug, Clone)]
pub struct TagVocabulary {
    actions: HashSet<String>,
    parameters: HashSet<String>,
    marker: String,
}

impl TagVocabulary {
    pub fn new<A, P>(actions: A, parameters: P) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            parameters: parameters.into_iter().map(Into::into).collect(),
            marker: DEFAULT_MARKER_TAG.to_string(),
        }
    }

    /// Replace the begin/end marker name.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Marker comparison ignores case.
    pub fn is_marker(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.marker)
    }

    pub fn is_action(&self, name: &str) -> bool {
        self.actions.contains(name)
    }

    pub fn is_parameter(&self, name: &str) -> bool {
        self.parameters.contains(name)
    }

    /// Whether `name` is a well-formed vocabulary tag: upper-case and known.
    pub fn recognizes(&self, name: &str) -> bool {
        is_upper_tag(name) && (self.is_action(name) || self.is_parameter(name))
    }
}

impl Default for TagVocabulary {
    fn default() -> Self {
        Self::new(ACTION_TAGS.iter().copied(), PARAMETER_TAGS.iter().copied())
    }
}

fn is_upper_tag(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// Check that `marker` is a usable begin/end tag name.
///
/// The marker must be spellable as a tag and must not shadow an action or
/// parameter tag of the default vocabulary.
pub fn validate_marker(marker: &str) -> CoreResult<()> {
    let well_formed = !marker.is_empty()
        && marker
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if !well_formed {
        return Err(CoreError::validation(format!(
            "marker tag {:?} must match [A-Za-z0-9_-]+",
            marker
        )));
    }
    let shadowed = ACTION_TAGS
        .iter()
        .chain(PARAMETER_TAGS)
        .any(|tag| tag.eq_ignore_ascii_case(marker));
    if shadowed {
        return Err(CoreError::validation(format!(
            "marker tag {:?} collides with a vocabulary tag",
            marker
        )));
    }
    Ok(())
}

/// Convert a tag name to its camelCase key: `CREATE-FILE` -> `createFile`.
pub fn to_camel_case(tag: &str) -> String {
    let lower = tag.to_ascii_lowercase();
    let mut out = String::with_capacity(lower.len());
    for (i, word) in lower.split(['-', '_']).filter(|w| !w.is_empty()).enumerate() {
        if i == 0 {
            out.push_str(word);
        } else {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.extend(chars);
            }
        }
    }
    out
}
