//! Action Execution Helpers
//!
//! Parameter normalization applied before an action reaches its tool, and
//! formatting of executed actions into the tool-result message sent back to
//! the model on the next round.

use serde_json::Value;

use crate::dispatch::DispatchedAction;

/// Default project root inside the sandbox.
pub const DEFAULT_PATH_ROOT: &str = "/app";

/// Actions whose path-like parameters are rewritten.
const FILE_ACTIONS: &[&str] = &["createFile", "readFile", "editFile", "deleteFile"];

/// Parameter keys holding a single path.
const PATH_FIELDS: &[&str] = &["fileName", "path", "fullPath", "targetPath", "file"];

/// Rewrites model-supplied paths into a canonical project-rooted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNormalizer {
    root: Option<String>,
}

impl PathNormalizer {
    /// Normalizer rooted at `root` (e.g. `/app`).
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let trimmed = root.trim_end_matches('/');
        let root = if trimmed.is_empty() {
            None
        } else if trimmed.starts_with('/') {
            Some(trimmed.to_string())
        } else {
            Some(format!("/{}", trimmed))
        };
        Self { root }
    }

    /// Normalizer that leaves every parameter untouched.
    pub fn disabled() -> Self {
        Self { root: None }
    }

    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Normalize the path fields of a file action. Other actions pass through.
    pub fn normalize_parameters(&self, action_name: &str, parameters: Value) -> Value {
        if self.root.is_none() || !FILE_ACTIONS.contains(&action_name) {
            return parameters;
        }
        let Value::Object(mut map) = parameters else {
            return parameters;
        };

        for field in PATH_FIELDS {
            if let Some(Value::String(path)) = map.get(*field) {
                let normalized = self.normalize_path(path);
                map.insert(field.to_string(), Value::String(normalized));
            }
        }
        if let Some(Value::Array(items)) = map.get_mut("fileName") {
            for item in items.iter_mut() {
                if let Value::String(path) = item {
                    *path = self.normalize_path(path);
                }
            }
        }
        Value::Object(map)
    }

    /// Canonicalize a single path.
    pub fn normalize_path(&self, raw: &str) -> String {
        let Some(root) = self.root.as_deref() else {
            return raw.to_string();
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return trimmed.to_string();
        }

        let slashed = trimmed.replace('\\', "/");
        let path = format!("/{}", slashed.trim_start_matches('/'));

        let remapped = if let Some(rest) = strip_segment(&path, "/src/frontend")
            .or_else(|| strip_segment(&path, "/src/backend"))
        {
            format!("{}/src/{}", root, rest)
        } else if let Some(rest) =
            strip_segment(&path, "/frontend").or_else(|| strip_segment(&path, "/backend"))
        {
            format!("{}/{}", root, rest)
        } else if let Some(rest) = path.strip_prefix("/src/") {
            format!("{}/src/{}", root, rest)
        } else if strip_segment(&path, root).is_some() {
            path
        } else {
            format!("{}{}", root, path)
        };

        collapse_slashes(&remapped)
    }
}

impl Default for PathNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_PATH_ROOT)
    }
}

/// If `path` is `prefix` or starts with `prefix/`, return what follows.
fn strip_segment<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !previous_slash {
                out.push(c);
            }
            previous_slash = true;
        } else {
            out.push(c);
            previous_slash = false;
        }
    }
    out
}

/// Render executed actions as the tool-result message for the next round.
///
/// Each result is a fenced block labelled with the action name whose body is
/// the tool's message, followed by its data when there is any.
pub fn format_tool_results(results: &[DispatchedAction]) -> String {
    results
        .iter()
        .map(|result| {
            let mut content = result.outcome.message.clone();
            let has_data = match &result.outcome.data {
                Value::Null => false,
                Value::Object(map) => !map.is_empty(),
                Value::String(s) => !s.is_empty(),
                _ => true,
            };
            if has_data {
                let data = match &result.outcome.data {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if content.is_empty() {
                    content = data;
                } else {
                    content = format!("{}\n{}", content, data);
                }
            }
            format!("``` {}\n\n{}\n\n```", result.action.name, content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag_parser::Action;
    use autoprovider_core::ToolOutcome;
    use serde_json::json;

    fn normalizer() -> PathNormalizer {
        PathNormalizer::default()
    }

    // ── Path rules ──

    #[test]
    fn test_plain_paths_get_root_prefix() {
        let n = normalizer();
        assert_eq!(n.normalize_path("index.html"), "/app/index.html");
        assert_eq!(n.normalize_path("/index.html"), "/app/index.html");
        assert_eq!(n.normalize_path("//docs//a.md"), "/app/docs/a.md");
    }

    #[test]
    fn test_rooted_paths_unchanged() {
        let n = normalizer();
        assert_eq!(n.normalize_path("/app/src/main.ts"), "/app/src/main.ts");
        assert_eq!(n.normalize_path("/app"), "/app");
        // a sibling with a shared prefix is not under the root
        assert_eq!(n.normalize_path("/apple/x"), "/app/apple/x");
    }

    #[test]
    fn test_legacy_prefixes_remapped() {
        let n = normalizer();
        assert_eq!(n.normalize_path("/frontend/index.html"), "/app/index.html");
        assert_eq!(n.normalize_path("/backend/server.js"), "/app/server.js");
        assert_eq!(n.normalize_path("/src/frontend/App.vue"), "/app/src/App.vue");
        assert_eq!(n.normalize_path("/src/backend/db.js"), "/app/src/db.js");
        assert_eq!(n.normalize_path("/src/util.js"), "/app/src/util.js");
        assert_eq!(n.normalize_path("/frontendish/a"), "/app/frontendish/a");
    }

    #[test]
    fn test_backslashes_converted() {
        assert_eq!(normalizer().normalize_path("src\\lib\\a.rs"), "/app/src/lib/a.rs");
    }

    #[test]
    fn test_custom_root() {
        let n = PathNormalizer::new("workspace/");
        assert_eq!(n.root(), Some("/workspace"));
        assert_eq!(n.normalize_path("a.txt"), "/workspace/a.txt");
    }

    // ── Parameter rules ──

    #[test]
    fn test_only_file_actions_normalized() {
        let n = normalizer();
        let params = json!({"fileName": "a.txt", "content": "/x"});
        assert_eq!(
            n.normalize_parameters("createFile", params.clone()),
            json!({"fileName": "/app/a.txt", "content": "/x"})
        );
        assert_eq!(n.normalize_parameters("bashOperation", params.clone()), params);
    }

    #[test]
    fn test_file_name_arrays_normalized() {
        let params = json!({"fileName": ["a.txt", "/frontend/b.txt"]});
        assert_eq!(
            normalizer().normalize_parameters("readFile", params),
            json!({"fileName": ["/app/a.txt", "/app/b.txt"]})
        );
    }

    #[test]
    fn test_disabled_passes_through() {
        let params = json!({"fileName": "/a.txt"});
        assert_eq!(
            PathNormalizer::disabled().normalize_parameters("createFile", params.clone()),
            params
        );
    }

    // ── Result formatting ──

    fn dispatched(name: &str, outcome: ToolOutcome, index: usize) -> DispatchedAction {
        DispatchedAction {
            action: Action {
                name: name.to_string(),
                tag: String::new(),
                parameters: json!({}),
                start: 0,
                end: 0,
                generation: 0,
                origin: 0,
            },
            outcome,
            index,
        }
    }

    #[test]
    fn test_format_tool_results() {
        let results = vec![
            dispatched("readFile", ToolOutcome::success("ok", json!("file body")), 0),
            dispatched("deploy", ToolOutcome::failure("function deploy not found"), 1),
        ];
        assert_eq!(
            format_tool_results(&results),
            "``` readFile\n\nok\nfile body\n\n```\n\n``` deploy\n\nfunction deploy not found\n\n```"
        );
    }
}
