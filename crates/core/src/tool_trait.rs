//! Tool Contract
//!
//! Tools are external collaborators (file I/O, shell, SQL, deploy...). The
//! runtime only needs their uniform contract:
//!
//! - `Tool` - named async function `(parameters, context) -> ToolOutcome`
//! - `ToolOutcome` - `{status, message, data}`; failures are data, not errors
//! - `ToolRegistry` - O(1) lookup by action name with ordered iteration

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::SessionContext;

// ============================================================================
// ToolOutcome
// ============================================================================

/// Result of one tool invocation.
///
/// `status` is 0 on success and 1 on failure. A failed tool never aborts the
/// dispatch lane; the outcome is reported back to the model as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: u8,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl ToolOutcome {
    pub const SUCCESS: u8 = 0;
    pub const FAILURE: u8 = 1;

    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            status: Self::SUCCESS,
            message: message.into(),
            data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: Self::FAILURE,
            message: message.into(),
            data: Value::Object(Default::default()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Self::SUCCESS
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// A named tool invoked by the dispatch lane.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Action name this tool answers to (camelCase, e.g. `createFile`).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Execute the tool. Implementations report failures through
    /// `ToolOutcome::failure` instead of panicking or erroring.
    async fn execute(&self, params: Value, ctx: &SessionContext) -> ToolOutcome;
}

// ============================================================================
// ToolRegistry
// ============================================================================

/// Registry of tools keyed by action name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Insertion order for deterministic iteration.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    /// Unregister a tool by name. Returns the removed tool, or None.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.order.retain(|n| n != name);
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name.
    ///
    /// An unknown name yields a failure outcome rather than an error so the
    /// caller can report it to the model like any other tool failure.
    pub async fn execute(&self, name: &str, params: Value, ctx: &SessionContext) -> ToolOutcome {
        match self.tools.get(name) {
            Some(tool) => tool.execute(params, ctx).await,
            None => ToolOutcome::failure(format!("function {} not found", name)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
