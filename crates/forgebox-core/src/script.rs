//! Script payloads submitted to the sandbox.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Flat map of context values injected into the execution environment.
pub type ScriptContext = serde_json::Map<String, Value>;

/// An untrusted script plus the context it runs with.
///
/// Immutable once constructed. The `id` is stable for the lifetime of the
/// value and is used to correlate log lines across attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    id: Uuid,
    source: String,
    #[serde(default)]
    context: ScriptContext,
}

impl Script {
    /// Create a script with an empty context.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            context: ScriptContext::new(),
        }
    }

    /// Create a script with the given context.
    pub fn with_context(source: impl Into<String>, context: ScriptContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            context,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn context(&self) -> &ScriptContext {
        &self.context
    }

    /// Context serialized as a JSON object.
    pub fn context_json(&self) -> String {
        // A map of JSON values always serializes.
        serde_json::to_string(&self.context).unwrap_or_else(|_| "{}".to_string())
    }
}
