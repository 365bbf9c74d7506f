// Tool Abstraction for Agent Runs
//
// Tools are defined using the `Tool` trait and registered with a
// `ToolRegistry`. The registry owns the dispatch contract: it always yields a
// string for the model, never an error.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::validation::{validate, Validation};

// ============================================================================
// Tool Trait - Core Tool Abstraction
// ============================================================================

/// Trait for implementing tools that can be called by the model.
///
/// `run` must not fail for predictable failure modes (no results, upstream
/// unavailable, ...). It returns a descriptive string instead, which becomes
/// the tool message the model sees.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct SearchRepos;
///
/// #[async_trait]
/// impl Tool for SearchRepos {
///     fn name(&self) -> &str {
///         "search_repos"
///     }
///
///     fn description(&self) -> &str {
///         "Search public repositories"
///     }
///
///     fn input_schema(&self) -> Value {
///         json!({
///             "type": "object",
///             "properties": { "query": { "type": "string" } },
///             "required": ["query"]
///         })
///     }
///
///     async fn run(&self, input: Value) -> String {
///         format!("No repositories match {}", input["query"])
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's unique name.
    ///
    /// This name is used by the model to invoke the tool and must be unique
    /// within a ToolRegistry.
    fn name(&self) -> &str;

    /// Returns a description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's input.
    ///
    /// Arguments are validated against this schema before `run` is called.
    fn input_schema(&self) -> Value;

    /// Execute the tool with validated input.
    async fn run(&self, input: Value) -> String;

    /// Declaration sent to the gateway
    fn to_declaration(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.input_schema(),
            }
        })
    }
}

// ============================================================================
// ToolRegistry - Name → Tool lookup and the dispatch contract
// ============================================================================

/// Tools available to a run, ordered by name
///
/// # Example
///
/// ```ignore
/// use agentrun_core::tools::{EchoTool, ToolRegistry};
///
/// let registry = ToolRegistry::builder().tool(EchoTool).build();
/// let output = registry.dispatch("echo", r#"{"message": "hi"}"#).await;
/// ```
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        self.tools.insert(tool.name().to_owned(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered names in order
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Gateway tool declarations, in name order
    pub fn tool_schemas(&self) -> Vec<Value> {
        self.tools.values().map(|tool| tool.to_declaration()).collect()
    }

    /// Dispatch a tool call and return the string for the tool message.
    ///
    /// Never fails:
    /// - unknown tool → `"Unknown tool: <name>"`
    /// - arguments that are not JSON or do not match the schema →
    ///   `"Invalid arguments for <name>"`
    ///
    /// An empty argument string is treated as `{}`.
    pub async fn dispatch(&self, name: &str, raw_arguments: &str) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool_name = %name, "model requested an unknown tool");
            return format!("Unknown tool: {}", name);
        };

        let input = if raw_arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str::<Value>(raw_arguments) {
                Ok(input) => input,
                Err(e) => {
                    warn!(tool_name = %name, error = %e, "tool arguments are not valid JSON");
                    return format!("Invalid arguments for {}", name);
                }
            }
        };

        if let Validation::Invalid(errors) = validate(&tool.input_schema(), &input) {
            warn!(
                tool_name = %name,
                errors = %errors.join("; "),
                "tool arguments failed schema validation"
            );
            return format!("Invalid arguments for {}", name);
        }

        debug!(tool_name = %name, "running tool");
        tool.run(input).await
    }

    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

/// Fluent construction of a [`ToolRegistry`]
#[derive(Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// A tool that echoes back its message (useful for testing)
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the given message unchanged"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Text to return"
                }
            },
            "required": ["message"],
            "additionalProperties": false
        })
    }

    async fn run(&self, input: Value) -> String {
        input
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

/// A tool that answers every call with a fixed string
///
/// Stands in for real collaborators (search, lookup) in tests and demos.
pub struct StaticTool {
    name: String,
    description: String,
    schema: Value,
    output: String,
}

impl StaticTool {
    /// Create a tool accepting any object input
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "Returns a fixed answer".to_string(),
            schema: json!({ "type": "object" }),
            output: output.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn run(&self, _input: Value) -> String {
        self.output.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
