//! Tool invocation - one capability interface over heterogeneous providers
//!
//! Core logic only ever sees [`ToolInvoker`]. Search back-ends, MCP servers
//! and local functions plug in as [`ToolProvider`] adapters registered with a
//! [`ToolRegistry`], which routes each call by tool name.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ToolError;

/// Schema advertised to the model for one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Successful tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Uniform capability for calling external tools by name
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Tools available to the model
    fn specs(&self) -> Vec<ToolSpec>;

    /// Invoke a tool. Unknown names yield [`ToolError::UnknownTool`].
    async fn invoke(&self, name: &str, arguments: &Value) -> Result<ToolOutput, ToolError>;
}

/// Adapter for one family of tools (a search API, an MCP server, ...)
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Provider name, used in logs
    fn name(&self) -> &str;

    fn tools(&self) -> Vec<ToolSpec>;

    async fn call(&self, tool: &str, arguments: &Value) -> Result<ToolOutput, ToolError>;
}

/// Routes tool calls to the provider that registered the name
#[derive(Default, Clone)]
pub struct ToolRegistry {
    providers: Vec<Arc<dyn ToolProvider>>,
    /// tool name -> index into `providers`
    routes: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider and all of its tools.
    ///
    /// Fails without registering anything if any tool name is already taken.
    pub fn register(&mut self, provider: Arc<dyn ToolProvider>) -> Result<(), ToolError> {
        let specs = provider.tools();
        for spec in &specs {
            if self.routes.contains_key(&spec.name) {
                return Err(ToolError::AlreadyRegistered {
                    name: spec.name.clone(),
                });
            }
        }

        let index = self.providers.len();
        for spec in &specs {
            self.routes.insert(spec.name.clone(), index);
        }
        info!(provider = provider.name(), tools = specs.len(), "Registered tool provider");
        self.providers.push(provider);
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_provider(mut self, provider: Arc<dyn ToolProvider>) -> Result<Self, ToolError> {
        self.register(provider)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.providers.iter().flat_map(|p| p.tools()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    async fn invoke(&self, name: &str, arguments: &Value) -> Result<ToolOutput, ToolError> {
        let provider = self
            .routes
            .get(name)
            .and_then(|&i| self.providers.get(i))
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })?;

        if !arguments.is_object() && !arguments.is_null() {
            return Err(ToolError::InvalidArguments {
                name: name.to_string(),
                reason: "arguments must be a JSON object".into(),
            });
        }

        debug!(tool = name, provider = provider.name(), "Invoking tool");
        provider.call(name, arguments).await
    }
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>>;
type ToolFn = dyn Fn(Value) -> ToolFuture + Send + Sync;

/// Provider backed by async closures, one per tool
#[derive(Clone)]
pub struct FnProvider {
    name: String,
    tools: Vec<(ToolSpec, Arc<ToolFn>)>,
}

impl FnProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
        }
    }

    /// Add a tool implemented by `handler`
    pub fn tool<F, Fut>(mut self, spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let handler: Arc<ToolFn> = Arc::new(move |args| Box::pin(handler(args)));
        self.tools.push((spec, handler));
        self
    }
}

#[async_trait]
impl ToolProvider for FnProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|(spec, _)| spec.clone()).collect()
    }

    async fn call(&self, tool: &str, arguments: &Value) -> Result<ToolOutput, ToolError> {
        let (_, handler) = self
            .tools
            .iter()
            .find(|(spec, _)| spec.name == tool)
            .ok_or_else(|| ToolError::UnknownTool {
                name: tool.to_string(),
            })?;
        handler(arguments.clone()).await
    }
}
