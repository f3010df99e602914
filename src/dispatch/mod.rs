//! Action dispatch: routes extracted blocks to type-specific handlers.
//!
//! The [`HandlerRegistry`] is built once at startup and shared read-only by
//! every generation. Each generation owns one [`Dispatcher`], which resolves
//! `(family, type)` to a handler, runs it, and contains its failures:
//! [`Dispatcher::dispatch`] never returns an error, so one bad action cannot
//! abort the rest of the stream.

pub mod handlers;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info_span, warn, Instrument};

use crate::grammar::{ActionBlock, ActionKind, TagFamily};
use crate::Result;

/// Boxed future returned by handlers and collaborator traits.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Identity of the generation an action belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    /// Project the generation writes into.
    pub project_id: String,
    /// Prompt that started the generation.
    pub prompt_id: String,
    /// Project type; selects the sandbox root directory.
    pub project_type: String,
}

impl DispatchContext {
    /// Construct a context for one generation.
    #[must_use]
    pub fn new(project_id: String, prompt_id: String, project_type: String) -> Self {
        Self {
            project_id,
            prompt_id,
            project_type,
        }
    }
}

/// Performs the side effects of one action kind.
pub trait ActionHandler: Send + Sync {
    /// Handle `block` on behalf of the generation described by `ctx`.
    ///
    /// # Errors
    ///
    /// Any error is logged by the dispatcher and does not stop the stream.
    fn handle<'a>(&'a self, ctx: &'a DispatchContext, block: &'a ActionBlock) -> HandlerFuture<'a>;
}

/// Result of dispatching one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran to completion.
    Handled,
    /// No handler is registered for the block's `(family, type)`.
    Unhandled,
    /// This block was already dispatched in this generation.
    Duplicate,
    /// The handler failed; the message is already logged.
    Failed(String),
}

/// Process-wide mapping from `(family, type)` to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(TagFamily, String), Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    /// Start an empty registry.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Handler for `action_type` within `family`, if registered.
    #[must_use]
    pub fn get(&self, family: TagFamily, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(&(family, action_type.to_owned()))
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<(TagFamily, String), Arc<dyn ActionHandler>>,
}

impl HandlerRegistryBuilder {
    /// Register `handler` for `kind` within `family`, replacing any earlier one.
    #[must_use]
    pub fn register(
        mut self,
        family: TagFamily,
        kind: ActionKind,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        self.handlers
            .insert((family, kind.as_str().to_owned()), handler);
        self
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Per-generation dispatcher.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    dispatched: HashSet<u64>,
}

impl Dispatcher {
    /// Create a dispatcher for one generation.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            dispatched: HashSet::new(),
        }
    }

    /// Run the handler registered for `block`.
    ///
    /// A block whose `sequence` was already dispatched is skipped, which
    /// makes repeated dispatch of the same extraction harmless.
    pub async fn dispatch(
        &mut self,
        ctx: &DispatchContext,
        block: &ActionBlock,
    ) -> DispatchOutcome {
        if !self.dispatched.insert(block.sequence) {
            debug!(
                prompt_id = %ctx.prompt_id,
                sequence = block.sequence,
                "dispatch: duplicate block skipped"
            );
            return DispatchOutcome::Duplicate;
        }

        let Some(handler) = self.registry.get(block.family, &block.action_type) else {
            debug!(
                prompt_id = %ctx.prompt_id,
                tag = block.tag_name(),
                action_type = %block.action_type,
                "dispatch: no handler registered"
            );
            return DispatchOutcome::Unhandled;
        };

        let span = info_span!(
            "dispatch",
            prompt_id = %ctx.prompt_id,
            action_type = %block.action_type,
            sequence = block.sequence
        );
        match handler.handle(ctx, block).instrument(span).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(err) => {
                warn!(
                    prompt_id = %ctx.prompt_id,
                    action_type = %block.action_type,
                    error = %err,
                    "dispatch: handler failed"
                );
                DispatchOutcome::Failed(err.to_string())
            }
        }
    }
}
