//! Built-in action handlers and the collaborator seams they call.
//!
//! | Action    | Side effects                                               |
//! |-----------|------------------------------------------------------------|
//! | `schema`  | [`SchemaSink::update_schema`]                              |
//! | `summary` | [`Notifier::notify_summary`]                               |
//! | `file`    | one audit record, one `update-file` relay message          |
//! | `shell`   | per command, in order: one audit record, one `command` message |

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{ActionHandler, DispatchContext, HandlerFuture, HandlerRegistry};
use crate::audit::{AuditLog, AuditRecord};
use crate::config::SandboxConfig;
use crate::grammar::{Action, ActionBlock, ActionKind, TagFamily};
use crate::relay::{OutboundRelay, RelayEnvelope};
use crate::{AppError, Result};

/// Receives schema definitions produced by a generation.
pub trait SchemaSink: Send + Sync {
    /// Apply or store `definition` for the generation in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update cannot be delivered.
    fn update_schema<'a>(
        &'a self,
        ctx: &'a DispatchContext,
        definition: &'a str,
    ) -> HandlerFuture<'a>;
}

/// Receives human-readable summaries produced by a generation.
pub trait Notifier: Send + Sync {
    /// Deliver `text` to whoever follows the generation in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be delivered.
    fn notify_summary<'a>(&'a self, ctx: &'a DispatchContext, text: &'a str) -> HandlerFuture<'a>;
}

/// Event emitted to the process that drives a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// A `schema` block was dispatched.
    SchemaUpdated {
        /// Prompt the schema belongs to.
        prompt_id: String,
        /// Raw schema definition.
        definition: String,
    },
    /// A `summary` block was dispatched.
    SummaryReady {
        /// Prompt the summary belongs to.
        prompt_id: String,
        /// Summary text.
        text: String,
    },
}

/// Forwards schema and summary actions into an [`mpsc`] event channel.
#[derive(Debug, Clone)]
pub struct EventForwarder {
    tx: mpsc::Sender<GenerationEvent>,
}

impl EventForwarder {
    /// Forward events through `tx`.
    #[must_use]
    pub fn new(tx: mpsc::Sender<GenerationEvent>) -> Self {
        Self { tx }
    }

    async fn forward(&self, event: GenerationEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| AppError::Handler("generation event receiver dropped".into()))
    }
}

impl SchemaSink for EventForwarder {
    fn update_schema<'a>(
        &'a self,
        ctx: &'a DispatchContext,
        definition: &'a str,
    ) -> HandlerFuture<'a> {
        Box::pin(self.forward(GenerationEvent::SchemaUpdated {
            prompt_id: ctx.prompt_id.clone(),
            definition: definition.to_owned(),
        }))
    }
}

impl Notifier for EventForwarder {
    fn notify_summary<'a>(&'a self, ctx: &'a DispatchContext, text: &'a str) -> HandlerFuture<'a> {
        Box::pin(self.forward(GenerationEvent::SummaryReady {
            prompt_id: ctx.prompt_id.clone(),
            text: text.to_owned(),
        }))
    }
}

/// Collaborators shared by the built-in handlers.
#[derive(Clone)]
pub struct HandlerDeps {
    /// Outbound sandbox messages.
    pub relay: Arc<dyn OutboundRelay>,
    /// Audit trail for sandbox-affecting actions.
    pub audit: Arc<dyn AuditLog>,
    /// Destination for `schema` actions.
    pub schema: Arc<dyn SchemaSink>,
    /// Destination for `summary` actions.
    pub notifier: Arc<dyn Notifier>,
    /// Sandbox root directories.
    pub sandbox: Arc<SandboxConfig>,
}

/// Registry with the four built-in handlers.
#[must_use]
pub fn standard_registry(deps: &HandlerDeps) -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(
            TagFamily::Schema,
            ActionKind::Schema,
            Arc::new(SchemaHandler {
                sink: Arc::clone(&deps.schema),
            }),
        )
        .register(
            TagFamily::Schema,
            ActionKind::Summary,
            Arc::new(SummaryHandler {
                notifier: Arc::clone(&deps.notifier),
            }),
        )
        .register(
            TagFamily::Project,
            ActionKind::File,
            Arc::new(FileHandler {
                relay: Arc::clone(&deps.relay),
                audit: Arc::clone(&deps.audit),
                sandbox: Arc::clone(&deps.sandbox),
            }),
        )
        .register(
            TagFamily::Project,
            ActionKind::Shell,
            Arc::new(ShellHandler {
                relay: Arc::clone(&deps.relay),
                audit: Arc::clone(&deps.audit),
            }),
        )
        .build()
}

fn mismatch(expected: ActionKind, block: &ActionBlock) -> AppError {
    AppError::Handler(format!(
        "{} handler received `{}` block",
        expected.as_str(),
        block.action_type
    ))
}

/// Forwards `schema` bodies to a [`SchemaSink`].
pub struct SchemaHandler {
    sink: Arc<dyn SchemaSink>,
}

impl ActionHandler for SchemaHandler {
    fn handle<'a>(&'a self, ctx: &'a DispatchContext, block: &'a ActionBlock) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Action::Schema { definition } = &block.action else {
                return Err(mismatch(ActionKind::Schema, block));
            };
            self.sink.update_schema(ctx, definition).await
        })
    }
}

/// Forwards `summary` bodies to a [`Notifier`].
pub struct SummaryHandler {
    notifier: Arc<dyn Notifier>,
}

impl ActionHandler for SummaryHandler {
    fn handle<'a>(&'a self, ctx: &'a DispatchContext, block: &'a ActionBlock) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Action::Summary { text } = &block.action else {
                return Err(mismatch(ActionKind::Summary, block));
            };
            self.notifier.notify_summary(ctx, text).await
        })
    }
}

/// Materializes `file` blocks under the project's sandbox root.
pub struct FileHandler {
    relay: Arc<dyn OutboundRelay>,
    audit: Arc<dyn AuditLog>,
    sandbox: Arc<SandboxConfig>,
}

impl ActionHandler for FileHandler {
    fn handle<'a>(&'a self, ctx: &'a DispatchContext, block: &'a ActionBlock) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Action::File { path, content } = &block.action else {
                return Err(mismatch(ActionKind::File, block));
            };
            let root = self.sandbox.root_for(&ctx.project_type)?;
            let target = sandbox_path(root, path)?;

            let record = AuditRecord::new(
                ctx.project_id.clone(),
                ctx.prompt_id.clone(),
                format!("file {path} updated"),
            );
            self.audit.append(&record).await?;

            self.relay.send(&RelayEnvelope::update_file(
                target.to_string_lossy(),
                content.as_str(),
            ))?;
            info!(prompt_id = %ctx.prompt_id, path = %target.display(), "file action relayed");
            Ok(())
        })
    }
}

/// Relays each command of a `shell` block, in source order.
pub struct ShellHandler {
    relay: Arc<dyn OutboundRelay>,
    audit: Arc<dyn AuditLog>,
}

impl ActionHandler for ShellHandler {
    fn handle<'a>(&'a self, ctx: &'a DispatchContext, block: &'a ActionBlock) -> HandlerFuture<'a> {
        Box::pin(async move {
            let Action::Shell { commands } = &block.action else {
                return Err(mismatch(ActionKind::Shell, block));
            };

            for command in commands {
                let record = AuditRecord::new(
                    ctx.project_id.clone(),
                    ctx.prompt_id.clone(),
                    format!("command executed: {command}"),
                );
                self.audit.append(&record).await?;
                self.relay.send(&RelayEnvelope::command(command.as_str()))?;
                debug!(prompt_id = %ctx.prompt_id, command = %command, "command relayed");
            }
            info!(
                prompt_id = %ctx.prompt_id,
                count = commands.len(),
                "shell action relayed"
            );
            Ok(())
        })
    }
}

/// Join a model-supplied `candidate` path onto the sandbox `root`.
///
/// The sandbox filesystem is remote, so normalization is lexical: `.` is
/// dropped, a leading `/` is treated as the project root, and `..` may not
/// climb above the root.
///
/// # Errors
///
/// Returns `AppError::Handler` if the path escapes `root` or is empty.
pub fn sandbox_path(root: &Path, candidate: &str) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in Path::new(candidate).components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::Handler(format!(
                        "path '{candidate}' escapes the project root"
                    )));
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(AppError::Handler(format!(
            "path '{candidate}' does not name a file"
        )));
    }

    Ok(root.join(normalized))
}
