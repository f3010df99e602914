//! Typed action variants.

use serde::{Deserialize, Serialize};

use super::{ActionKind, TagFamily, COMMAND_SEPARATOR, FILE_PATH_ATTRIBUTE};
use crate::{AppError, Result};

/// Typed interpretation of an action block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// A data-model description.
    Schema {
        /// Raw schema definition text.
        definition: String,
    },
    /// Human-readable text for the end user.
    Summary {
        /// Summary text.
        text: String,
    },
    /// Write `content` to `path` inside the sandbox project root.
    File {
        /// Project-relative target path.
        path: String,
        /// Full file content.
        content: String,
    },
    /// Run each command in order inside the sandbox.
    Shell {
        /// Trimmed, non-empty commands in source order.
        commands: Vec<String>,
    },
    /// A `type` value the family does not define.
    Unknown {
        /// The unrecognized `type` value.
        action_type: String,
    },
}

impl Action {
    /// Build the typed action for a block's parsed parts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedBlock` when a known action type lacks a
    /// required attribute or has an unusable body.
    pub fn from_parts(
        family: TagFamily,
        action_type: &str,
        attributes: &[(String, String)],
        body: &str,
    ) -> Result<Self> {
        let Some(kind) = ActionKind::parse(family, action_type) else {
            return Ok(Self::Unknown {
                action_type: action_type.to_owned(),
            });
        };

        match kind {
            ActionKind::Schema => Ok(Self::Schema {
                definition: body.to_owned(),
            }),
            ActionKind::Summary => Ok(Self::Summary {
                text: body.to_owned(),
            }),
            ActionKind::File => {
                let path = attributes
                    .iter()
                    .find(|(name, _)| name == FILE_PATH_ATTRIBUTE)
                    .map(|(_, value)| value.trim())
                    .filter(|value| !value.is_empty())
                    .ok_or_else(|| {
                        AppError::MalformedBlock(format!(
                            "file block is missing `{FILE_PATH_ATTRIBUTE}`"
                        ))
                    })?;
                Ok(Self::File {
                    path: path.to_owned(),
                    content: body.to_owned(),
                })
            }
            ActionKind::Shell => {
                let commands = split_commands(body);
                if commands.is_empty() {
                    return Err(AppError::MalformedBlock(
                        "shell block contains no commands".into(),
                    ));
                }
                Ok(Self::Shell { commands })
            }
        }
    }

    /// Known kind of this action, or `None` for [`Action::Unknown`].
    #[must_use]
    pub fn kind(&self) -> Option<ActionKind> {
        match self {
            Self::Schema { .. } => Some(ActionKind::Schema),
            Self::Summary { .. } => Some(ActionKind::Summary),
            Self::File { .. } => Some(ActionKind::File),
            Self::Shell { .. } => Some(ActionKind::Shell),
            Self::Unknown { .. } => None,
        }
    }
}

/// Split a shell body on [`COMMAND_SEPARATOR`], keeping source order.
///
/// Each command is trimmed; empty segments are skipped.
#[must_use]
pub fn split_commands(body: &str) -> Vec<String> {
    body.split(COMMAND_SEPARATOR)
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .map(str::to_owned)
        .collect()
}
