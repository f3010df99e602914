//! Action grammar: the tag vocabulary models use to embed typed payloads.
//!
//! Two tag families are recognized. Each family owns a fixed tag name and a
//! closed set of action types carried in the opening marker's `type`
//! attribute:
//!
//! | Family              | Tag             | Action types         |
//! |---------------------|-----------------|----------------------|
//! | [`TagFamily::Schema`]  | `schemaAction`  | `schema`, `summary`  |
//! | [`TagFamily::Project`] | `projectAction` | `file`, `shell`      |
//!
//! A block looks like:
//!
//! ```text
//! <projectAction type="file" filePath="src/index.js">
//! console.log("hi");
//! </projectAction>
//! ```

pub mod action;
pub mod marker;

use serde::{Deserialize, Serialize};

pub use action::Action;
pub use marker::{MarkerParser, OpeningMarker};

/// Attribute carrying the action discriminator on every opening marker.
pub const TYPE_ATTRIBUTE: &str = "type";

/// Attribute carrying the target path on `file` blocks.
pub const FILE_PATH_ATTRIBUTE: &str = "filePath";

/// Separator between commands inside a `shell` block body.
pub const COMMAND_SEPARATOR: &str = "&&";

/// Marker vocabulary distinguishing one set of embedded payloads from another.
///
/// Fixed per generation: one extractor only ever looks for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagFamily {
    /// Data-model blocks: `schema` and `summary`.
    Schema,
    /// Sandbox blocks: `file` and `shell`.
    Project,
}

impl TagFamily {
    /// Tag name used in both markers.
    #[must_use]
    pub fn tag_name(self) -> &'static str {
        match self {
            Self::Schema => "schemaAction",
            Self::Project => "projectAction",
        }
    }

    /// Literal text that closes a block of this family.
    #[must_use]
    pub fn closing_marker(self) -> &'static str {
        match self {
            Self::Schema => "</schemaAction>",
            Self::Project => "</projectAction>",
        }
    }

    /// Action types defined for this family.
    #[must_use]
    pub fn action_kinds(self) -> &'static [ActionKind] {
        match self {
            Self::Schema => &[ActionKind::Schema, ActionKind::Summary],
            Self::Project => &[ActionKind::File, ActionKind::Shell],
        }
    }
}

/// Known action discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Structured data-model description.
    Schema,
    /// Human-readable summary text.
    Summary,
    /// File materialization in the sandbox.
    File,
    /// One or more shell commands run in the sandbox.
    Shell,
}

impl ActionKind {
    /// Wire value of the `type` attribute.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Summary => "summary",
            Self::File => "file",
            Self::Shell => "shell",
        }
    }

    /// Resolve a `type` attribute value within `family`.
    ///
    /// Returns `None` for types the family does not define.
    #[must_use]
    pub fn parse(family: TagFamily, value: &str) -> Option<Self> {
        family
            .action_kinds()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value)
    }
}

/// A fully delimited, typed block extracted from a generation's text stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionBlock {
    /// Family whose markers delimited this block.
    pub family: TagFamily,
    /// Raw value of the opening marker's `type` attribute.
    pub action_type: String,
    /// Attributes from the opening marker, in source order.
    pub attributes: Vec<(String, String)>,
    /// Text between the opening marker and the closing literal.
    pub body: String,
    /// Typed interpretation of this block.
    pub action: Action,
    /// Extraction ordinal within its generation, starting at zero.
    pub sequence: u64,
}

impl ActionBlock {
    /// Tag name of this block's family.
    #[must_use]
    pub fn tag_name(&self) -> &'static str {
        self.family.tag_name()
    }

    /// First value of attribute `name`, if present.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}
