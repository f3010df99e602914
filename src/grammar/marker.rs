//! Narrow parser for opening markers.
//!
//! Only the model-emitted convention is handled: `<TAG name="value" ...>` on
//! a single line, with double-quoted, single-quoted, or bare attribute
//! values. Nested tags, entity escaping, and multi-line markers are not
//! supported.

use regex::Regex;

use super::{TagFamily, TYPE_ATTRIBUTE};
use crate::{AppError, Result};

/// `name = "value"` | `name = 'value'` | `name = value`.
const ATTRIBUTE_PATTERN: &str =
    r#"([A-Za-z_][A-Za-z0-9_:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#;

/// Byte bounds of an opening marker inside a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpeningMarker {
    /// Offset of the leading `<`.
    pub start: usize,
    /// Offset just past the terminating `>`.
    pub end: usize,
}

/// Locates and parses opening markers for one tag family.
#[derive(Debug, Clone)]
pub struct MarkerParser {
    family: TagFamily,
    open_prefix: String,
    attribute: Regex,
}

impl MarkerParser {
    /// Build a parser for `family`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the attribute pattern fails to compile.
    pub fn new(family: TagFamily) -> Result<Self> {
        let attribute = Regex::new(ATTRIBUTE_PATTERN)
            .map_err(|e| AppError::Config(format!("invalid attribute pattern: {e}")))?;
        Ok(Self {
            family,
            open_prefix: format!("<{}", family.tag_name()),
            attribute,
        })
    }

    /// Family this parser recognizes.
    #[must_use]
    pub fn family(&self) -> TagFamily {
        self.family
    }

    /// Find the first complete opening marker in `line`.
    ///
    /// The tag name must be followed by whitespace or `>` so that longer tag
    /// names sharing the prefix are not mistaken for this family. A marker
    /// whose `>` has not arrived yet is not reported.
    #[must_use]
    pub fn find_opening(&self, line: &str) -> Option<OpeningMarker> {
        let mut from = 0;
        while let Some(rel) = line[from..].find(&self.open_prefix) {
            let start = from + rel;
            let after = start + self.open_prefix.len();
            match line[after..].chars().next() {
                Some(c) if c == '>' || c.is_whitespace() => {
                    return line[after..].find('>').map(|gt| OpeningMarker {
                        start,
                        end: after + gt + 1,
                    });
                }
                _ => from = after,
            }
        }
        None
    }

    /// Parse the attributes of `marker`, the full `<TAG ...>` text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedBlock` when text between attributes cannot
    /// be parsed or the `type` attribute is missing.
    pub fn parse_attributes(&self, marker: &str) -> Result<Vec<(String, String)>> {
        let inner = marker
            .strip_prefix(self.open_prefix.as_str())
            .and_then(|rest| rest.strip_suffix('>'))
            .ok_or_else(|| {
                AppError::MalformedBlock(format!(
                    "not a <{}> opening marker: {marker}",
                    self.family.tag_name()
                ))
            })?;

        let mut attributes = Vec::new();
        let mut cursor = 0;
        for caps in self.attribute.captures_iter(inner) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            ensure_blank(&inner[cursor..whole.start()], self.family)?;
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            attributes.push((name.as_str().to_owned(), value.to_owned()));
            cursor = whole.end();
        }
        ensure_blank(&inner[cursor..], self.family)?;

        if !attributes.iter().any(|(name, _)| name == TYPE_ATTRIBUTE) {
            return Err(AppError::MalformedBlock(format!(
                "<{}> marker has no `{TYPE_ATTRIBUTE}` attribute",
                self.family.tag_name()
            )));
        }

        Ok(attributes)
    }
}

fn ensure_blank(gap: &str, family: TagFamily) -> Result<()> {
    if gap.trim().is_empty() {
        Ok(())
    } else {
        Err(AppError::MalformedBlock(format!(
            "unparseable text `{}` in <{}> marker",
            gap.trim(),
            family.tag_name()
        )))
    }
}
