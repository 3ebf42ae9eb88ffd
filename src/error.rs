//! Structured error types for the layout engine.
//!
//! Fatal errors abort layout and carry a reference into the formatting-object
//! tree. Recoverable defects (substituted defaults, degraded font tables,
//! clipped overflow) are collected as [`Warning`]s instead and surfaced
//! through [`Diagnostics`] alongside the `log` facade.

use crate::fo::NodeId;
use thiserror::Error;

/// The unified error type returned by all public layout entry points.
#[derive(Debug, Error)]
pub enum FolioError {
    /// The FO tree violates structural constraints (e.g. `fo:flow` outside
    /// `fo:page-sequence`, `fo:table-cell` outside `fo:table-row`).
    #[error("invalid document: {reason} (node #{node})")]
    InvalidDocument { node: NodeId, reason: String },

    /// An unparsable property value in a position where no default may be
    /// substituted (page geometry, column counts).
    #[error("invalid value {value:?} for '{property}' (node #{node})")]
    InvalidValue {
        node: NodeId,
        property: String,
        value: String,
    },

    /// A `master-reference` names no page master.
    #[error("unknown reference {reference:?} (node #{node})")]
    UnknownReference { node: NodeId, reference: String },

    /// A requested family has no backing font bytes and fallback is disabled.
    #[error("no font available for family {family:?} (weight {weight}, italic {italic})")]
    FontUnavailable {
        family: String,
        weight: u16,
        italic: bool,
    },

    /// A required font table is missing or corrupt.
    #[error("malformed font: {reason}")]
    FontMalformed { reason: String },

    /// Caller-requested abort, observed at a page boundary.
    #[error("layout cancelled")]
    Cancelled,

    /// A defensive guard tripped; indicates a bug, not bad input.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A recoverable defect encountered during layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub node: Option<NodeId>,
    pub kind: WarningKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A leaf style property failed to parse; its default was substituted.
    InvalidValue,
    /// A `ref-id` resolved to nothing; the citation renders as `??`.
    UnknownReference,
    /// An optional font table was malformed; the capability degraded.
    FontDegraded,
    /// A codepoint has no glyph in the resolved font.
    MissingGlyph,
    /// Content could not fit even with emergency breaking; it was clipped.
    LayoutOverflow,
    /// A `bidi-override` contained content beyond the simplified flip.
    BidiSimplified,
    /// A keep constraint could not be honored.
    KeepViolated,
}

/// Ordered collection of warnings produced by one layout run.
///
/// Every warning is also emitted through `log::warn!`, so embedders with a
/// logger configured see them without asking.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, node: Option<NodeId>, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        match node {
            Some(n) => log::warn!("{message} (node #{n})"),
            None => log::warn!("{message}"),
        }
        self.warnings.push(Warning {
            node,
            kind,
            message,
        });
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn count_of(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_collects_in_order() {
        let mut diags = Diagnostics::new();
        diags.warn(None, WarningKind::FontDegraded, "kern table truncated");
        diags.warn(Some(NodeId(3)), WarningKind::InvalidValue, "bad color");
        assert_eq!(diags.warnings().len(), 2);
        assert_eq!(diags.warnings()[0].kind, WarningKind::FontDegraded);
        assert_eq!(diags.warnings()[1].node, Some(NodeId(3)));
    }

    #[test]
    fn test_error_display_names_node() {
        let err = FolioError::UnknownReference {
            node: NodeId(7),
            reference: "chapter-master".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("chapter-master"));
        assert!(text.contains("#7"));
    }
}
