//! Edit steps and selections over a plain-text document.
//!
//! Positions are `char` offsets, so a step built against one document
//! applies identically on every peer regardless of UTF-8 byte layout.
//!
//! Steps are the unit of synchronization: the authority orders them, the
//! client sends the ones it has not had confirmed yet, and every step that
//! arrives from the authority is rebased under the local unconfirmed ones.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a step does not fit the document it is applied to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("position {pos} is outside a document of length {len}")]
    OutOfRange { pos: usize, len: usize },
    #[error("invalid range {from}..{to}")]
    InvalidRange { from: usize, to: usize },
}

/// Which side of an insertion a mapped position sticks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Before,
    After,
}

/// A single edit operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// Insert `text` so that it starts at `pos`.
    Insert { pos: usize, text: String },
    /// Remove the characters in `from..to`.
    Delete { from: usize, to: usize },
}

impl Step {
    pub fn insert(pos: usize, text: impl Into<String>) -> Self {
        Self::Insert { pos, text: text.into() }
    }

    pub fn delete(from: usize, to: usize) -> Self {
        Self::Delete { from, to }
    }

    /// Apply the step to `doc`, returning the new document.
    pub fn apply(&self, doc: &str) -> Result<String, StepError> {
        let len = doc.chars().count();
        match self {
            Self::Insert { pos, text } => {
                if *pos > len {
                    return Err(StepError::OutOfRange { pos: *pos, len });
                }
                let at = byte_offset(doc, *pos);
                let mut out = String::with_capacity(doc.len() + text.len());
                out.push_str(&doc[..at]);
                out.push_str(text);
                out.push_str(&doc[at..]);
                Ok(out)
            }
            Self::Delete { from, to } => {
                if from > to {
                    return Err(StepError::InvalidRange { from: *from, to: *to });
                }
                if *to > len {
                    return Err(StepError::OutOfRange { pos: *to, len });
                }
                let start = byte_offset(doc, *from);
                let end = byte_offset(doc, *to);
                let mut out = String::with_capacity(doc.len() - (end - start));
                out.push_str(&doc[..start]);
                out.push_str(&doc[end..]);
                Ok(out)
            }
        }
    }

    /// Map a position in the document before this step to the document after it.
    pub fn map_pos(&self, pos: usize, assoc: Assoc) -> usize {
        match self {
            Self::Insert { pos: at, text } => {
                let n = text.chars().count();
                if pos > *at || (pos == *at && assoc == Assoc::After) {
                    pos + n
                } else {
                    pos
                }
            }
            Self::Delete { from, to } => {
                if pos <= *from {
                    pos
                } else if pos >= *to {
                    pos - (to - from)
                } else {
                    *from
                }
            }
        }
    }

    /// Rebase this step so it applies after `over`, both having been built
    /// against the same document.
    ///
    /// Returns `None` when `over` already removed everything this step touched.
    pub fn map(&self, over: &Step, assoc: Assoc) -> Option<Step> {
        match self {
            Self::Insert { pos, text } => Some(Self::Insert {
                pos: over.map_pos(*pos, assoc),
                text: text.clone(),
            }),
            Self::Delete { from, to } => {
                let from = over.map_pos(*from, Assoc::After);
                let to = over.map_pos(*to, Assoc::Before);
                (from < to).then_some(Self::Delete { from, to })
            }
        }
    }

    /// Whether the step leaves the document unchanged.
    pub fn is_noop(&self) -> bool {
        match self {
            Self::Insert { text, .. } => text.is_empty(),
            Self::Delete { from, to } => from >= to,
        }
    }
}

/// Rebase `local` steps (built on some document `D`) over `remote` steps
/// (also built on `D`).
///
/// Returns `(local', remote')`: `local'` applies on `D + remote`, and
/// `remote'` maps positions from `D + local` to the rebased document. Local
/// inserts at the same position as a remote insert land after it.
pub fn rebase(local: &[Step], remote: &[Step]) -> (Vec<Step>, Vec<Step>) {
    let mut remote: Vec<Option<Step>> = remote.iter().cloned().map(Some).collect();
    let mut rebased = Vec::with_capacity(local.len());

    for step in local {
        let mut current = Some(step.clone());
        for slot in remote.iter_mut() {
            let (Some(ours), Some(theirs)) = (current.as_ref(), slot.as_ref()) else {
                continue;
            };
            let ours_next = ours.map(theirs, Assoc::After);
            let theirs_next = theirs.map(ours, Assoc::Before);
            current = ours_next;
            *slot = theirs_next;
        }
        if let Some(step) = current {
            rebased.push(step);
        }
    }

    (rebased, remote.into_iter().flatten().collect())
}

/// Cursor or selection on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    /// Plain text range; `anchor == head` is a collapsed cursor.
    Text { anchor: usize, head: usize },
    /// A selected node starting at `pos`.
    Node { pos: usize },
    /// Whole document.
    All,
}

impl Default for Selection {
    fn default() -> Self {
        Self::cursor(0)
    }
}

impl Selection {
    pub fn cursor(pos: usize) -> Self {
        Self::Text { anchor: pos, head: pos }
    }

    pub fn text(anchor: usize, head: usize) -> Self {
        Self::Text { anchor, head }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Clamp positions into a document of `len` characters.
    pub fn clamp(self, len: usize) -> Self {
        match self {
            Self::Text { anchor, head } => Self::Text {
                anchor: anchor.min(len),
                head: head.min(len),
            },
            Self::Node { pos } => Self::Node { pos: pos.min(len) },
            Self::All => Self::All,
        }
    }

    /// Map the selection through a sequence of steps.
    pub fn map_through(self, steps: &[Step]) -> Self {
        steps.iter().fold(self, |sel, step| match sel {
            Self::Text { anchor, head } => Self::Text {
                anchor: step.map_pos(anchor, Assoc::After),
                head: step.map_pos(head, Assoc::After),
            },
            Self::Node { pos } => Self::Node { pos: step.map_pos(pos, Assoc::After) },
            Self::All => Self::All,
        })
    }
}

fn byte_offset(doc: &str, pos: usize) -> usize {
    doc.char_indices().nth(pos).map_or(doc.len(), |(i, _)| i)
}
