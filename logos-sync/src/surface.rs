//! The editable document surface consumed by the synchronization client.
//!
//! [`Surface`] is the contract the client needs from an editor: a version
//! counter, a selection, local transaction application, and the remote side
//! (installing a fetched document, receiving ordered remote steps, handing
//! out and confirming sendable steps).
//!
//! [`TextSurface`] is the in-memory implementation used by the tests, the
//! benchmarks and headless peers.

use uuid::Uuid;

use crate::step::{rebase, Selection, Step, StepError};

/// Where a transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The user typing into the surface.
    Local,
    /// The synchronization machine itself (remote application, selection restore).
    Sync,
}

/// A batch of steps and/or a selection change submitted to the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub steps: Vec<Step>,
    pub selection: Option<Selection>,
    pub origin: Origin,
    pub add_to_history: bool,
}

impl Transaction {
    /// A user edit.
    pub fn local(steps: Vec<Step>) -> Self {
        Self { steps, selection: None, origin: Origin::Local, add_to_history: true }
    }

    /// A user selection change that leaves the document alone.
    pub fn select(selection: Selection) -> Self {
        Self { steps: Vec::new(), selection: Some(selection), origin: Origin::Local, add_to_history: false }
    }

    /// A transaction issued by the synchronization machine.
    pub fn sync(steps: Vec<Step>, selection: Option<Selection>) -> Self {
        Self { steps, selection, origin: Origin::Sync, add_to_history: false }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn changes_document(&self) -> bool {
        self.steps.iter().any(|step| !step.is_noop())
    }
}

/// Local steps not yet confirmed by the manager, with the version they build on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sendable {
    pub version: u64,
    pub steps: Vec<Step>,
}

/// What the synchronization client needs from an editor.
pub trait Surface: Send + 'static {
    /// Confirmed version: steps incorporated from the manager's history.
    fn version(&self) -> u64;

    /// Current document text, including unconfirmed local steps.
    fn text(&self) -> String;

    /// Document length in characters.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn selection(&self) -> Selection;

    fn set_selection(&mut self, selection: Selection);

    fn is_destroyed(&self) -> bool;

    /// Tear the surface down; every later mutation is ignored.
    fn destroy(&mut self);

    /// Apply a transaction. Steps become unconfirmed local steps.
    fn apply_transaction(&mut self, transaction: &Transaction) -> Result<(), StepError>;

    /// Replace the whole document and reset the confirmed version.
    fn replace_document(&mut self, doc: &str, version: u64);

    /// Incorporate ordered remote steps. Steps tagged with `own_client`
    /// that match the oldest unconfirmed steps confirm them instead of being
    /// applied twice. Never recorded in undo history.
    fn receive_steps(
        &mut self,
        steps: &[Step],
        client_ids: &[Uuid],
        own_client: Uuid,
    ) -> Result<(), StepError>;

    /// Unconfirmed local steps, or None when everything is confirmed.
    fn sendable_steps(&self) -> Option<Sendable>;

    fn has_sendable(&self) -> bool {
        self.sendable_steps().is_some()
    }

    /// Mark the oldest `count` unconfirmed steps as accepted by the manager.
    fn confirm_steps(&mut self, count: usize) -> Result<(), StepError>;
}

/// In-memory text surface.
#[derive(Debug, Clone)]
pub struct TextSurface {
    /// Document at `version`.
    confirmed: String,
    version: u64,
    /// Local steps on top of `confirmed`.
    unconfirmed: Vec<Step>,
    /// `confirmed` with `unconfirmed` applied.
    doc: String,
    selection: Selection,
    /// Undo history entries; only local edits add to it.
    history_depth: usize,
    destroyed: bool,
}

impl Default for TextSurface {
    fn default() -> Self {
        Self::new("", 0)
    }
}

impl TextSurface {
    pub fn new(doc: impl Into<String>, version: u64) -> Self {
        let doc = doc.into();
        Self {
            confirmed: doc.clone(),
            version,
            unconfirmed: Vec::new(),
            doc,
            selection: Selection::default(),
            history_depth: 0,
            destroyed: false,
        }
    }

    /// Document at the confirmed version.
    pub fn confirmed_text(&self) -> &str {
        &self.confirmed
    }

    pub fn unconfirmed_len(&self) -> usize {
        self.unconfirmed.len()
    }

    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    /// Rebuild the visible document from `confirmed` + `unconfirmed`,
    /// dropping the first local step that no longer applies and everything after it.
    fn rebuild(&mut self) {
        let mut doc = self.confirmed.clone();
        for (i, step) in self.unconfirmed.iter().enumerate() {
            match step.apply(&doc) {
                Ok(next) => doc = next,
                Err(e) => {
                    log::warn!(
                        "Dropping {} unconfirmed steps that no longer apply: {e}",
                        self.unconfirmed.len() - i
                    );
                    self.unconfirmed.truncate(i);
                    break;
                }
            }
        }
        self.doc = doc;
        self.selection = self.selection.clamp(self.len());
    }
}

fn apply_steps(doc: &str, steps: &[Step]) -> Result<String, StepError> {
    steps
        .iter()
        .try_fold(doc.to_string(), |doc, step| step.apply(&doc))
}

impl Surface for TextSurface {
    fn version(&self) -> u64 {
        self.version
    }

    fn text(&self) -> String {
        self.doc.clone()
    }

    fn len(&self) -> usize {
        self.doc.chars().count()
    }

    fn selection(&self) -> Selection {
        self.selection
    }

    fn set_selection(&mut self, selection: Selection) {
        if self.destroyed {
            return;
        }
        self.selection = selection.clamp(self.len());
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }

    fn apply_transaction(&mut self, transaction: &Transaction) -> Result<(), StepError> {
        if self.destroyed {
            return Ok(());
        }
        let steps: Vec<Step> = transaction
            .steps
            .iter()
            .filter(|step| !step.is_noop())
            .cloned()
            .collect();
        // All or nothing.
        let doc = apply_steps(&self.doc, &steps)?;

        if !steps.is_empty() {
            self.selection = self.selection.map_through(&steps);
            self.doc = doc;
            self.unconfirmed.extend(steps);
            if transaction.add_to_history {
                self.history_depth += 1;
            }
        }
        let selection = transaction.selection.unwrap_or(self.selection);
        self.selection = selection.clamp(self.len());
        Ok(())
    }

    fn replace_document(&mut self, doc: &str, version: u64) {
        if self.destroyed {
            return;
        }
        self.confirmed = doc.to_string();
        self.version = version;
        // Unconfirmed edits are replayed on the new baseline where they still fit.
        self.rebuild();
    }

    fn receive_steps(
        &mut self,
        steps: &[Step],
        client_ids: &[Uuid],
        own_client: Uuid,
    ) -> Result<(), StepError> {
        if self.destroyed || steps.is_empty() {
            return Ok(());
        }

        // Our own steps echoed back at the head of the batch confirm local work.
        let mut confirmed = self.confirmed.clone();
        let mut echoed = 0;
        for (step, client) in steps.iter().zip(client_ids) {
            if *client != own_client || self.unconfirmed.get(echoed) != Some(step) {
                break;
            }
            confirmed = step.apply(&confirmed)?;
            echoed += 1;
        }

        let remote = &steps[echoed..];
        let confirmed = apply_steps(&confirmed, remote)?;
        let (rebased, remote_mapped) = rebase(&self.unconfirmed[echoed..], remote);

        self.confirmed = confirmed;
        self.version += steps.len() as u64;
        self.unconfirmed = rebased;
        self.selection = self.selection.map_through(&remote_mapped);
        self.rebuild();
        Ok(())
    }

    fn sendable_steps(&self) -> Option<Sendable> {
        if self.destroyed || self.unconfirmed.is_empty() {
            return None;
        }
        Some(Sendable { version: self.version, steps: self.unconfirmed.clone() })
    }

    fn has_sendable(&self) -> bool {
        !self.destroyed && !self.unconfirmed.is_empty()
    }

    fn confirm_steps(&mut self, count: usize) -> Result<(), StepError> {
        if self.destroyed || count == 0 {
            return Ok(());
        }
        if count > self.unconfirmed.len() {
            return Err(StepError::OutOfRange { pos: count, len: self.unconfirmed.len() });
        }
        self.confirmed = apply_steps(&self.confirmed, &self.unconfirmed[..count])?;
        self.unconfirmed.drain(..count);
        self.version += count as u64;
        Ok(())
    }
}
