//! Edit admission: which transactions the surface may accept right now.

use crate::state::StateKind;
use crate::surface::{Origin, Transaction};

/// Decide whether `transaction` may be applied while the machine is in `state`.
///
/// Transactions issued by the synchronization machine always pass, as do
/// transactions that leave the document alone (pure selection changes).
/// Document edits from the user are refused while no baseline is installed
/// (`Init`, `InitDoc`, `InitError`) and after synchronization halted
/// (`FatalError`).
pub fn admits(state: StateKind, transaction: &Transaction) -> bool {
    if transaction.origin == Origin::Sync || !transaction.changes_document() {
        return true;
    }
    state.accepts_local_edits()
}
