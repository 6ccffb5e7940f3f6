//! Installs state-machine outcomes onto the surface without trampling the
//! user's selection.

use uuid::Uuid;

use crate::step::{Selection, Step, StepError};
use crate::surface::Surface;

/// Replace the surface content with a freshly fetched document.
///
/// The selection becomes `selection` if given; otherwise a plain text
/// selection survives (clamped to the new document) and anything else
/// collapses to the document start. No-op on a torn-down surface.
pub fn apply_initial_document<S: Surface + ?Sized>(
    surface: &mut S,
    doc: &str,
    version: u64,
    selection: Option<Selection>,
) {
    if surface.is_destroyed() {
        return;
    }
    let previous = surface.selection();
    surface.replace_document(doc, version);

    let next = match selection {
        Some(selection) => selection,
        None if previous.is_text() => previous,
        None => Selection::cursor(0),
    };
    surface.set_selection(next.clamp(surface.len()));
    log::debug!("Installed document at version {version} ({} chars)", surface.len());
}

/// Apply remote steps in order, as remote-originated changes outside undo
/// history. Returns how many steps were incorporated.
///
/// Empty input and a torn-down surface are no-ops.
pub fn apply_remote_steps<S: Surface + ?Sized>(
    surface: &mut S,
    steps: &[Step],
    client_ids: &[Uuid],
    own_client: Uuid,
) -> Result<usize, StepError> {
    if steps.is_empty() || surface.is_destroyed() {
        return Ok(0);
    }
    if client_ids.len() != steps.len() {
        log::warn!(
            "Remote batch carries {} steps but {} client ids",
            steps.len(),
            client_ids.len()
        );
    }
    surface.receive_steps(steps, client_ids, own_client)?;
    log::trace!("Applied {} remote steps, now at version {}", steps.len(), surface.version());
    Ok(steps.len())
}
