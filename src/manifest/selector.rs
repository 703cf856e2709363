//! Manifest selection and sequence monotonicity.

use tracing::debug;

use super::Manifest;
use crate::config::ProcessMode;
use crate::error::IngestError;
use crate::metadata::Batch;

/// Sorts discovered manifests into processing order: (sequence, date) when
/// the pattern carries a sequence, date otherwise. The sort is stable so
/// ties keep discovery order.
pub fn sort_manifests(manifests: &mut [Manifest], sequence_mode: bool) {
    if sequence_mode {
        manifests.sort_by_key(|m| (m.sequence.unwrap_or(0), m.date));
    } else {
        manifests.sort_by_key(|m| m.date);
    }
}

/// Picks the next eligible manifest.
///
/// In `move` mode processed manifests have been physically relocated, so
/// selection is simply the earliest pending manifest at iteration position
/// `position`. In `history` mode manifests are retained and selection is
/// the earliest one whose filename is not recorded in batch history.
#[must_use]
pub fn find_manifest_to_process<'a>(
    manifests: &'a [Manifest],
    mode: ProcessMode,
    history: &[Batch],
    position: usize,
) -> Option<&'a Manifest> {
    match mode {
        ProcessMode::Move => manifests.get(position),
        ProcessMode::History => manifests
            .iter()
            .find(|m| !history.iter().any(|b| b.filename == m.filename())),
    }
}

/// Enforces sequence monotonicity for history-mode sequenced feeds.
///
/// The chosen manifest's sequence must equal the previous batch's sequence
/// plus one, or 1 when there is no previous batch. Anything else means a
/// gap or duplicate and aborts the run.
///
/// # Errors
///
/// Returns [`IngestError::Sequence`] on violation.
pub fn check_sequence(manifest: &Manifest, previous: Option<&Batch>) -> Result<(), IngestError> {
    let expected = previous
        .and_then(|batch| batch.sequence)
        .map_or(1, |sequence| sequence + 1);
    let found = manifest.sequence.unwrap_or(0);
    if found != expected {
        return Err(IngestError::sequence(&manifest.path, expected, found));
    }
    debug!(path = %manifest.path, sequence = found, "manifest sequence verified");
    Ok(())
}
