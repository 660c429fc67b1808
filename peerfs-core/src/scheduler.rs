//! Scheduler: assign chunks to providers.

use crate::identity::PeerId;

/// Assign each chunk index to a provider, round-robin: chunk `i` goes to `providers[i % len]`.
/// Deterministic and needs no coordination with providers. Empty providers gives an empty assignment.
pub fn assign_chunks_to_peers(chunk_count: usize, providers: &[PeerId]) -> Vec<PeerId> {
    if providers.is_empty() {
        return vec![];
    }
    (0..chunk_count)
        .map(|i| providers[i % providers.len()])
        .collect()
}
