//! Concurrent download of a finished job's artifacts.
//!
//! The representative image is required. The per-character slots are best
//! effort: each download writes only its own slot, and a failed slot stays
//! `None` without affecting the others.

use inkly_core::{ArtifactReference, CHARACTER_SLOT_COUNT, SlotKind};
use inkly_protocol::{CharacterSlot, JobClient, character_slot_paths};
use tokio::task::JoinSet;

use crate::{AppError, run_blocking};

/// Downloaded images of one finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet {
    /// Representative generated image.
    pub representative: Vec<u8>,
    /// Characters cut from the user's sample, by slot index.
    pub handwriting: Vec<Option<Vec<u8>>>,
    /// Generated characters, by slot index.
    pub generation: Vec<Option<Vec<u8>>>,
}

impl ResultSet {
    fn empty(representative: Vec<u8>) -> Self {
        Self {
            representative,
            handwriting: vec![None; CHARACTER_SLOT_COUNT],
            generation: vec![None; CHARACTER_SLOT_COUNT],
        }
    }

    /// Returns one slot image, if it downloaded.
    pub fn slot(&self, kind: SlotKind, index: usize) -> Option<&[u8]> {
        let slots = match kind {
            SlotKind::Handwriting => &self.handwriting,
            SlotKind::Generation => &self.generation,
        };
        slots.get(index).and_then(|slot| slot.as_deref())
    }

    /// Number of slots that downloaded, across both kinds.
    pub fn available_slots(&self) -> usize {
        self.handwriting
            .iter()
            .chain(self.generation.iter())
            .filter(|slot| slot.is_some())
            .count()
    }

    fn slots_mut(&mut self, kind: SlotKind) -> &mut [Option<Vec<u8>>] {
        match kind {
            SlotKind::Handwriting => &mut self.handwriting,
            SlotKind::Generation => &mut self.generation,
        }
    }
}

/// Downloads the representative and every character slot of `job_id`.
///
/// # Errors
/// Returns the representative download failure. Slot failures are logged
/// and leave the slot empty.
pub async fn fetch_result_set(
    client: &JobClient,
    job_id: &str,
    representative: &ArtifactReference,
) -> Result<ResultSet, AppError> {
    let mut slots = JoinSet::new();
    for CharacterSlot { kind, index, path } in character_slot_paths(job_id) {
        let client = client.clone();
        slots.spawn_blocking(move || (kind, index, client.download_artifact(&path)));
    }

    let representative_client = client.clone();
    let representative_path = representative.as_str().to_string();
    let representative = run_blocking(move || {
        representative_client.download_artifact(&representative_path)
    })
    .await?;

    let mut results = ResultSet::empty(representative);
    while let Some(joined) = slots.join_next().await {
        match joined {
            Ok((kind, index, Ok(bytes))) => {
                if let Some(slot) = results.slots_mut(kind).get_mut(index) {
                    *slot = Some(bytes);
                }
            }
            Ok((kind, index, Err(error))) => {
                tracing::warn!(job_id, ?kind, index, %error, "character slot unavailable");
            }
            Err(error) => {
                tracing::warn!(job_id, %error, "character slot worker failed");
            }
        }
    }

    tracing::info!(
        job_id,
        available = results.available_slots(),
        total = CHARACTER_SLOT_COUNT * 2,
        "result set downloaded"
    );
    Ok(results)
}
