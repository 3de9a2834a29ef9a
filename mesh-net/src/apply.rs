//! Feeding received oplog entries through the clock and resolver.

use crate::error::NetError;
use docmesh_core::{resolve, HlcClock, MergePolicy, Resolution};
use docmesh_store::DocumentStore;
use docmesh_types::{Document, OplogEntry};
use std::collections::HashMap;

/// Apply a batch of remote oplog entries to the local store.
///
/// Every incoming timestamp advances the local clock, then each entry
/// is resolved against current document state (including documents
/// resolved earlier in the same batch, so intra-batch ordering is
/// honored) and the surviving writes land in one `apply_batch` call.
/// Only applied entries are appended to the oplog, which keeps
/// duplicate delivery idempotent.
///
/// Returns the number of entries that were applied.
pub async fn apply_entries<S>(
    store: &S,
    clock: &HlcClock,
    entries: &[OplogEntry],
    policy: MergePolicy,
) -> Result<usize, NetError>
where
    S: DocumentStore + ?Sized,
{
    let mut docs: HashMap<(String, String), Document> = HashMap::new();
    let mut applied = Vec::new();

    for entry in entries {
        clock.update(&entry.timestamp);

        let identity = (entry.collection.clone(), entry.key.clone());
        let local = match docs.get(&identity) {
            Some(pending) => Some(pending.clone()),
            None => store.get_document(&entry.collection, &entry.key).await?,
        };

        match resolve(local.as_ref(), entry, policy) {
            Ok(Resolution::Apply(doc)) => {
                docs.insert(identity, doc);
                applied.push(entry.clone());
            }
            Ok(Resolution::Ignore) => {}
            Err(err) => {
                tracing::warn!(
                    collection = %entry.collection,
                    key = %entry.key,
                    "dropping unresolvable entry: {err}"
                );
            }
        }
    }

    if applied.is_empty() {
        return Ok(0);
    }

    let count = applied.len();
    store
        .apply_batch(docs.into_values().collect(), applied)
        .await?;
    Ok(count)
}
