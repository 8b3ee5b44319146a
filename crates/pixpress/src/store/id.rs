use uuid::Uuid;

use crate::store::TaskStore;

/// Produces a job id that is not currently present in the store.
///
/// A v4 UUID collision is astronomically unlikely, but the store is the
/// source of truth, so the id is re-checked against it before being handed
/// out. On a collision we log and draw again.
pub fn generate_unique_id(store: &TaskStore) -> String {
    loop {
        let id = Uuid::new_v4().to_string();
        if store.contains(&id) {
            log::warn!("Job id collision on {}, regenerating", id);
            continue;
        }
        return id;
    }
}
