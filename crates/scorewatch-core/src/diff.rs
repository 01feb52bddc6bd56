//! Keyed snapshot diff.
//!
//! Presence of a key drives Added/Removed; deep payload inequality drives
//! Updated. Output order: Added/Updated in the new snapshot's order, then
//! Removed in the old snapshot's order.

use std::collections::{HashMap, HashSet};

use crate::types::{ChangeRecord, Record, Snapshot};

/// Compute the change list turning `old` into `new`.
///
/// Returns an empty list when both snapshots hold the same key → payload
/// mapping, regardless of record order.
pub fn detect_changes(old: &Snapshot, new: &Snapshot) -> Vec<ChangeRecord> {
    let old_index = index_by_id(old);
    let new_index = index_by_id(new);
    let mut changes = Vec::new();

    for id in ordered_ids(new) {
        let Some(new_record) = new_index.get(id) else {
            continue;
        };
        match old_index.get(id) {
            None => changes.push(ChangeRecord::Added {
                id: id.to_string(),
                data: new_record.data.clone(),
            }),
            Some(old_record) if old_record.data != new_record.data => {
                changes.push(ChangeRecord::Updated {
                    id: id.to_string(),
                    old_data: old_record.data.clone(),
                    new_data: new_record.data.clone(),
                });
            }
            Some(_) => {}
        }
    }

    for id in ordered_ids(old) {
        if new_index.contains_key(id) {
            continue;
        }
        if let Some(old_record) = old_index.get(id) {
            changes.push(ChangeRecord::Removed {
                id: id.to_string(),
                data: old_record.data.clone(),
            });
        }
    }

    changes
}

/// id → record; a later duplicate overrides an earlier one.
fn index_by_id(snapshot: &Snapshot) -> HashMap<&str, &Record> {
    snapshot.iter().map(|r| (r.id.as_str(), r)).collect()
}

/// Distinct ids in order of first occurrence.
fn ordered_ids(snapshot: &Snapshot) -> Vec<&str> {
    let mut seen = HashSet::new();
    snapshot
        .iter()
        .map(|r| r.id.as_str())
        .filter(|id| seen.insert(*id))
        .collect()
}
