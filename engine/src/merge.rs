//! Merge rule for items received from peers.
//!
//! Merging is last-writer-wins per item: an incoming copy replaces the local
//! one only if its timestamp is strictly newer. At equal timestamps a delete
//! beats a live copy, so a delete and an edit stamped with the same time
//! converge to deleted on every node. Applying the same record twice is a
//! no-op the second time.

use crate::{Item, ItemId, ItemRecord, Timestamp};
use serde::{Deserialize, Serialize};

/// What the receiving node knows about itself when merging.
#[derive(Debug, Clone, Copy)]
pub struct MergePolicy<'a> {
    /// Uuid of the receiving node's own self-item
    pub self_id: ItemId,
    /// The receiving node's state string
    pub node_state: &'a str,
    /// Reject updates that would move an item away from our state
    pub check_state: bool,
}

/// Why an incoming record was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    /// The record claims to be our own self-item
    OwnNodeItem,
    /// We own the item and the record carries another state
    StateMismatch { expected: String, got: String },
    /// The record is stamped too far ahead of our wall clock
    FutureTimestamp { timestamp: Timestamp, limit: Timestamp },
}

/// How an incoming record should be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Unknown uuid, insert as new
    Insert,
    /// Newer than the local copy, replace it wholesale
    Replace,
    /// Older than or equal to the local copy, ignore
    Stale,
    /// Refused by policy
    Reject(RejectReason),
}

/// Outcome of applying one record, as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
    Stale,
    Rejected(RejectReason),
}

/// Whether a copy stamped `incoming` beats a copy stamped `local`.
pub fn incoming_wins(
    local: Timestamp,
    local_deleted: bool,
    incoming: Timestamp,
    incoming_deleted: bool,
) -> bool {
    incoming > local || (incoming == local && incoming_deleted && !local_deleted)
}

/// Decide how to apply `incoming` given the local copy, if any.
pub fn resolve(local: Option<&Item>, incoming: &ItemRecord, policy: &MergePolicy<'_>) -> Resolution {
    if incoming.uuid == policy.self_id {
        return Resolution::Reject(RejectReason::OwnNodeItem);
    }

    let Some(local) = local else {
        return Resolution::Insert;
    };

    if !incoming_wins(
        local.timestamp(),
        local.is_deleted(),
        incoming.timestamp,
        incoming.is_deleted(),
    ) {
        return Resolution::Stale;
    }

    let we_own_it = !policy.node_state.is_empty() && local.state() == policy.node_state;
    if policy.check_state && we_own_it && incoming.state != policy.node_state {
        return Resolution::Reject(RejectReason::StateMismatch {
            expected: policy.node_state.to_string(),
            got: incoming.state.clone(),
        });
    }

    Resolution::Replace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ItemFlags, Origin};
    use uuid::Uuid;

    fn local(state: &str, timestamp: Timestamp) -> Item {
        Item::new(Uuid::new_v4(), "track", state, Origin::Remote, false, timestamp)
    }

    fn record_for(item: &Item, state: &str, timestamp: Timestamp, deleted: bool) -> ItemRecord {
        let mut record = ItemRecord::from(item);
        record.state = state.to_string();
        record.timestamp = timestamp;
        record.flags = if deleted {
            ItemFlags::DELETED
        } else {
            ItemFlags::NONE
        };
        record
    }

    fn policy(check_state: bool) -> MergePolicy<'static> {
        MergePolicy {
            self_id: Uuid::nil(),
            node_state: "primary",
            check_state,
        }
    }

    #[test]
    fn unknown_item_is_inserted() {
        let item = local("", 10);
        let record = ItemRecord::from(&item);
        assert_eq!(resolve(None, &record, &policy(false)), Resolution::Insert);
    }

    #[test]
    fn newer_replaces_older_is_stale() {
        let item = local("", 10);
        let newer = record_for(&item, "", 11, false);
        let same = record_for(&item, "", 10, false);
        let older = record_for(&item, "", 9, false);
        assert_eq!(resolve(Some(&item), &newer, &policy(false)), Resolution::Replace);
        assert_eq!(resolve(Some(&item), &same, &policy(false)), Resolution::Stale);
        assert_eq!(resolve(Some(&item), &older, &policy(false)), Resolution::Stale);
    }

    #[test]
    fn delete_wins_tie() {
        let item = local("", 10);
        let delete = record_for(&item, "", 10, true);
        assert_eq!(resolve(Some(&item), &delete, &policy(false)), Resolution::Replace);
    }

    #[test]
    fn newer_live_beats_older_delete() {
        assert!(incoming_wins(10, true, 11, false));
        assert!(!incoming_wins(10, true, 10, false));
        assert!(!incoming_wins(10, true, 10, true));
    }

    #[test]
    fn own_node_item_is_rejected() {
        let item = local("", 10);
        let mut record = ItemRecord::from(&item);
        record.uuid = Uuid::nil();
        assert_eq!(
            resolve(None, &record, &policy(false)),
            Resolution::Reject(RejectReason::OwnNodeItem)
        );
    }

    #[test]
    fn check_state_protects_owned_items() {
        let item = local("primary", 10);
        let hijack = record_for(&item, "backup", 20, false);
        assert!(matches!(
            resolve(Some(&item), &hijack, &policy(true)),
            Resolution::Reject(RejectReason::StateMismatch { .. })
        ));
        assert_eq!(resolve(Some(&item), &hijack, &policy(false)), Resolution::Replace);

        let same_state = record_for(&item, "primary", 20, false);
        assert_eq!(resolve(Some(&item), &same_state, &policy(true)), Resolution::Replace);
    }

    #[test]
    fn check_state_ignores_items_we_do_not_own() {
        let item = local("backup", 10);
        let update = record_for(&item, "other", 20, false);
        assert_eq!(resolve(Some(&item), &update, &policy(true)), Resolution::Replace);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_exactly_one_direction_wins(
                a in 0u64..50,
                b in 0u64..50,
                a_deleted in any::<bool>(),
                b_deleted in any::<bool>(),
            ) {
                let a_over_b = incoming_wins(b, b_deleted, a, a_deleted);
                let b_over_a = incoming_wins(a, a_deleted, b, b_deleted);
                prop_assert!(!(a_over_b && b_over_a));
                if a != b || a_deleted != b_deleted {
                    prop_assert!(a_over_b || b_over_a);
                }
            }
        }
    }
}
