//! Snapshot types for backing up and restoring the item store.
//!
//! A snapshot holds every item in the same record schema used on the wire,
//! plus the local bookkeeping (origin, delete time) needed to resume
//! ownership and purging after a restart.

use crate::{error::Result, Error, Item, ItemId, ItemRecord, Origin, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// One item in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedItem {
    pub item: ItemRecord,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
    #[serde(default)]
    pub update_needed: bool,
}

impl From<&Item> for SavedItem {
    fn from(item: &Item) -> Self {
        Self {
            item: ItemRecord::from(item),
            origin: item.origin(),
            deleted_at: item.deleted_at(),
            update_needed: item.update_needed(),
        }
    }
}

impl SavedItem {
    /// Decode back into an item.
    pub fn into_item(self) -> Result<Item> {
        let mut item = self
            .item
            .into_item(self.origin)
            .map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        item.set_deleted_at(self.deleted_at);
        item.set_update_needed(self.update_needed);
        Ok(item)
    }
}

/// A point-in-time copy of every item known to a node.
///
/// Uses BTreeMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Uuid of the node that saved the snapshot
    pub node_id: ItemId,
    /// When the snapshot was taken
    pub saved_at: Timestamp,
    /// All items by uuid
    pub items: BTreeMap<ItemId, SavedItem>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(node_id: ItemId, saved_at: Timestamp) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            node_id,
            saved_at,
            items: BTreeMap::new(),
        }
    }

    pub fn add_item(&mut self, item: &Item) {
        self.items.insert(item.uuid(), SavedItem::from(item));
    }

    pub fn get_item(&self, uuid: &ItemId) -> Option<&SavedItem> {
        self.items.get(uuid)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Count items that are live and not deleted.
    pub fn active_item_count(&self) -> usize {
        self.items
            .values()
            .filter(|s| !s.item.pending && !s.item.is_deleted())
            .count()
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{units::SpeedUnits, ItemFlags};
    use uuid::Uuid;

    fn track(origin: Origin) -> Item {
        let mut item = Item::new(Uuid::new_v4(), "track", "", origin, false, 1_000);
        item.update_speed_field("speed", 12.0, SpeedUnits::Knots, 1_001)
            .unwrap();
        item
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = StoreSnapshot::new(Uuid::nil(), 5);
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.item_count(), 0);
    }

    #[test]
    fn json_roundtrip_keeps_local_bookkeeping() {
        let mut snapshot = StoreSnapshot::new(Uuid::new_v4(), 5);
        let mut deleted = track(Origin::Local);
        deleted.append_flags(ItemFlags::DELETED, 2_000);
        snapshot.add_item(&deleted);
        snapshot.add_item(&track(Origin::Remote));

        let json = snapshot.to_json().unwrap();
        let restored = StoreSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, restored);

        let item = restored
            .get_item(&deleted.uuid())
            .unwrap()
            .clone()
            .into_item()
            .unwrap();
        assert_eq!(item.origin(), Origin::Local);
        assert_eq!(item.deleted_at(), Some(2_000));
        assert_eq!(item.fields(), deleted.fields());
    }

    #[test]
    fn deterministic_serialization() {
        let a = track(Origin::Local);
        let b = track(Origin::Local);
        let mut snapshot1 = StoreSnapshot::new(Uuid::nil(), 5);
        let mut snapshot2 = StoreSnapshot::new(Uuid::nil(), 5);
        snapshot1.add_item(&a);
        snapshot1.add_item(&b);
        snapshot2.add_item(&b);
        snapshot2.add_item(&a);
        assert_eq!(snapshot1.to_json().unwrap(), snapshot2.to_json().unwrap());
    }

    #[test]
    fn active_item_count() {
        let mut snapshot = StoreSnapshot::new(Uuid::nil(), 5);
        let mut deleted = track(Origin::Local);
        deleted.append_flags(ItemFlags::DELETED, 2_000);
        snapshot.add_item(&deleted);
        snapshot.add_item(&track(Origin::Local));
        assert_eq!(snapshot.item_count(), 2);
        assert_eq!(snapshot.active_item_count(), 1);
    }

    #[test]
    fn reject_future_format_version() {
        let json = format!(
            r#"{{"formatVersion": 999, "nodeId": "{}", "savedAt": 0, "items": {{}}}}"#,
            Uuid::nil()
        );
        let result = StoreSnapshot::from_json(&json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }
}
