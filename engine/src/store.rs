//! Store - the in-memory item database of one node.
//!
//! The Store holds the node's own self-item plus every item it knows about,
//! applies local edits, merges records received from peers, and produces the
//! outbound record lists for the update, status and snapshot messages.
//! It never performs IO; the caller passes the current time in.

use crate::{
    clock::MICROS_PER_SEC,
    error::Result,
    merge::{self, MergeOutcome, MergePolicy, RejectReason, Resolution},
    snapshot::StoreSnapshot,
    EnumDefinitions, Error, HybridClock, Item, ItemFlags, ItemId, ItemRecord, Message,
    MessageKind, Origin, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Item type of every node's self-item.
pub const SELF_ITEM_TYPE: &str = "node";

/// How far ahead of local wall time an incoming record may be stamped.
pub const MAX_FUTURE_SKEW: Timestamp = 24 * 60 * 60 * MICROS_PER_SEC;

/// Behaviour settings fixed when the store is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// State string stamped on items this node creates
    pub node_state: String,
    /// Refuse edits that would move owned items away from `node_state`
    pub check_state: bool,
    /// How long a deleted item is kept before it is purged
    pub purge_timeout: Timestamp,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            node_state: String::new(),
            check_state: false,
            purge_timeout: crate::clock::secs(60),
        }
    }
}

/// Summary of merging one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// The message came from this node and was skipped
    pub echo: bool,
    pub inserted: usize,
    pub replaced: usize,
    pub stale: usize,
    pub rejected: Vec<(ItemId, RejectReason)>,
    /// Records that failed to decode
    pub invalid: usize,
}

impl MergeReport {
    /// Whether any record changed the store.
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced > 0
    }

    /// Count one merged record.
    pub fn add(&mut self, uuid: ItemId, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Replaced => self.replaced += 1,
            MergeOutcome::Stale => self.stale += 1,
            MergeOutcome::Rejected(reason) => self.rejected.push((uuid, reason)),
        }
    }
}

/// The item database of one node.
#[derive(Debug, Clone)]
pub struct Store {
    node_id: ItemId,
    config: StoreConfig,
    clock: HybridClock,
    items: BTreeMap<ItemId, Item>,
    enums: EnumDefinitions,
}

impl Store {
    /// Create a store holding only the node's self-item.
    pub fn new(node_id: ItemId, config: StoreConfig, enums: EnumDefinitions, now: Timestamp) -> Self {
        let mut clock = HybridClock::new();
        let created = clock.tick(now);
        let self_item = Item::new(
            node_id,
            SELF_ITEM_TYPE,
            config.node_state.clone(),
            Origin::Local,
            false,
            created,
        );

        let mut items = BTreeMap::new();
        items.insert(node_id, self_item);

        Self {
            node_id,
            config,
            clock,
            items,
            enums,
        }
    }

    /// Uuid of this node's self-item.
    pub fn node_id(&self) -> ItemId {
        self.node_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn clock(&self) -> &HybridClock {
        &self.clock
    }

    pub fn enums(&self) -> &EnumDefinitions {
        &self.enums
    }

    pub fn set_enums(&mut self, enums: EnumDefinitions) {
        self.enums = enums;
    }

    /// Next local modification timestamp.
    pub fn tick(&mut self, now: Timestamp) -> Timestamp {
        self.clock.tick(now)
    }

    pub fn self_item(&self) -> &Item {
        // The self-item is inserted at construction and never removed.
        &self.items[&self.node_id]
    }

    /// Edit the self-item. State checks do not apply to it.
    pub fn edit_self<R>(
        &mut self,
        now: Timestamp,
        f: impl FnOnce(&mut Item, Timestamp) -> Result<R>,
    ) -> Result<R> {
        let timestamp = self.clock.tick(now);
        let item = self
            .items
            .get_mut(&self.node_id)
            .ok_or(Error::ItemNotFound(self.node_id))?;
        f(item, timestamp)
    }

    /// Change the node's state, re-stamping the self-item.
    pub fn set_node_state(&mut self, state: impl Into<String>, now: Timestamp) -> Result<()> {
        let state = state.into();
        self.config.node_state = state.clone();
        self.edit_self(now, |item, ts| {
            item.set_state(state, ts);
            Ok(())
        })
    }

    /// Create a pending item owned by this node.
    pub fn create_item(
        &mut self,
        uuid: ItemId,
        item_type: impl Into<String>,
        now: Timestamp,
    ) -> Result<ItemId> {
        if self.items.contains_key(&uuid) {
            return Err(Error::InvalidArgument(format!("item {uuid} already exists")));
        }
        let timestamp = self.clock.tick(now);
        let item = Item::new(
            uuid,
            item_type,
            self.config.node_state.clone(),
            Origin::Local,
            true,
            timestamp,
        );
        self.items.insert(uuid, item);
        Ok(uuid)
    }

    pub fn get(&self, uuid: &ItemId) -> Option<&Item> {
        self.items.get(uuid)
    }

    /// Get an item, failing with `ItemNotFound`.
    pub fn item(&self, uuid: &ItemId) -> Result<&Item> {
        self.items.get(uuid).ok_or(Error::ItemNotFound(*uuid))
    }

    pub fn contains(&self, uuid: &ItemId) -> bool {
        self.items.contains_key(uuid)
    }

    /// Apply a local edit to an item.
    ///
    /// The closure receives a fresh modification timestamp. Deleted items
    /// cannot be edited, and with `check_state` on only items carrying the
    /// node's state can.
    pub fn edit_item<R>(
        &mut self,
        uuid: &ItemId,
        now: Timestamp,
        f: impl FnOnce(&mut Item, Timestamp) -> Result<R>,
    ) -> Result<R> {
        if *uuid == self.node_id {
            return self.edit_self(now, f);
        }

        let node_state = &self.config.node_state;
        let check_state = self.config.check_state;
        let item = self.items.get(uuid).ok_or(Error::ItemNotFound(*uuid))?;
        if item.is_deleted() {
            return Err(Error::UnsupportedOperation(format!(
                "item {uuid} is deleted"
            )));
        }
        if check_state && !node_state.is_empty() && item.state() != node_state {
            return Err(Error::StateMismatch {
                uuid: *uuid,
                item_state: item.state().to_string(),
                node_state: node_state.clone(),
            });
        }

        let timestamp = self.clock.tick(now);
        let item = self
            .items
            .get_mut(uuid)
            .ok_or(Error::ItemNotFound(*uuid))?;
        f(item, timestamp)
    }

    /// Promote a pending item to live. Returns false if it was already live.
    pub fn set_item_live(&mut self, uuid: &ItemId, now: Timestamp) -> Result<bool> {
        if self.item(uuid)?.is_active() {
            return Ok(false);
        }
        self.edit_item(uuid, now, |item, ts| Ok(item.set_live(ts)))
    }

    /// Soft-delete an item.
    ///
    /// A pending item was never advertised, so it is removed outright.
    /// Deleting an already deleted item is a no-op.
    pub fn delete_item(&mut self, uuid: &ItemId, now: Timestamp) -> Result<()> {
        if *uuid == self.node_id {
            return Err(Error::UnsupportedOperation(
                "the node's own item cannot be deleted".to_string(),
            ));
        }
        let item = self.item(uuid)?;
        if item.is_deleted() {
            return Ok(());
        }
        if item.is_pending() {
            self.items.remove(uuid);
            return Ok(());
        }
        self.edit_item(uuid, now, |item, ts| {
            item.append_flags(ItemFlags::DELETED, ts);
            Ok(())
        })
    }

    /// Retire the self-item of a peer that has gone silent.
    ///
    /// The copy is marked deleted locally, without being re-stamped or sent,
    /// so the normal purge removes it. Returns false if there was nothing
    /// to retire.
    pub fn retire_peer(&mut self, node_id: &ItemId, now: Timestamp) -> bool {
        let own = self.node_id;
        match self.items.get_mut(node_id) {
            Some(item) if is_foreign_self_item(own, &*item) && !item.is_deleted() => {
                item.retire(now);
                true
            }
            _ => false,
        }
    }

    /// Bring back the self-item of a retired peer that is talking again.
    pub fn revive_peer(&mut self, node_id: &ItemId) -> bool {
        let own = self.node_id;
        match self.items.get_mut(node_id) {
            Some(item) if is_foreign_self_item(own, &*item) && item.is_deleted() => {
                item.revive();
                true
            }
            _ => false,
        }
    }

    /// Number of items, including the self-item.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All items in uuid order, including deleted and pending ones.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Items that are live and not deleted.
    pub fn active_items(&self) -> impl Iterator<Item = &Item> {
        self.items.values().filter(|i| i.is_active())
    }

    /// Items that are pending or deleted.
    pub fn inactive_items(&self) -> impl Iterator<Item = &Item> {
        self.items.values().filter(|i| !i.is_active())
    }

    fn policy(&self) -> MergePolicy<'_> {
        MergePolicy {
            self_id: self.node_id,
            node_state: &self.config.node_state,
            check_state: self.config.check_state,
        }
    }

    /// Merge one record received from a peer.
    ///
    /// Records stamped more than [`MAX_FUTURE_SKEW`] ahead of `now` are
    /// rejected. The clock only observes records that were taken.
    pub fn apply_record(&mut self, record: ItemRecord, now: Timestamp) -> Result<MergeOutcome> {
        let limit = now.saturating_add(MAX_FUTURE_SKEW);
        if record.timestamp > limit {
            return Ok(MergeOutcome::Rejected(RejectReason::FutureTimestamp {
                timestamp: record.timestamp,
                limit,
            }));
        }

        match merge::resolve(self.items.get(&record.uuid), &record, &self.policy()) {
            Resolution::Insert => {
                let uuid = record.uuid;
                let mut item = record.into_item(Origin::Remote)?;
                if item.is_deleted() {
                    item.set_deleted_at(Some(now));
                }
                self.clock.observe(item.timestamp());
                self.items.insert(uuid, item);
                Ok(MergeOutcome::Inserted)
            }
            Resolution::Replace => {
                let uuid = record.uuid;
                let incoming = record.into_item(Origin::Remote)?;
                let local = self.items.get_mut(&uuid).ok_or(Error::ItemNotFound(uuid))?;
                self.clock.observe(incoming.timestamp());
                local.replace_from(incoming, now);
                Ok(MergeOutcome::Replaced)
            }
            Resolution::Stale => Ok(MergeOutcome::Stale),
            Resolution::Reject(reason) => Ok(MergeOutcome::Rejected(reason)),
        }
    }

    /// Merge every record of a message. Messages sent by this node are skipped.
    pub fn apply_message(&mut self, message: &Message, now: Timestamp) -> MergeReport {
        let mut report = MergeReport::default();
        if message.node == self.node_id {
            report.echo = true;
            return report;
        }
        for record in &message.items {
            let uuid = record.uuid;
            match self.apply_record(record.clone(), now) {
                Ok(outcome) => report.add(uuid, outcome),
                Err(_) => report.invalid += 1,
            }
        }
        report
    }

    /// Records for every dirty, non-pending item; clears their dirty flags.
    pub fn take_updates(&mut self) -> Vec<ItemRecord> {
        self.items
            .values_mut()
            .filter(|item| item.update_needed() && !item.is_pending())
            .map(|item| {
                item.clear_update_needed();
                ItemRecord::from(&*item)
            })
            .collect()
    }

    /// Whether any non-pending item is waiting to be flushed.
    pub fn has_updates(&self) -> bool {
        self.items
            .values()
            .any(|item| item.update_needed() && !item.is_pending())
    }

    /// Records for every item this node owns, except its self-item.
    ///
    /// Deleted items are included until purged so the delete keeps
    /// propagating to peers that missed it.
    pub fn full_snapshot(&self) -> Vec<ItemRecord> {
        self.items
            .values()
            .filter(|item| {
                item.origin() == Origin::Local && !item.is_pending() && item.uuid() != self.node_id
            })
            .map(ItemRecord::from)
            .collect()
    }

    /// Record of the self-item, sent in status messages.
    pub fn status_record(&self) -> ItemRecord {
        ItemRecord::from(self.self_item())
    }

    /// Records for every known non-pending item, served to full-sync pulls.
    ///
    /// Other nodes' self-items are left out; each node announces its own.
    pub fn item_list(&self) -> Vec<ItemRecord> {
        self.items
            .values()
            .filter(|item| !item.is_pending() && !is_foreign_self_item(self.node_id, item))
            .map(ItemRecord::from)
            .collect()
    }

    /// Build a message of `kind` from this node.
    pub fn message(&self, kind: MessageKind, items: Vec<ItemRecord>, now: Timestamp) -> Message {
        Message::new(kind, self.node_id, now, items)
    }

    /// Remove deleted items whose delete was observed more than
    /// `purge_timeout` ago. Returns the removed uuids.
    pub fn purge(&mut self, now: Timestamp) -> Vec<ItemId> {
        let timeout = self.config.purge_timeout;
        let node_id = self.node_id;
        let expired: Vec<ItemId> = self
            .items
            .values()
            .filter(|item| item.uuid() != node_id && item.is_deleted())
            .filter(|item| {
                let deleted_at = item.deleted_at().unwrap_or(item.timestamp());
                now.saturating_sub(deleted_at) > timeout
            })
            .map(Item::uuid)
            .collect();

        for uuid in &expired {
            self.items.remove(uuid);
        }
        expired
    }

    /// Export every non-pending item for a backup. Other nodes' self-items
    /// are left out.
    pub fn export_snapshot(&self, now: Timestamp) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new(self.node_id, now);
        for item in self
            .items
            .values()
            .filter(|item| !item.is_pending() && !is_foreign_self_item(self.node_id, item))
        {
            snapshot.add_item(item);
        }
        snapshot
    }

    /// Load the items of a snapshot. Returns the number of items taken.
    ///
    /// The saving node's self-item is skipped, as is our own. An item that
    /// is already known locally is only replaced by a newer saved copy.
    /// Items from a snapshot saved under another node id are taken as
    /// remote, so this node does not re-advertise them as its own.
    pub fn import_snapshot(&mut self, snapshot: StoreSnapshot) -> Result<usize> {
        let adopt = snapshot.node_id == self.node_id;
        self.load_snapshot(snapshot, adopt)
    }

    /// Load this node's own backup from a previous run, which may have had
    /// another node id. Items the previous run owned stay owned.
    pub fn restore_snapshot(&mut self, snapshot: StoreSnapshot) -> Result<usize> {
        self.load_snapshot(snapshot, true)
    }

    fn load_snapshot(&mut self, snapshot: StoreSnapshot, adopt: bool) -> Result<usize> {
        let mut loaded = 0;
        for (uuid, saved) in snapshot.items {
            if uuid == snapshot.node_id || uuid == self.node_id {
                continue;
            }
            let mut item = saved.into_item()?;
            if !adopt {
                item.make_remote();
            }
            if let Some(local) = self.items.get(&uuid) {
                let newer = merge::incoming_wins(
                    local.timestamp(),
                    local.is_deleted(),
                    item.timestamp(),
                    item.is_deleted(),
                );
                if !newer {
                    continue;
                }
            }
            self.clock.observe(item.timestamp());
            self.items.insert(uuid, item);
            loaded += 1;
        }
        Ok(loaded)
    }
}

/// Another node's self-item. Those are never deleted by their owner.
fn is_foreign_self_item(own: ItemId, item: &Item) -> bool {
    item.uuid() != own && item.origin() == Origin::Remote && item.item_type() == SELF_ITEM_TYPE
}
