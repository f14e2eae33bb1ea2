//! Items: uuid-identified entities holding an ordered set of fields.

use crate::units::{DistanceUnits, SpeedUnits, Units};
use crate::{error::Result, Error, Field, FieldKind, FieldValue, ItemId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bit-set of item flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemFlags(u32);

impl ItemFlags {
    pub const NONE: ItemFlags = ItemFlags(0);
    /// Item has been soft-deleted and is waiting to be purged.
    pub const DELETED: ItemFlags = ItemFlags(0x0000_0001);

    pub fn from_bits(bits: u32) -> Self {
        ItemFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: ItemFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ItemFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ItemFlags) {
        self.0 &= !other.0;
    }
}

impl fmt::Debug for ItemFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemFlags({:#010x})", self.0)
    }
}

/// Whether this node created an item or learned it from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created by this node, which re-advertises it periodically
    Local,
    /// Received from a peer
    Remote,
}

/// A replicated item.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    uuid: ItemId,
    item_type: String,
    state: String,
    flags: ItemFlags,
    pending: bool,
    timestamp: Timestamp,
    fields: Vec<Field>,
    update_needed: bool,
    origin: Origin,
    deleted_at: Option<Timestamp>,
}

impl Item {
    /// Create an item with no fields.
    pub fn new(
        uuid: ItemId,
        item_type: impl Into<String>,
        state: impl Into<String>,
        origin: Origin,
        pending: bool,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            uuid,
            item_type: item_type.into(),
            state: state.into(),
            flags: ItemFlags::NONE,
            pending,
            timestamp,
            fields: Vec::new(),
            update_needed: origin == Origin::Local,
            origin,
            deleted_at: None,
        }
    }

    pub fn uuid(&self) -> ItemId {
        self.uuid
    }

    pub fn item_type(&self) -> &str {
        &self.item_type
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn flags(&self) -> ItemFlags {
        self.flags
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(ItemFlags::DELETED)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Live and not deleted.
    pub fn is_active(&self) -> bool {
        !self.pending && !self.is_deleted()
    }

    /// Time of the last modification, used for last-writer-wins merging.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Whether a local change has not yet been sent to peers.
    pub fn update_needed(&self) -> bool {
        self.update_needed
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// When this node first saw the item deleted.
    pub fn deleted_at(&self) -> Option<Timestamp> {
        self.deleted_at
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name() == name)
    }

    /// Fields in creation order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| Error::FieldNotFound(name.to_string()))
    }

    fn field_mut(&mut self, name: &str) -> Result<&mut Field> {
        self.fields
            .iter_mut()
            .find(|f| f.name() == name)
            .ok_or_else(|| Error::FieldNotFound(name.to_string()))
    }

    /// Record a local modification made at `timestamp`.
    fn touch(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp;
        self.update_needed = true;
    }

    /// Create an empty field. Idempotent when the field exists with the same kind.
    pub fn create_field(&mut self, name: &str, kind: FieldKind, timestamp: Timestamp) -> Result<()> {
        if let Ok(existing) = self.field(name) {
            if existing.kind() == kind {
                return Ok(());
            }
            return Err(Error::AlreadyExists {
                name: name.to_string(),
                existing: existing.kind(),
                requested: kind,
            });
        }
        self.fields.push(Field::new(name, kind));
        self.touch(timestamp);
        Ok(())
    }

    /// Set a field's value, creating the field if it does not exist.
    pub fn update_field(&mut self, name: &str, value: FieldValue, timestamp: Timestamp) -> Result<()> {
        match self.fields.iter().position(|f| f.name() == name) {
            Some(index) => self.fields[index].set_value(value)?,
            None => {
                let value = value.validated()?;
                self.fields.push(Field::with_value(name, value));
            }
        }
        self.touch(timestamp);
        Ok(())
    }

    pub fn update_string_field(
        &mut self,
        name: &str,
        value: impl Into<String>,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.update_field(name, FieldValue::String(value.into()), timestamp)
    }

    pub fn update_int_field(&mut self, name: &str, value: i64, timestamp: Timestamp) -> Result<()> {
        self.update_field(name, FieldValue::Int(value), timestamp)
    }

    pub fn update_double_field(&mut self, name: &str, value: f64, timestamp: Timestamp) -> Result<()> {
        self.update_field(name, FieldValue::Double(value), timestamp)
    }

    pub fn update_distance_field(
        &mut self,
        name: &str,
        value: f64,
        units: DistanceUnits,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.update_field(name, FieldValue::distance(value, units), timestamp)
    }

    pub fn update_speed_field(
        &mut self,
        name: &str,
        value: f64,
        units: SpeedUnits,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.update_field(name, FieldValue::speed(value, units), timestamp)
    }

    pub fn update_latitude_field(&mut self, name: &str, value: f64, timestamp: Timestamp) -> Result<()> {
        self.update_field(name, FieldValue::Latitude(value), timestamp)
    }

    pub fn update_longitude_field(&mut self, name: &str, value: f64, timestamp: Timestamp) -> Result<()> {
        self.update_field(name, FieldValue::Longitude(value), timestamp)
    }

    pub fn update_enum_field(&mut self, name: &str, value: i64, timestamp: Timestamp) -> Result<()> {
        self.update_field(name, FieldValue::Enum(value), timestamp)
    }

    /// Time of day in seconds since midnight.
    pub fn update_time_field(&mut self, name: &str, secs: u32, timestamp: Timestamp) -> Result<()> {
        self.update_field(name, FieldValue::Time(secs), timestamp)
    }

    /// Date in days since 1970-01-01.
    pub fn update_date_field(&mut self, name: &str, days: i64, timestamp: Timestamp) -> Result<()> {
        self.update_field(name, FieldValue::Date(days), timestamp)
    }

    pub fn update_iff_code_field(&mut self, name: &str, code: u16, timestamp: Timestamp) -> Result<()> {
        self.update_field(name, FieldValue::IffCode(code), timestamp)
    }

    pub fn update_bool_field(&mut self, name: &str, value: bool, timestamp: Timestamp) -> Result<()> {
        self.update_field(name, FieldValue::Bool(value), timestamp)
    }

    pub fn delete_field(&mut self, name: &str, timestamp: Timestamp) -> Result<()> {
        let index = self
            .fields
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| Error::FieldNotFound(name.to_string()))?;
        self.fields.remove(index);
        self.touch(timestamp);
        Ok(())
    }

    pub fn delete_all_fields(&mut self, timestamp: Timestamp) {
        if !self.fields.is_empty() {
            self.fields.clear();
            self.touch(timestamp);
        }
    }

    pub fn set_field_enum_name(&mut self, name: &str, enum_name: &str, timestamp: Timestamp) -> Result<()> {
        self.field_mut(name)?.set_enum_name(enum_name)?;
        self.touch(timestamp);
        Ok(())
    }

    pub fn set_field_display_units(
        &mut self,
        name: &str,
        units: impl Into<Units>,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.field_mut(name)?.set_display_units(units)?;
        self.touch(timestamp);
        Ok(())
    }

    pub fn set_field_display_num_dp(&mut self, name: &str, num_dp: u8, timestamp: Timestamp) -> Result<()> {
        self.field_mut(name)?.set_display_num_dp(num_dp)?;
        self.touch(timestamp);
        Ok(())
    }

    pub fn set_field_unit_label(&mut self, name: &str, label: &str, timestamp: Timestamp) -> Result<()> {
        self.field_mut(name)?.set_unit_label(label)?;
        self.touch(timestamp);
        Ok(())
    }

    pub fn set_state(&mut self, state: impl Into<String>, timestamp: Timestamp) {
        self.state = state.into();
        self.touch(timestamp);
    }

    pub fn set_type(&mut self, item_type: impl Into<String>, timestamp: Timestamp) {
        self.item_type = item_type.into();
        self.touch(timestamp);
    }

    /// Promote a pending item to live. Returns false if it was already live.
    pub fn set_live(&mut self, timestamp: Timestamp) -> bool {
        if !self.pending {
            return false;
        }
        self.pending = false;
        self.touch(timestamp);
        true
    }

    pub fn append_flags(&mut self, flags: ItemFlags, timestamp: Timestamp) {
        self.flags.insert(flags);
        if flags.contains(ItemFlags::DELETED) && self.deleted_at.is_none() {
            self.deleted_at = Some(timestamp);
        }
        self.touch(timestamp);
    }

    pub fn clear_flags(&mut self, flags: ItemFlags, timestamp: Timestamp) {
        self.flags.remove(flags);
        if flags.contains(ItemFlags::DELETED) {
            self.deleted_at = None;
        }
        self.touch(timestamp);
    }

    pub(crate) fn clear_update_needed(&mut self) {
        self.update_needed = false;
    }

    /// Replace everything peers can observe with `incoming`, keeping local
    /// bookkeeping. `now` is the local time used when the item becomes deleted.
    pub(crate) fn replace_from(&mut self, incoming: Item, now: Timestamp) {
        let was_deleted = self.is_deleted();
        self.item_type = incoming.item_type;
        self.state = incoming.state;
        self.flags = incoming.flags;
        self.pending = incoming.pending;
        self.timestamp = incoming.timestamp;
        self.fields = incoming.fields;
        self.update_needed = false;
        self.deleted_at = match (was_deleted, self.is_deleted()) {
            (_, false) => None,
            (true, true) => self.deleted_at.or(Some(now)),
            (false, true) => Some(now),
        };
    }

    /// Rebuild an item from decoded parts. Used by message and snapshot decoding.
    pub(crate) fn from_parts(
        mut base: Item,
        flags: ItemFlags,
        fields: Vec<Field>,
        deleted_at: Option<Timestamp>,
    ) -> Self {
        base.flags = flags;
        base.fields = fields;
        base.update_needed = false;
        base.deleted_at = if base.is_deleted() { deleted_at } else { None };
        base
    }

    pub(crate) fn set_deleted_at(&mut self, deleted_at: Option<Timestamp>) {
        self.deleted_at = deleted_at.filter(|_| self.is_deleted());
    }

    /// Mark deleted as of `now` without re-stamping or advertising it.
    pub(crate) fn retire(&mut self, now: Timestamp) {
        self.flags.insert(ItemFlags::DELETED);
        self.deleted_at = Some(now);
        self.update_needed = false;
    }

    /// Undo [`Item::retire`].
    pub(crate) fn revive(&mut self) {
        self.flags.remove(ItemFlags::DELETED);
        self.deleted_at = None;
    }

    /// Treat an item saved by another node as learned from the network.
    pub(crate) fn make_remote(&mut self) {
        self.origin = Origin::Remote;
        self.update_needed = false;
    }

    pub(crate) fn set_update_needed(&mut self, update_needed: bool) {
        self.update_needed = update_needed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn local_item() -> Item {
        Item::new(Uuid::new_v4(), "radar", "primary", Origin::Local, true, 1_000)
    }

    #[test]
    fn create_item() {
        let item = local_item();
        assert_eq!(item.item_type(), "radar");
        assert_eq!(item.state(), "primary");
        assert!(item.is_pending());
        assert!(!item.is_deleted());
        assert!(!item.is_active());
        assert_eq!(item.num_fields(), 0);
    }

    #[test]
    fn update_creates_then_overwrites() {
        let mut item = local_item();
        item.update_int_field("count", 1, 2_000).unwrap();
        item.update_int_field("count", 2, 3_000).unwrap();
        assert_eq!(item.num_fields(), 1);
        assert_eq!(item.field("count").unwrap().value(), &FieldValue::Int(2));
        assert_eq!(item.timestamp(), 3_000);
        assert!(item.update_needed());
    }

    #[test]
    fn update_with_other_kind_fails_and_keeps_value() {
        let mut item = local_item();
        item.update_int_field("count", 1, 2_000).unwrap();
        let err = item.update_string_field("count", "one", 3_000).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(item.field("count").unwrap().value(), &FieldValue::Int(1));
        assert_eq!(item.timestamp(), 2_000);
    }

    #[test]
    fn invalid_value_does_not_create_field() {
        let mut item = local_item();
        assert!(item.update_latitude_field("lat", 123.0, 2_000).is_err());
        assert!(!item.has_field("lat"));
    }

    #[test]
    fn create_field_conflicting_kind() {
        let mut item = local_item();
        item.create_field("range", FieldKind::Distance, 2_000).unwrap();
        item.create_field("range", FieldKind::Distance, 3_000).unwrap();
        assert_eq!(item.timestamp(), 2_000);
        let err = item.create_field("range", FieldKind::Int, 4_000).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn fields_keep_creation_order() {
        let mut item = local_item();
        item.update_string_field("name", "R1", 2_000).unwrap();
        item.update_double_field("gain", 0.5, 2_001).unwrap();
        item.update_bool_field("enabled", true, 2_002).unwrap();
        item.update_string_field("name", "R2", 2_003).unwrap();
        let names: Vec<_> = item.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["name", "gain", "enabled"]);
    }

    #[test]
    fn delete_field() {
        let mut item = local_item();
        item.update_string_field("name", "R1", 2_000).unwrap();
        item.delete_field("name", 3_000).unwrap();
        assert!(!item.has_field("name"));
        assert!(matches!(
            item.delete_field("name", 4_000),
            Err(Error::FieldNotFound(_))
        ));
    }

    #[test]
    fn set_live_only_once() {
        let mut item = local_item();
        assert!(item.set_live(2_000));
        assert!(!item.set_live(3_000));
        assert_eq!(item.timestamp(), 2_000);
        assert!(item.is_active());
    }

    #[test]
    fn delete_flag_records_time() {
        let mut item = local_item();
        item.set_live(2_000);
        item.append_flags(ItemFlags::DELETED, 3_000);
        assert!(item.is_deleted());
        assert_eq!(item.deleted_at(), Some(3_000));

        item.clear_flags(ItemFlags::DELETED, 4_000);
        assert!(!item.is_deleted());
        assert_eq!(item.deleted_at(), None);
    }

    #[test]
    fn flags_bit_operations() {
        let mut flags = ItemFlags::NONE;
        assert!(!flags.contains(ItemFlags::DELETED));
        flags.insert(ItemFlags::DELETED);
        assert_eq!(flags.bits(), 1);
        flags.remove(ItemFlags::DELETED);
        assert_eq!(flags, ItemFlags::NONE);
    }
}
