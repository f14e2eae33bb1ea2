//! Wire messages exchanged between nodes.
//!
//! Every message is a JSON document carrying a kind discriminator, the
//! sending node's uuid and a list of item records. Each item record holds the
//! item's complete field set, so receivers always replace an item wholesale.

use crate::field::FieldValue;
use crate::units::Units;
use crate::{error::Result, Error, Field, FieldKind, Item, ItemFlags, ItemId, Origin, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest message body sent in one datagram.
pub const MAX_DATAGRAM_BYTES: usize = 60_000;

/// Kind of message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Items changed locally since the last flush
    Update,
    /// The sender's own node item, sent periodically as a heartbeat
    Status,
    /// Every item owned by the sender, sent periodically
    Full,
    /// Every item known to the sender, sent in reply to a pull
    ItemList,
    /// Pull request for an `ItemList`
    ItemListRequest,
}

/// One field as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_units: Option<Units>,
    #[serde(default, rename = "displayNumDP", skip_serializing_if = "Option::is_none")]
    pub display_num_dp: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_name: Option<String>,
}

impl From<&Field> for FieldRecord {
    fn from(field: &Field) -> Self {
        let value = match field.value() {
            FieldValue::String(s) => Value::from(s.as_str()),
            FieldValue::Int(v) | FieldValue::Enum(v) | FieldValue::Date(v) => Value::from(*v),
            FieldValue::Time(v) => Value::from(*v),
            FieldValue::IffCode(v) => Value::from(*v),
            FieldValue::Bool(v) => Value::from(*v),
            FieldValue::Double(v)
            | FieldValue::Distance(v)
            | FieldValue::Speed(v)
            | FieldValue::Latitude(v)
            | FieldValue::Longitude(v) => Value::from(*v),
        };
        Self {
            name: field.name().to_string(),
            kind: field.kind(),
            value,
            display_units: field.display_units(),
            display_num_dp: field.display_num_dp(),
            unit_label: field.unit_label().map(str::to_string),
            enum_name: field.raw_enum_name().map(str::to_string),
        }
    }
}

impl TryFrom<FieldRecord> for Field {
    type Error = Error;

    fn try_from(record: FieldRecord) -> Result<Self> {
        let bad = |why: String| Error::InvalidMessage(format!("field '{}': {why}", record.name));
        let kind = record.kind;
        let value = match (&record.value, kind) {
            (Value::String(s), FieldKind::String) => FieldValue::String(s.clone()),
            (Value::Bool(b), FieldKind::Bool) => FieldValue::Bool(*b),
            (v, k) if k.is_integral() => {
                let n = v
                    .as_i64()
                    .ok_or_else(|| bad(format!("expected an integer for {k}")))?;
                FieldValue::from_int(k, n).map_err(|e| bad(e.to_string()))?
            }
            (v, k) if k.is_floating() => {
                let n = v
                    .as_f64()
                    .ok_or_else(|| bad(format!("expected a number for {k}")))?;
                FieldValue::from_double(k, n).map_err(|e| bad(e.to_string()))?
            }
            (_, k) => return Err(bad(format!("value does not match {k}"))),
        };

        let mut field = Field::with_value(record.name, value);
        field.set_display_parts(
            record.display_units,
            record.display_num_dp,
            record.unit_label,
            record.enum_name,
        );
        Ok(field)
    }
}

/// One item as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub uuid: ItemId,
    #[serde(rename = "type")]
    pub item_type: String,
    pub state: String,
    pub flags: ItemFlags,
    pub pending: bool,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub fields: Vec<FieldRecord>,
}

impl ItemRecord {
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(ItemFlags::DELETED)
    }

    /// Decode into an item with the given origin.
    ///
    /// Fails if any field value does not match its declared kind or a field
    /// name appears twice.
    pub fn into_item(self, origin: Origin) -> Result<Item> {
        let mut fields: Vec<Field> = Vec::with_capacity(self.fields.len());
        for record in self.fields {
            if fields.iter().any(|f| f.name() == record.name) {
                return Err(Error::InvalidMessage(format!(
                    "item {} has duplicate field '{}'",
                    self.uuid, record.name
                )));
            }
            fields.push(Field::try_from(record)?);
        }
        let base = Item::new(
            self.uuid,
            self.item_type,
            self.state,
            origin,
            self.pending,
            self.timestamp,
        );
        Ok(Item::from_parts(base, self.flags, fields, None))
    }
}

impl From<&Item> for ItemRecord {
    fn from(item: &Item) -> Self {
        Self {
            uuid: item.uuid(),
            item_type: item.item_type().to_string(),
            state: item.state().to_string(),
            flags: item.flags(),
            pending: item.is_pending(),
            timestamp: item.timestamp(),
            fields: item.fields().iter().map(FieldRecord::from).collect(),
        }
    }
}

/// A message between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub kind: MessageKind,
    /// Uuid of the sending node
    pub node: ItemId,
    /// Sender's wall time when the message was built
    pub sent_at: Timestamp,
    #[serde(default)]
    pub items: Vec<ItemRecord>,
}

impl Message {
    pub fn new(kind: MessageKind, node: ItemId, sent_at: Timestamp, items: Vec<ItemRecord>) -> Self {
        Self {
            kind,
            node,
            sent_at,
            items,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::InvalidMessage(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::InvalidMessage(e.to_string()))
    }

    /// Encode `items` as one or more messages of `kind`, each no larger than
    /// `max_bytes` unless a single item alone exceeds it.
    ///
    /// Always returns at least one message, so an empty item list still
    /// produces a (heartbeat-style) message.
    pub fn encode_chunked(
        kind: MessageKind,
        node: ItemId,
        sent_at: Timestamp,
        items: Vec<ItemRecord>,
        max_bytes: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let overhead = Message::new(kind, node, sent_at, Vec::new()).to_json()?.len();
        let mut chunks = Vec::new();
        let mut batch: Vec<ItemRecord> = Vec::new();
        let mut batch_len = overhead;

        for item in items {
            let item_len = serde_json::to_vec(&item)
                .map_err(|e| Error::InvalidMessage(e.to_string()))?
                .len()
                + 1;
            if !batch.is_empty() && batch_len + item_len > max_bytes {
                let full = std::mem::take(&mut batch);
                chunks.push(Message::new(kind, node, sent_at, full).to_json()?);
                batch_len = overhead;
            }
            batch_len += item_len;
            batch.push(item);
        }

        if !batch.is_empty() || chunks.is_empty() {
            chunks.push(Message::new(kind, node, sent_at, batch).to_json()?);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::DistanceUnits;
    use uuid::Uuid;

    fn sample_item() -> Item {
        let mut item = Item::new(Uuid::new_v4(), "radar", "primary", Origin::Local, false, 1_000);
        item.update_distance_field("range", 10.0, DistanceUnits::NauticalMiles, 2_000)
            .unwrap();
        item.set_field_display_units("range", DistanceUnits::NauticalMiles, 2_001)
            .unwrap();
        item.update_bool_field("enabled", true, 2_002).unwrap();
        item.update_iff_code_field("mode3a", 0o1234, 2_003).unwrap();
        item
    }

    #[test]
    fn item_record_wire_format() {
        let item = sample_item();
        let json = serde_json::to_value(ItemRecord::from(&item)).unwrap();
        assert_eq!(json["type"], "radar");
        assert_eq!(json["flags"], 0);
        assert_eq!(json["pending"], false);
        assert_eq!(json["fields"][0]["name"], "range");
        assert_eq!(json["fields"][0]["type"], "distance");
        assert_eq!(json["fields"][0]["displayUnits"], "nauticalMiles");
        assert_eq!(json["fields"][1]["value"], true);
        assert_eq!(json["fields"][2]["type"], "iffCode");
    }

    #[test]
    fn decoded_item_matches_original() {
        let item = sample_item();
        let decoded = ItemRecord::from(&item).into_item(Origin::Remote).unwrap();
        assert_eq!(decoded.uuid(), item.uuid());
        assert_eq!(decoded.fields(), item.fields());
        assert_eq!(decoded.timestamp(), item.timestamp());
        assert_eq!(decoded.origin(), Origin::Remote);
        assert!(!decoded.update_needed());
    }

    #[test]
    fn mismatched_value_is_rejected() {
        let json = r#"{"name":"lat","type":"latitude","value":"north"}"#;
        let record: FieldRecord = serde_json::from_str(json).unwrap();
        assert!(matches!(Field::try_from(record), Err(Error::InvalidMessage(_))));

        let json = r#"{"name":"lat","type":"latitude","value":95.0}"#;
        let record: FieldRecord = serde_json::from_str(json).unwrap();
        assert!(matches!(Field::try_from(record), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn bool_accepts_zero_or_one() {
        let json = r#"{"name":"on","type":"bool","value":1}"#;
        let record: FieldRecord = serde_json::from_str(json).unwrap();
        let field = Field::try_from(record).unwrap();
        assert_eq!(field.value(), &FieldValue::Bool(true));
    }

    #[test]
    fn duplicate_field_names_are_rejected() {
        let mut record = ItemRecord::from(&sample_item());
        let first = record.fields[0].clone();
        record.fields.push(first);
        assert!(matches!(
            record.into_item(Origin::Remote),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn message_parse() {
        let node = Uuid::new_v4();
        let json = format!(
            r#"{{"kind":"status","node":"{node}","sentAt":5,"items":[]}}"#
        );
        let msg = Message::from_json(json.as_bytes()).unwrap();
        assert_eq!(msg.kind, MessageKind::Status);
        assert_eq!(msg.node, node);
        assert!(Message::from_json(b"not json").is_err());
    }

    #[test]
    fn chunking_respects_size_limit() {
        let node = Uuid::new_v4();
        let items: Vec<ItemRecord> = (0..50).map(|_| ItemRecord::from(&sample_item())).collect();
        let chunks =
            Message::encode_chunked(MessageKind::Full, node, 1, items, 2_000).unwrap();
        assert!(chunks.len() > 1);
        let mut total = 0;
        for chunk in &chunks {
            assert!(chunk.len() <= 2_000);
            total += Message::from_json(chunk).unwrap().items.len();
        }
        assert_eq!(total, 50);
    }

    #[test]
    fn chunking_empty_list_yields_one_message() {
        let chunks =
            Message::encode_chunked(MessageKind::Full, Uuid::new_v4(), 1, Vec::new(), 100).unwrap();
        assert_eq!(chunks.len(), 1);
    }
}
