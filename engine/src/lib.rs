//! # InfoDB Engine
//!
//! The data model and synchronization rules of a distributed,
//! eventually-consistent information database.
//!
//! Every node on a network owns some named, typed *items* and publishes them
//! to every other node. Each node keeps a merged view of all items. This crate
//! holds the logic that decides what that view is; the `infodb-node` crate
//! moves the bytes.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of sockets, files or timers
//! - **Explicit time**: every time-dependent call takes `now` as an argument
//! - **Deterministic**: the same inputs always produce the same store
//!
//! ## Core Concepts
//!
//! ### Items and fields
//!
//! An [`Item`] is identified by a uuid and holds an ordered set of typed
//! [`Field`]s. Items are created *pending*, promoted to *live* once
//! populated, and soft-deleted with [`ItemFlags::DELETED`] before being
//! purged after a grace period.
//!
//! ### Merging
//!
//! Items are replicated whole. A received copy replaces the local one only if
//! its timestamp is strictly newer; at equal timestamps a delete wins. See
//! [`merge`].
//!
//! ### Clock
//!
//! The [`HybridClock`] stamps local edits. It follows the wall clock but
//! never repeats or goes backwards and is pulled forward by peer timestamps.
//!
//! ## Quick Start
//!
//! ```rust
//! use infodb_engine::{
//!     units::DistanceUnits, EnumDefinitions, MessageKind, Store, StoreConfig,
//! };
//! use uuid::Uuid;
//!
//! let now = 1_700_000_000_000_000;
//! let mut a = Store::new(Uuid::new_v4(), StoreConfig::default(), EnumDefinitions::new(), now);
//! let mut b = Store::new(Uuid::new_v4(), StoreConfig::default(), EnumDefinitions::new(), now);
//!
//! // 1. Create and populate an item on node a
//! let uuid = a.create_item(Uuid::new_v4(), "track", now).unwrap();
//! a.edit_item(&uuid, now, |item, ts| {
//!     item.update_distance_field("range", 10.0, DistanceUnits::NauticalMiles, ts)
//! })
//! .unwrap();
//! a.set_item_live(&uuid, now).unwrap();
//!
//! // 2. Flush it and merge the update on node b
//! let updates = a.take_updates();
//! let update = a.message(MessageKind::Update, updates, now);
//! b.apply_message(&update, now);
//!
//! let copy = b.item(&uuid).unwrap();
//! assert!(copy.is_active());
//! let range = copy.field("range").unwrap();
//! assert_eq!(range.value_as_distance(DistanceUnits::NauticalMiles).unwrap(), 10.0);
//! ```
//!
//! ## Persistence
//!
//! Use [`Store::export_snapshot`] with [`Store::restore_snapshot`] (a node's
//! own backup) or [`Store::import_snapshot`] (any node's export) and
//! [`StoreSnapshot`] for backups. Snapshots serialize to JSON with
//! deterministic ordering.

pub mod clock;
pub mod enums;
pub mod error;
pub mod field;
pub mod item;
pub mod merge;
pub mod message;
pub mod snapshot;
pub mod store;
pub mod units;

// Re-export main types at crate root
pub use clock::HybridClock;
pub use enums::{EnumDefinition, EnumDefinitions};
pub use error::{Error, Result};
pub use field::{Field, FieldKind, FieldValue};
pub use item::{Item, ItemFlags, Origin};
pub use merge::{MergeOutcome, RejectReason};
pub use message::{FieldRecord, ItemRecord, Message, MessageKind, MAX_DATAGRAM_BYTES};
pub use snapshot::{SavedItem, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{MergeReport, Store, StoreConfig, MAX_FUTURE_SKEW, SELF_ITEM_TYPE};

/// Globally unique item identifier.
pub type ItemId = uuid::Uuid;

/// Microseconds since the Unix epoch.
pub type Timestamp = u64;
