//! Error types for the information database engine.

use crate::{FieldKind, ItemId};
use thiserror::Error;

/// All possible errors from the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lookup errors
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("enumeration not found: {0}")]
    EnumNotFound(String),

    // Mutation errors
    #[error("field '{name}' already exists as {existing}, cannot create as {requested}")]
    AlreadyExists {
        name: String,
        existing: FieldKind,
        requested: FieldKind,
    },

    #[error("operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("item {uuid} has state '{item_state}', node state is '{node_state}'")]
    StateMismatch {
        uuid: ItemId,
        item_state: String,
        node_state: String,
    },

    // Decode errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
