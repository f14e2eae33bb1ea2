//! Networked node for the distributed information database.
//!
//! Wraps an [`infodb_engine::Store`] with the network plumbing that keeps
//! it in sync with its peers: UDP multicast for updates, status and full
//! snapshots, TCP for full-sync pulls, plus backup files and message
//! records.
//!
//! ```no_run
//! use infodb_node::{Config, Node};
//!
//! # async fn run() -> infodb_node::Result<()> {
//! let config = Config::from_env()?;
//! let node = Node::with_udp(config).await?;
//! node.start().await?;
//!
//! let uuid = node.create_item("track")?;
//! node.update_item_field(&uuid, "callsign", "ALPHA")?;
//! node.set_item_live(&uuid)?;
//!
//! node.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod peers;
pub mod persist;
pub mod records;
pub mod sync;
pub mod transport;

pub use config::{Config, ConfigError};
pub use error::{NodeError, Result};
pub use node::{wall_clock, Node};
pub use peers::{Peer, PeerEvent, PeerTable};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};
