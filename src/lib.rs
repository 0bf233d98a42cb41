//! Protocol-and-transport core for a shard-aware wide-column database
//! driver: framed wire codec, per-connection stream multiplexing, per-node
//! shard-aware connection pooling, cluster topology tracking, replica
//! placement, and host selection.
//!
//! This crate deliberately stops at the transport boundary: it does not
//! decode CQL row contents or column types, and it does not implement
//! retry/speculative-execution policies (see each module's Non-goals).

pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod frame;
pub mod node;
pub mod policy;
pub mod pool;
pub mod replication;
pub mod result;
pub mod session;
pub mod shard;
pub mod statement;
pub mod stream_id;
pub mod token;
pub mod topology;
pub mod types;

pub use config::{ConnectionConfig, PolicyChoice, SessionConfig};
pub use error::{Error, Result};
pub use session::Session;
pub use statement::Statement;
