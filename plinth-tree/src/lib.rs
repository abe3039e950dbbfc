//! Plinth Tree - arena-backed hierarchical tree with authenticated
//! serialization.
//!
//! Nodes carry a name and an arbitrary JSON payload; paths are `/`-delimited
//! names. The whole structure lives in one arena owned by [`Tree`], addressed
//! through [`NodeId`] handles, so subtree moves and deletes are id surgery
//! rather than pointer management.
//!
//! [`serial`] serializes any subtree to a canonical JSON envelope
//! authenticated with HMAC (SHA-256 or SHA-512) and verifies it on the way
//! back in, constant-time, before interpreting any of the payload.

pub mod iter;
pub mod serial;
pub mod tree;

pub use iter::TreeIter;
pub use serial::{deserialize, serialize, HashAlgorithm};
pub use tree::{Node, NodeId, Tree};
