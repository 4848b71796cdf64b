//! RingKV Core - identifiers, errors, topology and versioning.
//!
//! Shared by the wire codec, the partition router and the client. Nothing in
//! this crate performs I/O.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: a `PartitionId` cannot be passed as a `NodeId`
//! - **Immutable topology**: nodes never change after bootstrap
//! - **Immutable clocks**: versioning returns new clocks, never mutates

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod topology;
mod types;
mod versioning;

pub use error::{
    Error, Result, ERROR_CODE_GENERIC, ERROR_CODE_INSUFFICIENT_NODES,
    ERROR_CODE_INVALID_METADATA, ERROR_CODE_OBSOLETE_VERSION, ERROR_CODE_STORE_FAILURE,
    ERROR_CODE_UNKNOWN_STORE,
};
pub use topology::{Cluster, KeyType, Node, RoutingMode, StoreDefinition};
pub use types::{NodeId, PartitionId};
pub use versioning::{increment, ClockEntry, ConflictResolver, LastWriteWins, VectorClock, Versioned};
