//! RingKV Routing - partition ring and key routing.
//!
//! Maps keys to the nodes that store them, for stores that use client-side
//! routing.
//!
//! # Design
//!
//! - **Consistent hashing**: keys map deterministically to partitions
//! - **Server-compatible hash**: the FNV variant the storage nodes use
//! - **Immutable**: the ring is built once per session and shared freely

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod ring;
mod router;

pub use ring::{PartitionRing, PARTITIONS_MAX};
pub use router::Router;
