//! RingKV Client - async client for a partitioned, replicated key-value store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Client (StoreOperations: get/get_all/bulk_get/put/del)  │
//! ├──────────────────────────┬───────────────────────────────┤
//! │  Router (ringkv-routing) │  ConnectionManager (failover) │
//! ├──────────────────────────┴───────────────────────────────┤
//! │  Connection (one in-flight request, FIFO responses)      │
//! ├──────────────────────────────────────────────────────────┤
//! │  Codec (ringkv-wire)                                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use ringkv_client::{Client, ClientConfig, RequestOptions, StoreOperations};
//! use ringkv_core::{Cluster, Node, NodeId, PartitionId, StoreDefinition};
//!
//! # async fn run() -> ringkv_core::Result<()> {
//! let cluster = Cluster::new(vec![Node::new(
//!     NodeId::new(0),
//!     "localhost",
//!     6666,
//!     [PartitionId::new(0)],
//! )])?;
//! let client = Client::connect(cluster, ClientConfig::new(StoreDefinition::new("test"))).await?;
//!
//! let options = RequestOptions::default();
//! client.put(Bytes::from("chocolate"), Bytes::from("yum"), &options).await?;
//! let value = client.get(Bytes::from("chocolate"), &options).await?;
//! # let _ = value;
//!
//! // Typed values: decode stored bytes into `String`.
//! let typed = ringkv_client::TypedStore::new(client, ringkv_client::StringSerializer);
//! let value = typed.get(Bytes::from("chocolate"), &options).await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod connection;
pub mod failover;
pub mod serializer;
pub mod typed;

pub use bootstrap::{bootstrap, BootstrapConfig, MetadataParser, SeedHost};
pub use client::{Client, RequestOptions, StoreOperations};
pub use config::{ClientConfig, ConnectionConfig, METADATA_STORE, ROUTED_CONNECT_ATTEMPTS};
pub use connection::Connection;
pub use failover::ConnectionManager;
pub use serializer::{IdentitySerializer, StringSerializer, ValueCodec, ValueSerializer};
pub use typed::TypedStore;
