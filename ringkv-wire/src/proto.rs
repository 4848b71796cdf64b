//! Protobuf schema of the client protocol (`pb0`).
//!
//! The schema is fixed by the server; field numbers and labels must not
//! change. Message-typed fields are declared `optional` even where the
//! schema says `required`, which is identical on the wire.

use bytes::Bytes;

/// One node's counter in a vector clock.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct ClockEntry {
    /// Node id.
    #[prost(int32, required, tag = "1")]
    pub node_id: i32,
    /// Counter value.
    #[prost(int64, required, tag = "2")]
    pub version: i64,
}

/// A vector clock.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct VectorClock {
    /// Per-node counters.
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<ClockEntry>,
    /// Milliseconds since the epoch.
    #[prost(int64, optional, tag = "2")]
    pub timestamp: Option<i64>,
}

/// A value with its version.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Versioned {
    /// Value bytes.
    #[prost(bytes = "bytes", required, tag = "1")]
    pub value: Bytes,
    /// Value version.
    #[prost(message, optional, tag = "2")]
    pub version: Option<VectorClock>,
}

/// Server-side error attached to any response.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Error {
    /// Non-zero on failure.
    #[prost(int32, required, tag = "1")]
    pub error_code: i32,
    /// Human-readable description.
    #[prost(string, required, tag = "2")]
    pub error_message: String,
}

/// All versions of one key in a `GetAllResponse`.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct KeyedVersions {
    /// The key.
    #[prost(bytes = "bytes", required, tag = "1")]
    pub key: Bytes,
    /// Its versions.
    #[prost(message, repeated, tag = "2")]
    pub versions: Vec<Versioned>,
}

/// Single-key read.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct GetRequest {
    /// The key.
    #[prost(bytes = "bytes", optional, tag = "1")]
    pub key: Option<Bytes>,
}

/// Answer to `GetRequest`.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct GetResponse {
    /// Every version held for the key.
    #[prost(message, repeated, tag = "1")]
    pub versioned: Vec<Versioned>,
    /// Set on failure.
    #[prost(message, optional, tag = "2")]
    pub error: Option<Error>,
}

/// Multi-key read.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct GetAllRequest {
    /// The keys.
    #[prost(bytes = "bytes", repeated, tag = "1")]
    pub keys: Vec<Bytes>,
}

/// Answer to `GetAllRequest`; missing keys are simply absent.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct GetAllResponse {
    /// Found keys with their versions.
    #[prost(message, repeated, tag = "1")]
    pub values: Vec<KeyedVersions>,
    /// Set on failure.
    #[prost(message, optional, tag = "2")]
    pub error: Option<Error>,
}

/// Versioned write.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct PutRequest {
    /// The key.
    #[prost(bytes = "bytes", required, tag = "1")]
    pub key: Bytes,
    /// Value and the version it is written at.
    #[prost(message, optional, tag = "2")]
    pub versioned: Option<Versioned>,
}

/// Answer to `PutRequest`.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct PutResponse {
    /// Set on failure.
    #[prost(message, optional, tag = "1")]
    pub error: Option<Error>,
}

/// Versioned delete.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct DeleteRequest {
    /// The key.
    #[prost(bytes = "bytes", required, tag = "1")]
    pub key: Bytes,
    /// Version being deleted.
    #[prost(message, optional, tag = "2")]
    pub version: Option<VectorClock>,
}

/// Answer to `DeleteRequest`.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct DeleteResponse {
    /// True if something was deleted.
    #[prost(bool, required, tag = "1")]
    pub success: bool,
    /// Set on failure.
    #[prost(message, optional, tag = "2")]
    pub error: Option<Error>,
}

/// Operation carried by a `StoreRequest`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RequestType {
    /// Single-key read.
    Get = 0,
    /// Multi-key read.
    GetAll = 1,
    /// Versioned write.
    Put = 2,
    /// Versioned delete.
    Delete = 3,
}

/// Request envelope.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct StoreRequest {
    /// Which sub-message is set.
    #[prost(enumeration = "RequestType", required, tag = "1")]
    pub r#type: i32,
    /// Ask the receiving node to forward to the key's owner.
    #[prost(bool, required, tag = "2")]
    pub should_route: bool,
    /// Target store.
    #[prost(string, required, tag = "3")]
    pub store: String,
    /// Set for `GET`.
    #[prost(message, optional, tag = "4")]
    pub get: Option<GetRequest>,
    /// Set for `GET_ALL`.
    #[prost(message, optional, tag = "5")]
    pub get_all: Option<GetAllRequest>,
    /// Set for `PUT`.
    #[prost(message, optional, tag = "6")]
    pub put: Option<PutRequest>,
    /// Set for `DELETE`.
    #[prost(message, optional, tag = "7")]
    pub delete: Option<DeleteRequest>,
}
