//! Client protocol codec.
//!
//! Converts between domain requests/responses and length-prefixed protobuf
//! frames.
//!
//! # Wire Format
//!
//! ```text
//! ┌─────────────────┬────────────────────────────────────────────────┐
//! │  Length (4B)    │                  Payload                       │
//! │   big-endian    │  StoreRequest  /  {Get,GetAll,Put,Delete}Resp  │
//! └─────────────────┴────────────────────────────────────────────────┘
//! ```
//!
//! Responses carry no request identifier and no operation tag: the decoder
//! must be told which request type the frame answers.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use ringkv_core::{ClockEntry, Error, NodeId, Result, VectorClock, Versioned};
use tracing::debug;

use crate::proto::{self, RequestType};

/// Identifier the client writes right after connecting.
pub const PROTOCOL_ID: &[u8] = b"pb0";

/// Acknowledgment the server sends back when it accepts `PROTOCOL_ID`.
pub const PROTOCOL_ACK: &[u8] = b"ok";

/// Maximum frame payload size (64 MB).
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Converts a raw operation code into a request type.
///
/// # Errors
/// Returns a config error for codes outside the four supported operations.
pub fn request_type(code: i32) -> Result<RequestType> {
    RequestType::try_from(code)
        .map_err(|_| Error::config(format!("unsupported operation type {code}")))
}

/// The operation of a request and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read one key.
    Get {
        /// The key.
        key: Bytes,
    },
    /// Read several keys at once.
    GetAll {
        /// The keys.
        keys: Vec<Bytes>,
    },
    /// Write a value at a version.
    Put {
        /// The key.
        key: Bytes,
        /// Value and version to write.
        versioned: Versioned,
    },
    /// Delete a key at a version.
    Delete {
        /// The key.
        key: Bytes,
        /// Version being deleted.
        version: VectorClock,
    },
}

/// A request to one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Target store.
    pub store: String,
    /// Ask the receiving node to forward to the key's owner.
    pub should_route: bool,
    /// What to do.
    pub operation: Operation,
}

impl Request {
    /// Builds a `GET`.
    #[must_use]
    pub fn get(store: impl Into<String>, key: impl Into<Bytes>) -> Self {
        Self::new(store, Operation::Get { key: key.into() })
    }

    /// Builds a `GET_ALL`.
    #[must_use]
    pub fn get_all(store: impl Into<String>, keys: Vec<Bytes>) -> Self {
        Self::new(store, Operation::GetAll { keys })
    }

    /// Builds a `PUT`.
    #[must_use]
    pub fn put(store: impl Into<String>, key: impl Into<Bytes>, versioned: Versioned) -> Self {
        Self::new(
            store,
            Operation::Put {
                key: key.into(),
                versioned,
            },
        )
    }

    /// Builds a `DELETE`.
    #[must_use]
    pub fn delete(store: impl Into<String>, key: impl Into<Bytes>, version: VectorClock) -> Self {
        Self::new(
            store,
            Operation::Delete {
                key: key.into(),
                version,
            },
        )
    }

    fn new(store: impl Into<String>, operation: Operation) -> Self {
        Self {
            store: store.into(),
            should_route: false,
            operation,
        }
    }

    /// Sets the should-route flag.
    #[must_use]
    pub const fn with_should_route(mut self, should_route: bool) -> Self {
        self.should_route = should_route;
        self
    }

    /// Returns the request's operation type.
    #[must_use]
    pub const fn request_type(&self) -> RequestType {
        match self.operation {
            Operation::Get { .. } => RequestType::Get,
            Operation::GetAll { .. } => RequestType::GetAll,
            Operation::Put { .. } => RequestType::Put,
            Operation::Delete { .. } => RequestType::Delete,
        }
    }
}

/// A decoded, successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Every version held for the key; empty if the key is missing.
    Get(Vec<Versioned>),
    /// Found keys with their versions; missing keys are absent.
    GetAll(Vec<(Bytes, Vec<Versioned>)>),
    /// The write was accepted.
    Put,
    /// The delete was processed.
    Delete {
        /// True if something was deleted.
        deleted: bool,
    },
}

impl Response {
    /// Returns the operation type this response answers.
    #[must_use]
    pub const fn request_type(&self) -> RequestType {
        match self {
            Self::Get(_) => RequestType::Get,
            Self::GetAll(_) => RequestType::GetAll,
            Self::Put => RequestType::Put,
            Self::Delete { .. } => RequestType::Delete,
        }
    }
}

/// Reads a length-prefixed frame from the buffer.
///
/// Returns `None` if not enough data is available yet; the buffer is left
/// untouched in that case.
///
/// # Errors
/// Returns a decode error if the declared length exceeds `max_bytes`.
pub fn read_frame(buf: &mut BytesMut, max_bytes: usize) -> Result<Option<Bytes>> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length > max_bytes {
        return Err(Error::Decode {
            message: format!("frame too large: {length} bytes (max {max_bytes})"),
        });
    }

    let total_size = FRAME_HEADER_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_SIZE);
    Ok(Some(buf.split_to(length).freeze()))
}

/// Writes a length-prefixed frame to the buffer.
///
/// # Errors
/// Returns a decode error if the payload exceeds `MAX_FRAME_BYTES`.
pub fn write_frame(buf: &mut BytesMut, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(Error::Decode {
            message: format!(
                "frame too large: {} bytes (max {MAX_FRAME_BYTES})",
                payload.len()
            ),
        });
    }
    // Safe cast: bounded by MAX_FRAME_BYTES which fits in u32.
    #[allow(clippy::cast_possible_truncation)]
    let length = payload.len() as u32;
    buf.reserve(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32(length);
    buf.put_slice(payload);
    Ok(())
}

fn frame_message<M: Message>(message: &M) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + message.encoded_len());
    write_frame(&mut buf, &message.encode_to_vec())?;
    Ok(buf.freeze())
}

/// Encodes a request into a length-prefixed frame.
///
/// # Errors
/// Returns an error if the encoded request exceeds `MAX_FRAME_BYTES`.
pub fn encode_request(request: &Request) -> Result<Bytes> {
    let mut envelope = proto::StoreRequest {
        r#type: request.request_type() as i32,
        should_route: request.should_route,
        store: request.store.clone(),
        ..proto::StoreRequest::default()
    };

    match &request.operation {
        Operation::Get { key } => {
            envelope.get = Some(proto::GetRequest {
                key: Some(key.clone()),
            });
        }
        Operation::GetAll { keys } => {
            envelope.get_all = Some(proto::GetAllRequest { keys: keys.clone() });
        }
        Operation::Put { key, versioned } => {
            envelope.put = Some(proto::PutRequest {
                key: key.clone(),
                versioned: Some(versioned_to_proto(versioned)),
            });
        }
        Operation::Delete { key, version } => {
            envelope.delete = Some(proto::DeleteRequest {
                key: key.clone(),
                version: Some(clock_to_proto(version)),
            });
        }
    }

    frame_message(&envelope)
}

/// Decodes a request payload (without the length prefix).
///
/// # Errors
/// Returns a config error for an unknown operation type and a decode error
/// for malformed payloads or a missing sub-message.
pub fn decode_request(payload: &[u8]) -> Result<Request> {
    let envelope = proto::StoreRequest::decode(payload).map_err(Error::decode)?;
    let kind = request_type(envelope.r#type)?;

    let operation = match kind {
        RequestType::Get => {
            let get = envelope.get.ok_or_else(|| missing("get"))?;
            Operation::Get {
                key: get.key.ok_or_else(|| missing("get.key"))?,
            }
        }
        RequestType::GetAll => {
            let get_all = envelope.get_all.ok_or_else(|| missing("get_all"))?;
            Operation::GetAll { keys: get_all.keys }
        }
        RequestType::Put => {
            let put = envelope.put.ok_or_else(|| missing("put"))?;
            Operation::Put {
                key: put.key,
                versioned: versioned_from_proto(
                    put.versioned.ok_or_else(|| missing("put.versioned"))?,
                )?,
            }
        }
        RequestType::Delete => {
            let delete = envelope.delete.ok_or_else(|| missing("delete"))?;
            Operation::Delete {
                key: delete.key,
                version: clock_from_proto(
                    delete.version.ok_or_else(|| missing("delete.version"))?,
                ),
            }
        }
    };

    Ok(Request {
        store: envelope.store,
        should_route: envelope.should_route,
        operation,
    })
}

/// Encodes a successful response into a length-prefixed frame.
///
/// # Errors
/// Returns an error if the encoded response exceeds `MAX_FRAME_BYTES`.
pub fn encode_response(response: &Response) -> Result<Bytes> {
    match response {
        Response::Get(versions) => frame_message(&proto::GetResponse {
            versioned: versions.iter().map(versioned_to_proto).collect(),
            error: None,
        }),
        Response::GetAll(values) => frame_message(&proto::GetAllResponse {
            values: values
                .iter()
                .map(|(key, versions)| proto::KeyedVersions {
                    key: key.clone(),
                    versions: versions.iter().map(versioned_to_proto).collect(),
                })
                .collect(),
            error: None,
        }),
        Response::Put => frame_message(&proto::PutResponse { error: None }),
        Response::Delete { deleted } => frame_message(&proto::DeleteResponse {
            success: *deleted,
            error: None,
        }),
    }
}

/// Encodes an error response for the given operation type.
///
/// # Errors
/// Returns an error if the encoded response exceeds `MAX_FRAME_BYTES`.
pub fn encode_error_response(kind: RequestType, code: i32, message: &str) -> Result<Bytes> {
    let error = Some(proto::Error {
        error_code: code,
        error_message: message.to_string(),
    });
    match kind {
        RequestType::Get => frame_message(&proto::GetResponse {
            versioned: Vec::new(),
            error,
        }),
        RequestType::GetAll => frame_message(&proto::GetAllResponse {
            values: Vec::new(),
            error,
        }),
        RequestType::Put => frame_message(&proto::PutResponse { error }),
        RequestType::Delete => frame_message(&proto::DeleteResponse {
            success: false,
            error,
        }),
    }
}

/// Decodes a response payload (without the length prefix) for a request of
/// type `kind`.
///
/// # Errors
/// Returns `Error::Server` if the server reported a non-zero error code and
/// a decode error if the payload is malformed.
pub fn decode_response(kind: RequestType, payload: &[u8]) -> Result<Response> {
    match kind {
        RequestType::Get => {
            let response = proto::GetResponse::decode(payload).map_err(Error::decode)?;
            check_server_error(response.error)?;
            let versions = response
                .versioned
                .into_iter()
                .map(versioned_from_proto)
                .collect::<Result<Vec<_>>>()?;
            Ok(Response::Get(versions))
        }
        RequestType::GetAll => {
            let response = proto::GetAllResponse::decode(payload).map_err(Error::decode)?;
            check_server_error(response.error)?;
            let values = response
                .values
                .into_iter()
                .map(|keyed| {
                    let versions = keyed
                        .versions
                        .into_iter()
                        .map(versioned_from_proto)
                        .collect::<Result<Vec<_>>>()?;
                    Ok((keyed.key, versions))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Response::GetAll(values))
        }
        RequestType::Put => {
            let response = proto::PutResponse::decode(payload).map_err(Error::decode)?;
            check_server_error(response.error)?;
            Ok(Response::Put)
        }
        RequestType::Delete => {
            let response = proto::DeleteResponse::decode(payload).map_err(Error::decode)?;
            check_server_error(response.error)?;
            Ok(Response::Delete {
                deleted: response.success,
            })
        }
    }
}

fn check_server_error(error: Option<proto::Error>) -> Result<()> {
    match error {
        Some(err) if err.error_code != 0 => {
            debug!(
                code = err.error_code,
                message = %err.error_message,
                "Server reported error"
            );
            Err(Error::Server {
                code: err.error_code,
                message: err.error_message,
            })
        }
        _ => Ok(()),
    }
}

fn missing(field: &str) -> Error {
    Error::Decode {
        message: format!("missing field '{field}'"),
    }
}

fn clock_to_proto(clock: &VectorClock) -> proto::VectorClock {
    proto::VectorClock {
        entries: clock
            .entries()
            .iter()
            .map(|e| proto::ClockEntry {
                node_id: e.node_id.get(),
                version: e.version,
            })
            .collect(),
        timestamp: Some(clock.timestamp()),
    }
}

fn clock_from_proto(clock: proto::VectorClock) -> VectorClock {
    VectorClock::from_entries(
        clock.entries.into_iter().map(|e| ClockEntry {
            node_id: NodeId::new(e.node_id),
            version: e.version,
        }),
        clock.timestamp.unwrap_or(0),
    )
}

fn versioned_to_proto(versioned: &Versioned) -> proto::Versioned {
    proto::Versioned {
        value: versioned.value.clone(),
        version: Some(clock_to_proto(&versioned.version)),
    }
}

fn versioned_from_proto(versioned: proto::Versioned) -> Result<Versioned> {
    let version = versioned.version.ok_or_else(|| missing("versioned.version"))?;
    Ok(Versioned {
        value: versioned.value,
        version: clock_from_proto(version),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(entries: &[(i32, i64)], timestamp: i64) -> VectorClock {
        VectorClock::from_entries(
            entries.iter().map(|&(node, version)| ClockEntry {
                node_id: NodeId::new(node),
                version,
            }),
            timestamp,
        )
    }

    /// Strips the length prefix, checking it matches the payload.
    fn unframe(frame: &Bytes) -> Bytes {
        let mut buf = BytesMut::from(&frame[..]);
        let payload = read_frame(&mut buf, MAX_FRAME_BYTES).unwrap().unwrap();
        assert!(buf.is_empty());
        payload
    }

    #[test]
    fn test_read_frame_incomplete() {
        let mut buf = BytesMut::from(&[0, 0, 0, 10][..]);
        assert!(read_frame(&mut buf, MAX_FRAME_BYTES).unwrap().is_none());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_read_frame_complete() {
        let mut buf = BytesMut::new();
        buf.put_u32(5);
        buf.put_slice(b"hello");
        buf.put_slice(b"\x00\x00");

        let frame = read_frame(&mut buf, MAX_FRAME_BYTES).unwrap();
        assert_eq!(frame, Some(Bytes::from_static(b"hello")));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_read_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(1025);
        assert!(matches!(
            read_frame(&mut buf, 1024),
            Err(Error::Decode { .. })
        ));
    }

    #[test]
    fn test_write_frame_big_endian_prefix() {
        let mut buf = BytesMut::new();
        write_frame(&mut buf, b"hello").unwrap();
        assert_eq!(&buf[0..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[4..], b"hello");
    }

    #[test]
    fn test_request_round_trip_all_operations() {
        let version = clock(&[(0, 3), (2, 1)], 1_700_000_000_000);
        let requests = vec![
            Request::get("test", Bytes::from_static(b"chocolate")),
            Request::get_all(
                "test",
                vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
            )
            .with_should_route(true),
            Request::put(
                "test",
                Bytes::from_static(b"chocolate"),
                Versioned::new(Bytes::from_static(b"yum"), version.clone()),
            ),
            Request::delete("other", Bytes::from_static(b"chocolate"), version),
        ];

        for request in requests {
            let frame = encode_request(&request).unwrap();
            let decoded = decode_request(&unframe(&frame)).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn test_response_round_trip_all_operations() {
        let v1 = Versioned::new(Bytes::from_static(b"one"), clock(&[(1, 1)], 10));
        let v2 = Versioned::new(Bytes::from_static(b"two"), clock(&[(1, 1), (2, 4)], 20));
        let responses = vec![
            Response::Get(vec![v1.clone(), v2.clone()]),
            Response::Get(Vec::new()),
            Response::GetAll(vec![(Bytes::from_static(b"a"), vec![v1, v2])]),
            Response::Put,
            Response::Delete { deleted: true },
        ];

        for response in responses {
            let frame = encode_response(&response).unwrap();
            let decoded = decode_response(response.request_type(), &unframe(&frame)).unwrap();
            assert_eq!(decoded, response);
        }
    }

    #[test]
    fn test_server_error_is_decoded() {
        let frame = encode_error_response(
            RequestType::Put,
            ringkv_core::ERROR_CODE_OBSOLETE_VERSION,
            "obsolete version",
        )
        .unwrap();
        let err = decode_response(RequestType::Put, &unframe(&frame)).unwrap_err();
        match err {
            Error::Server { code, message } => {
                assert_eq!(code, ringkv_core::ERROR_CODE_OBSOLETE_VERSION);
                assert_eq!(message, "obsolete version");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_error_code_is_success() {
        let frame = encode_error_response(RequestType::Delete, 0, "").unwrap();
        let decoded = decode_response(RequestType::Delete, &unframe(&frame)).unwrap();
        assert_eq!(decoded, Response::Delete { deleted: false });
    }

    #[test]
    fn test_unknown_request_type_is_config_error() {
        assert!(matches!(request_type(4), Err(Error::Config { .. })));
        assert!(matches!(request_type(-1), Err(Error::Config { .. })));
        assert_eq!(request_type(2).unwrap(), RequestType::Put);

        let envelope = proto::StoreRequest {
            r#type: 9,
            store: "test".to_string(),
            ..proto::StoreRequest::default()
        };
        let err = decode_request(&envelope.encode_to_vec()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_missing_sub_message_is_decode_error() {
        let envelope = proto::StoreRequest {
            r#type: RequestType::Put as i32,
            store: "test".to_string(),
            ..proto::StoreRequest::default()
        };
        let err = decode_request(&envelope.encode_to_vec()).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_garbage_payload_is_decode_error() {
        let err = decode_response(RequestType::Get, &[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
