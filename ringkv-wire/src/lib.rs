//! RingKV Wire - the client protocol codec.
//!
//! The protocol is a strict request/response stream over TCP:
//!
//! 1. The client writes `pb0`; the server answers `ok`.
//! 2. Each request is a length-prefixed `StoreRequest` envelope.
//! 3. Each response is a length-prefixed, operation-specific message.
//!
//! Frames carry no request identifier, so callers must match responses to
//! requests by order.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod proto;

pub use codec::{
    decode_request, decode_response, encode_error_response, encode_request, encode_response,
    read_frame, request_type, write_frame, Operation, Request, Response, FRAME_HEADER_SIZE,
    MAX_FRAME_BYTES, PROTOCOL_ACK, PROTOCOL_ID,
};
pub use proto::RequestType;
