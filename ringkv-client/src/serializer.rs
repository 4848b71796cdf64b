//! Value serializers and codecs.
//!
//! A [`ValueSerializer`] is a byte-level stage owned by the client: it runs
//! on put and is reversed on get unless the caller asks for raw bytes.
//! A [`ValueCodec`] maps those bytes to a caller type and is applied by
//! [`TypedStore`](crate::typed::TypedStore).

use bytes::Bytes;
use ringkv_core::{Error, Result};

/// Converts values between their caller form and their stored form.
pub trait ValueSerializer: Send + Sync {
    /// Converts a caller value to stored bytes.
    ///
    /// # Errors
    /// Returns an error if the value cannot be stored.
    fn serialize(&self, value: Bytes) -> Result<Bytes>;

    /// Converts stored bytes back to a caller value.
    ///
    /// # Errors
    /// Returns an error if the stored bytes are malformed.
    fn deserialize(&self, stored: Bytes) -> Result<Bytes>;
}

/// Converts between a caller value type and stored bytes.
pub trait ValueCodec: Send + Sync {
    /// The caller-side value type.
    type Value: Send + Sync;

    /// Encodes a caller value.
    ///
    /// # Errors
    /// Returns an error if the value cannot be encoded.
    fn encode(&self, value: &Self::Value) -> Result<Bytes>;

    /// Decodes stored bytes into a caller value.
    ///
    /// # Errors
    /// Returns a decode error if the bytes are malformed.
    fn decode(&self, stored: Bytes) -> Result<Self::Value>;
}

/// Stores values unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySerializer;

impl ValueSerializer for IdentitySerializer {
    fn serialize(&self, value: Bytes) -> Result<Bytes> {
        Ok(value)
    }

    fn deserialize(&self, stored: Bytes) -> Result<Bytes> {
        Ok(stored)
    }
}

/// Accepts only UTF-8 text, in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl ValueSerializer for StringSerializer {
    fn serialize(&self, value: Bytes) -> Result<Bytes> {
        std::str::from_utf8(&value)
            .map_err(|e| Error::config(format!("value is not UTF-8: {e}")))?;
        Ok(value)
    }

    fn deserialize(&self, stored: Bytes) -> Result<Bytes> {
        std::str::from_utf8(&stored).map_err(Error::decode)?;
        Ok(stored)
    }
}

impl ValueCodec for IdentitySerializer {
    type Value = Bytes;

    fn encode(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }

    fn decode(&self, stored: Bytes) -> Result<Bytes> {
        Ok(stored)
    }
}

impl ValueCodec for StringSerializer {
    type Value = String;

    fn encode(&self, value: &String) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn decode(&self, stored: Bytes) -> Result<String> {
        String::from_utf8(stored.to_vec()).map_err(Error::decode)
    }
}
