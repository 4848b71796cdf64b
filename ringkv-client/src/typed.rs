//! Typed view over a byte-level store.
//!
//! [`TypedStore`] wraps any [`StoreOperations`] implementation and a
//! [`ValueCodec`], so callers read and write their own value type instead
//! of raw bytes. The codec runs after the client's [`ValueSerializer`]
//! stage on reads and before it on writes.
//!
//! [`ValueSerializer`]: crate::serializer::ValueSerializer

use std::collections::HashMap;

use bytes::Bytes;
use ringkv_core::{Result, Versioned};

use crate::client::{RequestOptions, StoreOperations};
use crate::serializer::ValueCodec;

/// A store whose values are decoded into `C::Value`.
#[derive(Debug)]
pub struct TypedStore<S, C> {
    store: S,
    codec: C,
}

impl<S, C> TypedStore<S, C>
where
    S: StoreOperations,
    C: ValueCodec,
{
    /// Wraps `store`, converting values with `codec`.
    #[must_use]
    pub const fn new(store: S, codec: C) -> Self {
        Self { store, codec }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.store
    }

    /// Unwraps the store.
    #[must_use]
    pub fn into_inner(self) -> S {
        self.store
    }

    /// Reads and decodes `key`.
    ///
    /// # Errors
    /// Returns the store's error, or a decode error from the codec.
    pub async fn get(
        &self,
        key: Bytes,
        options: &RequestOptions,
    ) -> Result<Option<Versioned<C::Value>>> {
        match self.store.get(key, options).await? {
            Some(found) => found.try_map(|value| self.codec.decode(value)).map(Some),
            None => Ok(None),
        }
    }

    /// Reads and decodes several keys.
    ///
    /// # Errors
    /// Returns the store's error, or the first decode error.
    pub async fn bulk_get(
        &self,
        keys: Vec<Bytes>,
        options: &RequestOptions,
    ) -> Result<HashMap<Bytes, Versioned<C::Value>>> {
        self.store
            .bulk_get(keys, options)
            .await?
            .into_iter()
            .map(|(key, found)| Ok((key, found.try_map(|value| self.codec.decode(value))?)))
            .collect()
    }

    /// Encodes and writes `value`. Returns it with the version it was
    /// written at.
    ///
    /// # Errors
    /// Returns the codec's error or the store's error.
    pub async fn put(
        &self,
        key: Bytes,
        value: C::Value,
        options: &RequestOptions,
    ) -> Result<Versioned<C::Value>> {
        let stored = self.codec.encode(&value)?;
        let written = self.store.put(key, stored, options).await?;
        Ok(Versioned::typed(value, written.version))
    }

    /// Deletes `key`.
    ///
    /// # Errors
    /// Returns the store's error.
    pub async fn delete(&self, key: Bytes, options: &RequestOptions) -> Result<bool> {
        self.store.delete(key, options).await
    }
}
