//! Pluggable message marshalling.
//!
//! A [`Codec`] turns an application message into the opaque payload of a
//! frame and back. [`JsonCodec`] is the default; wrap any codec in a
//! [`FilteredCodec`] to narrow what a connection may carry.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ProtocolError;

/// Symmetric encoder/decoder for messages of type `M`.
///
/// `decode(encode(m))` must reproduce an equivalent message.
pub trait Codec<M>: Send + Sync {
    fn encode(&self, message: &M) -> Result<Vec<u8>, ProtocolError>;
    fn decode(&self, bytes: &[u8]) -> Result<M, ProtocolError>;
}

/// JSON marshalling via `serde_json`.
///
/// With an internally tagged enum this produces
/// `{"__kind__": "<Kind>", ...fields}` and rejects unknown kinds on decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<M> Codec<M> for JsonCodec
where
    M: Serialize + DeserializeOwned,
{
    fn encode(&self, message: &M) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(message).map_err(ProtocolError::Encode)
    }

    fn decode(&self, bytes: &[u8]) -> Result<M, ProtocolError> {
        serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
    }
}

/// Restricts an inner codec to the messages accepted by `filter`.
///
/// The filter returns `Err(kind_name)` for messages that must not cross
/// the connection. Refused messages fail both directions with
/// [`ProtocolError::Rejected`].
pub struct FilteredCodec<C, F> {
    inner: C,
    filter: F,
}

impl<C, F> FilteredCodec<C, F> {
    pub fn new(inner: C, filter: F) -> Self {
        Self { inner, filter }
    }
}

impl<M, C, F> Codec<M> for FilteredCodec<C, F>
where
    C: Codec<M>,
    F: Fn(&M) -> Result<(), String> + Send + Sync,
{
    fn encode(&self, message: &M) -> Result<Vec<u8>, ProtocolError> {
        (self.filter)(message).map_err(|kind| ProtocolError::Rejected { kind })?;
        self.inner.encode(message)
    }

    fn decode(&self, bytes: &[u8]) -> Result<M, ProtocolError> {
        let message = self.inner.decode(bytes)?;
        (self.filter)(&message).map_err(|kind| ProtocolError::Rejected { kind })?;
        Ok(message)
    }
}

impl<C: fmt::Debug, F> fmt::Debug for FilteredCodec<C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredCodec")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
