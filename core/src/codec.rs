//! Turns raw response bytes into typed values.

use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Decodes a response body into the operation's expected result type.
///
/// Decoding is synchronous: it runs over bytes that have already been
/// received.
pub trait Codec: Send + Sync {
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// serde_json codec. The default for every `Query`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
