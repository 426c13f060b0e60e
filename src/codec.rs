//! Pluggable key/value serialization.
//!
//! The engine treats encoded bytes as opaque; the only requirement is the
//! round-trip identity `decode(encode(x)) == x` and that an encoding is
//! self-delimiting, so pairs can be concatenated into one exchange buffer.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Encoder/decoder pair for one type.
///
/// `decode` consumes from the front of the slice and must leave `bytes`
/// positioned at the first byte after the value it read.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<()>;
    fn decode(&self, bytes: &mut &[u8]) -> Result<T>;
}

/// Default codec: compact self-delimiting binary encoding via serde.
#[derive(Clone, Copy, Default)]
pub struct Bincode;

impl<T> Codec<T> for Bincode
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<()> {
        bincode::serialize_into(&mut *out, value).context("encode value")
    }

    fn decode(&self, bytes: &mut &[u8]) -> Result<T> {
        bincode::deserialize_from(bytes).context("decode value")
    }
}
