use std::io::Cursor;

use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to serialize flight payload: {0}")]
    Serialize(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("failed to deserialize flight payload: {0}")]
    Deserialize(#[from] ciborium::de::Error<std::io::Error>),
}

/// Encode a flight payload as canonical CBOR.
pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CodecError>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)?;
    Ok(buf)
}

/// Decode a flight payload from CBOR bytes.
pub fn from_slice<T>(bytes: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    let mut cursor = Cursor::new(bytes);
    Ok(ciborium::de::from_reader(&mut cursor)?)
}
